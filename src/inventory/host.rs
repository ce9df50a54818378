//! A single managed host.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tokio::sync::OnceCell;

use crate::connection::Connection;
use crate::facts::FactCache;

/// A host targeted by a run: connection identity, group memberships, data
/// overrides, plus the run-scoped resources it exclusively owns: its
/// [`FactCache`] and, once opened, its connection handle.
pub struct Host {
    name: String,
    address: Option<String>,
    user: Option<String>,
    port: u16,
    groups: Vec<String>,
    data: IndexMap<String, JsonValue>,
    facts: FactCache,
    pub(crate) connection: OnceCell<Arc<dyn Connection>>,
}

impl Host {
    /// Create a host known only by name (the name doubles as the address).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            user: None,
            port: 22,
            groups: Vec::new(),
            data: IndexMap::new(),
            facts: FactCache::new(),
            connection: OnceCell::new(),
        }
    }

    /// Set the connection address (defaults to the host name).
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set the login user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the SSH port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Add a group membership.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    /// Set a data value (overrides group data of the same key).
    pub fn with_data(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// The host's inventory name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The address to connect to.
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.name)
    }

    /// The login user, if configured.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// The SSH port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Group memberships.
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Whether the host belongs to the named group.
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Merged data for this host (group data overridden by host data).
    pub fn data(&self) -> &IndexMap<String, JsonValue> {
        &self.data
    }

    /// Shortcut for a string-valued data key.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// The host's fact cache.
    pub fn facts(&self) -> &FactCache {
        &self.facts
    }

    pub(crate) fn merge_group_data(&mut self, group: &str, data: &IndexMap<String, JsonValue>) {
        if !self.groups.iter().any(|g| g == group) {
            self.groups.push(group.to_string());
        }
        for (key, value) in data {
            // host data wins
            if !self.data.contains_key(key) {
                self.data.insert(key.clone(), value.clone());
            }
        }
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("user", &self.user)
            .field("port", &self.port)
            .field("groups", &self.groups)
            .field("data", &self.data)
            .field("connected", &self.connection.initialized())
            .finish()
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Host {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_host_defaults() {
        let host = Host::new("web1");
        assert_eq!(host.name(), "web1");
        assert_eq!(host.address(), "web1");
        assert_eq!(host.port(), 22);
        assert!(host.user().is_none());
    }

    #[test]
    fn test_host_builder() {
        let host = Host::new("web1")
            .with_address("10.0.0.5")
            .with_user("deploy")
            .with_port(2222)
            .with_group("web")
            .with_data("app_dir", json!("/srv/app"));

        assert_eq!(host.address(), "10.0.0.5");
        assert_eq!(host.user(), Some("deploy"));
        assert_eq!(host.port(), 2222);
        assert!(host.in_group("web"));
        assert_eq!(host.data_str("app_dir"), Some("/srv/app"));
    }

    #[test]
    fn test_group_data_does_not_override_host_data() {
        let mut host = Host::new("web1").with_data("role", json!("special"));

        let mut group_data = IndexMap::new();
        group_data.insert("role".to_string(), json!("web"));
        group_data.insert("region".to_string(), json!("eu"));
        host.merge_group_data("web", &group_data);

        assert_eq!(host.data_str("role"), Some("special"));
        assert_eq!(host.data_str("region"), Some("eu"));
        assert!(host.in_group("web"));
    }
}
