//! Host and group inventory.
//!
//! The inventory names the fleet a run targets: hosts with connection
//! parameters, grouped with group-level data that individual hosts may
//! override. Declared order is preserved; it determines `run_once` host
//! selection and the order serial stages walk the fleet.

pub mod host;

pub use host::Host;

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Errors that can occur during inventory operations.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("duplicate host: {0}")]
    DuplicateHost(String),

    #[error("group '{group}' references unknown host '{host}'")]
    UnknownGroupMember { group: String, host: String },
}

/// Result type for inventory operations.
pub type InventoryResult<T> = Result<T, InventoryError>;

/// The fleet of hosts a run targets, in declared order.
#[derive(Debug, Default)]
pub struct Inventory {
    hosts: IndexMap<String, Arc<Host>>,
    groups: IndexMap<String, Vec<String>>,
}

impl Inventory {
    /// Create an empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an inventory of bare hosts from their names, preserving order.
    pub fn from_names<I, S>(names: I) -> InventoryResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inventory = Self::new();
        for name in names {
            inventory.add_host(Host::new(name))?;
        }
        Ok(inventory)
    }

    /// Load an inventory from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> InventoryResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse an inventory from YAML text.
    pub fn from_yaml(content: &str) -> InventoryResult<Self> {
        let file: InventoryFile = serde_yaml::from_str(content)?;

        let mut hosts: IndexMap<String, Host> = IndexMap::new();
        for (name, entry) in file.hosts {
            if hosts.contains_key(&name) {
                return Err(InventoryError::DuplicateHost(name));
            }
            let entry = entry.unwrap_or_default();

            let mut host = Host::new(&name);
            if let Some(address) = entry.address {
                host = host.with_address(address);
            }
            if let Some(user) = entry.user {
                host = host.with_user(user);
            }
            if let Some(port) = entry.port {
                host = host.with_port(port);
            }
            for (key, value) in entry.data {
                host = host.with_data(key, value);
            }
            hosts.insert(name, host);
        }

        let mut inventory = Self::new();
        for (group_name, entry) in &file.groups {
            for member in &entry.hosts {
                let host = hosts.get_mut(member).ok_or_else(|| {
                    InventoryError::UnknownGroupMember {
                        group: group_name.clone(),
                        host: member.clone(),
                    }
                })?;
                host.merge_group_data(group_name, &entry.data);
            }
            inventory
                .groups
                .insert(group_name.clone(), entry.hosts.clone());
        }

        for (name, host) in hosts {
            inventory.hosts.insert(name, Arc::new(host));
        }

        Ok(inventory)
    }

    /// Add a host, rejecting duplicates.
    pub fn add_host(&mut self, host: Host) -> InventoryResult<()> {
        let name = host.name().to_string();
        if self.hosts.contains_key(&name) {
            return Err(InventoryError::DuplicateHost(name));
        }
        for group in host.groups() {
            self.groups
                .entry(group.clone())
                .or_default()
                .push(name.clone());
        }
        self.hosts.insert(name, Arc::new(host));
        Ok(())
    }

    /// All hosts in declared order.
    pub fn hosts(&self) -> impl Iterator<Item = &Arc<Host>> {
        self.hosts.values()
    }

    /// Look up a host by name.
    pub fn get(&self, name: &str) -> Option<&Arc<Host>> {
        self.hosts.get(name)
    }

    /// Member host names of a group, in declared order.
    pub fn group_hosts(&self, group: &str) -> Option<&[String]> {
        self.groups.get(group).map(Vec::as_slice)
    }

    /// All group names.
    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Number of hosts.
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Whether the inventory holds no hosts.
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

#[derive(Debug, Default, Deserialize)]
struct InventoryFile {
    #[serde(default)]
    hosts: IndexMap<String, Option<HostEntry>>,
    #[serde(default)]
    groups: IndexMap<String, GroupEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct HostEntry {
    address: Option<String>,
    user: Option<String>,
    port: Option<u16>,
    #[serde(default)]
    data: IndexMap<String, JsonValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct GroupEntry {
    #[serde(default)]
    hosts: Vec<String>,
    #[serde(default)]
    data: IndexMap<String, JsonValue>,
}
