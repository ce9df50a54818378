//! Fact gathering and caching.
//!
//! A fact is a named, optionally parameterized query about live state on a
//! host: a remote command template plus a parser from raw output to a JSON
//! value. Facts are the only thing producers are allowed to read, which is
//! what makes compiled command lists reproducible.
//!
//! Fetched values are memoized per host in a [`FactCache`] for the life of
//! the run. There is no TTL: an operation that changes the underlying state
//! is expected to [`invalidate`](FactCache::invalidate) the affected entry.

pub mod packages;
pub mod server;

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::connection::{Connection, ConnectionError, ExecuteOptions};

/// A cached fact value. `None` is the "unavailable" sentinel: the queried
/// subsystem is absent or the query returned nothing parseable. This is
/// distinct from a transport failure, which is an error.
pub type FactValue = Option<JsonValue>;

/// A named query against live host state.
pub trait Fact: Send + Sync {
    /// Unique fact name, e.g. `"deb_packages"`.
    fn name(&self) -> &'static str;

    /// The shell command that answers this query, rendered for `args`.
    fn command(&self, args: &[String]) -> String;

    /// Parse raw command output into a value. Returning `None` marks the
    /// fact unavailable.
    fn parse(&self, output: &str) -> FactValue;
}

/// Cache key: fact name plus its argument tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FactKey {
    name: &'static str,
    args: Vec<String>,
}

/// Per-host memoized fact store with single-flight fetch.
///
/// Concurrent readers of the same (fact, args) key share one in-flight
/// remote query and receive the same result.
#[derive(Debug, Default)]
pub struct FactCache {
    entries: parking_lot::Mutex<HashMap<FactKey, Arc<OnceCell<FactValue>>>>,
}

impl FactCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a fact value, fetching it over `conn` on a miss.
    ///
    /// A command that exits non-zero (e.g. querying a package manager that
    /// is not installed) yields `None`; only transport failures are errors,
    /// and nothing is cached for them so the next read retries.
    pub async fn get(
        &self,
        conn: &dyn Connection,
        fact: &dyn Fact,
        args: &[String],
    ) -> Result<FactValue, ConnectionError> {
        let cell = self.cell(fact.name(), args);

        let value = cell
            .get_or_try_init(|| async {
                let command = fact.command(args);
                debug!(fact = fact.name(), %command, "fetching fact");

                let result = conn.execute(&command, Some(ExecuteOptions::new())).await?;
                if result.success {
                    Ok::<FactValue, ConnectionError>(fact.parse(&result.stdout))
                } else {
                    Ok(None)
                }
            })
            .await?;

        Ok(value.clone())
    }

    /// Remove one cached entry, forcing a fresh read on next access. Used
    /// after an operation is known to have changed the underlying state.
    pub fn invalidate(&self, fact: &dyn Fact, args: &[String]) {
        let key = FactKey {
            name: fact.name(),
            args: args.to_vec(),
        };
        self.entries.lock().remove(&key);
    }

    /// Remove all cached entries for this host.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of cached (including in-flight) entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn cell(&self, name: &'static str, args: &[String]) -> Arc<OnceCell<FactValue>> {
        let key = FactKey {
            name,
            args: args.to_vec(),
        };
        self.entries
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }
}

/// All built-in facts, for name-based lookup from the CLI.
static REGISTRY: Lazy<Vec<&'static dyn Fact>> = Lazy::new(|| {
    vec![
        &server::Os,
        &server::LinuxDistribution,
        &server::Users,
        &server::Date,
        &server::File,
        &packages::DebPackages,
        &packages::RpmPackages,
    ]
});

/// Look up a built-in fact by name.
pub fn lookup(name: &str) -> Option<&'static dyn Fact> {
    REGISTRY.iter().find(|f| f.name() == name).copied()
}

/// Names of all built-in facts.
pub fn names() -> Vec<&'static str> {
    REGISTRY.iter().map(|f| f.name()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_fact() {
        assert!(lookup("deb_packages").is_some());
        assert!(lookup("os").is_some());
    }

    #[test]
    fn test_lookup_unknown_fact() {
        assert!(lookup("no_such_fact").is_none());
    }

    #[test]
    fn test_registry_names_unique() {
        let mut names = names();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }
}
