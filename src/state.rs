//! Shared run context.
//!
//! [`State`] replaces any ambient "current host" access: it is passed by
//! reference into every producer and scheduler call. It owns the inventory,
//! the run configuration, the hook registry, and the connector, and tracks
//! which hosts have fatally failed so both the compiler and the scheduler
//! exclude them from the remaining plan.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::config::Config;
use crate::connection::{Connection, Connector};
use crate::error::{Error, Result};
use crate::hooks::{HookEvent, HookPayload, Hooks};
use crate::inventory::{Host, Inventory};
use crate::report::ExecutionResult;

/// The shared context of one run.
pub struct State {
    inventory: Inventory,
    config: Config,
    connector: Arc<dyn Connector>,
    hooks: Hooks,
    // host name -> first fatal failure reason
    failed: DashMap<String, String>,
    // host-fatal failures recorded before the scheduler starts
    pending_results: parking_lot::Mutex<Vec<ExecutionResult>>,
}

impl State {
    /// Create a run context.
    pub fn new(inventory: Inventory, config: Config, connector: Arc<dyn Connector>) -> Self {
        Self {
            inventory,
            config,
            connector,
            hooks: Hooks::new(),
            failed: DashMap::new(),
            pending_results: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// The targeted fleet.
    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// The run configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The hook registry.
    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Get the host's connection, opening it on first use.
    ///
    /// `BeforeConnect` hooks fire immediately before the connection is
    /// opened; a hook error is fatal to the entire run. Each host's
    /// connection is opened exactly once and owned by that host for the
    /// rest of the run.
    pub async fn connection(&self, host: &Arc<Host>) -> Result<Arc<dyn Connection>> {
        let conn = host
            .connection
            .get_or_try_init(|| async {
                self.hooks.fire(
                    HookEvent::BeforeConnect,
                    &HookPayload {
                        config: &self.config,
                        host: Some(host),
                    },
                )?;

                info!(host = %host.name(), address = %host.address(), "opening connection");
                self.connector
                    .connect(host)
                    .await
                    .map_err(|e| Error::Connection {
                        host: host.name().to_string(),
                        source: e,
                    })
            })
            .await?;

        Ok(Arc::clone(conn))
    }

    /// Mark a host fatally failed: no further facts are fetched and no
    /// further commands run on it for the rest of the run. The first
    /// recorded reason wins.
    pub fn fail_host(&self, host: &str, reason: impl Into<String>) {
        let reason = reason.into();
        let _ = self.failed.entry(host.to_string()).or_insert_with(|| {
            warn!(host = %host, %reason, "host fatally failed");
            reason
        });
    }

    /// Whether the host has fatally failed.
    pub fn is_failed(&self, host: &str) -> bool {
        self.failed.contains_key(host)
    }

    /// The first fatal failure reason recorded for a host.
    pub fn failure_reason(&self, host: &str) -> Option<String> {
        self.failed.get(host).map(|r| r.value().clone())
    }

    /// Hosts that have not fatally failed, in declared order.
    pub fn active_hosts(&self) -> Vec<Arc<Host>> {
        self.inventory
            .hosts()
            .filter(|h| !self.is_failed(h.name()))
            .cloned()
            .collect()
    }

    /// Record a host-fatal result produced before the scheduler started
    /// (compile errors); the scheduler folds these into the run report.
    pub(crate) fn record_pending(&self, result: ExecutionResult) {
        self.pending_results.lock().push(result);
    }

    /// Drain results recorded before the scheduler started.
    pub(crate) fn take_pending(&self) -> Vec<ExecutionResult> {
        std::mem::take(&mut *self.pending_results.lock())
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("hosts", &self.inventory.len())
            .field("failed", &self.failed.len())
            .finish()
    }
}
