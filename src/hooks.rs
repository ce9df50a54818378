//! Lifecycle hooks.
//!
//! Hooks let deploy code validate preconditions around engine phases: the
//! canonical example checks that required data is present before any
//! connection is opened. They are invoked synchronously, in registration
//! order, and an error from any hook is fatal to the entire run.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use thiserror::Error;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::inventory::Host;

/// Engine phases hooks can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    /// Fired once per host, immediately before its connection is opened.
    BeforeConnect,
    /// Fired once, before the first stage executes.
    BeforeDeploy,
    /// Fired once, after the last stage has concluded on every host.
    AfterDeploy,
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookEvent::BeforeConnect => "before_connect",
            HookEvent::BeforeDeploy => "before_deploy",
            HookEvent::AfterDeploy => "after_deploy",
        };
        f.write_str(name)
    }
}

/// Error raised by a hook callback.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    /// Create a hook error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// What a hook callback sees: the run's configuration and, for per-host
/// events, the affected host.
pub struct HookPayload<'a> {
    /// The run's configuration
    pub config: &'a Config,
    /// The affected host (`None` for run-level events)
    pub host: Option<&'a Host>,
}

type HookFn = Box<dyn Fn(&HookPayload<'_>) -> std::result::Result<(), HookError> + Send + Sync>;

/// Ordered-by-registration hook callbacks, keyed by lifecycle event.
#[derive(Default)]
pub struct Hooks {
    registered: RwLock<HashMap<HookEvent, Vec<HookFn>>>,
}

impl Hooks {
    /// Create an empty hook registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for an event. Callbacks fire in registration
    /// order.
    pub fn register<F>(&self, event: HookEvent, callback: F)
    where
        F: Fn(&HookPayload<'_>) -> std::result::Result<(), HookError> + Send + Sync + 'static,
    {
        self.registered
            .write()
            .entry(event)
            .or_default()
            .push(Box::new(callback));
    }

    /// Fire all callbacks for an event. The first error aborts and is
    /// escalated as run-fatal.
    pub fn fire(&self, event: HookEvent, payload: &HookPayload<'_>) -> Result<()> {
        let registered = self.registered.read();
        let Some(callbacks) = registered.get(&event) else {
            return Ok(());
        };

        for callback in callbacks {
            callback(payload).map_err(|e| Error::hook(event, e.0))?;
        }

        Ok(())
    }

    /// Number of callbacks registered for an event.
    pub fn count(&self, event: HookEvent) -> usize {
        self.registered
            .read()
            .get(&event)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered = self.registered.read();
        let counts: HashMap<_, _> = registered.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("Hooks").field("registered", &counts).finish()
    }
}
