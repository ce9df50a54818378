//! Declared operations: the universal option set, compiled per-host
//! operations, and the staged deploy plan.
//!
//! An operation is the compiled output of one producer call for one host:
//! an already-diffed, host-specific command list plus the execution options
//! every producer accepts. Operations are grouped into stages ([`OpGroup`])
//! which the scheduler executes fleet-wide with barriers between them.

pub mod compiler;

pub use compiler::{Deploy, OpContext, Producer};

use indexmap::IndexMap;
use thiserror::Error;

/// Error raised by a producer while building its command list.
#[derive(Debug, Error)]
pub enum OpError {
    /// The producer cannot converge this host as asked.
    #[error("{0}")]
    Failed(String),

    /// A fact the producer requires is unavailable on this host.
    #[error("required fact '{0}' is unavailable")]
    FactUnavailable(String),

    /// An engine error surfaced inside the producer (fact fetch, hook,
    /// connection); unwrapped by the compiler and escalated with its own
    /// severity instead of being treated as a producer failure.
    #[error(transparent)]
    Engine(Box<crate::error::Error>),
}

impl OpError {
    /// Create a producer failure from a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<crate::error::Error> for OpError {
    fn from(error: crate::error::Error) -> Self {
        OpError::Engine(Box::new(error))
    }
}

/// Execution options recognized on every operation call, independent of
/// producer.
#[derive(Debug, Clone, Default)]
pub struct OpOptions {
    /// Display label (defaults to the producer kind)
    pub name: Option<String>,
    /// Run commands under sudo
    pub sudo: bool,
    /// User to sudo to; requires `sudo`
    pub sudo_user: Option<String>,
    /// Record command failures without failing the host's plan
    pub ignore_errors: bool,
    /// Execute target hosts one at a time instead of concurrently
    pub serial: bool,
    /// Execute on exactly one host (first declared with non-empty commands)
    pub run_once: bool,
    /// Per remote command timeout in seconds (not local work)
    pub timeout: Option<u64>,
    /// Group name binding this call with others into one atomic unit
    pub group: Option<String>,
}

impl OpOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the display label.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Run commands under sudo.
    pub fn sudo(mut self) -> Self {
        self.sudo = true;
        self
    }

    /// Run commands under sudo as the given user.
    pub fn sudo_user(mut self, user: impl Into<String>) -> Self {
        self.sudo = true;
        self.sudo_user = Some(user.into());
        self
    }

    /// Record command failures without failing the host's plan.
    pub fn ignore_errors(mut self) -> Self {
        self.ignore_errors = true;
        self
    }

    /// Execute target hosts one at a time.
    pub fn serial(mut self) -> Self {
        self.serial = true;
        self
    }

    /// Execute on exactly one host.
    pub fn run_once(mut self) -> Self {
        self.run_once = true;
        self
    }

    /// Set the per-command timeout in seconds.
    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    /// Bind this call into the named operation group.
    pub fn group(mut self, name: impl Into<String>) -> Self {
        self.group = Some(name.into());
        self
    }

    /// Validate option combinations. Called once per declared operation,
    /// before any host is compiled.
    pub fn validate(&self) -> Result<(), String> {
        if self.sudo_user.is_some() && !self.sudo {
            return Err("sudo_user requires sudo".to_string());
        }
        if self.timeout == Some(0) {
            return Err("timeout must be at least 1 second".to_string());
        }
        Ok(())
    }
}

/// One producer's compiled, host-specific result plus execution options.
/// Immutable after compilation; consumed exactly once by the scheduler.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Display label
    pub name: String,
    /// Producer kind, e.g. `"apt.packages"`
    pub kind: String,
    /// Ordered commands converging current state to declared state; empty
    /// when the host is already converged
    pub commands: Vec<String>,
    /// Universal execution options
    pub options: OpOptions,
}

impl Operation {
    /// Whether the host was already converged at compile time.
    pub fn is_noop(&self) -> bool {
        self.commands.is_empty()
    }
}

/// An ordered set of operations treated as one atomic execution and
/// reporting unit. Unnamed groups hold the single operation of one
/// declared call; named groups merge every call sharing the name.
#[derive(Debug, Default)]
pub struct OpGroup {
    name: Option<String>,
    ops: IndexMap<String, Vec<Operation>>,
}

impl OpGroup {
    /// Create a group, optionally named.
    pub fn new(name: Option<String>) -> Self {
        Self {
            name,
            ops: IndexMap::new(),
        }
    }

    /// The group's explicit name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Display label: the explicit name, or the first member operation's.
    pub fn label(&self) -> &str {
        if let Some(name) = &self.name {
            return name;
        }
        self.ops
            .values()
            .flat_map(|ops| ops.first())
            .map(|op| op.name.as_str())
            .next()
            .unwrap_or("(empty)")
    }

    /// Append a compiled operation for a host.
    pub fn push(&mut self, host: impl Into<String>, op: Operation) {
        self.ops.entry(host.into()).or_default().push(op);
    }

    /// Host names with operations in this group, in declared order.
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.ops.keys().map(String::as_str)
    }

    /// Operations for one host, in declared order.
    pub fn ops_for(&self, host: &str) -> &[Operation] {
        self.ops.get(host).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether any member operation is marked serial.
    pub fn serial(&self) -> bool {
        self.ops
            .values()
            .flatten()
            .any(|op| op.options.serial)
    }

    /// Whether any member operation is marked run_once.
    pub fn run_once(&self) -> bool {
        self.ops
            .values()
            .flatten()
            .any(|op| op.options.run_once)
    }

    /// Whether the host's member operations are all no-ops.
    pub fn is_noop_for(&self, host: &str) -> bool {
        self.ops_for(host).iter().all(Operation::is_noop)
    }

    /// Whether no host has any commands in this group.
    pub fn is_empty(&self) -> bool {
        self.ops.values().flatten().all(Operation::is_noop)
    }
}

/// The full ordered sequence of operation groups, in script order.
#[derive(Debug, Default)]
pub struct DeployPlan {
    stages: Vec<OpGroup>,
}

impl DeployPlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a compiled operation for a host.
    ///
    /// Calls naming an existing group merge into it at its original
    /// position; everything else opens a new stage.
    pub fn push(&mut self, group: Option<&str>, host: &str, op: Operation) {
        if let Some(name) = group {
            if let Some(stage) = self
                .stages
                .iter_mut()
                .find(|s| s.name() == Some(name))
            {
                stage.push(host, op);
                return;
            }
            let mut stage = OpGroup::new(Some(name.to_string()));
            stage.push(host, op);
            self.stages.push(stage);
        } else {
            let mut stage = OpGroup::new(None);
            stage.push(host, op);
            self.stages.push(stage);
        }
    }

    /// Open a stage for a declared call even if no host compiled into it.
    pub(crate) fn push_empty(&mut self, group: Option<&str>) {
        if let Some(name) = group {
            if self.stages.iter().any(|s| s.name() == Some(name)) {
                return;
            }
            self.stages.push(OpGroup::new(Some(name.to_string())));
        } else {
            self.stages.push(OpGroup::new(None));
        }
    }

    /// The ordered stages.
    pub fn stages(&self) -> &[OpGroup] {
        &self.stages
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the plan has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
