//! Error types for Converge.
//!
//! The taxonomy mirrors how failures propagate through a run: fact fetch,
//! compile, and connection errors are fatal to a single host; hook errors
//! are fatal to the entire run; command failures are recorded in the run
//! report rather than raised, so they never appear here.

use thiserror::Error;

use crate::connection::ConnectionError;
use crate::hooks::HookEvent;
use crate::inventory::InventoryError;
use crate::op::OpError;

/// Result type alias for Converge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Converge.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level failure while fetching a fact. Fatal to the host:
    /// we can no longer trust what we know about it.
    #[error("failed to fetch fact '{fact}' on '{host}': {source}")]
    FactFetch {
        /// Target host
        host: String,
        /// Fact name
        fact: String,
        /// Underlying transport error
        #[source]
        source: ConnectionError,
    },

    /// A producer failed while compiling an operation. Fatal to the host's
    /// remaining plan: a bad producer call means the plan itself cannot be
    /// trusted for that host.
    #[error("failed to compile '{op}' for '{host}': {source}")]
    Compile {
        /// Target host
        host: String,
        /// Operation display name
        op: String,
        /// Producer error
        #[source]
        source: OpError,
    },

    /// Failed to open or keep a connection to a host.
    #[error("connection to '{host}' failed: {source}")]
    Connection {
        /// Target host
        host: String,
        /// Underlying transport error
        #[source]
        source: ConnectionError,
    },

    /// A lifecycle hook raised. Fatal to the entire run: hooks validate
    /// preconditions that make continuing unsafe.
    #[error("hook '{event}' failed: {message}")]
    Hook {
        /// The lifecycle event the hook was registered for
        event: HookEvent,
        /// Error message
        message: String,
    },

    /// Invalid universal options on an operation call.
    #[error("invalid operation options: {0}")]
    InvalidOptions(String),

    /// Error loading or querying the inventory.
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Creates a hook error for the given event.
    pub fn hook(event: HookEvent, message: impl Into<String>) -> Self {
        Self::Hook {
            event,
            message: message.into(),
        }
    }

    /// Returns true if this error aborts the entire run rather than a
    /// single host's plan.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Error::Hook { .. })
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Connection { .. } => 3,
            Error::Inventory(_) => 5,
            Error::Hook { .. } => 6,
            _ => 1,
        }
    }
}
