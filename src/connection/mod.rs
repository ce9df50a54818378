//! Connection layer for remote host communication.
//!
//! This module provides a unified interface for executing commands and
//! transferring files across transport mechanisms. The engine never talks
//! to a transport directly: facts are fetched and compiled commands are run
//! through the [`Connection`] trait, and connections are opened one per
//! host through the [`Connector`] trait.
//!
//! # Supported Transports
//!
//! - **OpenSSH** ([`OpenSshConnection`]): drives the system `ssh` client
//!   with connection multiplexing, so no host-side agent is required
//! - **Local** ([`LocalConnection`]): direct execution on the control node
//!
//! # Example
//!
//! ```rust,ignore
//! use converge::connection::{Connection, ExecuteOptions, LocalConnection};
//!
//! let conn = LocalConnection::new();
//! let result = conn.execute("uname -a", None).await?;
//! println!("{}", result.stdout);
//!
//! let opts = ExecuteOptions::new().with_escalation(Some("root".into()));
//! conn.execute("systemctl restart nginx", Some(opts)).await?;
//! ```

pub mod local;
pub mod ssh;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use local::LocalConnection;
pub use ssh::{OpenSshConnection, SshOptions};

use crate::inventory::Host;

/// Errors that can occur during connection operations.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Failed to establish the initial connection to the host.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Command execution failed (not to be confused with non-zero exit code).
    #[error("command execution failed: {0}")]
    ExecutionFailed(String),

    /// File upload failed.
    #[error("file transfer failed: {0}")]
    TransferFailed(String),

    /// Command exceeded its timeout. The scheduler treats this exactly like
    /// a non-zero exit code, subject to `ignore_errors`.
    #[error("command timed out after {0} seconds")]
    Timeout(u64),

    /// Connection was closed unexpectedly mid-run.
    #[error("connection closed")]
    ConnectionClosed,

    /// I/O error during connection operations.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// The result of executing a command on a connection.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit code of the command (0 indicates success).
    pub exit_code: i32,
    /// Content written to standard output.
    pub stdout: String,
    /// Content written to standard error.
    pub stderr: String,
    /// Convenience flag: `true` if `exit_code == 0`.
    pub success: bool,
}

impl CommandResult {
    /// Create a new successful command result
    pub fn success(stdout: String, stderr: String) -> Self {
        Self {
            exit_code: 0,
            stdout,
            stderr,
            success: true,
        }
    }

    /// Create a new failed command result
    pub fn failure(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            success: false,
        }
    }

    /// Get the combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Options for command execution.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Environment variables to set
    pub env: HashMap<String, String>,
    /// Timeout in seconds (None for no timeout)
    pub timeout: Option<u64>,
    /// Run the command with privilege escalation (sudo)
    pub escalate: bool,
    /// User to escalate to (default: root)
    pub escalate_user: Option<String>,
}

impl ExecuteOptions {
    /// Create new execute options
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable privilege escalation, optionally to a specific user
    pub fn with_escalation(mut self, user: Option<String>) -> Self {
        self.escalate = true;
        self.escalate_user = user;
        self
    }
}

/// The connection trait all transport implementations must implement.
///
/// A connection is exclusively owned by one host for the duration of a run
/// and is never shared across hosts.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the connection identifier (hostname or address)
    fn identifier(&self) -> &str;

    /// Check if the connection is still usable
    async fn is_alive(&self) -> bool;

    /// Execute a command on the host
    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult>;

    /// Upload a local file to the host
    async fn upload(&self, local_path: &Path, remote_path: &Path) -> ConnectionResult<()>;

    /// Upload content directly to a file on the host
    async fn upload_content(&self, content: &[u8], remote_path: &Path) -> ConnectionResult<()>;

    /// Close the connection
    async fn close(&self) -> ConnectionResult<()>;
}

/// Factory opening one [`Connection`] per host.
///
/// The engine calls this lazily, the first time a host's facts are read or
/// its commands are executed, after firing `BeforeConnect` hooks.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to the given host.
    async fn connect(&self, host: &Host) -> ConnectionResult<Arc<dyn Connection>>;
}

/// Default connector: local execution for loopback-ish hosts, OpenSSH for
/// everything else.
pub struct DefaultConnector {
    ssh: SshOptions,
}

impl DefaultConnector {
    /// Create a connector with default SSH options.
    pub fn new() -> Self {
        Self {
            ssh: SshOptions::default(),
        }
    }

    /// Create a connector with custom SSH options.
    pub fn with_ssh_options(ssh: SshOptions) -> Self {
        Self { ssh }
    }

    fn is_local(host: &Host) -> bool {
        let address = host.address();
        matches!(address, "localhost" | "127.0.0.1" | "local" | "@local")
    }
}

impl Default for DefaultConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, host: &Host) -> ConnectionResult<Arc<dyn Connection>> {
        if Self::is_local(host) {
            return Ok(Arc::new(LocalConnection::with_identifier(host.name())));
        }

        let conn = OpenSshConnection::connect(host, &self.ssh).await?;
        Ok(Arc::new(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_result_success() {
        let result = CommandResult::success("out".into(), String::new());
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.combined_output(), "out");
    }

    #[test]
    fn test_command_result_failure() {
        let result = CommandResult::failure(2, String::new(), "err".into());
        assert!(!result.success);
        assert_eq!(result.exit_code, 2);
        assert_eq!(result.combined_output(), "err");
    }

    #[test]
    fn test_command_result_combined_output() {
        let result = CommandResult::failure(1, "out".into(), "err".into());
        assert_eq!(result.combined_output(), "out\nerr");
    }

    #[test]
    fn test_execute_options_builder() {
        let opts = ExecuteOptions::new()
            .with_timeout(30)
            .with_escalation(Some("deploy".into()))
            .with_env("LANG", "C");

        assert_eq!(opts.timeout, Some(30));
        assert!(opts.escalate);
        assert_eq!(opts.escalate_user.as_deref(), Some("deploy"));
        assert_eq!(opts.env.get("LANG").map(String::as_str), Some("C"));
    }
}
