//! Local connection module.
//!
//! Executes commands directly on the control node without any network
//! transport. Used for loopback hosts and as the reference transport in
//! tests.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{CommandResult, Connection, ConnectionError, ConnectionResult, ExecuteOptions};

/// Local connection for executing commands on the current host.
#[derive(Debug, Clone)]
pub struct LocalConnection {
    identifier: String,
}

impl LocalConnection {
    /// Create a new local connection identified by the local hostname.
    pub fn new() -> Self {
        let identifier = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".to_string());

        Self { identifier }
    }

    /// Create a local connection with a custom identifier.
    pub fn with_identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }

    fn build_command(&self, command: &str, options: &ExecuteOptions) -> Command {
        let mut cmd = if options.escalate {
            let user = options.escalate_user.as_deref().unwrap_or("root");
            // -n: never prompt; an unconfigured sudo is a command failure,
            // not a hung deploy
            let mut c = Command::new("sudo");
            c.arg("-H").arg("-n").arg("-u").arg(user);
            c.arg("--").arg("sh").arg("-c").arg(command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        };

        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        cmd
    }
}

impl Default for LocalConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for LocalConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn is_alive(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let options = options.unwrap_or_default();
        debug!(command = %command, "executing local command");

        let mut cmd = self.build_command(command, &options);

        let child = cmd.spawn().map_err(|e| {
            ConnectionError::ExecutionFailed(format!("failed to spawn process: {}", e))
        })?;

        let output = if let Some(timeout_secs) = options.timeout {
            let timeout = tokio::time::Duration::from_secs(timeout_secs);
            match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(result) => result.map_err(|e| {
                    ConnectionError::ExecutionFailed(format!("failed to wait for process: {}", e))
                })?,
                Err(_) => return Err(ConnectionError::Timeout(timeout_secs)),
            }
        } else {
            child.wait_with_output().await.map_err(|e| {
                ConnectionError::ExecutionFailed(format!("failed to wait for process: {}", e))
            })?
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        trace!(exit_code, stdout_len = stdout.len(), "command completed");

        if output.status.success() {
            Ok(CommandResult::success(stdout, stderr))
        } else {
            Ok(CommandResult::failure(exit_code, stdout, stderr))
        }
    }

    async fn upload(&self, local_path: &Path, remote_path: &Path) -> ConnectionResult<()> {
        debug!(src = %local_path.display(), dst = %remote_path.display(), "copying file locally");

        fs::copy(local_path, remote_path).await.map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "failed to copy {} to {}: {}",
                local_path.display(),
                remote_path.display(),
                e
            ))
        })?;

        Ok(())
    }

    async fn upload_content(&self, content: &[u8], remote_path: &Path) -> ConnectionResult<()> {
        debug!(dst = %remote_path.display(), size = content.len(), "writing content locally");

        fs::write(remote_path, content).await.map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "failed to write to {}: {}",
                remote_path.display(),
                e
            ))
        })?;

        Ok(())
    }

    async fn close(&self) -> ConnectionResult<()> {
        Ok(())
    }
}
