//! OpenSSH client transport.
//!
//! Drives the system `ssh` binary rather than an in-process SSH stack: the
//! client is already on every control node, honors `~/.ssh/config`, and
//! gives us connection multiplexing for free via `ControlMaster`. One
//! master connection is established per host; subsequent commands reuse it
//! through the control socket.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{CommandResult, Connection, ConnectionError, ConnectionResult, ExecuteOptions};
use crate::inventory::Host;

/// ssh reserves exit status 255 for its own failures; remote commands that
/// want to signal 255 are indistinguishable, which matches the behavior of
/// every ssh-driving tool.
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Options controlling how SSH connections are established.
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Seconds to wait for the TCP/SSH handshake
    pub connect_timeout: u64,
    /// Seconds the control master stays alive after the last command
    pub control_persist: u64,
    /// Private key to authenticate with (falls back to agent/defaults)
    pub identity_file: Option<PathBuf>,
    /// Whether to accept unknown host keys
    pub accept_new_host_keys: bool,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: 10,
            control_persist: 60,
            identity_file: None,
            accept_new_host_keys: true,
        }
    }
}

/// SSH connection to a single host, multiplexed over a control socket.
pub struct OpenSshConnection {
    identifier: String,
    target: String,
    port: u16,
    options: SshOptions,
    control_path: PathBuf,
    // Holds the control socket directory for the connection's lifetime.
    _control_dir: TempDir,
}

impl OpenSshConnection {
    /// Establish a master connection to the host.
    pub async fn connect(host: &Host, options: &SshOptions) -> ConnectionResult<Self> {
        let control_dir = tempfile::tempdir().map_err(ConnectionError::IoError)?;
        let control_path = control_dir.path().join("master.sock");

        let target = match host.user() {
            Some(user) => format!("{}@{}", user, host.address()),
            None => host.address().to_string(),
        };

        let conn = Self {
            identifier: host.name().to_string(),
            target,
            port: host.port(),
            options: options.clone(),
            control_path,
            _control_dir: control_dir,
        };

        // Opening the master and verifying login in one step.
        let result = conn.run_ssh("true", None).await?;
        if !result.success {
            return Err(ConnectionError::ConnectionFailed(format!(
                "ssh to {} failed: {}",
                conn.target,
                result.stderr.trim()
            )));
        }

        debug!(host = %conn.identifier, "ssh master connection established");
        Ok(conn)
    }

    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.options.connect_timeout),
            "-o".into(),
            "ControlMaster=auto".into(),
            "-o".into(),
            format!("ControlPath={}", self.control_path.display()),
            "-o".into(),
            format!("ControlPersist={}s", self.options.control_persist),
        ];

        if self.options.accept_new_host_keys {
            args.push("-o".into());
            args.push("StrictHostKeyChecking=accept-new".into());
        }

        if let Some(identity) = &self.options.identity_file {
            args.push("-i".into());
            args.push(identity.display().to_string());
        }

        args.push("-p".into());
        args.push(self.port.to_string());

        args
    }

    fn remote_command(command: &str, options: &ExecuteOptions) -> String {
        let quoted = shell_words::quote(command);

        let mut remote = if options.escalate {
            let user = options.escalate_user.as_deref().unwrap_or("root");
            format!("sudo -H -n -u {} -- sh -c {}", shell_words::quote(user), quoted)
        } else {
            format!("sh -c {}", quoted)
        };

        if !options.env.is_empty() {
            let assignments: Vec<String> = options
                .env
                .iter()
                .map(|(k, v)| format!("{}={}", k, shell_words::quote(v)))
                .collect();
            remote = format!("env {} {}", assignments.join(" "), remote);
        }

        remote
    }

    async fn run_ssh(
        &self,
        remote: &str,
        timeout: Option<u64>,
    ) -> ConnectionResult<CommandResult> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.common_args())
            .arg(&self.target)
            .arg("--")
            .arg(remote)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = cmd.spawn().map_err(|e| {
            ConnectionError::ExecutionFailed(format!("failed to spawn ssh: {}", e))
        })?;

        let output = if let Some(timeout_secs) = timeout {
            let duration = tokio::time::Duration::from_secs(timeout_secs);
            match tokio::time::timeout(duration, child.wait_with_output()).await {
                Ok(result) => result.map_err(|e| {
                    ConnectionError::ExecutionFailed(format!("failed to wait for ssh: {}", e))
                })?,
                Err(_) => return Err(ConnectionError::Timeout(timeout_secs)),
            }
        } else {
            child.wait_with_output().await.map_err(|e| {
                ConnectionError::ExecutionFailed(format!("failed to wait for ssh: {}", e))
            })?
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        trace!(exit_code, "ssh command completed");

        if output.status.success() {
            Ok(CommandResult::success(stdout, stderr))
        } else {
            Ok(CommandResult::failure(exit_code, stdout, stderr))
        }
    }
}

#[async_trait]
impl Connection for OpenSshConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn is_alive(&self) -> bool {
        let mut cmd = Command::new("ssh");
        cmd.args(self.common_args())
            .arg("-O")
            .arg("check")
            .arg(&self.target)
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        matches!(cmd.status().await, Ok(status) if status.success())
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let options = options.unwrap_or_default();
        debug!(host = %self.identifier, command = %command, "executing remote command");

        let remote = Self::remote_command(command, &options);
        let result = self.run_ssh(&remote, options.timeout).await?;

        if result.exit_code == SSH_TRANSPORT_FAILURE && result.stdout.is_empty() {
            return Err(ConnectionError::ConnectionClosed);
        }

        Ok(result)
    }

    async fn upload(&self, local_path: &Path, remote_path: &Path) -> ConnectionResult<()> {
        debug!(host = %self.identifier, src = %local_path.display(), dst = %remote_path.display(), "uploading file");

        let mut cmd = Command::new("scp");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-P")
            .arg(self.port.to_string())
            .arg(local_path)
            .arg(format!("{}:{}", self.target, remote_path.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let output = cmd.output().await.map_err(|e| {
            ConnectionError::TransferFailed(format!("failed to spawn scp: {}", e))
        })?;

        if !output.status.success() {
            return Err(ConnectionError::TransferFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(())
    }

    async fn upload_content(&self, content: &[u8], remote_path: &Path) -> ConnectionResult<()> {
        let staging = tempfile::NamedTempFile::new().map_err(ConnectionError::IoError)?;
        tokio::fs::write(staging.path(), content)
            .await
            .map_err(ConnectionError::IoError)?;

        self.upload(staging.path(), remote_path).await
    }

    async fn close(&self) -> ConnectionResult<()> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.common_args())
            .arg("-O")
            .arg("exit")
            .arg(&self.target)
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let _ = cmd.status().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_command_plain() {
        let remote = OpenSshConnection::remote_command("echo hi", &ExecuteOptions::new());
        assert_eq!(remote, "sh -c 'echo hi'");
    }

    #[test]
    fn test_remote_command_escalated() {
        let opts = ExecuteOptions::new().with_escalation(Some("deploy".into()));
        let remote = OpenSshConnection::remote_command("whoami", &opts);
        assert_eq!(remote, "sudo -H -n -u deploy -- sh -c whoami");
    }

    #[test]
    fn test_remote_command_env() {
        let opts = ExecuteOptions::new().with_env("LANG", "C");
        let remote = OpenSshConnection::remote_command("locale", &opts);
        assert_eq!(remote, "env LANG=C sh -c locale");
    }
}
