//! Run configuration.

use std::path::PathBuf;

use serde::Deserialize;

use crate::connection::SshOptions;

/// Configuration for a run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Maximum number of hosts executing concurrently within a stage
    pub forks: usize,
    /// Seconds to wait for the SSH handshake
    pub connect_timeout: u64,
    /// Seconds the SSH control master stays alive after the last command
    pub control_persist: u64,
    /// Private key for SSH authentication (falls back to agent/defaults)
    pub identity_file: Option<PathBuf>,
    /// Default timeout, in seconds, applied to remote commands that do not
    /// set their own
    pub command_timeout: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            forks: 5,
            connect_timeout: 10,
            control_persist: 60,
            identity_file: None,
            command_timeout: None,
        }
    }
}

impl Config {
    /// Set the fork limit.
    pub fn with_forks(mut self, forks: usize) -> Self {
        self.forks = forks.max(1);
        self
    }

    /// SSH options derived from this configuration.
    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            connect_timeout: self.connect_timeout,
            control_persist: self.control_persist,
            identity_file: self.identity_file.clone(),
            accept_new_host_keys: true,
        }
    }
}
