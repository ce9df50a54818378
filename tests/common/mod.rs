//! Scripted in-memory transport for engine tests.
//!
//! `FakeConnector` hands each host a `FakeConnection` that answers
//! commands from per-host rules and records every execution (with timing
//! and escalation details) into a shared `ExecLog`, so tests can assert
//! ordering, concurrency, and exactly-once properties.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use converge::config::Config;
use converge::connection::{
    CommandResult, Connection, ConnectionError, ConnectionResult, Connector, ExecuteOptions,
};
use converge::inventory::{Host, Inventory};
use converge::state::State;

/// One recorded command execution.
#[derive(Debug, Clone)]
pub struct ExecLogEntry {
    pub host: String,
    pub command: String,
    pub started: Instant,
    pub finished: Instant,
    pub escalate: bool,
    pub escalate_user: Option<String>,
}

/// Shared record of every command executed through the fake transport.
#[derive(Default)]
pub struct ExecLog {
    entries: Mutex<Vec<ExecLogEntry>>,
}

impl ExecLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, entry: ExecLogEntry) {
        self.entries.lock().push(entry);
    }

    /// All recorded executions, in completion order.
    pub fn entries(&self) -> Vec<ExecLogEntry> {
        self.entries.lock().clone()
    }

    /// Executions whose command contains `needle`.
    pub fn matching(&self, needle: &str) -> Vec<ExecLogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.command.contains(needle))
            .collect()
    }

    /// Number of executions whose command contains `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.matching(needle).len()
    }

    /// Commands executed on one host, in order.
    pub fn commands_for(&self, host: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.host == host)
            .map(|e| e.command)
            .collect()
    }
}

#[derive(Clone)]
enum Response {
    Result(CommandResult),
    Drop,
}

#[derive(Clone)]
struct Rule {
    needle: String,
    response: Response,
    delay: Option<Duration>,
}

/// Per-host command rules. The most recently added matching rule wins, so
/// tests can change a host's answers mid-run (e.g. after "applying" an
/// operation); unmatched commands succeed with empty output.
#[derive(Clone, Default)]
pub struct HostScript {
    rules: Vec<Rule>,
}

impl HostScript {
    fn find(&self, command: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| command.contains(&r.needle))
    }
}

/// Connector producing scripted connections.
#[derive(Default)]
pub struct FakeConnector {
    scripts: Mutex<HashMap<String, Arc<Mutex<HostScript>>>>,
    fail_connect: Mutex<HashSet<String>>,
    log: Arc<ExecLog>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared execution log.
    pub fn log(&self) -> Arc<ExecLog> {
        Arc::clone(&self.log)
    }

    /// Commands on `host` containing `needle` succeed with `stdout`.
    pub fn respond(&self, host: &str, needle: &str, stdout: &str) -> &Self {
        self.push_rule(
            host,
            needle,
            Response::Result(CommandResult::success(stdout.to_string(), String::new())),
            None,
        )
    }

    /// Commands on `host` containing `needle` fail with `exit_code`.
    pub fn respond_failure(&self, host: &str, needle: &str, exit_code: i32) -> &Self {
        self.push_rule(
            host,
            needle,
            Response::Result(CommandResult::failure(
                exit_code,
                String::new(),
                format!("scripted failure ({})", exit_code),
            )),
            None,
        )
    }

    /// Commands on `host` containing `needle` succeed after `delay`.
    pub fn respond_delayed(&self, host: &str, needle: &str, delay: Duration) -> &Self {
        self.push_rule(
            host,
            needle,
            Response::Result(CommandResult::success(String::new(), String::new())),
            Some(delay),
        )
    }

    /// Commands on `host` containing `needle` succeed with `stdout` after
    /// `delay`.
    pub fn respond_slowly(&self, host: &str, needle: &str, stdout: &str, delay: Duration) -> &Self {
        self.push_rule(
            host,
            needle,
            Response::Result(CommandResult::success(stdout.to_string(), String::new())),
            Some(delay),
        )
    }

    /// Commands on `host` containing `needle` drop the connection.
    pub fn drop_connection_on(&self, host: &str, needle: &str) -> &Self {
        self.push_rule(host, needle, Response::Drop, None)
    }

    /// Connecting to `host` fails outright.
    pub fn fail_connect(&self, host: &str) -> &Self {
        self.fail_connect.lock().insert(host.to_string());
        self
    }

    fn push_rule(
        &self,
        host: &str,
        needle: &str,
        response: Response,
        delay: Option<Duration>,
    ) -> &Self {
        let script = self
            .scripts
            .lock()
            .entry(host.to_string())
            .or_default()
            .clone();

        // newest rule first, so updates shadow earlier answers
        script.lock().rules.insert(
            0,
            Rule {
                needle: needle.to_string(),
                response,
                delay,
            },
        );
        self
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, host: &Host) -> ConnectionResult<Arc<dyn Connection>> {
        if self.fail_connect.lock().contains(host.name()) {
            return Err(ConnectionError::ConnectionFailed(format!(
                "scripted connect failure for {}",
                host.name()
            )));
        }

        let script = self
            .scripts
            .lock()
            .entry(host.name().to_string())
            .or_default()
            .clone();

        Ok(Arc::new(FakeConnection {
            host: host.name().to_string(),
            script,
            log: Arc::clone(&self.log),
        }))
    }
}

/// Scripted connection for one host.
pub struct FakeConnection {
    host: String,
    script: Arc<Mutex<HostScript>>,
    log: Arc<ExecLog>,
}

#[async_trait]
impl Connection for FakeConnection {
    fn identifier(&self) -> &str {
        &self.host
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
        let started = Instant::now();

        let rule = self.script.lock().find(command).cloned();
        let delay = rule.as_ref().and_then(|r| r.delay);

        if let Some(delay) = delay {
            if let Some(timeout) = options.timeout {
                let timeout = Duration::from_secs(timeout);
                if delay > timeout {
                    tokio::time::sleep(timeout).await;
                    return Err(ConnectionError::Timeout(timeout.as_secs()));
                }
            }
            tokio::time::sleep(delay).await;
        }

        let response = rule
            .map(|r| r.response)
            .unwrap_or(Response::Result(CommandResult::success(
                String::new(),
                String::new(),
            )));

        match response {
            Response::Drop => Err(ConnectionError::ConnectionClosed),
            Response::Result(result) => {
                self.log.record(ExecLogEntry {
                    host: self.host.clone(),
                    command: command.to_string(),
                    started,
                    finished: Instant::now(),
                    escalate: options.escalate,
                    escalate_user: options.escalate_user.clone(),
                });
                Ok(result)
            }
        }
    }

    async fn upload(
        &self,
        _local_path: &std::path::Path,
        _remote_path: &std::path::Path,
    ) -> ConnectionResult<()> {
        Ok(())
    }

    async fn upload_content(
        &self,
        _content: &[u8],
        _remote_path: &std::path::Path,
    ) -> ConnectionResult<()> {
        Ok(())
    }

    async fn close(&self) -> ConnectionResult<()> {
        Ok(())
    }
}

/// Build a run context over named hosts and a fake connector. Tests keep
/// their own handle on the connector to adjust rules mid-run.
pub fn state_with(connector: Arc<FakeConnector>, hosts: &[&str]) -> Arc<State> {
    let inventory = Inventory::from_names(hosts.iter().copied()).unwrap();
    Arc::new(State::new(inventory, Config::default(), connector))
}

/// Sample `dpkg -l` output listing the given name/version pairs.
pub fn dpkg_output(packages: &[(&str, &str)]) -> String {
    let mut output = String::from("Desired=Unknown/Install/Remove/Purge/Hold\n");
    for (name, version) in packages {
        output.push_str(&format!("ii  {}    {}    amd64    a package\n", name, version));
    }
    output
}
