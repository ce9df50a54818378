//! Per-run result accumulation.
//!
//! Every (host, operation) pair the scheduler touches produces exactly one
//! [`ExecutionResult`], streamed to callbacks as it is finalized and
//! accumulated into the [`RunReport`] the run returns. Partial success
//! (some hosts converged, others failed) is a normal outcome, not an
//! exceptional one.

use std::collections::BTreeMap;
use std::time::Duration;

/// Outcome of one operation on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    /// All commands ran and exited zero
    Success,
    /// The compiled command list was empty: state already converged
    NoOp,
    /// A command failed and the failure was fatal to the host
    Failed,
    /// A command failed but the operation carried `ignore_errors`
    FailedIgnored,
    /// Not executed: the host had already fatally failed, the run was
    /// aborted, or another host won a `run_once` stage
    Skipped,
}

impl OpStatus {
    /// Short lowercase label for output.
    pub fn label(&self) -> &'static str {
        match self {
            OpStatus::Success => "success",
            OpStatus::NoOp => "no-op",
            OpStatus::Failed => "failed",
            OpStatus::FailedIgnored => "failed (ignored)",
            OpStatus::Skipped => "skipped",
        }
    }
}

/// The finalized outcome of one operation on one host.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Host name
    pub host: String,
    /// Operation display name
    pub op: String,
    /// Group name, when the operation belonged to a named group
    pub group: Option<String>,
    /// Outcome
    pub status: OpStatus,
    /// Wall-clock time spent executing
    pub duration: Duration,
    /// Error text for failed/ignored outcomes
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Create a result with no duration or error, for outcomes that never
    /// touched a connection.
    pub fn immediate(
        host: impl Into<String>,
        op: impl Into<String>,
        group: Option<String>,
        status: OpStatus,
    ) -> Self {
        Self {
            host: host.into(),
            op: op.into(),
            group,
            status,
            duration: Duration::ZERO,
            error: None,
        }
    }

    /// Attach error text.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach a duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// Per-host or run-wide operation counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub success: usize,
    pub no_op: usize,
    pub failed: usize,
    pub failed_ignored: usize,
    pub skipped: usize,
}

impl RunStats {
    fn count(&mut self, status: OpStatus) {
        match status {
            OpStatus::Success => self.success += 1,
            OpStatus::NoOp => self.no_op += 1,
            OpStatus::Failed => self.failed += 1,
            OpStatus::FailedIgnored => self.failed_ignored += 1,
            OpStatus::Skipped => self.skipped += 1,
        }
    }
}

/// Accumulated results of a run.
#[derive(Debug, Default)]
pub struct RunReport {
    results: Vec<ExecutionResult>,
    aborted: Option<String>,
}

impl RunReport {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finalized result.
    pub fn push(&mut self, result: ExecutionResult) {
        self.results.push(result);
    }

    /// Mark the run as aborted (hook error or non-ignored `run_once`
    /// failure), with the reason.
    pub fn set_aborted(&mut self, reason: impl Into<String>) {
        if self.aborted.is_none() {
            self.aborted = Some(reason.into());
        }
    }

    /// Whether the run was aborted before processing every stage.
    pub fn aborted(&self) -> Option<&str> {
        self.aborted.as_deref()
    }

    /// All results in finalization order.
    pub fn results(&self) -> &[ExecutionResult] {
        &self.results
    }

    /// Overall success: no aborts and no non-ignored failures.
    pub fn success(&self) -> bool {
        self.aborted.is_none()
            && !self
                .results
                .iter()
                .any(|r| r.status == OpStatus::Failed)
    }

    /// Every non-ignored failure, in order.
    pub fn failures(&self) -> Vec<&ExecutionResult> {
        self.results
            .iter()
            .filter(|r| r.status == OpStatus::Failed)
            .collect()
    }

    /// Names of hosts that recorded a non-ignored failure.
    pub fn failed_hosts(&self) -> Vec<&str> {
        let mut hosts: Vec<&str> = Vec::new();
        for result in self.failures() {
            if !hosts.contains(&result.host.as_str()) {
                hosts.push(result.host.as_str());
            }
        }
        hosts
    }

    /// Per-host operation counts, keyed by host name.
    pub fn host_stats(&self) -> BTreeMap<&str, RunStats> {
        let mut stats: BTreeMap<&str, RunStats> = BTreeMap::new();
        for result in &self.results {
            stats
                .entry(result.host.as_str())
                .or_default()
                .count(result.status);
        }
        stats
    }

    /// Run-wide operation counts.
    pub fn stats(&self) -> RunStats {
        let mut stats = RunStats::default();
        for result in &self.results {
            stats.count(result.status);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn result(host: &str, op: &str, status: OpStatus) -> ExecutionResult {
        ExecutionResult::immediate(host, op, None, status)
    }

    #[test]
    fn test_success_with_only_ignored_failures() {
        let mut report = RunReport::new();
        report.push(result("a", "op1", OpStatus::Success));
        report.push(result("a", "op2", OpStatus::FailedIgnored));

        assert!(report.success());
        assert!(report.failures().is_empty());
    }

    #[test]
    fn test_failure_surfaces_host_and_op() {
        let mut report = RunReport::new();
        report.push(result("a", "op1", OpStatus::Success));
        report.push(result("b", "op1", OpStatus::Failed));

        assert!(!report.success());
        assert_eq!(report.failed_hosts(), vec!["b"]);
        assert_eq!(report.failures()[0].op, "op1");
    }

    #[test]
    fn test_aborted_run_is_not_success() {
        let mut report = RunReport::new();
        report.push(result("a", "op1", OpStatus::Success));
        report.set_aborted("hook failed");

        assert!(!report.success());
        assert_eq!(report.aborted(), Some("hook failed"));
    }

    #[test]
    fn test_host_stats() {
        let mut report = RunReport::new();
        report.push(result("a", "op1", OpStatus::Success));
        report.push(result("a", "op2", OpStatus::NoOp));
        report.push(result("b", "op1", OpStatus::Skipped));

        let stats = report.host_stats();
        assert_eq!(stats["a"].success, 1);
        assert_eq!(stats["a"].no_op, 1);
        assert_eq!(stats["b"].skipped, 1);

        let total = report.stats();
        assert_eq!(total.success + total.no_op + total.skipped, 3);
    }
}
