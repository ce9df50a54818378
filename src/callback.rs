//! Execution event callbacks.
//!
//! Callbacks receive a stream of results while a run executes, plus
//! stage and run boundaries. They back console output, log shipping, or
//! custom integrations; the scheduler awaits them, so implementations
//! should return quickly.

use async_trait::async_trait;
use colored::Colorize;

use crate::op::{DeployPlan, OpGroup};
use crate::report::{ExecutionResult, OpStatus, RunReport};

/// Receiver for execution events during a run.
#[async_trait]
pub trait ExecutionCallback: Send + Sync {
    /// Fired once before the first stage.
    async fn on_run_start(&self, _plan: &DeployPlan) {}

    /// Fired when a stage begins executing.
    async fn on_stage_start(&self, _stage: &OpGroup, _index: usize, _total: usize) {}

    /// Fired for every finalized (host, operation) result.
    async fn on_result(&self, _result: &ExecutionResult) {}

    /// Fired once after the last stage, with the full report.
    async fn on_run_complete(&self, _report: &RunReport) {}
}

/// A callback that does nothing. Useful in tests.
pub struct NullCallback;

#[async_trait]
impl ExecutionCallback for NullCallback {}

/// Human-readable console output: one line per result, a recap per host.
pub struct ConsoleCallback;

impl ConsoleCallback {
    /// Create a console callback.
    pub fn new() -> Self {
        Self
    }

    fn colorize(status: OpStatus, label: &str) -> String {
        match status {
            OpStatus::Success => label.green().to_string(),
            OpStatus::NoOp => label.cyan().to_string(),
            OpStatus::Failed => label.red().bold().to_string(),
            OpStatus::FailedIgnored => label.yellow().to_string(),
            OpStatus::Skipped => label.dimmed().to_string(),
        }
    }
}

impl Default for ConsoleCallback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionCallback for ConsoleCallback {
    async fn on_stage_start(&self, stage: &OpGroup, index: usize, total: usize) {
        println!(
            "{} {}",
            format!("--> [{}/{}]", index + 1, total).bold(),
            stage.label()
        );
    }

    async fn on_result(&self, result: &ExecutionResult) {
        let label = Self::colorize(result.status, result.status.label());
        match &result.error {
            Some(error) => println!("    {}: {} ... {} ({})", result.host, result.op, label, error),
            None => println!("    {}: {} ... {}", result.host, result.op, label),
        }
    }

    async fn on_run_complete(&self, report: &RunReport) {
        println!("{}", "--> recap".bold());
        for (host, stats) in report.host_stats() {
            println!(
                "    {}: success={} no-op={} failed={} ignored={} skipped={}",
                host.bold(),
                stats.success,
                stats.no_op,
                stats.failed,
                stats.failed_ignored,
                stats.skipped,
            );
        }

        if let Some(reason) = report.aborted() {
            println!("    {}: {}", "run aborted".red().bold(), reason);
        } else if report.success() {
            println!("    {}", "run complete".green().bold());
        } else {
            println!(
                "    {}: failed hosts: {}",
                "run failed".red().bold(),
                report.failed_hosts().join(", ")
            );
        }
    }
}
