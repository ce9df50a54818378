//! The execution scheduler.
//!
//! Runs a [`DeployPlan`] across the fleet, stage by stage:
//!
//! - hosts whose operations compiled empty are marked no-op without
//!   touching their connection
//! - hosts with commands get one worker each, bounded by the `forks`
//!   limit, or one at a time for `serial` stages
//! - `run_once` stages dispatch only the first declared host with
//!   non-empty commands
//! - a stage barrier waits for every worker before the next stage starts
//!   anywhere, so deploys may rely on "update shared config, then restart
//!   every host" ordering
//!
//! Failure is host-scoped: a failed command (unless `ignore_errors`) or a
//! lost connection fatally fails that host and only that host. The two
//! run-scoped exceptions (hook errors and non-ignored `run_once` failures)
//! cancel the whole run, with everything not yet executed recorded as
//! skipped. The run always completes with a full per-host report.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::callback::ExecutionCallback;
use crate::connection::{ConnectionError, ExecuteOptions};
use crate::error::Error;
use crate::hooks::{HookEvent, HookPayload};
use crate::inventory::Host;
use crate::op::{DeployPlan, OpGroup, Operation};
use crate::report::{ExecutionResult, OpStatus, RunReport};
use crate::state::State;

/// The multi-host scheduler.
#[derive(Default)]
pub struct Executor {
    callbacks: Vec<Arc<dyn ExecutionCallback>>,
}

impl Executor {
    /// Create a scheduler with no callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an execution callback.
    pub fn add_callback(mut self, callback: Arc<dyn ExecutionCallback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Execute the plan across the fleet.
    ///
    /// Always returns a complete report; run-fatal conditions are surfaced
    /// through [`RunReport::aborted`] rather than an error, so partial
    /// progress is never lost.
    #[instrument(skip_all, fields(stages = plan.len(), hosts = state.inventory().len()))]
    pub async fn run(&self, state: &Arc<State>, plan: &DeployPlan) -> RunReport {
        info!("starting run");

        let ctx = RunCtx {
            state: Arc::clone(state),
            report: Arc::new(parking_lot::Mutex::new(RunReport::new())),
            callbacks: Arc::new(self.callbacks.clone()),
            cancel: CancellationToken::new(),
            abort_reason: Arc::new(parking_lot::Mutex::new(None)),
            run_once_done: Arc::new(parking_lot::Mutex::new(HashSet::new())),
        };

        for callback in ctx.callbacks.iter() {
            callback.on_run_start(plan).await;
        }

        // Host-fatal compile failures recorded before the scheduler started
        for result in state.take_pending() {
            ctx.emit(result).await;
        }

        if let Err(e) = state.hooks().fire(
            HookEvent::BeforeDeploy,
            &HookPayload {
                config: state.config(),
                host: None,
            },
        ) {
            ctx.abort(e.to_string());
        }

        let total = plan.len();
        for (index, stage) in plan.stages().iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                ctx.skip_stage(stage).await;
                continue;
            }

            for callback in ctx.callbacks.iter() {
                callback.on_stage_start(stage, index, total).await;
            }

            self.run_stage(&ctx, stage, index).await;
        }

        if !ctx.cancel.is_cancelled() {
            if let Err(e) = state.hooks().fire(
                HookEvent::AfterDeploy,
                &HookPayload {
                    config: state.config(),
                    host: None,
                },
            ) {
                ctx.abort(e.to_string());
            }
        }

        let mut report = std::mem::take(&mut *ctx.report.lock());
        if let Some(reason) = ctx.abort_reason.lock().take() {
            report.set_aborted(reason);
        }

        for callback in ctx.callbacks.iter() {
            callback.on_run_complete(&report).await;
        }

        info!(success = report.success(), "run finished");
        report
    }

    /// Execute one stage: partition hosts, dispatch workers, wait for the
    /// barrier.
    #[instrument(skip_all, fields(stage = stage.label(), index))]
    async fn run_stage(&self, ctx: &RunCtx, stage: &OpGroup, index: usize) {
        let mut runnable: Vec<(Arc<Host>, Vec<Operation>)> = Vec::new();

        for name in stage.hosts() {
            let Some(host) = ctx.state.inventory().get(name) else {
                continue;
            };
            let ops = stage.ops_for(name).to_vec();

            if ctx.state.is_failed(name) {
                ctx.emit_all(name, &ops, OpStatus::Skipped).await;
            } else if ops.iter().all(Operation::is_noop) {
                // already converged: no connection use at all
                ctx.emit_all(name, &ops, OpStatus::NoOp).await;
            } else {
                runnable.push((Arc::clone(host), ops));
            }
        }

        if runnable.is_empty() {
            debug!("stage has no commands anywhere");
            return;
        }

        if stage.run_once() {
            // Deterministic selection: first declared host with non-empty
            // commands. The claim set keeps the commands exactly-once even
            // if dispatch ever races.
            let key = format!("{}:{}", index, stage.label());
            let mut hosts = runnable.into_iter();

            if let Some((host, ops)) = hosts.next() {
                if ctx.claim_run_once(&key) {
                    run_host_stage(ctx.clone(), host, ops).await;
                } else {
                    ctx.emit_all(host.name(), &ops, OpStatus::Skipped).await;
                }
            }

            for (host, ops) in hosts {
                ctx.emit_all(host.name(), &ops, OpStatus::Skipped).await;
            }
        } else if stage.serial() {
            for (host, ops) in runnable {
                if ctx.cancel.is_cancelled() {
                    ctx.emit_all(host.name(), &ops, OpStatus::Skipped).await;
                    continue;
                }
                run_host_stage(ctx.clone(), host, ops).await;
            }
        } else {
            let semaphore = Arc::new(Semaphore::new(ctx.state.config().forks));

            let handles: Vec<_> = runnable
                .into_iter()
                .map(|(host, ops)| {
                    let ctx = ctx.clone();
                    let semaphore = Arc::clone(&semaphore);
                    tokio::spawn(async move {
                        let _permit = semaphore.acquire().await.unwrap();
                        run_host_stage(ctx, host, ops).await;
                    })
                })
                .collect();

            // the stage barrier
            join_all(handles).await;
        }
    }
}

/// Shared run-scoped scheduler state, cloned into every worker.
#[derive(Clone)]
struct RunCtx {
    state: Arc<State>,
    report: Arc<parking_lot::Mutex<RunReport>>,
    callbacks: Arc<Vec<Arc<dyn ExecutionCallback>>>,
    cancel: CancellationToken,
    abort_reason: Arc<parking_lot::Mutex<Option<String>>>,
    run_once_done: Arc<parking_lot::Mutex<HashSet<String>>>,
}

impl RunCtx {
    async fn emit(&self, result: ExecutionResult) {
        self.report.lock().push(result.clone());
        for callback in self.callbacks.iter() {
            callback.on_result(&result).await;
        }
    }

    async fn emit_all(&self, host: &str, ops: &[Operation], status: OpStatus) {
        for op in ops {
            self.emit(ExecutionResult::immediate(
                host,
                op.name.clone(),
                op.options.group.clone(),
                status,
            ))
            .await;
        }
    }

    /// Cancel the entire run. The first reason wins.
    fn abort(&self, reason: String) {
        warn!(%reason, "aborting run");
        let mut slot = self.abort_reason.lock();
        if slot.is_none() {
            *slot = Some(reason);
        }
        self.cancel.cancel();
    }

    fn claim_run_once(&self, key: &str) -> bool {
        self.run_once_done.lock().insert(key.to_string())
    }

    async fn skip_stage(&self, stage: &OpGroup) {
        for name in stage.hosts() {
            self.emit_all(name, stage.ops_for(name), OpStatus::Skipped)
                .await;
        }
    }
}

fn execute_options(op: &Operation, ctx: &RunCtx) -> ExecuteOptions {
    let mut options = ExecuteOptions::new();
    if op.options.sudo {
        options.escalate = true;
        options.escalate_user = op.options.sudo_user.clone();
    }
    options.timeout = op.options.timeout.or(ctx.state.config().command_timeout);
    options
}

/// Worker body: one host, one stage. Executes each operation's commands in
/// declared order over the host's connection.
#[instrument(skip_all, fields(host = %host.name()))]
async fn run_host_stage(ctx: RunCtx, host: Arc<Host>, ops: Vec<Operation>) {
    for (index, op) in ops.iter().enumerate() {
        if ctx.cancel.is_cancelled() || ctx.state.is_failed(host.name()) {
            ctx.emit_all(host.name(), &ops[index..], OpStatus::Skipped)
                .await;
            return;
        }

        if op.is_noop() {
            ctx.emit(ExecutionResult::immediate(
                host.name(),
                op.name.clone(),
                op.options.group.clone(),
                OpStatus::NoOp,
            ))
            .await;
            continue;
        }

        let start = Instant::now();

        let conn = match ctx.state.connection(&host).await {
            Ok(conn) => conn,
            Err(e) => {
                let run_fatal = e.is_run_fatal();
                let message = e.to_string();
                ctx.state.fail_host(host.name(), message.clone());
                ctx.emit(
                    ExecutionResult::immediate(
                        host.name(),
                        op.name.clone(),
                        op.options.group.clone(),
                        OpStatus::Failed,
                    )
                    .with_error(message.clone())
                    .with_duration(start.elapsed()),
                )
                .await;

                if run_fatal || op.options.run_once {
                    ctx.abort(message);
                }

                ctx.emit_all(host.name(), &ops[index + 1..], OpStatus::Skipped)
                    .await;
                return;
            }
        };

        let exec_options = execute_options(op, &ctx);
        let mut failure: Option<String> = None;
        let mut connection_lost = false;

        for command in &op.commands {
            debug!(host = %host.name(), %command, "executing");

            let execute = conn.execute(command, Some(exec_options.clone()));
            let result = tokio::select! {
                () = ctx.cancel.cancelled() => {
                    // run aborted from another worker mid-stage
                    ctx.emit_all(host.name(), &ops[index..], OpStatus::Skipped)
                        .await;
                    return;
                }
                result = execute => result,
            };

            match result {
                Ok(result) if result.success => {}
                Ok(result) => {
                    failure = Some(format!(
                        "command exited {}: {}",
                        result.exit_code,
                        result.combined_output().trim()
                    ));
                    break;
                }
                // a timeout is a command failure, subject to ignore_errors
                Err(ConnectionError::Timeout(secs)) => {
                    failure = Some(format!("command timed out after {}s", secs));
                    break;
                }
                // transport lost mid-run: fatal regardless of ignore_errors
                Err(e) => {
                    failure = Some(
                        Error::Connection {
                            host: host.name().to_string(),
                            source: e,
                        }
                        .to_string(),
                    );
                    connection_lost = true;
                    break;
                }
            }
        }

        let duration = start.elapsed();

        match failure {
            None => {
                ctx.emit(
                    ExecutionResult::immediate(
                        host.name(),
                        op.name.clone(),
                        op.options.group.clone(),
                        OpStatus::Success,
                    )
                    .with_duration(duration),
                )
                .await;
            }
            Some(message) if op.options.ignore_errors && !connection_lost => {
                ctx.emit(
                    ExecutionResult::immediate(
                        host.name(),
                        op.name.clone(),
                        op.options.group.clone(),
                        OpStatus::FailedIgnored,
                    )
                    .with_error(message)
                    .with_duration(duration),
                )
                .await;
            }
            Some(message) => {
                ctx.state.fail_host(host.name(), message.clone());
                ctx.emit(
                    ExecutionResult::immediate(
                        host.name(),
                        op.name.clone(),
                        op.options.group.clone(),
                        OpStatus::Failed,
                    )
                    .with_error(message.clone())
                    .with_duration(duration),
                )
                .await;

                // later stages may depend on a run_once side effect, so a
                // non-ignored failure there fails the whole run
                if op.options.run_once {
                    ctx.abort(message);
                }

                ctx.emit_all(host.name(), &ops[index + 1..], OpStatus::Skipped)
                    .await;
                return;
            }
        }
    }
}
