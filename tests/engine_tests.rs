//! Scheduler behavior: barriers, run_once, serial, failure isolation,
//! timeouts, escalation, and hooks.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use common::{state_with, FakeConnector};
use converge::hooks::{HookError, HookEvent};
use converge::executor::Executor;
use converge::modules::server;
use converge::op::{Deploy, OpContext, OpError, OpOptions, Producer};
use converge::report::{OpStatus, RunReport};
use converge::state::State;

/// Producer returning a fixed command list per host (empty when unlisted).
struct PerHost {
    commands: HashMap<String, Vec<String>>,
}

impl PerHost {
    fn new(commands: &[(&str, &[&str])]) -> Self {
        Self {
            commands: commands
                .iter()
                .map(|(host, cmds)| {
                    (
                        host.to_string(),
                        cmds.iter().map(|c| c.to_string()).collect(),
                    )
                })
                .collect(),
        }
    }
}

#[async_trait]
impl Producer for PerHost {
    fn kind(&self) -> &'static str {
        "test.per_host"
    }

    async fn build(&self, ctx: &OpContext<'_>) -> Result<Vec<String>, OpError> {
        Ok(self
            .commands
            .get(ctx.host().name())
            .cloned()
            .unwrap_or_default())
    }
}

fn statuses(report: &RunReport, host: &str) -> Vec<OpStatus> {
    report
        .results()
        .iter()
        .filter(|r| r.host == host)
        .map(|r| r.status)
        .collect()
}

async fn run(state: &Arc<State>, deploy: Deploy) -> RunReport {
    Executor::new().run(state, &deploy.into_plan()).await
}

#[tokio::test]
async fn stage_barrier_holds_across_fleet() {
    let connector = Arc::new(FakeConnector::new());
    // the slow host finishes stage one well after the fast one
    connector.respond_delayed("slow", "stage-one", Duration::from_millis(150));
    connector.respond_delayed("fast", "stage-one", Duration::from_millis(10));
    let log = connector.log();
    let state = state_with(Arc::clone(&connector), &["slow", "fast"]);

    let mut deploy = Deploy::new(Arc::clone(&state));
    deploy
        .add(server::Shell::new(["stage-one"]), OpOptions::new())
        .await
        .unwrap();
    deploy
        .add(server::Shell::new(["stage-two"]), OpOptions::new())
        .await
        .unwrap();

    let report = run(&state, deploy).await;
    assert!(report.success());

    let stage_one_finish = log
        .matching("stage-one")
        .iter()
        .map(|e| e.finished)
        .max()
        .unwrap();
    let stage_two_starts: Vec<Instant> =
        log.matching("stage-two").iter().map(|e| e.started).collect();

    assert_eq!(stage_two_starts.len(), 2);
    for started in stage_two_starts {
        assert!(
            started >= stage_one_finish,
            "a stage-two command started before stage one concluded everywhere"
        );
    }
}

#[tokio::test]
async fn run_once_executes_on_exactly_one_host() {
    let connector = Arc::new(FakeConnector::new());
    let log = connector.log();
    let state = state_with(Arc::clone(&connector), &["a", "b", "c"]);

    let mut deploy = Deploy::new(Arc::clone(&state));
    deploy
        .add(
            server::Shell::new(["global-side-effect"]),
            OpOptions::new().run_once(),
        )
        .await
        .unwrap();

    let report = run(&state, deploy).await;
    assert!(report.success());

    let executions = log.matching("global-side-effect");
    assert_eq!(executions.len(), 1);
    // first host in declared order wins
    assert_eq!(executions[0].host, "a");

    assert_eq!(statuses(&report, "a"), vec![OpStatus::Success]);
    assert_eq!(statuses(&report, "b"), vec![OpStatus::Skipped]);
    assert_eq!(statuses(&report, "c"), vec![OpStatus::Skipped]);
}

#[tokio::test]
async fn run_once_skips_hosts_with_empty_commands() {
    let connector = Arc::new(FakeConnector::new());
    let log = connector.log();
    let state = state_with(Arc::clone(&connector), &["a", "b", "c"]);

    let mut deploy = Deploy::new(Arc::clone(&state));
    deploy
        .add(
            PerHost::new(&[("b", &["side-effect"]), ("c", &["side-effect"])]),
            OpOptions::new().run_once(),
        )
        .await
        .unwrap();

    let report = run(&state, deploy).await;
    assert!(report.success());

    let executions = log.matching("side-effect");
    assert_eq!(executions.len(), 1);
    // first host in declared order *with non-empty commands* wins
    assert_eq!(executions[0].host, "b");
    assert_eq!(statuses(&report, "a"), vec![OpStatus::NoOp]);
}

#[tokio::test]
async fn run_once_failure_aborts_entire_run() {
    let connector = Arc::new(FakeConnector::new());
    connector.respond_failure("a", "shared-setup", 1);
    let log = connector.log();
    let state = state_with(Arc::clone(&connector), &["a", "b"]);

    let mut deploy = Deploy::new(Arc::clone(&state));
    deploy
        .add(
            server::Shell::new(["shared-setup"]),
            OpOptions::new().run_once(),
        )
        .await
        .unwrap();
    deploy
        .add(server::Shell::new(["after"]), OpOptions::new())
        .await
        .unwrap();

    let report = run(&state, deploy).await;

    assert!(!report.success());
    assert!(report.aborted().is_some());
    // the later stage never ran anywhere
    assert_eq!(log.count("after"), 0);
    assert_eq!(statuses(&report, "b"), vec![OpStatus::Skipped, OpStatus::Skipped]);
}

#[tokio::test]
async fn serial_stage_runs_hosts_one_at_a_time() {
    let delay = Duration::from_millis(120);
    let connector = Arc::new(FakeConnector::new());
    for host in ["a", "b", "c"] {
        connector.respond_delayed(host, "slow-cmd", delay);
    }
    let log = connector.log();
    let state = state_with(Arc::clone(&connector), &["a", "b", "c"]);

    let mut deploy = Deploy::new(Arc::clone(&state));
    deploy
        .add(server::Shell::new(["slow-cmd"]), OpOptions::new().serial())
        .await
        .unwrap();

    let started = Instant::now();
    let report = run(&state, deploy).await;
    let elapsed = started.elapsed();

    assert!(report.success());
    assert!(
        elapsed >= delay * 3,
        "serial stage finished in {:?}, expected at least {:?}",
        elapsed,
        delay * 3
    );

    // no overlap between any two executions
    let entries = log.matching("slow-cmd");
    for (i, first) in entries.iter().enumerate() {
        for second in &entries[i + 1..] {
            assert!(first.finished <= second.started || second.finished <= first.started);
        }
    }
}

#[tokio::test]
async fn parallel_stage_overlaps_hosts() {
    let delay = Duration::from_millis(120);
    let connector = Arc::new(FakeConnector::new());
    for host in ["a", "b", "c"] {
        connector.respond_delayed(host, "slow-cmd", delay);
    }
    let state = state_with(Arc::clone(&connector), &["a", "b", "c"]);

    let mut deploy = Deploy::new(Arc::clone(&state));
    deploy
        .add(server::Shell::new(["slow-cmd"]), OpOptions::new())
        .await
        .unwrap();

    let started = Instant::now();
    let report = run(&state, deploy).await;
    let elapsed = started.elapsed();

    assert!(report.success());
    assert!(
        elapsed < delay * 3,
        "parallel stage took {:?}, expected well under {:?}",
        elapsed,
        delay * 3
    );
}

#[tokio::test]
async fn command_failure_halts_only_the_failing_host() {
    let connector = Arc::new(FakeConnector::new());
    connector.respond_failure("bad", "step-one", 2);
    let log = connector.log();
    let state = state_with(Arc::clone(&connector), &["bad", "good"]);

    let mut deploy = Deploy::new(Arc::clone(&state));
    deploy
        .add(server::Shell::new(["step-one"]), OpOptions::new())
        .await
        .unwrap();
    deploy
        .add(server::Shell::new(["step-two"]), OpOptions::new())
        .await
        .unwrap();

    let report = run(&state, deploy).await;

    assert!(!report.success());
    assert_eq!(report.failed_hosts(), vec!["bad"]);
    assert_eq!(statuses(&report, "bad"), vec![OpStatus::Failed, OpStatus::Skipped]);
    assert_eq!(statuses(&report, "good"), vec![OpStatus::Success, OpStatus::Success]);
    // the failed host never ran the second stage
    assert_eq!(log.commands_for("bad"), vec!["step-one".to_string()]);
}

#[tokio::test]
async fn ignore_errors_records_and_continues() {
    let connector = Arc::new(FakeConnector::new());
    connector.respond_failure("a", "flaky", 1);
    let state = state_with(Arc::clone(&connector), &["a"]);

    let mut deploy = Deploy::new(Arc::clone(&state));
    deploy
        .add(
            server::Shell::new(["flaky"]),
            OpOptions::new().ignore_errors(),
        )
        .await
        .unwrap();
    deploy
        .add(server::Shell::new(["next"]), OpOptions::new())
        .await
        .unwrap();

    let report = run(&state, deploy).await;

    assert!(report.success());
    assert_eq!(
        statuses(&report, "a"),
        vec![OpStatus::FailedIgnored, OpStatus::Success]
    );
}

#[tokio::test]
async fn failure_inside_multi_command_operation_stops_remaining_commands() {
    let connector = Arc::new(FakeConnector::new());
    connector.respond_failure("a", "second", 1);
    let log = connector.log();
    let state = state_with(Arc::clone(&connector), &["a"]);

    let mut deploy = Deploy::new(Arc::clone(&state));
    deploy
        .add(
            server::Shell::new(["first", "second", "third"]),
            OpOptions::new(),
        )
        .await
        .unwrap();

    let report = run(&state, deploy).await;

    assert!(!report.success());
    assert_eq!(log.count("first"), 1);
    assert_eq!(log.count("third"), 0);
}

#[tokio::test]
async fn dropped_connection_is_fatal_despite_ignore_errors() {
    let connector = Arc::new(FakeConnector::new());
    connector.drop_connection_on("a", "anything");
    let state = state_with(Arc::clone(&connector), &["a", "b"]);

    let mut deploy = Deploy::new(Arc::clone(&state));
    deploy
        .add(
            server::Shell::new(["anything"]),
            OpOptions::new().ignore_errors(),
        )
        .await
        .unwrap();
    deploy
        .add(server::Shell::new(["later"]), OpOptions::new())
        .await
        .unwrap();

    let report = run(&state, deploy).await;

    assert!(!report.success());
    assert_eq!(statuses(&report, "a"), vec![OpStatus::Failed, OpStatus::Skipped]);
    // the other host is unaffected
    assert_eq!(statuses(&report, "b"), vec![OpStatus::Success, OpStatus::Success]);
}

#[tokio::test]
async fn connect_failure_is_fatal_to_the_host() {
    let connector = Arc::new(FakeConnector::new());
    connector.fail_connect("down");
    let state = state_with(Arc::clone(&connector), &["down", "up"]);

    let mut deploy = Deploy::new(Arc::clone(&state));
    deploy
        .add(server::Shell::new(["anything"]), OpOptions::new())
        .await
        .unwrap();

    let report = run(&state, deploy).await;

    assert!(!report.success());
    assert_eq!(report.failed_hosts(), vec!["down"]);
    assert_eq!(statuses(&report, "up"), vec![OpStatus::Success]);
}

#[tokio::test]
async fn timeout_is_a_command_failure() {
    let connector = Arc::new(FakeConnector::new());
    connector.respond_delayed("a", "blocks", Duration::from_secs(5));
    let state = state_with(Arc::clone(&connector), &["a"]);

    let mut deploy = Deploy::new(Arc::clone(&state));
    deploy
        .add(
            server::Shell::new(["blocks"]),
            OpOptions::new().timeout(1),
        )
        .await
        .unwrap();

    let started = Instant::now();
    let report = run(&state, deploy).await;

    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(!report.success());
    let failure = &report.failures()[0];
    assert!(failure.error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn timeout_respects_ignore_errors() {
    let connector = Arc::new(FakeConnector::new());
    connector.respond_delayed("a", "blocks", Duration::from_secs(5));
    let state = state_with(Arc::clone(&connector), &["a"]);

    let mut deploy = Deploy::new(Arc::clone(&state));
    deploy
        .add(
            server::Shell::new(["blocks"]),
            OpOptions::new().timeout(1).ignore_errors(),
        )
        .await
        .unwrap();

    let report = run(&state, deploy).await;

    assert!(report.success());
    assert_eq!(statuses(&report, "a"), vec![OpStatus::FailedIgnored]);
}

#[tokio::test]
async fn sudo_options_reach_the_connection() {
    let connector = Arc::new(FakeConnector::new());
    let log = connector.log();
    let state = state_with(Arc::clone(&connector), &["a"]);

    let mut deploy = Deploy::new(Arc::clone(&state));
    deploy
        .add(
            server::Shell::new(["whoami"]),
            OpOptions::new().sudo_user("deploy"),
        )
        .await
        .unwrap();

    let report = run(&state, deploy).await;
    assert!(report.success());

    let entry = &log.matching("whoami")[0];
    assert!(entry.escalate);
    assert_eq!(entry.escalate_user.as_deref(), Some("deploy"));
}

#[tokio::test]
async fn noop_stage_never_touches_the_connection() {
    let connector = Arc::new(FakeConnector::new());
    // any connection attempt would fail loudly
    connector.fail_connect("a");
    let state = state_with(Arc::clone(&connector), &["a"]);

    let mut deploy = Deploy::new(Arc::clone(&state));
    deploy
        .add(PerHost::new(&[]), OpOptions::new())
        .await
        .unwrap();

    let report = run(&state, deploy).await;

    assert!(report.success());
    assert_eq!(statuses(&report, "a"), vec![OpStatus::NoOp]);
}

#[tokio::test]
async fn before_connect_hook_fires_once_per_host() {
    let connector = Arc::new(FakeConnector::new());
    let state = state_with(Arc::clone(&connector), &["a", "b"]);

    let fired = Arc::new(AtomicUsize::new(0));
    {
        let fired = Arc::clone(&fired);
        state.hooks().register(HookEvent::BeforeConnect, move |payload| {
            assert!(payload.host.is_some());
            fired.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    let mut deploy = Deploy::new(Arc::clone(&state));
    deploy
        .add(server::Shell::new(["one"]), OpOptions::new())
        .await
        .unwrap();
    deploy
        .add(server::Shell::new(["two"]), OpOptions::new())
        .await
        .unwrap();

    let report = run(&state, deploy).await;

    assert!(report.success());
    // one connection per host for the whole run, despite two stages
    assert_eq!(fired.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn before_connect_hook_error_aborts_the_run() {
    let connector = Arc::new(FakeConnector::new());
    let log = connector.log();
    let state = state_with(Arc::clone(&connector), &["a", "b"]);

    state.hooks().register(HookEvent::BeforeConnect, |_| {
        Err(HookError::new("precondition violated"))
    });

    let mut deploy = Deploy::new(Arc::clone(&state));
    deploy
        .add(server::Shell::new(["anything"]), OpOptions::new())
        .await
        .unwrap();

    let report = run(&state, deploy).await;

    assert!(!report.success());
    assert!(report.aborted().unwrap().contains("precondition violated"));
    assert_eq!(log.entries().len(), 0);
}

#[tokio::test]
async fn before_deploy_hook_error_skips_everything() {
    let connector = Arc::new(FakeConnector::new());
    let log = connector.log();
    let state = state_with(Arc::clone(&connector), &["a"]);

    state.hooks().register(HookEvent::BeforeDeploy, |_| {
        Err(HookError::new("not safe to deploy"))
    });

    let mut deploy = Deploy::new(Arc::clone(&state));
    deploy
        .add(server::Shell::new(["anything"]), OpOptions::new())
        .await
        .unwrap();

    let report = run(&state, deploy).await;

    assert!(!report.success());
    assert!(report.aborted().is_some());
    assert_eq!(statuses(&report, "a"), vec![OpStatus::Skipped]);
    assert_eq!(log.entries().len(), 0);
}

#[tokio::test]
async fn named_group_executes_as_one_stage() {
    let connector = Arc::new(FakeConnector::new());
    let log = connector.log();
    let state = state_with(Arc::clone(&connector), &["a"]);

    let mut deploy = Deploy::new(Arc::clone(&state));
    deploy
        .add(
            server::Shell::new(["first"]),
            OpOptions::new().group("bundle"),
        )
        .await
        .unwrap();
    deploy
        .add(server::Shell::new(["middle"]), OpOptions::new())
        .await
        .unwrap();
    deploy
        .add(
            server::Shell::new(["last"]),
            OpOptions::new().group("bundle"),
        )
        .await
        .unwrap();

    let report = run(&state, deploy).await;
    assert!(report.success());

    // both bundle members ran before the unnamed stage in between
    assert_eq!(
        log.commands_for("a"),
        vec!["first".to_string(), "last".to_string(), "middle".to_string()]
    );
}
