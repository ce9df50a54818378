//! The operation compiler.
//!
//! A [`Deploy`] collects declared operation calls in script order. Each
//! call is compiled immediately, per host: the producer reads live facts
//! through the host's cache and returns the minimal command list that
//! converges current state to the declared arguments, possibly empty when
//! the host is already converged. Compilation and planning are one pass.
//!
//! # The idempotency contract
//!
//! Binding on every producer: given identical facts, return an identical,
//! deterministic command sequence; once those commands have been applied
//! and the facts refreshed, return an empty sequence. This is what makes
//! repeated runs safe.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

use super::{DeployPlan, OpError, OpOptions, Operation};
use crate::error::{Error, Result};
use crate::facts::{Fact, FactValue};
use crate::inventory::Host;
use crate::report::{ExecutionResult, OpStatus};
use crate::state::State;

/// A function that, given a host's current facts and desired arguments,
/// returns the minimal command list to converge state.
///
/// Implementations carry their declared arguments as fields and must be
/// pure apart from fact reads.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Stable producer kind, e.g. `"apt.packages"`. Used as the default
    /// display label.
    fn kind(&self) -> &'static str;

    /// Build the command list for one host against its current facts.
    async fn build(&self, ctx: &OpContext<'_>) -> std::result::Result<Vec<String>, OpError>;
}

/// What a producer sees while compiling: the target host and fact access.
pub struct OpContext<'a> {
    state: &'a State,
    host: &'a Arc<Host>,
}

impl<'a> OpContext<'a> {
    pub(crate) fn new(state: &'a State, host: &'a Arc<Host>) -> Self {
        Self { state, host }
    }

    /// The host being compiled for.
    pub fn host(&self) -> &Host {
        self.host
    }

    /// Read a fact, fetching it on first access. Facts are read-only from
    /// the producer's perspective.
    pub async fn fact(&self, fact: &dyn Fact, args: &[String]) -> Result<FactValue> {
        let conn = self.state.connection(self.host).await?;
        self.host
            .facts()
            .get(conn.as_ref(), fact, args)
            .await
            .map_err(|e| Error::FactFetch {
                host: self.host.name().to_string(),
                fact: fact.name().to_string(),
                source: e,
            })
    }

    /// Shortcut for a host data value.
    pub fn data(&self, key: &str) -> Option<&JsonValue> {
        self.host.data().get(key)
    }
}

/// Compile one producer call for one host.
#[instrument(skip(state, producer, options), fields(host = %host.name(), kind = producer.kind()))]
pub(crate) async fn compile<P: Producer>(
    state: &Arc<State>,
    host: &Arc<Host>,
    producer: &P,
    options: &OpOptions,
) -> Result<Operation> {
    let name = options
        .name
        .clone()
        .unwrap_or_else(|| producer.kind().to_string());

    let ctx = OpContext::new(state, host);
    match producer.build(&ctx).await {
        Ok(commands) => {
            debug!(commands = commands.len(), "operation compiled");
            Ok(Operation {
                name,
                kind: producer.kind().to_string(),
                commands,
                options: options.clone(),
            })
        }
        // Engine errors keep their own severity: a fact-fetch transport
        // failure is not a producer bug.
        Err(OpError::Engine(inner)) => Err(*inner),
        Err(source) => Err(Error::Compile {
            host: host.name().to_string(),
            op: name,
            source,
        }),
    }
}

/// Collects declared operation calls into a [`DeployPlan`], compiling each
/// call per host as it is declared.
pub struct Deploy {
    state: Arc<State>,
    plan: DeployPlan,
}

impl Deploy {
    /// Start a deploy against the given run context.
    pub fn new(state: Arc<State>) -> Self {
        Self {
            state,
            plan: DeployPlan::new(),
        }
    }

    /// The run context.
    pub fn state(&self) -> &Arc<State> {
        &self.state
    }

    /// Declare an operation for every host in the inventory.
    ///
    /// Hosts whose producer fails to compile are fatally failed and
    /// excluded from the remaining plan; other hosts proceed. A hook error
    /// surfaced while opening a connection aborts the whole deploy.
    pub async fn add<P: Producer>(&mut self, producer: P, options: OpOptions) -> Result<()> {
        self.add_when(producer, options, |_| true).await
    }

    /// Declare an operation for the hosts matching a predicate: the
    /// explicit form of deploy-script branch logic such as group checks.
    pub async fn add_when<P, F>(&mut self, producer: P, options: OpOptions, targets: F) -> Result<()>
    where
        P: Producer,
        F: Fn(&Host) -> bool,
    {
        options.validate().map_err(Error::InvalidOptions)?;

        let group = options.group.clone();
        let hosts: Vec<Arc<Host>> = self.state.inventory().hosts().cloned().collect();
        let mut compiled_any = false;

        for host in hosts {
            if self.state.is_failed(host.name()) || !targets(&host) {
                continue;
            }

            match compile(&self.state, &host, &producer, &options).await {
                Ok(op) => {
                    compiled_any = true;
                    self.plan.push(group.as_deref(), host.name(), op);
                }
                Err(e) if e.is_run_fatal() => return Err(e),
                Err(e) => {
                    let name = options
                        .name
                        .clone()
                        .unwrap_or_else(|| producer.kind().to_string());
                    let message = e.to_string();
                    self.state.fail_host(host.name(), message.clone());
                    self.state.record_pending(
                        ExecutionResult::immediate(
                            host.name(),
                            name,
                            group.clone(),
                            OpStatus::Failed,
                        )
                        .with_error(message),
                    );
                }
            }
        }

        // Keep the stage position even when every host was skipped or
        // failed to compile, so the plan's positional structure is shared
        // across hosts.
        if !compiled_any {
            self.plan.push_empty(group.as_deref());
        }

        Ok(())
    }

    /// The plan built so far.
    pub fn plan(&self) -> &DeployPlan {
        &self.plan
    }

    /// Finish declaring and take the plan.
    pub fn into_plan(self) -> DeployPlan {
        self.plan
    }
}
