//! # Converge - Agentless Fleet Convergence
//!
//! Converge brings a fleet of remote hosts to a declared configuration
//! state with nothing installed on the hosts: it inspects live facts over
//! a shell channel, compiles the minimal commands needed to reach the
//! declared state, and executes them fleet-wide with staged ordering.
//!
//! ## Core Concepts
//!
//! - **Inventory**: the hosts a run targets, with groups and data
//! - **Facts**: named, cached queries about live state on a host
//! - **Producers**: functions that diff declared state against facts and
//!   return the minimal command list to converge
//! - **Operations**: one producer's compiled, host-specific result plus
//!   execution options (sudo, serial, run_once, timeouts, ...)
//! - **Deploy Plan**: the ordered stages a run executes with fleet-wide
//!   barriers between them
//! - **Hooks**: lifecycle callbacks validating preconditions around the
//!   engine's phases
//! - **Callbacks**: a stream of execution results for reporting
//!
//! ## Architecture Overview
//!
//! ```text
//! deploy script ──▶ Deploy (compiler) ──▶ DeployPlan ──▶ Executor
//!                      │  facts                            │ workers
//!                      ▼                                   ▼
//!                  FactCache ◀───────── Connection ◀── Connector
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use converge::prelude::*;
//! use converge::modules::{apt, server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let inventory = Inventory::load("inventory.yml")?;
//!     let state = Arc::new(State::new(
//!         inventory,
//!         Config::default(),
//!         Arc::new(DefaultConnector::new()),
//!     ));
//!
//!     let mut deploy = Deploy::new(Arc::clone(&state));
//!     deploy
//!         .add(
//!             apt::Packages::new(["git", "curl"]).update(),
//!             OpOptions::new().sudo().group("core_packages"),
//!         )
//!         .await?;
//!     deploy
//!         .add(server::Shell::new(["systemctl reload nginx"]), OpOptions::new().sudo())
//!         .await?;
//!
//!     let report = Executor::new()
//!         .add_callback(Arc::new(ConsoleCallback::new()))
//!         .run(&state, &deploy.into_plan())
//!         .await;
//!
//!     std::process::exit(if report.success() { 0 } else { 1 });
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of the types most deploys need.

    pub use crate::callback::{ConsoleCallback, ExecutionCallback, NullCallback};
    pub use crate::config::Config;
    pub use crate::connection::{
        CommandResult, Connection, ConnectionError, ConnectionResult, Connector,
        DefaultConnector, ExecuteOptions, LocalConnection,
    };
    pub use crate::error::{Error, Result};
    pub use crate::executor::Executor;
    pub use crate::facts::{Fact, FactCache, FactValue};
    pub use crate::hooks::{HookError, HookEvent, HookPayload};
    pub use crate::inventory::{Host, Inventory};
    pub use crate::op::{Deploy, DeployPlan, OpContext, OpError, OpGroup, OpOptions, Operation, Producer};
    pub use crate::report::{ExecutionResult, OpStatus, RunReport, RunStats};
    pub use crate::state::State;
}

/// Error types and result aliases.
pub mod error;

/// Run configuration.
pub mod config;

/// Host and group inventory.
pub mod inventory;

/// Connection layer: the [`Connection`](connection::Connection) trait plus
/// local and OpenSSH transports.
pub mod connection;

/// Fact gathering and per-host caching.
pub mod facts;

/// Lifecycle hooks.
pub mod hooks;

/// Shared run context.
pub mod state;

/// Declared operations, the universal option set, and the compiler.
pub mod op;

/// Built-in producers (apt, yum, pkg, server).
pub mod modules;

/// The multi-host execution scheduler.
pub mod executor;

/// Per-run result accumulation.
pub mod report;

/// Execution event callbacks.
pub mod callback;

/// Returns the current version of Converge.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
