//! Command line interface.
//!
//! Two subcommands exercise the engine ad hoc: `exec` compiles a raw shell
//! operation across the fleet with the full universal option set, and
//! `facts` queries a named fact on every host.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use converge::callback::ConsoleCallback;
use converge::config::Config;
use converge::connection::DefaultConnector;
use converge::executor::Executor;
use converge::facts;
use converge::inventory::Inventory;
use converge::modules::server;
use converge::op::{Deploy, OpOptions};
use converge::state::State;

/// Agentless fleet convergence over SSH.
#[derive(Debug, Parser)]
#[command(name = "converge", version, about, long_about = None)]
pub struct Cli {
    /// Inventory file (YAML)
    #[arg(short, long, global = true, default_value = "inventory.yml")]
    pub inventory: PathBuf,

    /// Maximum hosts executing concurrently
    #[arg(short, long, global = true, default_value_t = 5)]
    pub forks: usize,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Parse arguments from the process environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a shell command across the fleet through the engine
    Exec(ExecArgs),
    /// Query a fact on every host
    Facts(FactsArgs),
}

#[derive(Debug, Args)]
pub struct ExecArgs {
    /// Run under sudo
    #[arg(long)]
    pub sudo: bool,

    /// Sudo to this user (implies --sudo)
    #[arg(long)]
    pub sudo_user: Option<String>,

    /// Record failures without failing hosts
    #[arg(long)]
    pub ignore_errors: bool,

    /// One host at a time
    #[arg(long)]
    pub serial: bool,

    /// Exactly one host
    #[arg(long)]
    pub run_once: bool,

    /// Per-command timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// The command to run
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,
}

impl ExecArgs {
    fn options(&self) -> OpOptions {
        let mut options = OpOptions::new().name("exec");
        if self.sudo {
            options = options.sudo();
        }
        if let Some(user) = &self.sudo_user {
            options = options.sudo_user(user);
        }
        if self.ignore_errors {
            options = options.ignore_errors();
        }
        if self.serial {
            options = options.serial();
        }
        if self.run_once {
            options = options.run_once();
        }
        if let Some(timeout) = self.timeout {
            options = options.timeout(timeout);
        }
        options
    }
}

#[derive(Debug, Args)]
pub struct FactsArgs {
    /// Fact name (see `converge facts --list`)
    #[arg(required_unless_present = "list")]
    pub fact: Option<String>,

    /// Fact argument (e.g. a path for the `file` fact)
    pub arg: Option<String>,

    /// List available facts
    #[arg(long)]
    pub list: bool,
}

fn build_state(cli: &Cli) -> Result<Arc<State>> {
    let inventory = Inventory::load(&cli.inventory)?;
    let config = Config::default().with_forks(cli.forks);
    let connector = Arc::new(DefaultConnector::with_ssh_options(config.ssh_options()));
    Ok(Arc::new(State::new(inventory, config, connector)))
}

/// Run the `exec` subcommand. Returns a process exit code.
pub async fn exec(cli: &Cli, args: &ExecArgs) -> Result<i32> {
    let state = build_state(cli)?;
    let command = shell_words::join(&args.command);

    let mut deploy = Deploy::new(Arc::clone(&state));
    deploy
        .add(server::Shell::new([command]), args.options())
        .await?;

    let report = Executor::new()
        .add_callback(Arc::new(ConsoleCallback::new()))
        .run(&state, &deploy.into_plan())
        .await;

    Ok(if report.success() { 0 } else { 2 })
}

/// Run the `facts` subcommand. Returns a process exit code.
pub async fn show_facts(cli: &Cli, args: &FactsArgs) -> Result<i32> {
    if args.list {
        for name in facts::names() {
            println!("{}", name);
        }
        return Ok(0);
    }

    let name = args.fact.as_deref().unwrap_or_default();
    let fact = facts::lookup(name)
        .ok_or_else(|| anyhow::anyhow!("unknown fact: '{}'", name))?;
    let fact_args: Vec<String> = args.arg.iter().cloned().collect();

    let state = build_state(cli)?;
    let mut exit_code = 0;

    for host in state.inventory().hosts() {
        let conn = match state.connection(host).await {
            Ok(conn) => conn,
            Err(e) => {
                eprintln!("{}: {}", host.name().red().bold(), e);
                exit_code = 3;
                continue;
            }
        };

        match host.facts().get(conn.as_ref(), fact, &fact_args).await {
            Ok(Some(value)) => {
                println!("{}:", host.name().bold());
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
            Ok(None) => println!("{}: {}", host.name().bold(), "unavailable".dimmed()),
            Err(e) => {
                eprintln!("{}: {}", host.name().red().bold(), e);
                exit_code = 3;
            }
        }
    }

    Ok(exit_code)
}
