//! Command-line interface.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};

use crate::config::AppConfig;
use crate::coordination::{write_command, OperatorCommand};
use crate::domain::TaskGraph;
use crate::error::Result;
use crate::lock::LockManager;

#[derive(Parser)]
#[command(name = "warden")]
#[command(version)]
#[command(
    about = "Resource-locking and safety coordination for sandboxed AI agent fleets",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration directory
    #[arg(short, long, default_value = "config", env = "WARDEN_CONFIG_DIR", global = true)]
    pub config_dir: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a coordination run from a task graph file
    Run {
        /// Task graph JSON file (a list of tasks)
        tasks: PathBuf,
        /// Number of agents to provision (overrides config)
        #[arg(long)]
        agents: Option<u32>,
        /// Simulate agent execution in-process (no real sandboxes)
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a task graph without starting a run
    Validate {
        /// Task graph JSON file
        tasks: PathBuf,
    },
    /// Show the live lock table
    Inspect,
    /// Send an emergency command to a running daemon
    Trigger {
        #[command(subcommand)]
        command: TriggerCommands,
    },
}

#[derive(Subcommand)]
pub enum TriggerCommands {
    /// Quarantine a single agent: revoke its locks and freeze its sandbox
    Quarantine {
        /// Agent to quarantine
        agent_id: String,
    },
    /// Stop every agent and end the run
    Shutdown,
}

/// Validate a task graph file and report its shape.
pub fn validate(tasks: &Path) -> Result<()> {
    let graph = TaskGraph::load(tasks)?;
    let resources: std::collections::BTreeSet<&str> = graph
        .tasks()
        .values()
        .flat_map(|t| t.required_resources.iter().map(|r| r.as_str()))
        .collect();
    println!(
        "ok: {} tasks, {} distinct resources, no cycles",
        graph.len(),
        resources.len()
    );
    Ok(())
}

#[derive(Tabled)]
struct LockRow {
    resource: String,
    holder: String,
    acquired: String,
    expires: String,
}

/// Print the current lock table, read-only.
pub fn inspect(config: &AppConfig) -> Result<()> {
    let manager = LockManager::open(&config.lock.dir, config.lock.ttl_secs)?;
    let records = manager.inspect()?;
    if records.is_empty() {
        println!("(no locks held)");
        return Ok(());
    }
    let rows: Vec<LockRow> = records
        .into_iter()
        .map(|r| LockRow {
            resource: r.resource_id,
            holder: r.holder_agent_id,
            acquired: r.acquired_at.format("%H:%M:%S").to_string(),
            expires: r.expires_at.format("%H:%M:%S").to_string(),
        })
        .collect();
    println!("{}", Table::new(rows));
    Ok(())
}

/// Drop an operator command for the running daemon.
pub fn trigger(config: &AppConfig, command: &TriggerCommands) -> Result<()> {
    let operator_command = match command {
        TriggerCommands::Quarantine { agent_id } => OperatorCommand::Quarantine {
            agent_id: agent_id.clone(),
        },
        TriggerCommands::Shutdown => OperatorCommand::ShutdownAll,
    };
    write_command(&config.run.control_path, &operator_command)?;
    println!(
        "command written to {}; the daemon consumes it on its next tick",
        config.run.control_path.display()
    );
    Ok(())
}
