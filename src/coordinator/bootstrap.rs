//! Run bootstrap — wires lock manager, monitor, emergency controller, and
//! coordinator together from config, then drives the run to a report.
//!
//! Entry point for `warden run`. Real deployments hand in their own
//! `SandboxRuntime`; the CLI only ships the simulated one for dry runs.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use crate::config::AppConfig;
use crate::coordination::{watch_control_file, EmergencyController};
use crate::coordinator::{Coordinator, CoordinatorConfig};
use crate::domain::{Agent, BehaviorEvent, TaskGraph};
use crate::error::{Result, WardenError};
use crate::lock::LockManager;
use crate::monitor::{ViolationLog, ViolationMonitor};
use crate::report::RunReport;
use crate::sandbox::{SandboxRuntime, SimulatedRuntime, TaskOutcome};

use super::state::new_registry;

/// Start a run from a task graph file, using the simulated runtime.
/// Refuses to start without one: this binary has no real sandbox engine.
pub async fn start_run(config: AppConfig, tasks_path: &Path) -> Result<RunReport> {
    let graph = TaskGraph::load(tasks_path)?;
    if !config.run.dry_run {
        return Err(WardenError::Internal(
            "no sandbox runtime configured; pass --dry-run or embed warden \
             with a SandboxRuntime implementation"
                .into(),
        ));
    }
    let (outcome_tx, outcome_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(256);
    let runtime = Arc::new(SimulatedRuntime::new(outcome_tx, event_tx));
    run_with_runtime(config, graph, runtime, outcome_rx, event_rx).await
}

/// Full wiring for a validated graph and an externally provided runtime.
pub async fn run_with_runtime(
    config: AppConfig,
    graph: TaskGraph,
    runtime: Arc<dyn SandboxRuntime>,
    outcome_rx: mpsc::Receiver<TaskOutcome>,
    event_rx: mpsc::Receiver<BehaviorEvent>,
) -> Result<RunReport> {
    let lock_manager = Arc::new(LockManager::open(&config.lock.dir, config.lock.ttl_secs)?);
    let audit = Arc::new(ViolationLog::open(&config.audit.path)?);

    let agents: Vec<Agent> = (0..config.run.agents)
        .map(|i| Agent::new(format!("agent-{i:02}"), format!("sandbox-{i:02}")))
        .collect();
    let registry = new_registry(agents);

    let (violation_tx, violation_rx) = mpsc::channel(64);
    let (control_tx, control_rx) = mpsc::channel(8);

    let monitor = ViolationMonitor::new(config.policy.clone(), audit.clone());
    tokio::spawn(monitor.run(event_rx, violation_tx));

    let (controller, emergency_rx) = EmergencyController::new(
        config.escalation.clone(),
        lock_manager.clone(),
        runtime.clone(),
        registry.clone(),
    );
    tokio::spawn(controller.run(violation_rx, control_rx));

    tokio::spawn(watch_control_file(
        config.run.control_path.clone(),
        Duration::from_millis(config.run.tick_interval_ms),
        control_tx,
    ));

    let (interrupt_tx, interrupt_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt signal received");
                let _ = interrupt_tx.send(true);
            }
            Err(e) => error!("could not install interrupt handler: {e}"),
        }
    });

    let coordinator = Coordinator::new(
        CoordinatorConfig {
            tick_interval_ms: config.run.tick_interval_ms,
            lock_ttl_secs: config.lock.ttl_secs,
        },
        graph,
        lock_manager,
        runtime,
        registry,
        audit,
    );
    Ok(coordinator.run(outcome_rx, emergency_rx, interrupt_rx).await)
}
