//! Emergency Controller
//!
//! Safety state machine for a run. Consumes classified violations and
//! operator commands and escalates:
//!   Normal -> Warning -> Quarantine(agent) -> ShutdownAll
//! The state never regresses within a run; ShutdownAll is terminal and a
//! new run must be started fresh.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::coordinator::state::AgentRegistry;
use crate::domain::{Agent, AgentStatus, Severity, Violation};
use crate::lock::LockManager;
use crate::sandbox::SandboxRuntime;

/// Escalation state for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EmergencyState {
    Normal,
    Warning,
    Quarantine { agent_id: String },
    ShutdownAll,
}

impl EmergencyState {
    /// Monotonic ordering: escalation only ever moves up this rank.
    pub fn rank(&self) -> u8 {
        match self {
            EmergencyState::Normal => 0,
            EmergencyState::Warning => 1,
            EmergencyState::Quarantine { .. } => 2,
            EmergencyState::ShutdownAll => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EmergencyState::ShutdownAll)
    }
}

impl std::fmt::Display for EmergencyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmergencyState::Normal => write!(f, "normal"),
            EmergencyState::Warning => write!(f, "warning"),
            EmergencyState::Quarantine { agent_id } => write!(f, "quarantine({agent_id})"),
            EmergencyState::ShutdownAll => write!(f, "shutdown-all"),
        }
    }
}

/// Explicit operator command, bypassing automatic thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OperatorCommand {
    Quarantine { agent_id: String },
    ShutdownAll,
}

/// Escalation policy constants. There are no hidden defaults: these are
/// the configured answers to how fast violations escalate.
#[derive(Debug, Clone, Deserialize)]
pub struct EscalationConfig {
    /// A second violation from the same agent inside this window
    /// escalates Warning to Quarantine.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Minimum severity that moves Normal to Warning.
    #[serde(default = "default_warning_min_severity")]
    pub warning_min_severity: Severity,
}

fn default_window_secs() -> u64 {
    300
}

fn default_warning_min_severity() -> Severity {
    Severity::Medium
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            warning_min_severity: default_warning_min_severity(),
        }
    }
}

pub struct EmergencyController {
    config: EscalationConfig,
    state: RwLock<EmergencyState>,
    state_tx: watch::Sender<EmergencyState>,
    /// Violation timestamps per agent, pruned to the escalation window.
    history: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
    lock_manager: Arc<LockManager>,
    runtime: Arc<dyn SandboxRuntime>,
    agents: AgentRegistry,
}

impl EmergencyController {
    pub fn new(
        config: EscalationConfig,
        lock_manager: Arc<LockManager>,
        runtime: Arc<dyn SandboxRuntime>,
        agents: AgentRegistry,
    ) -> (Arc<Self>, watch::Receiver<EmergencyState>) {
        let (state_tx, state_rx) = watch::channel(EmergencyState::Normal);
        let controller = Arc::new(Self {
            config,
            state: RwLock::new(EmergencyState::Normal),
            state_tx,
            history: Mutex::new(HashMap::new()),
            lock_manager,
            runtime,
            agents,
        });
        (controller, state_rx)
    }

    pub async fn state(&self) -> EmergencyState {
        self.state.read().await.clone()
    }

    /// Controller loop: runs until the violation feed closes.
    pub async fn run(
        self: Arc<Self>,
        mut violations: mpsc::Receiver<Violation>,
        mut control: mpsc::Receiver<OperatorCommand>,
    ) {
        let mut control_open = true;
        loop {
            tokio::select! {
                maybe = violations.recv() => match maybe {
                    Some(violation) => self.on_violation(&violation).await,
                    None => break,
                },
                maybe = control.recv(), if control_open => match maybe {
                    Some(OperatorCommand::Quarantine { agent_id }) => {
                        info!(agent = %agent_id, "operator quarantine command");
                        self.quarantine(&agent_id, "operator command").await;
                    }
                    Some(OperatorCommand::ShutdownAll) => {
                        info!("operator shutdown command");
                        self.shutdown_all("operator command").await;
                    }
                    None => control_open = false,
                },
            }
        }
    }

    /// React to one persisted violation. The audit record already exists;
    /// this decides the run-level response.
    pub async fn on_violation(&self, violation: &Violation) {
        let current = self.state().await;
        match current {
            EmergencyState::ShutdownAll => {
                // Terminal. The record is in the audit log for review.
            }
            EmergencyState::Quarantine { ref agent_id } => {
                if *agent_id == violation.agent_id {
                    warn!(
                        agent = %agent_id,
                        "further violation from quarantined agent"
                    );
                } else {
                    error!(
                        quarantined = %agent_id,
                        second = %violation.agent_id,
                        "violation from a second agent during quarantine; problem is systemic"
                    );
                    self.shutdown_all("violation from a second agent during quarantine")
                        .await;
                }
            }
            EmergencyState::Normal | EmergencyState::Warning => {
                let repeats = self.record(violation).await;

                if violation.severity >= Severity::Critical {
                    self.quarantine(
                        &violation.agent_id,
                        &format!("critical violation: {}", violation.detail),
                    )
                    .await;
                    return;
                }

                match current {
                    EmergencyState::Normal => {
                        if violation.severity >= self.config.warning_min_severity {
                            self.advance(
                                EmergencyState::Warning,
                                &format!(
                                    "{} violation from agent '{}'",
                                    violation.severity, violation.agent_id
                                ),
                            )
                            .await;
                        }
                    }
                    _ => {
                        // Already warned: a repeat from the same agent
                        // within the window singles that agent out.
                        if repeats >= 2 {
                            self.quarantine(
                                &violation.agent_id,
                                &format!("{repeats} violations within window"),
                            )
                            .await;
                        }
                    }
                }
            }
        }
    }

    /// Record the violation in the per-agent window and return how many
    /// of this agent's violations remain inside it.
    async fn record(&self, violation: &Violation) -> usize {
        let cutoff = Utc::now() - Duration::seconds(self.config.window_secs as i64);
        let mut history = self.history.lock().await;
        let timestamps = history.entry(violation.agent_id.clone()).or_default();
        timestamps.retain(|ts| *ts > cutoff);
        timestamps.push(violation.timestamp);
        timestamps.len()
    }

    /// Quarantine one agent: revoke its locks, mark it, freeze its
    /// sandbox. Other agents are unaffected.
    pub async fn quarantine(&self, agent_id: &str, why: &str) {
        let next = EmergencyState::Quarantine {
            agent_id: agent_id.to_string(),
        };
        if !self.advance(next, why).await {
            return;
        }

        // Revoke locks first; the agent is no longer trusted to have
        // released cleanly.
        match self.lock_manager.release_all_for(agent_id) {
            Ok(released) if !released.is_empty() => {
                warn!(agent = %agent_id, resources = ?released, "force-released quarantined agent's locks");
            }
            Ok(_) => {}
            Err(e) => error!(agent = %agent_id, "failed to revoke locks: {e}"),
        }

        let snapshot = {
            let mut agents = self.agents.write().await;
            agents.get_mut(agent_id).map(|agent| {
                agent.status = AgentStatus::Quarantined;
                agent.clone()
            })
        };

        match snapshot {
            Some(agent) => {
                if let Err(e) = self.runtime.freeze(&agent).await {
                    error!(agent = %agent_id, "freeze failed: {e}");
                }
            }
            None => warn!(agent = %agent_id, "quarantine requested for unknown agent"),
        }
    }

    /// Stop every agent and release every lock. Terminal for the run.
    pub async fn shutdown_all(&self, why: &str) {
        if !self.advance(EmergencyState::ShutdownAll, why).await {
            return;
        }

        let snapshots: Vec<Agent> = {
            let mut agents = self.agents.write().await;
            agents
                .values_mut()
                .map(|agent| {
                    // Quarantined stays quarantined in the record; its
                    // sandbox is stopped below regardless.
                    if agent.status != AgentStatus::Quarantined {
                        agent.status = AgentStatus::Stopped;
                    }
                    agent.clone()
                })
                .collect()
        };

        for agent in snapshots {
            if let Err(e) = self.runtime.stop(&agent).await {
                error!(agent = %agent.id, "stop failed: {e}");
            }
        }

        match self.lock_manager.release_everything() {
            Ok(count) if count > 0 => warn!(count, "released all remaining locks"),
            Ok(_) => {}
            Err(e) => error!("failed to clear lock store: {e}"),
        }
    }

    /// Move the state machine forward. Refuses anything that is not a
    /// strict escalation, which is what makes the machine monotone.
    async fn advance(&self, next: EmergencyState, why: &str) -> bool {
        let mut state = self.state.write().await;
        if next.rank() <= state.rank() {
            debug!(
                current = %*state,
                attempted = %next,
                "escalation refused; emergency state never regresses"
            );
            return false;
        }
        error!(from = %*state, to = %next, reason = why, "🚨 emergency escalation");
        *state = next.clone();
        let _ = self.state_tx.send(next);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::state::new_registry;
    use crate::domain::ViolationKind;
    use crate::sandbox::SimulatedRuntime;

    fn violation(agent: &str, severity: Severity) -> Violation {
        Violation {
            agent_id: agent.into(),
            kind: ViolationKind::OutOfScopeFileAccess,
            severity,
            timestamp: Utc::now(),
            detail: "test".into(),
        }
    }

    fn harness(dir: &std::path::Path) -> (Arc<EmergencyController>, watch::Receiver<EmergencyState>, SimulatedRuntime) {
        let (outcome_tx, _outcome_rx) = mpsc::channel(8);
        let (event_tx, _event_rx) = mpsc::channel(8);
        let runtime = SimulatedRuntime::new(outcome_tx, event_tx);
        let lock_manager = Arc::new(LockManager::open(dir, 30).unwrap());
        let agents = new_registry(vec![
            Agent::new("agent-y", "sandbox-y"),
            Agent::new("agent-z", "sandbox-z"),
        ]);
        let (controller, state_rx) = EmergencyController::new(
            EscalationConfig::default(),
            lock_manager,
            Arc::new(runtime.clone()),
            agents,
        );
        (controller, state_rx, runtime)
    }

    #[tokio::test]
    async fn test_medium_violation_warns() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _rx, _runtime) = harness(dir.path());

        controller.on_violation(&violation("agent-y", Severity::Medium)).await;
        assert_eq!(controller.state().await, EmergencyState::Warning);
    }

    #[tokio::test]
    async fn test_low_violation_does_not_warn() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _rx, _runtime) = harness(dir.path());

        controller.on_violation(&violation("agent-y", Severity::Low)).await;
        assert_eq!(controller.state().await, EmergencyState::Normal);
    }

    #[tokio::test]
    async fn test_repeat_in_window_quarantines() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _rx, runtime) = harness(dir.path());

        controller.on_violation(&violation("agent-y", Severity::Medium)).await;
        controller.on_violation(&violation("agent-y", Severity::Medium)).await;

        assert_eq!(
            controller.state().await,
            EmergencyState::Quarantine { agent_id: "agent-y".into() }
        );
        assert!(runtime.is_frozen("agent-y"));
        assert!(!runtime.is_frozen("agent-z"));
    }

    #[tokio::test]
    async fn test_critical_quarantines_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _rx, runtime) = harness(dir.path());

        controller.on_violation(&violation("agent-y", Severity::Critical)).await;
        assert_eq!(
            controller.state().await,
            EmergencyState::Quarantine { agent_id: "agent-y".into() }
        );
        assert!(runtime.is_frozen("agent-y"));
    }

    #[tokio::test]
    async fn test_second_agent_violation_during_quarantine_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _rx, runtime) = harness(dir.path());

        controller.on_violation(&violation("agent-y", Severity::Critical)).await;
        controller.on_violation(&violation("agent-z", Severity::Low)).await;

        assert_eq!(controller.state().await, EmergencyState::ShutdownAll);
        assert!(runtime.is_stopped("agent-y"));
        assert!(runtime.is_stopped("agent-z"));
    }

    #[tokio::test]
    async fn test_state_never_regresses() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _rx, _runtime) = harness(dir.path());

        controller.shutdown_all("operator command").await;
        assert_eq!(controller.state().await, EmergencyState::ShutdownAll);

        // Nothing moves the machine after the terminal state.
        controller.on_violation(&violation("agent-y", Severity::Critical)).await;
        controller.quarantine("agent-y", "too late").await;
        assert_eq!(controller.state().await, EmergencyState::ShutdownAll);
    }

    #[tokio::test]
    async fn test_quarantine_revokes_locks() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _rx, _runtime) = harness(dir.path());
        let manager = LockManager::open(dir.path(), 30).unwrap();

        manager.acquire_default("config.json", "agent-y").unwrap();
        manager.acquire_default("schema.sql", "agent-z").unwrap();

        controller.quarantine("agent-y", "operator command").await;

        let table = manager.inspect().unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].holder_agent_id, "agent-z");
    }
}
