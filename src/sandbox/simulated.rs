//! In-process sandbox runtime for tests and dry-run mode.
//!
//! Executes nothing: each started task sleeps for a scripted duration and
//! reports a scripted outcome. Scripts can also inject behavior events to
//! rehearse violation handling. Frozen or stopped agents never report —
//! the same silence a real frozen container produces.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{SandboxRuntime, TaskOutcome};
use crate::domain::{Agent, BehaviorEvent, BehaviorKind, Task};
use crate::error::Result;

/// Scripted behavior for one task.
#[derive(Debug, Clone)]
pub struct TaskScript {
    pub duration: Duration,
    pub success: bool,
    /// Behavior events emitted right after the task starts.
    pub events: Vec<BehaviorKind>,
}

impl Default for TaskScript {
    fn default() -> Self {
        Self {
            duration: Duration::from_millis(50),
            success: true,
            events: Vec::new(),
        }
    }
}

impl TaskScript {
    pub fn lasting(duration: Duration) -> Self {
        Self {
            duration,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            success: false,
            ..Default::default()
        }
    }

    pub fn emitting(events: Vec<BehaviorKind>) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }
}

struct Inner {
    scripts: Mutex<HashMap<String, TaskScript>>,
    stopped: Mutex<HashSet<String>>,
    frozen: Mutex<HashSet<String>>,
    outcome_tx: mpsc::Sender<TaskOutcome>,
    event_tx: mpsc::Sender<BehaviorEvent>,
}

impl Inner {
    fn is_silenced(&self, agent_id: &str) -> bool {
        self.stopped.lock().map(|s| s.contains(agent_id)).unwrap_or(true)
            || self.frozen.lock().map(|s| s.contains(agent_id)).unwrap_or(true)
    }
}

#[derive(Clone)]
pub struct SimulatedRuntime {
    inner: Arc<Inner>,
}

impl SimulatedRuntime {
    pub fn new(outcome_tx: mpsc::Sender<TaskOutcome>, event_tx: mpsc::Sender<BehaviorEvent>) -> Self {
        Self {
            inner: Arc::new(Inner {
                scripts: Mutex::new(HashMap::new()),
                stopped: Mutex::new(HashSet::new()),
                frozen: Mutex::new(HashSet::new()),
                outcome_tx,
                event_tx,
            }),
        }
    }

    pub fn script_task(&self, task_id: impl Into<String>, script: TaskScript) {
        if let Ok(mut scripts) = self.inner.scripts.lock() {
            scripts.insert(task_id.into(), script);
        }
    }

    pub fn is_stopped(&self, agent_id: &str) -> bool {
        self.inner
            .stopped
            .lock()
            .map(|s| s.contains(agent_id))
            .unwrap_or(false)
    }

    pub fn is_frozen(&self, agent_id: &str) -> bool {
        self.inner
            .frozen
            .lock()
            .map(|s| s.contains(agent_id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl SandboxRuntime for SimulatedRuntime {
    async fn start(&self, agent: &Agent, task: &Task) -> Result<()> {
        let script = self
            .inner
            .scripts
            .lock()
            .ok()
            .and_then(|s| s.get(&task.id).cloned())
            .unwrap_or_default();

        debug!(agent = %agent.id, task = %task.id, "simulated start");

        let inner = self.inner.clone();
        let agent_id = agent.id.clone();
        let task_id = task.id.clone();
        tokio::spawn(async move {
            for kind in script.events {
                let event = BehaviorEvent::new(agent_id.clone(), kind);
                if inner.event_tx.send(event).await.is_err() {
                    return;
                }
            }

            tokio::time::sleep(script.duration).await;

            // Frozen and stopped sandboxes do not report.
            if inner.is_silenced(&agent_id) {
                return;
            }

            let _ = inner
                .outcome_tx
                .send(TaskOutcome {
                    task_id,
                    agent_id,
                    success: script.success,
                    message: if script.success {
                        None
                    } else {
                        Some("simulated failure".to_string())
                    },
                })
                .await;
        });

        Ok(())
    }

    async fn stop(&self, agent: &Agent) -> Result<()> {
        if let Ok(mut stopped) = self.inner.stopped.lock() {
            stopped.insert(agent.id.clone());
        }
        debug!(agent = %agent.id, "simulated stop");
        Ok(())
    }

    async fn freeze(&self, agent: &Agent) -> Result<()> {
        if let Ok(mut frozen) = self.inner.frozen.lock() {
            frozen.insert(agent.id.clone());
        }
        debug!(agent = %agent.id, "simulated freeze");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_outcome_arrives() {
        let (outcome_tx, mut outcome_rx) = mpsc::channel(8);
        let (event_tx, _event_rx) = mpsc::channel(8);
        let runtime = SimulatedRuntime::new(outcome_tx, event_tx);

        let agent = Agent::new("agent-00", "sandbox-00");
        let task = Task::new("build");
        runtime.script_task("build", TaskScript::failing());
        runtime.start(&agent, &task).await.unwrap();

        let outcome = outcome_rx.recv().await.unwrap();
        assert_eq!(outcome.task_id, "build");
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_frozen_agent_reports_nothing() {
        let (outcome_tx, mut outcome_rx) = mpsc::channel(8);
        let (event_tx, _event_rx) = mpsc::channel(8);
        let runtime = SimulatedRuntime::new(outcome_tx, event_tx);

        let agent = Agent::new("agent-00", "sandbox-00");
        let task = Task::new("build");
        runtime.script_task("build", TaskScript::lasting(Duration::from_millis(100)));
        runtime.start(&agent, &task).await.unwrap();
        runtime.freeze(&agent).await.unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(outcome_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (outcome_tx, _outcome_rx) = mpsc::channel(8);
        let (event_tx, _event_rx) = mpsc::channel(8);
        let runtime = SimulatedRuntime::new(outcome_tx, event_tx);

        let agent = Agent::new("agent-00", "sandbox-00");
        runtime.stop(&agent).await.unwrap();
        runtime.stop(&agent).await.unwrap();
        assert!(runtime.is_stopped("agent-00"));
    }

    #[tokio::test]
    async fn test_scripted_events_reach_feed() {
        let (outcome_tx, _outcome_rx) = mpsc::channel(8);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let runtime = SimulatedRuntime::new(outcome_tx, event_tx);

        let agent = Agent::new("agent-00", "sandbox-00");
        let task = Task::new("exfiltrate");
        runtime.script_task(
            "exfiltrate",
            TaskScript::emitting(vec![BehaviorKind::NetworkEgress {
                destination: "198.51.100.7:443".into(),
            }]),
        );
        runtime.start(&agent, &task).await.unwrap();

        let event = event_rx.recv().await.unwrap();
        assert_eq!(event.agent_id, "agent-00");
        assert!(matches!(event.kind, BehaviorKind::NetworkEgress { .. }));
    }
}
