//! Violation Monitor
//!
//! Drains the sandbox runtime's behavior-event feed, classifies each event
//! against the isolation policy, persists violations to the append-only
//! audit log, and only then forwards them downstream. Persist-then-notify
//! ordering is the contract: the audit record exists even if everything
//! after the monitor crashes immediately.

pub mod audit;
pub mod policy;

pub use audit::ViolationLog;
pub use policy::{IsolationPolicy, SeverityMap};

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::domain::{BehaviorEvent, Violation};

pub struct ViolationMonitor {
    policy: IsolationPolicy,
    log: Arc<ViolationLog>,
}

impl ViolationMonitor {
    pub fn new(policy: IsolationPolicy, log: Arc<ViolationLog>) -> Self {
        Self { policy, log }
    }

    /// Pure classification step, exposed for tests.
    pub fn classify(&self, event: &BehaviorEvent) -> Option<Violation> {
        self.policy.classify(event)
    }

    /// Monitor loop: runs until the event feed closes or every downstream
    /// consumer is gone.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<BehaviorEvent>,
        violations: mpsc::Sender<Violation>,
    ) {
        while let Some(event) = events.recv().await {
            let Some(violation) = self.classify(&event) else {
                continue;
            };

            match self.log.append(&violation) {
                Ok(true) => {}
                Ok(false) => {
                    // At-least-once delivery: already persisted and
                    // already acted on.
                    debug!(
                        agent = %violation.agent_id,
                        kind = %violation.kind,
                        "duplicate violation delivery ignored"
                    );
                    continue;
                }
                Err(e) => {
                    // A safety signal is never suppressed, even when the
                    // audit write fails.
                    error!(
                        agent = %violation.agent_id,
                        "audit append failed ({e}); escalating anyway"
                    );
                }
            }

            warn!(
                agent = %violation.agent_id,
                kind = %violation.kind,
                severity = %violation.severity,
                detail = %violation.detail,
                "isolation violation"
            );

            if violations.send(violation).await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BehaviorKind;

    #[tokio::test]
    async fn test_monitor_persists_before_forwarding() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(ViolationLog::open(dir.path().join("v.jsonl")).unwrap());
        let monitor = ViolationMonitor::new(IsolationPolicy::default(), log.clone());

        let (event_tx, event_rx) = mpsc::channel(8);
        let (violation_tx, mut violation_rx) = mpsc::channel(8);
        let handle = tokio::spawn(monitor.run(event_rx, violation_tx));

        event_tx
            .send(BehaviorEvent::new(
                "agent-00",
                BehaviorKind::FileAccess {
                    path: "/etc/passwd".into(),
                },
            ))
            .await
            .unwrap();

        let violation = violation_rx.recv().await.unwrap();
        assert_eq!(violation.agent_id, "agent-00");
        // Already on disk by the time it arrives downstream.
        assert_eq!(log.load().unwrap().len(), 1);

        drop(event_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_event_forwarded_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(ViolationLog::open(dir.path().join("v.jsonl")).unwrap());
        let monitor = ViolationMonitor::new(IsolationPolicy::default(), log.clone());

        let (event_tx, event_rx) = mpsc::channel(8);
        let (violation_tx, mut violation_rx) = mpsc::channel(8);
        let handle = tokio::spawn(monitor.run(event_rx, violation_tx));

        let event = BehaviorEvent::new(
            "agent-00",
            BehaviorKind::NetworkEgress {
                destination: "8.8.8.8:53".into(),
            },
        );
        event_tx.send(event.clone()).await.unwrap();
        event_tx.send(event).await.unwrap();
        drop(event_tx);
        handle.await.unwrap();

        assert!(violation_rx.recv().await.is_some());
        assert!(violation_rx.recv().await.is_none());
        assert_eq!(log.load().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clean_events_pass_silently() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(ViolationLog::open(dir.path().join("v.jsonl")).unwrap());
        let monitor = ViolationMonitor::new(IsolationPolicy::default(), log.clone());

        let (event_tx, event_rx) = mpsc::channel(8);
        let (violation_tx, mut violation_rx) = mpsc::channel(8);
        let handle = tokio::spawn(monitor.run(event_rx, violation_tx));

        event_tx
            .send(BehaviorEvent::new(
                "agent-00",
                BehaviorKind::FileAccess {
                    path: "/workspace/src/main.rs".into(),
                },
            ))
            .await
            .unwrap();
        drop(event_tx);
        handle.await.unwrap();

        assert!(violation_rx.recv().await.is_none());
        assert!(log.load().unwrap().is_empty());
    }
}
