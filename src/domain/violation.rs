//! Violation and behavior-event types.
//!
//! A `BehaviorEvent` is raw telemetry from the sandbox runtime; a
//! `Violation` is the classified, persisted record of a policy breach.
//! Violations are append-only: the audit trail is never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of isolation breach an agent attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Agent attempted network egress from a no-network sandbox.
    NetworkAccessAttempt,
    /// Agent attempted to use a capability outside its allowlist.
    PrivilegeEscalation,
    /// Agent touched a path outside its allowed prefixes.
    OutOfScopeFileAccess,
    /// Agent exceeded a configured resource ceiling.
    ResourceExhaustion,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationKind::NetworkAccessAttempt => write!(f, "network-access-attempt"),
            ViolationKind::PrivilegeEscalation => write!(f, "privilege-escalation"),
            ViolationKind::OutOfScopeFileAccess => write!(f, "out-of-scope-file-access"),
            ViolationKind::ResourceExhaustion => write!(f, "resource-exhaustion"),
        }
    }
}

/// Severity of a violation. Ordering matters: escalation thresholds
/// compare severities directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A recorded breach of an agent's isolation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub agent_id: String,
    pub kind: ViolationKind,
    pub severity: Severity,
    /// Timestamp of the originating behavior event, so duplicate delivery
    /// of the same event classifies to an identical record.
    pub timestamp: DateTime<Utc>,
    pub detail: String,
}

impl Violation {
    /// Identity key used by the audit log to deduplicate re-delivered
    /// events.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.agent_id,
            self.kind,
            self.timestamp.to_rfc3339(),
            self.detail
        )
    }
}

/// What an agent was observed doing inside its sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BehaviorKind {
    /// Outbound network attempt.
    NetworkEgress { destination: String },
    /// Filesystem access.
    FileAccess { path: String },
    /// Exercise of a kernel capability.
    CapabilityUse { capability: String },
    /// Periodic resource usage sample.
    ResourceUsage { memory_mb: u64, cpu_pct: u64 },
}

/// One raw event from the sandbox runtime's behavior feed.
///
/// Delivery is at-least-once; classification must be deterministic so
/// duplicates collapse to one violation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorEvent {
    pub agent_id: String,
    pub kind: BehaviorKind,
    pub timestamp: DateTime<Utc>,
    /// Free-form context from the runtime (syscall args, destination port).
    #[serde(default)]
    pub detail: String,
}

impl BehaviorEvent {
    pub fn new(agent_id: impl Into<String>, kind: BehaviorKind) -> Self {
        Self {
            agent_id: agent_id.into(),
            kind,
            timestamp: Utc::now(),
            detail: String::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_dedup_key_is_stable() {
        let ts = Utc::now();
        let a = Violation {
            agent_id: "agent-00".into(),
            kind: ViolationKind::NetworkAccessAttempt,
            severity: Severity::High,
            timestamp: ts,
            detail: "egress to 8.8.8.8".into(),
        };
        let b = a.clone();
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn test_violation_kind_display() {
        assert_eq!(
            ViolationKind::PrivilegeEscalation.to_string(),
            "privilege-escalation"
        );
        assert_eq!(
            ViolationKind::ResourceExhaustion.to_string(),
            "resource-exhaustion"
        );
    }
}
