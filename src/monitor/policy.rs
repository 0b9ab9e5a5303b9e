//! Declarative isolation policy and event classification.
//!
//! The policy is a small closed set of tagged rules — allowed path
//! prefixes, a network switch, a capability allowlist, resource ceilings —
//! so classification is an exhaustive match, not an open-ended predicate.
//! Classification is pure and stateless per event: the same event always
//! classifies to the same violation.

use serde::Deserialize;

use crate::domain::{BehaviorEvent, BehaviorKind, Severity, Violation, ViolationKind};

/// Static kind-to-severity mapping used for every classification.
#[derive(Debug, Clone, Deserialize)]
pub struct SeverityMap {
    #[serde(default = "default_network_severity")]
    pub network_access_attempt: Severity,
    #[serde(default = "default_privilege_severity")]
    pub privilege_escalation: Severity,
    #[serde(default = "default_file_severity")]
    pub out_of_scope_file_access: Severity,
    #[serde(default = "default_resource_severity")]
    pub resource_exhaustion: Severity,
}

fn default_network_severity() -> Severity {
    Severity::High
}

fn default_privilege_severity() -> Severity {
    Severity::Critical
}

fn default_file_severity() -> Severity {
    Severity::Medium
}

fn default_resource_severity() -> Severity {
    Severity::Low
}

impl Default for SeverityMap {
    fn default() -> Self {
        Self {
            network_access_attempt: default_network_severity(),
            privilege_escalation: default_privilege_severity(),
            out_of_scope_file_access: default_file_severity(),
            resource_exhaustion: default_resource_severity(),
        }
    }
}

impl SeverityMap {
    pub fn for_kind(&self, kind: ViolationKind) -> Severity {
        match kind {
            ViolationKind::NetworkAccessAttempt => self.network_access_attempt,
            ViolationKind::PrivilegeEscalation => self.privilege_escalation,
            ViolationKind::OutOfScopeFileAccess => self.out_of_scope_file_access,
            ViolationKind::ResourceExhaustion => self.resource_exhaustion,
        }
    }
}

/// What an agent is allowed to do inside its sandbox.
#[derive(Debug, Clone, Deserialize)]
pub struct IsolationPolicy {
    /// Path prefixes the agent may read or write.
    #[serde(default = "default_path_prefixes")]
    pub allowed_path_prefixes: Vec<String>,
    /// Agents normally have no network at all.
    #[serde(default)]
    pub allow_network: bool,
    /// Capabilities the agent may exercise.
    #[serde(default)]
    pub allowed_capabilities: Vec<String>,
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
    #[serde(default = "default_max_cpu_pct")]
    pub max_cpu_pct: u64,
    #[serde(default)]
    pub severity: SeverityMap,
}

fn default_path_prefixes() -> Vec<String> {
    vec!["/workspace".to_string()]
}

fn default_max_memory_mb() -> u64 {
    2048
}

fn default_max_cpu_pct() -> u64 {
    100
}

impl Default for IsolationPolicy {
    fn default() -> Self {
        Self {
            allowed_path_prefixes: default_path_prefixes(),
            allow_network: false,
            allowed_capabilities: Vec::new(),
            max_memory_mb: default_max_memory_mb(),
            max_cpu_pct: default_max_cpu_pct(),
            severity: SeverityMap::default(),
        }
    }
}

impl IsolationPolicy {
    /// Classify one behavior event. `None` means the event is within
    /// policy. Deterministic: duplicate deliveries of the same event
    /// produce identical violations.
    pub fn classify(&self, event: &BehaviorEvent) -> Option<Violation> {
        let (kind, detail) = match &event.kind {
            BehaviorKind::NetworkEgress { destination } => {
                if self.allow_network {
                    return None;
                }
                (
                    ViolationKind::NetworkAccessAttempt,
                    format!("network egress to '{destination}'"),
                )
            }
            BehaviorKind::FileAccess { path } => {
                if self
                    .allowed_path_prefixes
                    .iter()
                    .any(|prefix| path.starts_with(prefix.as_str()))
                {
                    return None;
                }
                (
                    ViolationKind::OutOfScopeFileAccess,
                    format!("access to '{path}' outside allowed prefixes"),
                )
            }
            BehaviorKind::CapabilityUse { capability } => {
                if self
                    .allowed_capabilities
                    .iter()
                    .any(|allowed| allowed == capability)
                {
                    return None;
                }
                (
                    ViolationKind::PrivilegeEscalation,
                    format!("use of capability '{capability}'"),
                )
            }
            BehaviorKind::ResourceUsage { memory_mb, cpu_pct } => {
                if *memory_mb <= self.max_memory_mb && *cpu_pct <= self.max_cpu_pct {
                    return None;
                }
                (
                    ViolationKind::ResourceExhaustion,
                    format!(
                        "usage {memory_mb}MiB/{cpu_pct}% exceeds ceiling {}MiB/{}%",
                        self.max_memory_mb, self.max_cpu_pct
                    ),
                )
            }
        };

        let detail = if event.detail.is_empty() {
            detail
        } else {
            format!("{detail} ({})", event.detail)
        };

        Some(Violation {
            agent_id: event.agent_id.clone(),
            kind,
            severity: self.severity.for_kind(kind),
            timestamp: event.timestamp,
            detail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_egress_is_violation_by_default() {
        let policy = IsolationPolicy::default();
        let event = BehaviorEvent::new(
            "agent-00",
            BehaviorKind::NetworkEgress {
                destination: "8.8.8.8:53".into(),
            },
        );
        let v = policy.classify(&event).unwrap();
        assert_eq!(v.kind, ViolationKind::NetworkAccessAttempt);
        assert_eq!(v.severity, Severity::High);
    }

    #[test]
    fn test_network_egress_allowed_when_enabled() {
        let policy = IsolationPolicy {
            allow_network: true,
            ..Default::default()
        };
        let event = BehaviorEvent::new(
            "agent-00",
            BehaviorKind::NetworkEgress {
                destination: "10.0.0.1:443".into(),
            },
        );
        assert!(policy.classify(&event).is_none());
    }

    #[test]
    fn test_in_scope_path_is_clean() {
        let policy = IsolationPolicy::default();
        let event = BehaviorEvent::new(
            "agent-00",
            BehaviorKind::FileAccess {
                path: "/workspace/src/lib.rs".into(),
            },
        );
        assert!(policy.classify(&event).is_none());
    }

    #[test]
    fn test_out_of_scope_path_is_violation() {
        let policy = IsolationPolicy::default();
        let event = BehaviorEvent::new(
            "agent-00",
            BehaviorKind::FileAccess {
                path: "/etc/passwd".into(),
            },
        );
        let v = policy.classify(&event).unwrap();
        assert_eq!(v.kind, ViolationKind::OutOfScopeFileAccess);
        assert_eq!(v.severity, Severity::Medium);
    }

    #[test]
    fn test_unlisted_capability_is_escalation() {
        let policy = IsolationPolicy::default();
        let event = BehaviorEvent::new(
            "agent-00",
            BehaviorKind::CapabilityUse {
                capability: "CAP_SYS_ADMIN".into(),
            },
        );
        let v = policy.classify(&event).unwrap();
        assert_eq!(v.kind, ViolationKind::PrivilegeEscalation);
        assert_eq!(v.severity, Severity::Critical);
    }

    #[test]
    fn test_resource_ceiling() {
        let policy = IsolationPolicy {
            max_memory_mb: 512,
            ..Default::default()
        };
        let over = BehaviorEvent::new(
            "agent-00",
            BehaviorKind::ResourceUsage {
                memory_mb: 1024,
                cpu_pct: 10,
            },
        );
        let under = BehaviorEvent::new(
            "agent-00",
            BehaviorKind::ResourceUsage {
                memory_mb: 100,
                cpu_pct: 10,
            },
        );
        assert_eq!(
            policy.classify(&over).unwrap().kind,
            ViolationKind::ResourceExhaustion
        );
        assert!(policy.classify(&under).is_none());
    }

    #[test]
    fn test_classification_is_deterministic() {
        let policy = IsolationPolicy::default();
        let event = BehaviorEvent::new(
            "agent-00",
            BehaviorKind::FileAccess {
                path: "/etc/shadow".into(),
            },
        );
        let a = policy.classify(&event).unwrap();
        let b = policy.classify(&event).unwrap();
        assert_eq!(a.dedup_key(), b.dedup_key());
    }
}
