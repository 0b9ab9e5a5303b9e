//! Agent domain types.
//!
//! An agent is one isolated execution unit running a coding task inside an
//! external sandbox. The coordinator owns agent status transitions, except
//! Quarantined/Stopped which the emergency controller may also set.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Provisioned and waiting for work.
    Idle,
    /// Executing an assigned task inside its sandbox.
    Running,
    /// Frozen by the emergency controller; never dispatched again this run.
    Quarantined,
    /// Sandbox terminated.
    Stopped,
}

impl AgentStatus {
    /// Whether the coordinator may dispatch a task to this agent.
    pub fn can_accept_work(&self) -> bool {
        matches!(self, AgentStatus::Idle)
    }

    /// Whether the agent is permanently out of the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Quarantined | AgentStatus::Stopped)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Running => write!(f, "running"),
            AgentStatus::Quarantined => write!(f, "quarantined"),
            AgentStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// One sandboxed agent participating in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    /// Opaque reference into the external sandbox runtime.
    pub sandbox_handle: String,
    pub status: AgentStatus,
    pub current_task_id: Option<String>,
}

impl Agent {
    pub fn new(id: impl Into<String>, sandbox_handle: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sandbox_handle: sandbox_handle.into(),
            status: AgentStatus::Idle,
            current_task_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_checks() {
        assert!(AgentStatus::Idle.can_accept_work());
        assert!(!AgentStatus::Running.can_accept_work());
        assert!(AgentStatus::Quarantined.is_terminal());
        assert!(AgentStatus::Stopped.is_terminal());
        assert!(!AgentStatus::Running.is_terminal());
    }

    #[test]
    fn test_new_agent_is_idle() {
        let agent = Agent::new("agent-00", "sandbox-00");
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(agent.current_task_id.is_none());
    }
}
