//! End-of-run reporting.
//!
//! A run that completes normally reports per-task status and any lock
//! reclaims (a sign of sluggish or crashed agents even in a successful
//! run). A run that escalated reports, per agent, its final status and
//! the violations behind the escalation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tabled::{Table, Tabled};

use crate::coordination::EmergencyState;
use crate::coordinator::state::ReclaimEvent;
use crate::domain::{Agent, Task, Violation};

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct TaskReport {
    #[tabled(rename = "task")]
    pub id: String,
    pub status: String,
    pub agent: String,
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct AgentReport {
    #[tabled(rename = "agent")]
    pub id: String,
    pub status: String,
    pub violations: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub final_state: EmergencyState,
    pub tasks: Vec<TaskReport>,
    pub agents: Vec<AgentReport>,
    pub reclaims: Vec<ReclaimEvent>,
    pub violations: Vec<Violation>,
}

impl RunReport {
    pub fn build(
        started_at: DateTime<Utc>,
        final_state: EmergencyState,
        tasks: Vec<Task>,
        assignments: &BTreeMap<String, String>,
        agents: Vec<Agent>,
        reclaims: Vec<ReclaimEvent>,
        violations: Vec<Violation>,
    ) -> Self {
        let mut per_agent: BTreeMap<&str, usize> = BTreeMap::new();
        for violation in &violations {
            *per_agent.entry(violation.agent_id.as_str()).or_insert(0) += 1;
        }

        let task_rows = tasks
            .iter()
            .map(|task| TaskReport {
                id: task.id.clone(),
                status: task.status.to_string(),
                agent: assignments
                    .get(&task.id)
                    .cloned()
                    .unwrap_or_else(|| "-".to_string()),
            })
            .collect();

        let agent_rows = agents
            .iter()
            .map(|agent| AgentReport {
                id: agent.id.clone(),
                status: agent.status.to_string(),
                violations: per_agent.get(agent.id.as_str()).copied().unwrap_or(0),
            })
            .collect();

        Self {
            started_at,
            finished_at: Utc::now(),
            final_state,
            tasks: task_rows,
            agents: agent_rows,
            reclaims,
            violations,
        }
    }

    /// Whether every task finished successfully.
    pub fn all_done(&self) -> bool {
        self.tasks.iter().all(|t| t.status == "done")
    }

    /// Human-readable rendering for the CLI.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "run {} -> {} (final safety state: {})\n\n",
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            self.finished_at.format("%H:%M:%S"),
            self.final_state
        ));

        out.push_str(&Table::new(&self.tasks).to_string());
        out.push('\n');
        out.push_str(&Table::new(&self.agents).to_string());
        out.push('\n');

        if !self.reclaims.is_empty() {
            out.push_str("\nlock reclaims (sluggish or crashed holders):\n");
            for reclaim in &self.reclaims {
                out.push_str(&format!(
                    "  {} held by {} expired {}\n",
                    reclaim.resource_id,
                    reclaim.holder_agent_id,
                    reclaim.expired_at.format("%H:%M:%S"),
                ));
            }
        }

        if !self.violations.is_empty() {
            out.push_str("\nviolations:\n");
            for violation in &self.violations {
                out.push_str(&format!(
                    "  [{}] {} by {}: {}\n",
                    violation.severity, violation.kind, violation.agent_id, violation.detail
                ));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskStatus;

    #[test]
    fn test_report_counts_violations_per_agent() {
        let mut task = Task::new("a");
        task.status = TaskStatus::Done;
        let mut assignments = BTreeMap::new();
        assignments.insert("a".to_string(), "agent-00".to_string());

        let violations = vec![
            Violation {
                agent_id: "agent-00".into(),
                kind: crate::domain::ViolationKind::NetworkAccessAttempt,
                severity: crate::domain::Severity::High,
                timestamp: Utc::now(),
                detail: "egress".into(),
            };
            3
        ];

        let report = RunReport::build(
            Utc::now(),
            EmergencyState::Normal,
            vec![task],
            &assignments,
            vec![Agent::new("agent-00", "sandbox-00")],
            Vec::new(),
            violations,
        );

        assert!(report.all_done());
        assert_eq!(report.agents[0].violations, 3);
        assert_eq!(report.tasks[0].agent, "agent-00");
        let rendered = report.render();
        assert!(rendered.contains("agent-00"));
        assert!(rendered.contains("violations"));
    }
}
