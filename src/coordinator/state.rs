//! Coordinator state — shared run state across components.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::{Agent, TaskStatus};

/// Shared agent table. The coordinator owns status transitions, except
/// Quarantined/Stopped which the emergency controller may also write; the
/// coordinator resolves the race by never overwriting a status it did not
/// set itself.
pub type AgentRegistry = Arc<RwLock<BTreeMap<String, Agent>>>;

pub fn new_registry(agents: Vec<Agent>) -> AgentRegistry {
    Arc::new(RwLock::new(
        agents.into_iter().map(|a| (a.id.clone(), a)).collect(),
    ))
}

/// A lock taken back from an unresponsive holder. Surfaced in the run
/// report: reclaims mean a sluggish or crashed agent even when the run
/// ultimately succeeds.
#[derive(Debug, Clone, Serialize)]
pub struct ReclaimEvent {
    pub resource_id: String,
    pub holder_agent_id: String,
    pub expired_at: DateTime<Utc>,
    pub reclaimed_at: DateTime<Utc>,
}

/// Point-in-time view of the run, published after every tick for status
/// surfaces and tests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSnapshot {
    pub tasks: BTreeMap<String, TaskStatus>,
    /// task id -> agent id, for every assignment made so far.
    pub assignments: BTreeMap<String, String>,
    pub reclaims: usize,
    pub last_refresh: Option<DateTime<Utc>>,
}

pub type SharedSnapshot = Arc<RwLock<RunSnapshot>>;
