//! Shared domain types: agents, tasks, violations.

pub mod agent;
pub mod task;
pub mod violation;

pub use agent::{Agent, AgentStatus};
pub use task::{Task, TaskGraph, TaskStatus};
pub use violation::{BehaviorEvent, BehaviorKind, Severity, Violation, ViolationKind};
