//! Sandbox runtime seam.
//!
//! The isolation mechanism itself (container engine, jail, VM) lives
//! outside this crate; the coordinator and emergency controller reach it
//! only through `SandboxRuntime`. Task completion and behavior telemetry
//! flow back on channels the runtime implementation owns.

pub mod simulated;

pub use simulated::{SimulatedRuntime, TaskScript};

use async_trait::async_trait;

use crate::domain::{Agent, Task};
use crate::error::Result;

/// Reported by a sandbox when an agent's task run ends.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: String,
    pub agent_id: String,
    pub success: bool,
    pub message: Option<String>,
}

/// External sandbox runtime operations.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Launch `task` inside `agent`'s sandbox. Completion arrives on the
    /// runtime's outcome channel.
    async fn start(&self, agent: &Agent, task: &Task) -> Result<()>;

    /// Terminate the sandbox, cutting process and network access.
    /// Idempotent: stopping a stopped sandbox is a no-op.
    async fn stop(&self, agent: &Agent) -> Result<()>;

    /// Pause the sandbox without losing state, for forensic review.
    async fn freeze(&self, agent: &Agent) -> Result<()>;
}
