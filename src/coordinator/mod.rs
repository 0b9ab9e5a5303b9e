//! Coordinator: reconciliation loop plus run bootstrap and shared state.

pub mod bootstrap;
#[allow(clippy::module_inception)]
pub mod coordinator;
pub mod state;

pub use bootstrap::{run_with_runtime, start_run};
pub use coordinator::{Coordinator, CoordinatorConfig};
pub use state::{new_registry, AgentRegistry, ReclaimEvent, RunSnapshot, SharedSnapshot};
