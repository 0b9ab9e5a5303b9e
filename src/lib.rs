pub mod cli;
pub mod config;
pub mod coordination;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod lock;
pub mod monitor;
pub mod report;
pub mod sandbox;

pub use config::AppConfig;
pub use coordination::{
    EmergencyController, EmergencyState, EscalationConfig, OperatorCommand,
};
pub use coordinator::{
    new_registry, run_with_runtime, start_run, AgentRegistry, Coordinator, CoordinatorConfig,
    ReclaimEvent, RunSnapshot, SharedSnapshot,
};
pub use domain::{
    Agent, AgentStatus, BehaviorEvent, BehaviorKind, Severity, Task, TaskGraph, TaskStatus,
    Violation, ViolationKind,
};
pub use error::{LockError, Result, WardenError};
pub use lock::{LockManager, LockRecord, LockToken};
pub use monitor::{IsolationPolicy, SeverityMap, ViolationLog, ViolationMonitor};
pub use report::RunReport;
pub use sandbox::{SandboxRuntime, SimulatedRuntime, TaskOutcome, TaskScript};
