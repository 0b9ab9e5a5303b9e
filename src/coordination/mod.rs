//! Safety coordination for a run:
//! - Emergency Controller state machine (warning, quarantine, shutdown)
//! - Operator control-file transport for manual triggers

pub mod control;
pub mod emergency;

pub use control::{watch_control_file, write_command};
pub use emergency::{
    EmergencyController, EmergencyState, EscalationConfig, OperatorCommand,
};
