use thiserror::Error;

/// Main error type for the warden daemon
#[derive(Error, Debug)]
pub enum WardenError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Task graph errors (fatal at load time, before any agent is dispatched)
    #[error("Task graph cycle involving task '{0}'")]
    GraphCycle(String),

    #[error("Task '{task}' references unknown task '{reference}'")]
    UnknownReference { task: String, reference: String },

    #[error("Duplicate task id '{0}' in task graph")]
    DuplicateTask(String),

    // Locking errors
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    // Sandbox runtime errors
    #[error("Sandbox runtime failure for agent '{agent}': {reason}")]
    Runtime { agent: String, reason: String },

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for WardenError
pub type Result<T> = std::result::Result<T, WardenError>;

/// Specific error types for the lock manager
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("Resource '{resource}' is locked")]
    Busy { resource: String },

    #[error("Caller is not the current holder of '{resource}'")]
    NotHolder { resource: String },

    #[error("Lock on '{resource}' has expired")]
    Expired { resource: String },

    #[error("Lock store failure for '{resource}': {reason}")]
    Store { resource: String, reason: String },
}

impl LockError {
    /// `Busy` is the one expected, non-fatal outcome: the caller retries
    /// on a later reconciliation tick.
    pub fn is_busy(&self) -> bool {
        matches!(self, LockError::Busy { .. })
    }
}
