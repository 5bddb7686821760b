use thiserror::Error;

/// Main error type for the herder supervisor
#[derive(Debug, Error)]
pub enum HerderError {
    // Configuration errors
    #[error("Invalid spec '{name}': {reason}")]
    InvalidSpec { name: String, reason: String },

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    // Process-related errors
    #[error("Failed to spawn process '{name}': {reason}")]
    SpawnFailure { name: String, reason: String },

    #[error("Restart budget exhausted for {0}")]
    RestartBudgetExhausted(String),

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Failed to stop process {0}: {1}")]
    StopError(String, String),

    #[error("Signal error: {0}")]
    SignalError(String),

    // Log-related errors
    #[error("Log error: {0}")]
    LogError(String),

    #[error("Failed to open log file: {0}")]
    LogFileError(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // IO errors (automatically converted from std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HerderError {
    /// Shorthand for a load-time validation failure
    pub fn invalid_spec(name: impl Into<String>, reason: impl Into<String>) -> Self {
        HerderError::InvalidSpec {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a failed spawn attempt
    pub fn spawn_failure(name: impl Into<String>, reason: impl Into<String>) -> Self {
        HerderError::SpawnFailure {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for herder operations
pub type Result<T> = std::result::Result<T, HerderError>;
