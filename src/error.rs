//! Error types for Gatewarden.

use thiserror::Error;

/// Main error type for Gatewarden operations.
#[derive(Error, Debug)]
pub enum GatewardenError {
    /// Configuration-related errors, raised at construction only
    #[error("Configuration error: {0}")]
    Config(String),

    /// Networked store I/O failures
    #[error("Store error: {0}")]
    Store(String),

    /// Errors from the bundled Redis client
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewardenError {
    /// Whether this error came from the state store rather than configuration.
    ///
    /// Callers use this to pick a fail-open or fail-closed policy per request.
    pub fn is_store_error(&self) -> bool {
        match self {
            GatewardenError::Store(_) => true,
            #[cfg(feature = "redis")]
            GatewardenError::Redis(_) => true,
            _ => false,
        }
    }
}

/// Result type alias for Gatewarden operations.
pub type Result<T> = std::result::Result<T, GatewardenError>;
