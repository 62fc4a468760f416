//! Error handling for the Modbus bridge
//!
//! Transport failures never unwind out of the scheduler: they are carried inside
//! `ExecuteState::Error` and absorbed by the worker loop. The remaining variants
//! surface at construction time (invalid tasks, invalid configuration).

use thiserror::Error;

/// Modbus bridge error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Transport I/O failed (connection lost, exception response, short response)
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Device did not answer in time
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// Task definition rejected (overlapping elements, PDU limits, ...)
    #[error("Task error: {0}")]
    TaskError(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal errors (worker thread, runtime)
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the Modbus bridge
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    pub fn transport(msg: impl Into<String>) -> Self {
        BridgeError::TransportError(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        BridgeError::TimeoutError(msg.into())
    }

    pub fn task(msg: impl Into<String>) -> Self {
        BridgeError::TaskError(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        BridgeError::ConfigError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        BridgeError::InternalError(msg.into())
    }

    /// Whether the error originates from the communication link
    pub fn is_communication_error(&self) -> bool {
        matches!(
            self,
            BridgeError::TransportError(_) | BridgeError::TimeoutError(_)
        )
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => BridgeError::TimeoutError(err.to_string()),
            _ => BridgeError::TransportError(err.to_string()),
        }
    }
}

impl From<common::Error> for BridgeError {
    fn from(err: common::Error) -> Self {
        BridgeError::ConfigError(err.to_string())
    }
}
