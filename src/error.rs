use thiserror::Error;

use crate::types::SensorKind;

/// Sensor availability check failed. The engine degrades the sensor to unavailable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("Sensor probing unsupported: {0}")]
    Unsupported(String),

    #[error("Probe command failed: {0}")]
    Command(String),
}

/// A sensor stream could not be started or broke after probing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubscriptionError {
    #[error("{0} is not available on this device")]
    Unavailable(SensorKind),

    #[error("{0} already has a live subscription")]
    AlreadySubscribed(SensorKind),

    #[error("{kind} read failed: {reason}")]
    Read { kind: SensorKind, reason: String },
}

/// Inference call failed. Logged and skipped, never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    Status(u16),

    #[error("Malformed response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::Status(status.as_u16())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Errors returned to collaborators holding an [`EngineHandle`](crate::engine::EngineHandle).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Engine task has stopped")]
    Stopped,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
