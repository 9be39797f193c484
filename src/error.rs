//! # Dispatch Error Types
//!
//! Structured error handling for the dispatch pipeline using thiserror
//! instead of `Box<dyn Error>` patterns.
//!
//! Propagation policy: registration-time errors (`DuplicateRegistration`,
//! `WorkerSpawnFailure`, `InvalidPattern`) surface to the caller; runtime
//! per-message errors (`WorkerRuntimeError`, `MalformedEnvelope`,
//! `ExternalHandoffFailure`) are swallowed at the boundary closest to where
//! they occur and only logged.

use thiserror::Error;

/// Errors raised by the dispatch pipeline
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Worker already registered: {name}")]
    DuplicateRegistration { name: String },

    #[error("Failed to spawn worker from module: {path}: {reason}")]
    WorkerSpawnFailure { path: String, reason: String },

    #[error("Worker runtime error in {worker}: {reason}")]
    WorkerRuntimeError { worker: String, reason: String },

    #[error("Malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },

    #[error("External handoff to host {host} failed: {reason}")]
    ExternalHandoffFailure { host: String, reason: String },

    #[error("Invalid match pattern: {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Channel closed: {channel}")]
    ChannelClosed { channel: String },

    #[error("Operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal dispatch error: {message}")]
    Internal { message: String },
}

impl DispatchError {
    /// Create a duplicate registration error
    pub fn duplicate_registration(name: impl Into<String>) -> Self {
        Self::DuplicateRegistration { name: name.into() }
    }

    /// Create a worker spawn failure
    pub fn worker_spawn_failure(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WorkerSpawnFailure {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a worker runtime error
    pub fn worker_runtime(worker: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WorkerRuntimeError {
            worker: worker.into(),
            reason: reason.into(),
        }
    }

    /// Create a malformed envelope error
    pub fn malformed_envelope(reason: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            reason: reason.into(),
        }
    }

    /// Create an external handoff failure
    pub fn external_handoff(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExternalHandoffFailure {
            host: host.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid pattern error
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    /// Create a channel closed error
    pub fn channel_closed(channel: impl Into<String>) -> Self {
        Self::ChannelClosed {
            channel: channel.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for errors that surface to the caller at registration time
    pub fn is_registration_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateRegistration { .. }
                | Self::WorkerSpawnFailure { .. }
                | Self::InvalidPattern { .. }
                | Self::Configuration { .. }
        )
    }
}

pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DispatchError::duplicate_registration("page-content");
        assert_eq!(err.to_string(), "Worker already registered: page-content");

        let err = DispatchError::timeout("process_page", 5000);
        assert_eq!(
            err.to_string(),
            "Operation process_page timed out after 5000ms"
        );
    }

    #[test]
    fn test_registration_error_classification() {
        assert!(DispatchError::duplicate_registration("x").is_registration_error());
        assert!(DispatchError::worker_spawn_failure("/dist/x.worker.js", "not found")
            .is_registration_error());
        assert!(!DispatchError::malformed_envelope("missing discriminant").is_registration_error());
        assert!(!DispatchError::worker_runtime("x", "boom").is_registration_error());
    }
}
