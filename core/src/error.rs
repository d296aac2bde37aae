//! Error types for cloud-runtimes

use crate::types::StateConsistency;
use thiserror::Error;

/// Main error type for cloud-runtimes clients
#[derive(Error, Debug)]
pub enum CloudRuntimesError {
    // ============ Argument Errors ============
    /// Malformed input, detected before any request is sent
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // ============ State Errors ============
    /// A conditional write or delete lost the race
    #[error("Concurrency conflict on key {key}: {reason}")]
    ConcurrencyConflict { key: String, reason: String },

    /// A transaction or atomic bulk call applied nothing
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("State store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Consistency {0} is not supported by the state store")]
    UnsupportedConsistency(StateConsistency),

    // ============ Call Errors ============
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Cancelled")]
    Cancelled,

    // ============ Runtime Errors ============
    #[error("Runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Client is closed")]
    ClientClosed,

    // ============ Configuration Errors ============
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // ============ General Errors ============
    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CloudRuntimesError {
    /// Whether the same call may succeed if retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CloudRuntimesError::ConcurrencyConflict { .. }
                | CloudRuntimesError::TransactionAborted(_)
                | CloudRuntimesError::StoreUnavailable(_)
                | CloudRuntimesError::RuntimeUnavailable(_)
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, CloudRuntimesError::ConcurrencyConflict { .. })
    }
}

impl From<std::io::Error> for CloudRuntimesError {
    fn from(err: std::io::Error) -> Self {
        CloudRuntimesError::Internal(err.to_string())
    }
}

impl From<bincode::Error> for CloudRuntimesError {
    fn from(err: bincode::Error) -> Self {
        CloudRuntimesError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for CloudRuntimesError {
    fn from(err: serde_json::Error) -> Self {
        CloudRuntimesError::Serialization(err.to_string())
    }
}

/// Fault reported by a transport or the backend behind it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendFault {
    #[error("etag mismatch on key {key}: expected {expected:?}, current {current:?}")]
    EtagMismatch {
        key: String,
        expected: Option<String>,
        current: Option<String>,
    },

    #[error("consistency {0} not supported")]
    ConsistencyUnsupported(StateConsistency),

    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("state store {0} is not configured")]
    StoreNotConfigured(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl BackendFault {
    pub fn unavailable(reason: impl ToString) -> Self {
        BackendFault::Unavailable(reason.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_display() {
        let err = CloudRuntimesError::ConcurrencyConflict {
            key: "order-1".to_string(),
            reason: "stale etag".to_string(),
        };
        assert!(err.to_string().contains("order-1"));
        assert!(err.is_conflict());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(CloudRuntimesError::TransactionAborted("x".into()).is_retryable());
        assert!(CloudRuntimesError::StoreUnavailable("x".into()).is_retryable());
        assert!(!CloudRuntimesError::InvalidArgument("x".into()).is_retryable());
        assert!(!CloudRuntimesError::UnsupportedConsistency(StateConsistency::Strong).is_retryable());
        assert!(!CloudRuntimesError::Cancelled.is_retryable());
    }

    #[test]
    fn test_fault_display() {
        let fault = BackendFault::EtagMismatch {
            key: "k".into(),
            expected: Some("1".into()),
            current: None,
        };
        assert!(fault.to_string().contains("etag mismatch"));
        assert_eq!(
            BackendFault::ConsistencyUnsupported(StateConsistency::Strong).to_string(),
            "consistency strong not supported"
        );
    }
}
