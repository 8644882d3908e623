//! Failover orchestration error types

use crate::models::execution::ExecutionStatus;
use crate::models::violation::Violation;
use crate::replication::retry::AttemptRecord;
use crate::replication::ReplicationError;
use thiserror::Error;
use uuid::Uuid;

/// Failover orchestration error types
#[derive(Debug, Error)]
pub enum FailoverError {
    /// Plan, quota or conflict validation rejected the request
    #[error("Validation failed with {} violation(s): {}", violations.len(), summarize(violations))]
    Validation {
        /// Execution the violations were recorded on, if one exists
        execution_id: Option<Uuid>,
        /// Every violation found, not just the first
        violations: Vec<Violation>,
    },

    /// Transient external errors persisted past the retry budget
    #[error("Retries exhausted for {operation} after {} attempt(s)", attempts.len())]
    RetriesExhausted {
        /// Adapter operation name
        operation: String,
        /// Attempt history, one entry per failed call
        attempts: Vec<AttemptRecord>,
    },

    /// Non-transient error reported by the replication service
    #[error("Replication service rejected {operation}: {source}")]
    External {
        /// Adapter operation name
        operation: String,
        /// Underlying service error
        #[source]
        source: ReplicationError,
    },

    /// A conditional write lost a race against another writer
    #[error("Consistency conflict on execution {execution_id}: expected {expected:?} at version {version}")]
    ConsistencyConflict {
        /// Execution that was being written
        execution_id: Uuid,
        /// Status the writer expected to find
        expected: ExecutionStatus,
        /// Version the writer expected to find
        version: u64,
    },

    /// The replication service reported servers that failed to launch
    #[error("Wave {wave_number} of execution {execution_id} failed: {} server(s) did not launch", failed_servers.len())]
    TerminalJobFailure {
        /// Failed execution
        execution_id: Uuid,
        /// Failed wave
        wave_number: u32,
        /// Servers reporting a terminal failure
        failed_servers: Vec<String>,
    },

    /// Execution does not exist
    #[error("Execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// Plan does not exist in the plan source
    #[error("Recovery plan not found: {0}")]
    PlanNotFound(String),

    /// Protection group does not exist in the plan source
    #[error("Protection group not found: {0}")]
    GroupNotFound(String),

    /// Pause token is wrong, consumed, or the execution is not paused
    #[error("Invalid or consumed pause token for execution {execution_id}")]
    InvalidPauseToken {
        /// Execution the resume targeted
        execution_id: Uuid,
    },

    /// Requested status change is not in the transition table
    #[error("Invalid transition for execution {execution_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Execution being changed
        execution_id: Uuid,
        /// Current status
        from: ExecutionStatus,
        /// Requested status
        to: ExecutionStatus,
    },

    /// Execution store failure
    #[error("Storage error: {details}")]
    Store { details: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// TOML configuration parse error
    #[error("TOML error: {source}")]
    Toml {
        #[from]
        source: toml::de::Error,
    },
}

/// Failover orchestration result type
pub type FailoverResult<T> = Result<T, FailoverError>;

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl FailoverError {
    /// Whether retrying the same call later could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RetriesExhausted { .. } | Self::ConsistencyConflict { .. } | Self::Io { .. }
        )
    }

    /// Whether this is a validation rejection
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Violations carried by a validation error
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Validation { violations, .. } => violations,
            _ => &[],
        }
    }

    pub(crate) fn store(details: impl Into<String>) -> Self {
        Self::Store {
            details: details.into(),
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_all_violations() {
        let error = FailoverError::Validation {
            execution_id: None,
            violations: vec![
                Violation::WaveTooLarge {
                    wave_number: 1,
                    server_count: 120,
                    limit: 100,
                },
                Violation::ConcurrentJobLimit {
                    region: "us-east-1".to_string(),
                    active_jobs: 20,
                    limit: 20,
                },
            ],
        };
        let text = error.to_string();
        assert!(text.contains("2 violation(s)"));
        assert!(text.contains("120 servers"));
        assert!(text.contains("20 active jobs"));
        assert!(error.is_validation());
        assert_eq!(error.violations().len(), 2);
    }

    #[test]
    fn test_retries_exhausted_error() {
        let error = FailoverError::RetriesExhausted {
            operation: "start_job".to_string(),
            attempts: vec![
                AttemptRecord {
                    attempt: 1,
                    error: "throttled".to_string(),
                    delay_ms: 10,
                },
                AttemptRecord {
                    attempt: 2,
                    error: "throttled".to_string(),
                    delay_ms: 0,
                },
            ],
        };
        assert!(error.to_string().contains("start_job"));
        assert!(error.to_string().contains("2 attempt(s)"));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_external_error_is_not_retryable() {
        let error = FailoverError::External {
            operation: "start_job".to_string(),
            source: ReplicationError::Rejected("server not found".to_string()),
        };
        assert!(!error.is_retryable());
        assert!(error.to_string().contains("server not found"));
    }

    #[test]
    fn test_terminal_job_failure_error() {
        let error = FailoverError::TerminalJobFailure {
            execution_id: Uuid::nil(),
            wave_number: 3,
            failed_servers: vec!["s-1".to_string()],
        };
        assert!(error.to_string().contains("Wave 3"));
        assert!(error.to_string().contains("1 server(s)"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let error: FailoverError = io.into();
        assert!(matches!(error, FailoverError::Io { .. }));
    }

    #[test]
    fn test_json_error_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error: FailoverError = parse.into();
        assert!(error.to_string().starts_with("JSON error"));
    }
}
