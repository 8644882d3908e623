//! Replication service boundary
//!
//! The replication service is treated as an opaque asynchronous job API.
//! [`ReplicationService`] is the raw RPC surface; [`ReplicationAdapter`]
//! wraps it with the retry policy every caller goes through.

pub mod adapter;
pub mod retry;
pub mod simulated;

pub use adapter::ReplicationAdapter;
pub use retry::{AttemptRecord, RetryPolicy};
pub use simulated::SimulatedReplicationService;

use crate::models::execution::{AccountContext, ExecutionKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by the replication service
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicationError {
    /// Request rate limit hit
    #[error("Throttled: {0}")]
    Throttled(String),

    /// Service temporarily unavailable
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Request did not complete in time
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Job, server or instance does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Request is invalid for the current resource state
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Credentials lack permission
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Service-side quota refused the request
    #[error("Service quota exceeded: {0}")]
    QuotaExceeded(String),
}

impl ReplicationError {
    /// Transient errors are retried by the adapter
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Throttled(_) | Self::ServiceUnavailable(_) | Self::Timeout(_)
        )
    }
}

/// Replication state of a source server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationState {
    /// Healthy, continuously protected
    Continuous,
    InitialSync,
    Paused,
    Stalled,
    Stopped,
    Disconnected,
}

impl ReplicationState {
    /// Specific rejection reason, `None` when healthy
    pub fn health_issue(self) -> Option<&'static str> {
        match self {
            Self::Continuous => None,
            Self::InitialSync => Some("initial sync has not completed"),
            Self::Paused => Some("replication is paused"),
            Self::Stalled => Some("replication is stalled"),
            Self::Stopped => Some("replication is stopped"),
            Self::Disconnected => Some("source server is disconnected"),
        }
    }

    /// Counts against the replicating-servers quota
    pub fn is_replicating(self) -> bool {
        !matches!(self, Self::Stopped | Self::Disconnected)
    }
}

/// A server known to the replication service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceServer {
    pub server_id: String,
    #[serde(default)]
    pub hostname: String,
    pub replication_state: ReplicationState,
}

/// Recovery mode requested from the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    /// Isolated test launch
    Drill,
    /// Real recovery
    Recovery,
}

impl From<ExecutionKind> for RecoveryMode {
    fn from(kind: ExecutionKind) -> Self {
        match kind {
            ExecutionKind::Drill => Self::Drill,
            ExecutionKind::Live => Self::Recovery,
        }
    }
}

/// Job lifecycle as reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Started,
    Completed,
}

impl JobStatus {
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Completed)
    }
}

/// Launch status of one server within a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LaunchStatus {
    Pending,
    InProgress,
    Launched,
    Failed,
    Terminated,
}

impl LaunchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Launched | Self::Failed | Self::Terminated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Launch,
    Terminate,
}

/// One server's participation in a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobServer {
    pub server_id: String,
    pub launch_status: LaunchStatus,
    #[serde(default)]
    pub recovery_instance_id: Option<String>,
}

/// Job as returned by describe calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub is_drill: bool,
    pub servers: Vec<JobServer>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl JobView {
    pub fn server_ids(&self) -> impl Iterator<Item = &str> {
        self.servers.iter().map(|s| s.server_id.as_str())
    }
}

/// Raw replication service API, addressed per account and region
#[async_trait]
pub trait ReplicationService: Send + Sync {
    /// Start one recovery job covering every listed server
    async fn start_recovery_job(
        &self,
        account: &AccountContext,
        server_ids: &[String],
        mode: RecoveryMode,
    ) -> Result<JobView, ReplicationError>;

    async fn describe_job(
        &self,
        account: &AccountContext,
        job_id: &str,
    ) -> Result<JobView, ReplicationError>;

    /// Terminate recovered instances; returns the terminate job
    async fn terminate_recovery_instances(
        &self,
        account: &AccountContext,
        instance_ids: &[String],
    ) -> Result<JobView, ReplicationError>;

    /// Inventory with replication state
    async fn describe_source_servers(
        &self,
        account: &AccountContext,
    ) -> Result<Vec<SourceServer>, ReplicationError>;

    /// Launch jobs not yet completed, from any caller
    async fn list_active_jobs(
        &self,
        account: &AccountContext,
    ) -> Result<Vec<JobView>, ReplicationError>;
}
