//! Multi-wave disaster recovery failover orchestration
//!
//! This crate drives recovery plans against an external replication service:
//! - Wave scheduling in dependency order with persisted pause/resume gates
//! - Conflict and capacity guarding against the service's quotas
//! - Cross-account capacity aggregation with bounded concurrency
//! - Retrying replication adapter with exponential backoff and jitter
//! - Execution store with optimistic-lock conditional writes
//! - Background poller reconciling executions not driven synchronously

pub mod aggregator;
pub mod config;
pub mod error;
pub mod guard;
pub mod models;
pub mod notification;
pub mod orchestrator;
pub mod poller;
pub mod replication;
pub mod scheduler;
pub mod store;

pub use error::{FailoverError, FailoverResult};

pub use config::{
    AggregatorConfig, CapacityThresholds, OrchestratorConfig, PollerConfig, RetryConfig,
    SchedulerConfig, ServiceQuotas, StoreConfig,
};

pub use models::{
    AccountContext, CapacitySnapshot, CapacityStatus, ConflictHolder, Execution, ExecutionKind,
    ExecutionStatus, HistoryEvent, InMemoryPlanSource, PauseToken, PlanDocument, PlanSource,
    ProtectionGroup, RecoveryPlan, ServerOutcome, Violation, WaveSpec, WaveState, WaveStatus,
};

pub use aggregator::{AccountCapacity, CapacityAggregator, CapacityReport, FailedQuery};
pub use guard::{ConflictGuard, ExternalState};
pub use notification::{
    ChannelSink, FanoutSink, LifecycleEvent, NotificationSink, NullSink, TracingSink,
};
pub use orchestrator::FailoverOrchestrator;
pub use poller::{ExecutionPoller, PollerHandle, ReconcileStats};
pub use replication::{
    JobStatus, JobView, RecoveryMode, ReplicationAdapter, ReplicationError, ReplicationService,
    ReplicationState, RetryPolicy, SimulatedReplicationService, SourceServer,
};
pub use scheduler::{DriveMode, DriveReport, ExecutionRequest, WaveScheduler};
pub use store::{CreateOutcome, ExecutionStore, FileExecutionStore, InMemoryExecutionStore};
