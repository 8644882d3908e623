//! Execution persistence with optimistic-lock writes
//!
//! Every change to an existing execution goes through
//! [`ExecutionStore::update_if`], a compare-and-swap on the stored status and
//! version. A failed precondition means another writer advanced the record;
//! callers discard their change instead of retrying it blindly.

pub mod file;
pub mod memory;

pub use file::FileExecutionStore;
pub use memory::InMemoryExecutionStore;

use crate::config::StoreConfig;
use crate::error::FailoverResult;
use crate::models::execution::{Execution, ExecutionStatus};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Result of a conditional create
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// The record was written
    Created(Execution),
    /// A record with the same idempotency key already exists
    Existing(Execution),
}

impl CreateOutcome {
    pub fn execution(&self) -> &Execution {
        match self {
            Self::Created(execution) | Self::Existing(execution) => execution,
        }
    }

    pub fn into_execution(self) -> Execution {
        match self {
            Self::Created(execution) | Self::Existing(execution) => execution,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Durable key-value store for execution records
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn get(&self, id: Uuid) -> FailoverResult<Option<Execution>>;

    /// Insert a new record at version 1
    ///
    /// When the execution carries an idempotency key that is already
    /// registered, nothing is written and the existing record is returned.
    async fn create(&self, execution: Execution) -> FailoverResult<CreateOutcome>;

    /// Replace the stored record only if it is still at `expected` status and `version`
    ///
    /// Returns the written record with its bumped version, or `None` when the
    /// precondition failed. Terminal records are never overwritten.
    async fn update_if(
        &self,
        execution: &Execution,
        expected: ExecutionStatus,
        version: u64,
    ) -> FailoverResult<Option<Execution>>;

    async fn list_by_status(&self, status: ExecutionStatus) -> FailoverResult<Vec<Execution>>;

    /// Every record, oldest first
    async fn list(&self) -> FailoverResult<Vec<Execution>>;

    async fn find_by_idempotency_key(&self, key: &str) -> FailoverResult<Option<Execution>>;
}

/// Whether a stored record satisfies a conditional write
pub(crate) fn precondition_holds(stored: &Execution, expected: ExecutionStatus, version: u64) -> bool {
    !stored.is_terminal() && stored.status == expected && stored.version == version
}

/// Build the store selected by configuration
pub async fn open_store(config: &StoreConfig) -> FailoverResult<Arc<dyn ExecutionStore>> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(InMemoryExecutionStore::new())),
        StoreConfig::File { path } => Ok(Arc::new(FileExecutionStore::open(path).await?)),
    }
}
