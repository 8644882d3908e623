//! Process-local execution store

use super::{precondition_holds, CreateOutcome, ExecutionStore};
use crate::error::{FailoverError, FailoverResult};
use crate::models::execution::{Execution, ExecutionStatus};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

/// DashMap-backed store; records are lost when the process exits
#[derive(Default)]
pub struct InMemoryExecutionStore {
    records: DashMap<Uuid, Execution>,
    idempotency: DashMap<String, Uuid>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn insert_new(&self, mut execution: Execution) -> FailoverResult<Execution> {
        execution.version = 1;
        match self.records.entry(execution.id) {
            Entry::Occupied(_) => Err(FailoverError::store(format!(
                "execution {} already exists",
                execution.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(execution.clone());
                Ok(execution)
            }
        }
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn get(&self, id: Uuid) -> FailoverResult<Option<Execution>> {
        Ok(self.records.get(&id).map(|entry| entry.value().clone()))
    }

    async fn create(&self, execution: Execution) -> FailoverResult<CreateOutcome> {
        let Some(key) = execution.idempotency_key.clone() else {
            return self.insert_new(execution).map(CreateOutcome::Created);
        };

        // The index entry stays locked until the record is in place
        match self.idempotency.entry(key) {
            Entry::Occupied(existing) => {
                let id = *existing.get();
                let record = self
                    .records
                    .get(&id)
                    .map(|entry| entry.value().clone())
                    .ok_or_else(|| {
                        FailoverError::store(format!("idempotency index points at missing execution {id}"))
                    })?;
                Ok(CreateOutcome::Existing(record))
            }
            Entry::Vacant(slot) => {
                let created = self.insert_new(execution)?;
                slot.insert(created.id);
                Ok(CreateOutcome::Created(created))
            }
        }
    }

    async fn update_if(
        &self,
        execution: &Execution,
        expected: ExecutionStatus,
        version: u64,
    ) -> FailoverResult<Option<Execution>> {
        let Some(mut stored) = self.records.get_mut(&execution.id) else {
            return Err(FailoverError::ExecutionNotFound(execution.id));
        };
        if !precondition_holds(&stored, expected, version) {
            return Ok(None);
        }
        let mut next = execution.clone();
        next.version = version + 1;
        *stored = next.clone();
        Ok(Some(next))
    }

    async fn list_by_status(&self, status: ExecutionStatus) -> FailoverResult<Vec<Execution>> {
        let mut matching: Vec<Execution> = self
            .records
            .iter()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by_key(|e| e.started_at);
        Ok(matching)
    }

    async fn list(&self) -> FailoverResult<Vec<Execution>> {
        let mut all: Vec<Execution> = self.records.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|e| e.started_at);
        Ok(all)
    }

    async fn find_by_idempotency_key(&self, key: &str) -> FailoverResult<Option<Execution>> {
        let Some(id) = self.idempotency.get(key).map(|entry| *entry.value()) else {
            return Ok(None);
        };
        self.get(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::execution;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_create_assigns_first_version() {
        let store = InMemoryExecutionStore::new();
        let outcome = store.create(execution(None)).await.unwrap();
        assert!(outcome.is_created());
        assert_eq!(outcome.execution().version, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_idempotent_create_returns_existing() {
        let store = InMemoryExecutionStore::new();
        let first = store.create(execution(Some("req-1"))).await.unwrap();
        let second = store.create(execution(Some("req-1"))).await.unwrap();
        assert!(!second.is_created());
        assert_eq!(first.execution().id, second.execution().id);
        assert_eq!(store.len(), 1);
        let found = store.find_by_idempotency_key("req-1").await.unwrap().unwrap();
        assert_eq!(found.id, first.execution().id);
    }

    #[tokio::test]
    async fn test_concurrent_idempotent_creates_yield_one_record() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.create(execution(Some("req-race"))).await.unwrap()
            }));
        }
        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().is_created() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_update_if_is_compare_and_swap() {
        let store = InMemoryExecutionStore::new();
        let created = store.create(execution(None)).await.unwrap().into_execution();

        let mut running = created.clone();
        running.status = ExecutionStatus::Running;
        let written = store
            .update_if(&running, ExecutionStatus::Pending, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(written.version, 2);

        // A stale writer still expecting version 1 loses
        let mut stale = created.clone();
        stale.status = ExecutionStatus::Cancelled;
        assert!(store
            .update_if(&stale, ExecutionStatus::Pending, 1)
            .await
            .unwrap()
            .is_none());
        let stored = store.get(created.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn test_terminal_records_are_immutable() {
        let store = InMemoryExecutionStore::new();
        let created = store.create(execution(None)).await.unwrap().into_execution();
        let mut done = created.clone();
        done.status = ExecutionStatus::Completed;
        let done = store
            .update_if(&done, ExecutionStatus::Pending, 1)
            .await
            .unwrap()
            .unwrap();

        let mut reopened = done.clone();
        reopened.status = ExecutionStatus::Running;
        assert!(store
            .update_if(&reopened, ExecutionStatus::Completed, done.version)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_list_by_status() {
        let store = InMemoryExecutionStore::new();
        store.create(execution(None)).await.unwrap();
        let second = store.create(execution(None)).await.unwrap().into_execution();
        let mut paused = second.clone();
        paused.status = ExecutionStatus::Paused;
        store
            .update_if(&paused, ExecutionStatus::Pending, 1)
            .await
            .unwrap();

        assert_eq!(store.list_by_status(ExecutionStatus::Pending).await.unwrap().len(), 1);
        assert_eq!(store.list_by_status(ExecutionStatus::Paused).await.unwrap().len(), 1);
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_missing_execution() {
        let store = InMemoryExecutionStore::new();
        let result = store
            .update_if(&execution(None), ExecutionStatus::Pending, 1)
            .await;
        assert!(matches!(result, Err(FailoverError::ExecutionNotFound(_))));
    }
}
