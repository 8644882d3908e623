//! JSON file store
//!
//! Layout under the root directory:
//!
//! ```text
//! executions/<uuid>.json   one document per execution
//! idempotency.json         idempotency key -> execution id
//! ```
//!
//! Writes go to a temporary file first and are renamed into place. Writers
//! within one process are serialized by a mutex; the store does not
//! coordinate between processes.

use super::{precondition_holds, CreateOutcome, ExecutionStore};
use crate::error::{FailoverError, FailoverResult};
use crate::models::execution::{Execution, ExecutionStatus};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

const EXECUTIONS_DIR: &str = "executions";
const IDEMPOTENCY_INDEX: &str = "idempotency.json";

pub struct FileExecutionStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileExecutionStore {
    /// Open (creating if needed) a store rooted at `root`
    pub async fn open(root: impl AsRef<Path>) -> FailoverResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(EXECUTIONS_DIR)).await?;
        debug!(root = %root.display(), "file execution store opened");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.root.join(EXECUTIONS_DIR).join(format!("{id}.json"))
    }

    async fn read_record(&self, id: Uuid) -> FailoverResult<Option<Execution>> {
        match fs::read(self.record_path(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_record(&self, execution: &Execution) -> FailoverResult<()> {
        let bytes = serde_json::to_vec_pretty(execution)?;
        write_atomic(&self.record_path(execution.id), &bytes).await
    }

    async fn read_index(&self) -> FailoverResult<BTreeMap<String, Uuid>> {
        match fs::read(self.root.join(IDEMPOTENCY_INDEX)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_index(&self, index: &BTreeMap<String, Uuid>) -> FailoverResult<()> {
        let bytes = serde_json::to_vec_pretty(index)?;
        write_atomic(&self.root.join(IDEMPOTENCY_INDEX), &bytes).await
    }

    async fn create_record(&self, mut execution: Execution) -> FailoverResult<Execution> {
        if fs::try_exists(self.record_path(execution.id)).await? {
            return Err(FailoverError::store(format!(
                "execution {} already exists",
                execution.id
            )));
        }
        execution.version = 1;
        self.write_record(&execution).await?;
        Ok(execution)
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> FailoverResult<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl ExecutionStore for FileExecutionStore {
    async fn get(&self, id: Uuid) -> FailoverResult<Option<Execution>> {
        self.read_record(id).await
    }

    async fn create(&self, execution: Execution) -> FailoverResult<CreateOutcome> {
        let _guard = self.write_lock.lock().await;
        let Some(key) = execution.idempotency_key.clone() else {
            return self.create_record(execution).await.map(CreateOutcome::Created);
        };

        let mut index = self.read_index().await?;
        if let Some(id) = index.get(&key) {
            let existing = self.read_record(*id).await?.ok_or_else(|| {
                FailoverError::store(format!("idempotency index points at missing execution {id}"))
            })?;
            return Ok(CreateOutcome::Existing(existing));
        }

        let created = self.create_record(execution).await?;
        index.insert(key, created.id);
        self.write_index(&index).await?;
        Ok(CreateOutcome::Created(created))
    }

    async fn update_if(
        &self,
        execution: &Execution,
        expected: ExecutionStatus,
        version: u64,
    ) -> FailoverResult<Option<Execution>> {
        let _guard = self.write_lock.lock().await;
        let stored = self
            .read_record(execution.id)
            .await?
            .ok_or(FailoverError::ExecutionNotFound(execution.id))?;
        if !precondition_holds(&stored, expected, version) {
            return Ok(None);
        }
        let mut next = execution.clone();
        next.version = version + 1;
        self.write_record(&next).await?;
        Ok(Some(next))
    }

    async fn list_by_status(&self, status: ExecutionStatus) -> FailoverResult<Vec<Execution>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|e| e.status == status)
            .collect())
    }

    async fn list(&self) -> FailoverResult<Vec<Execution>> {
        let mut entries = fs::read_dir(self.root.join(EXECUTIONS_DIR)).await?;
        let mut all = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).await?;
            match serde_json::from_slice::<Execution>(&bytes) {
                Ok(execution) => all.push(execution),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable execution record"),
            }
        }
        all.sort_by_key(|e| e.started_at);
        Ok(all)
    }

    async fn find_by_idempotency_key(&self, key: &str) -> FailoverResult<Option<Execution>> {
        match self.read_index().await?.get(key) {
            Some(id) => self.read_record(*id).await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::execution;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let created = {
            let store = FileExecutionStore::open(dir.path()).await.unwrap();
            store.create(execution(Some("req-7"))).await.unwrap().into_execution()
        };

        let reopened = FileExecutionStore::open(dir.path()).await.unwrap();
        let loaded = reopened.get(created.id).await.unwrap().unwrap();
        assert_eq!(loaded, created);
        let by_key = reopened.find_by_idempotency_key("req-7").await.unwrap().unwrap();
        assert_eq!(by_key.id, created.id);
    }

    #[tokio::test]
    async fn test_idempotent_create_on_disk() {
        let dir = TempDir::new().unwrap();
        let store = FileExecutionStore::open(dir.path()).await.unwrap();
        let first = store.create(execution(Some("dup"))).await.unwrap();
        let second = store.create(execution(Some("dup"))).await.unwrap();
        assert!(first.is_created());
        assert!(!second.is_created());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_conditional_update_on_disk() {
        let dir = TempDir::new().unwrap();
        let store = FileExecutionStore::open(dir.path()).await.unwrap();
        let created = store.create(execution(None)).await.unwrap().into_execution();

        let mut paused = created.clone();
        paused.status = ExecutionStatus::Paused;
        let written = store
            .update_if(&paused, ExecutionStatus::Pending, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(written.version, 2);
        assert!(store
            .update_if(&paused, ExecutionStatus::Pending, 1)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            store.list_by_status(ExecutionStatus::Paused).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_list_skips_foreign_files() {
        let dir = TempDir::new().unwrap();
        let store = FileExecutionStore::open(dir.path()).await.unwrap();
        store.create(execution(None)).await.unwrap();
        std::fs::write(dir.path().join(EXECUTIONS_DIR).join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join(EXECUTIONS_DIR).join("broken.json"), "{").unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
