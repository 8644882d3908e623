//! In-process replication service for drills, the CLI and tests
//!
//! Each account/region keeps its own inventory and jobs. Launch jobs
//! complete after a configurable number of describe calls; failures,
//! latency and outages can be injected per account.

use super::{
    JobKind, JobServer, JobStatus, JobView, LaunchStatus, RecoveryMode, ReplicationError,
    ReplicationService, ReplicationState, SourceServer,
};
use crate::models::execution::AccountContext;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

#[derive(Default)]
struct SimulatedAccount {
    servers: BTreeMap<String, SourceServer>,
    jobs: BTreeMap<String, SimulatedJob>,
    terminated: Vec<String>,
    faults: VecDeque<ReplicationError>,
    latency: Option<Duration>,
    unreachable: bool,
}

struct SimulatedJob {
    view: JobView,
    /// Describe calls left before the job completes; `None` never completes
    remaining_describes: Option<u32>,
    launched_by: LaunchedBy,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum LaunchedBy {
    Api,
    External,
}

/// Simulated replication service
pub struct SimulatedReplicationService {
    accounts: DashMap<AccountContext, SimulatedAccount>,
    failing_servers: RwLock<HashSet<String>>,
    describes_to_complete: AtomicU32,
    next_id: AtomicU64,
}

impl Default for SimulatedReplicationService {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedReplicationService {
    /// Jobs complete on the first describe call
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            failing_servers: RwLock::new(HashSet::new()),
            describes_to_complete: AtomicU32::new(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Jobs complete after `describes` describe calls; 0 keeps them running forever
    pub fn with_describes_to_complete(self, describes: u32) -> Self {
        self.describes_to_complete.store(describes, Ordering::SeqCst);
        self
    }

    pub fn set_describes_to_complete(&self, describes: u32) {
        self.describes_to_complete.store(describes, Ordering::SeqCst);
    }

    pub fn add_source_server(&self, account: &AccountContext, server_id: &str, state: ReplicationState) {
        self.accounts.entry(account.clone()).or_default().servers.insert(
            server_id.to_string(),
            SourceServer {
                server_id: server_id.to_string(),
                hostname: format!("{server_id}.internal"),
                replication_state: state,
            },
        );
    }

    pub fn add_healthy_servers(&self, account: &AccountContext, server_ids: &[&str]) {
        for server_id in server_ids {
            self.add_source_server(account, server_id, ReplicationState::Continuous);
        }
    }

    pub fn set_replication_state(&self, account: &AccountContext, server_id: &str, state: ReplicationState) {
        if let Some(mut entry) = self.accounts.get_mut(account) {
            if let Some(server) = entry.servers.get_mut(server_id) {
                server.replication_state = state;
            }
        }
    }

    /// Any job including `server_id` reports it FAILED on completion
    pub fn fail_launch_for(&self, server_id: &str) {
        self.failing_servers.write().insert(server_id.to_string());
    }

    /// Errors returned, in order, by the next calls against `account`
    pub fn inject_faults(&self, account: &AccountContext, faults: Vec<ReplicationError>) {
        self.accounts
            .entry(account.clone())
            .or_default()
            .faults
            .extend(faults);
    }

    pub fn set_latency(&self, account: &AccountContext, latency: Duration) {
        self.accounts.entry(account.clone()).or_default().latency = Some(latency);
    }

    /// Every call against `account` fails with ServiceUnavailable
    pub fn set_unreachable(&self, account: &AccountContext, unreachable: bool) {
        self.accounts.entry(account.clone()).or_default().unreachable = unreachable;
    }

    /// Start a job on behalf of another process; it stays active until [`Self::complete_job`]
    pub fn start_external_job(&self, account: &AccountContext, server_ids: &[&str]) -> String {
        let servers: Vec<String> = server_ids.iter().map(|s| s.to_string()).collect();
        let job_id = self.job_id();
        let view = new_launch_view(&job_id, &servers, false);
        self.accounts.entry(account.clone()).or_default().jobs.insert(
            job_id.clone(),
            SimulatedJob {
                view,
                remaining_describes: None,
                launched_by: LaunchedBy::External,
            },
        );
        job_id
    }

    /// Force a job to its terminal state now
    pub fn complete_job(&self, account: &AccountContext, job_id: &str) {
        if let Some(mut entry) = self.accounts.get_mut(account) {
            let instance_base = &self.next_id;
            let failing = self.failing_servers.read();
            if let Some(job) = entry.jobs.get_mut(job_id) {
                finish(job, &failing, instance_base);
            }
        }
    }

    /// Launch jobs started through the API, excluding external jobs
    pub fn jobs_started(&self, account: &AccountContext) -> usize {
        self.accounts
            .get(account)
            .map(|entry| {
                entry
                    .jobs
                    .values()
                    .filter(|j| j.launched_by == LaunchedBy::Api && j.view.kind == JobKind::Launch)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn job(&self, account: &AccountContext, job_id: &str) -> Option<JobView> {
        self.accounts
            .get(account)
            .and_then(|entry| entry.jobs.get(job_id).map(|j| j.view.clone()))
    }

    /// Jobs started through the API, in id order
    pub fn launched_jobs(&self, account: &AccountContext) -> Vec<JobView> {
        self.accounts
            .get(account)
            .map(|entry| {
                entry
                    .jobs
                    .values()
                    .filter(|j| j.launched_by == LaunchedBy::Api && j.view.kind == JobKind::Launch)
                    .map(|j| j.view.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn terminated_instances(&self, account: &AccountContext) -> Vec<String> {
        self.accounts
            .get(account)
            .map(|entry| entry.terminated.clone())
            .unwrap_or_default()
    }

    fn job_id(&self) -> String {
        format!("drsjob-{:017x}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Latency, outage and injected fault handling shared by every call
    async fn preflight(&self, account: &AccountContext) -> Result<(), ReplicationError> {
        let latency = self.accounts.get(account).and_then(|entry| entry.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut entry = self.accounts.entry(account.clone()).or_default();
        if entry.unreachable {
            return Err(ReplicationError::ServiceUnavailable(format!(
                "endpoint for {account} is unreachable"
            )));
        }
        match entry.faults.pop_front() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }
}

fn new_launch_view(job_id: &str, servers: &[String], is_drill: bool) -> JobView {
    JobView {
        job_id: job_id.to_string(),
        kind: JobKind::Launch,
        status: JobStatus::Pending,
        is_drill,
        servers: servers
            .iter()
            .map(|server_id| JobServer {
                server_id: server_id.clone(),
                launch_status: LaunchStatus::Pending,
                recovery_instance_id: None,
            })
            .collect(),
        created_at: Utc::now(),
        ended_at: None,
    }
}

fn finish(job: &mut SimulatedJob, failing: &HashSet<String>, ids: &AtomicU64) {
    if job.view.status == JobStatus::Completed {
        return;
    }
    for server in &mut job.view.servers {
        if failing.contains(&server.server_id) {
            server.launch_status = LaunchStatus::Failed;
        } else {
            server.launch_status = LaunchStatus::Launched;
            server.recovery_instance_id =
                Some(format!("i-{:016x}", ids.fetch_add(1, Ordering::SeqCst)));
        }
    }
    job.view.status = JobStatus::Completed;
    job.view.ended_at = Some(Utc::now());
    job.remaining_describes = Some(0);
}

#[async_trait]
impl ReplicationService for SimulatedReplicationService {
    async fn start_recovery_job(
        &self,
        account: &AccountContext,
        server_ids: &[String],
        mode: RecoveryMode,
    ) -> Result<JobView, ReplicationError> {
        self.preflight(account).await?;
        let job_id = self.job_id();
        let mut entry = self.accounts.entry(account.clone()).or_default();
        if let Some(missing) = server_ids.iter().find(|s| !entry.servers.contains_key(*s)) {
            return Err(ReplicationError::Rejected(format!(
                "source server {missing} is not registered in {account}"
            )));
        }
        let view = new_launch_view(&job_id, server_ids, mode == RecoveryMode::Drill);
        let describes = self.describes_to_complete.load(Ordering::SeqCst);
        entry.jobs.insert(
            job_id.clone(),
            SimulatedJob {
                view: view.clone(),
                remaining_describes: (describes > 0).then_some(describes),
                launched_by: LaunchedBy::Api,
            },
        );
        debug!(account = %account, job_id = %job_id, servers = server_ids.len(), "simulated job created");
        Ok(view)
    }

    async fn describe_job(
        &self,
        account: &AccountContext,
        job_id: &str,
    ) -> Result<JobView, ReplicationError> {
        self.preflight(account).await?;
        let mut entry = self
            .accounts
            .get_mut(account)
            .ok_or_else(|| ReplicationError::NotFound(format!("job {job_id}")))?;
        let failing = self.failing_servers.read();
        let job = entry
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| ReplicationError::NotFound(format!("job {job_id}")))?;

        if job.view.status != JobStatus::Completed {
            match job.remaining_describes {
                Some(remaining) if remaining <= 1 => finish(job, &failing, &self.next_id),
                Some(remaining) => {
                    job.remaining_describes = Some(remaining - 1);
                    job.view.status = JobStatus::Started;
                    for server in &mut job.view.servers {
                        server.launch_status = LaunchStatus::InProgress;
                    }
                }
                None => {
                    job.view.status = JobStatus::Started;
                }
            }
        }
        Ok(job.view.clone())
    }

    async fn terminate_recovery_instances(
        &self,
        account: &AccountContext,
        instance_ids: &[String],
    ) -> Result<JobView, ReplicationError> {
        self.preflight(account).await?;
        let job_id = self.job_id();
        let now = Utc::now();
        let view = JobView {
            job_id: job_id.clone(),
            kind: JobKind::Terminate,
            status: JobStatus::Completed,
            is_drill: false,
            servers: instance_ids
                .iter()
                .map(|id| JobServer {
                    server_id: id.clone(),
                    launch_status: LaunchStatus::Terminated,
                    recovery_instance_id: Some(id.clone()),
                })
                .collect(),
            created_at: now,
            ended_at: Some(now),
        };
        let mut entry = self.accounts.entry(account.clone()).or_default();
        entry.terminated.extend(instance_ids.iter().cloned());
        entry.jobs.insert(
            job_id,
            SimulatedJob {
                view: view.clone(),
                remaining_describes: Some(0),
                launched_by: LaunchedBy::Api,
            },
        );
        Ok(view)
    }

    async fn describe_source_servers(
        &self,
        account: &AccountContext,
    ) -> Result<Vec<SourceServer>, ReplicationError> {
        self.preflight(account).await?;
        Ok(self
            .accounts
            .get(account)
            .map(|entry| entry.servers.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_active_jobs(
        &self,
        account: &AccountContext,
    ) -> Result<Vec<JobView>, ReplicationError> {
        self.preflight(account).await?;
        Ok(self
            .accounts
            .get(account)
            .map(|entry| {
                entry
                    .jobs
                    .values()
                    .filter(|j| j.view.kind == JobKind::Launch && j.view.status.is_active())
                    .map(|j| j.view.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> AccountContext {
        AccountContext::new("222222222222", "eu-west-1")
    }

    fn ids(servers: &[&str]) -> Vec<String> {
        servers.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_job_completes_after_describes() {
        let sim = SimulatedReplicationService::new().with_describes_to_complete(2);
        sim.add_healthy_servers(&account(), &["s-1", "s-2"]);
        let job = sim
            .start_recovery_job(&account(), &ids(&["s-1", "s-2"]), RecoveryMode::Drill)
            .await
            .unwrap();
        assert!(job.is_drill);

        let first = sim.describe_job(&account(), &job.job_id).await.unwrap();
        assert_eq!(first.status, JobStatus::Started);
        assert_eq!(sim.list_active_jobs(&account()).await.unwrap().len(), 1);

        let second = sim.describe_job(&account(), &job.job_id).await.unwrap();
        assert_eq!(second.status, JobStatus::Completed);
        assert!(second
            .servers
            .iter()
            .all(|s| s.launch_status == LaunchStatus::Launched && s.recovery_instance_id.is_some()));
        assert!(sim.list_active_jobs(&account()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_launch_failure() {
        let sim = SimulatedReplicationService::new();
        sim.add_healthy_servers(&account(), &["s-1", "s-2"]);
        sim.fail_launch_for("s-2");
        let job = sim
            .start_recovery_job(&account(), &ids(&["s-1", "s-2"]), RecoveryMode::Recovery)
            .await
            .unwrap();
        let done = sim.describe_job(&account(), &job.job_id).await.unwrap();
        let failed: Vec<_> = done
            .servers
            .iter()
            .filter(|s| s.launch_status == LaunchStatus::Failed)
            .map(|s| s.server_id.as_str())
            .collect();
        assert_eq!(failed, vec!["s-2"]);
    }

    #[tokio::test]
    async fn test_unknown_server_rejected() {
        let sim = SimulatedReplicationService::new();
        sim.add_healthy_servers(&account(), &["s-1"]);
        let err = sim
            .start_recovery_job(&account(), &ids(&["s-1", "s-9"]), RecoveryMode::Drill)
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicationError::Rejected(msg) if msg.contains("s-9")));
        assert_eq!(sim.jobs_started(&account()), 0);
    }

    #[tokio::test]
    async fn test_faults_are_consumed_in_order() {
        let sim = SimulatedReplicationService::new();
        sim.inject_faults(
            &account(),
            vec![
                ReplicationError::Timeout("t".into()),
                ReplicationError::Throttled("r".into()),
            ],
        );
        assert!(matches!(
            sim.describe_source_servers(&account()).await,
            Err(ReplicationError::Timeout(_))
        ));
        assert!(matches!(
            sim.describe_source_servers(&account()).await,
            Err(ReplicationError::Throttled(_))
        ));
        assert!(sim.describe_source_servers(&account()).await.is_ok());
    }

    #[tokio::test]
    async fn test_external_job_stays_active_until_completed() {
        let sim = SimulatedReplicationService::new();
        sim.add_healthy_servers(&account(), &["s-1"]);
        let job_id = sim.start_external_job(&account(), &["s-1"]);
        sim.describe_job(&account(), &job_id).await.unwrap();
        assert_eq!(sim.list_active_jobs(&account()).await.unwrap().len(), 1);
        sim.complete_job(&account(), &job_id);
        assert!(sim.list_active_jobs(&account()).await.unwrap().is_empty());
        assert_eq!(sim.jobs_started(&account()), 0);
    }

    #[tokio::test]
    async fn test_terminate_records_instances() {
        let sim = SimulatedReplicationService::new();
        let job = sim
            .terminate_recovery_instances(&account(), &ids(&["i-1", "i-2"]))
            .await
            .unwrap();
        assert_eq!(job.kind, JobKind::Terminate);
        assert_eq!(sim.terminated_instances(&account()), vec!["i-1", "i-2"]);
    }
}
