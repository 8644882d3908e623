//! Typed replication client with retry

use super::retry::RetryPolicy;
use super::{JobView, RecoveryMode, ReplicationService, SourceServer};
use crate::error::FailoverResult;
use crate::models::capacity::CapacitySnapshot;
use crate::models::execution::AccountContext;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Wraps a [`ReplicationService`]; every call goes through the retry policy
#[derive(Clone)]
pub struct ReplicationAdapter {
    service: Arc<dyn ReplicationService>,
    policy: RetryPolicy,
}

impl ReplicationAdapter {
    pub fn new(service: Arc<dyn ReplicationService>, policy: RetryPolicy) -> Self {
        Self { service, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Start one job covering `server_ids`, returning its id
    pub async fn start_job(
        &self,
        account: &AccountContext,
        server_ids: &[String],
        mode: RecoveryMode,
    ) -> FailoverResult<String> {
        let job = self
            .policy
            .run("start_recovery_job", || {
                self.service.start_recovery_job(account, server_ids, mode)
            })
            .await?;
        info!(
            account = %account,
            job_id = %job.job_id,
            servers = server_ids.len(),
            ?mode,
            "recovery job started"
        );
        Ok(job.job_id)
    }

    pub async fn describe_job(
        &self,
        account: &AccountContext,
        job_id: &str,
    ) -> FailoverResult<JobView> {
        let job = self
            .policy
            .run("describe_job", || self.service.describe_job(account, job_id))
            .await?;
        debug!(account = %account, job_id, status = ?job.status, "job described");
        Ok(job)
    }

    /// Terminate recovered instances, returning the terminate job id
    pub async fn terminate_instances(
        &self,
        account: &AccountContext,
        instance_ids: &[String],
    ) -> FailoverResult<String> {
        let job = self
            .policy
            .run("terminate_recovery_instances", || {
                self.service
                    .terminate_recovery_instances(account, instance_ids)
            })
            .await?;
        info!(
            account = %account,
            job_id = %job.job_id,
            instances = instance_ids.len(),
            "recovery instances terminating"
        );
        Ok(job.job_id)
    }

    pub async fn source_servers(&self, account: &AccountContext) -> FailoverResult<Vec<SourceServer>> {
        self.policy
            .run("describe_source_servers", || {
                self.service.describe_source_servers(account)
            })
            .await
    }

    pub async fn active_jobs(&self, account: &AccountContext) -> FailoverResult<Vec<JobView>> {
        self.policy
            .run("list_active_jobs", || self.service.list_active_jobs(account))
            .await
    }

    /// Current usage derived from inventory and active jobs
    pub async fn capacity_snapshot(&self, account: &AccountContext) -> FailoverResult<CapacitySnapshot> {
        let servers = self.source_servers(account).await?;
        let jobs = self.active_jobs(account).await?;
        Ok(CapacitySnapshot {
            account: account.clone(),
            total_servers: servers.len(),
            replicating_servers: servers
                .iter()
                .filter(|s| s.replication_state.is_replicating())
                .count(),
            active_jobs: jobs.len(),
            servers_in_active_jobs: jobs.iter().map(|j| j.servers.len()).sum(),
            captured_at: Utc::now(),
        })
    }
}
