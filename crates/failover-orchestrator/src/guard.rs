//! Conflict and capacity guard
//!
//! Gathers the current external state once, then evaluates each check as a
//! pure function over it. Every check runs and every violation is
//! collected. The guard never writes.

use crate::config::ServiceQuotas;
use crate::error::FailoverResult;
use crate::models::execution::{AccountContext, Execution, ExecutionStatus, WaveStatus};
use crate::models::plan::ResolvedPlan;
use crate::models::violation::{ConflictHolder, Violation};
use crate::replication::{JobView, ReplicationAdapter, ReplicationState};
use crate::scheduler::dependencies::WaveGraph;
use crate::store::ExecutionStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Snapshot of everything the checks look at
#[derive(Debug, Clone, Default)]
pub struct ExternalState {
    pub region: String,
    /// Launch jobs the replication service reports active
    pub active_jobs: Vec<JobView>,
    /// Server id to replication state; absent servers are unknown to the service
    pub inventory: BTreeMap<String, ReplicationState>,
    /// Servers in the active waves of other tracked executions
    pub claimed_servers: BTreeMap<String, ConflictHolder>,
    /// Job id to the tracked execution wave that launched it
    pub tracked_jobs: BTreeMap<String, ConflictHolder>,
}

impl ExternalState {
    pub fn servers_in_active_jobs(&self) -> usize {
        self.active_jobs.iter().map(|j| j.servers.len()).sum()
    }
}

pub fn check_wave_size(wave_number: u32, servers: &[String], quotas: &ServiceQuotas) -> Option<Violation> {
    (servers.len() > quotas.max_servers_per_job).then(|| Violation::WaveTooLarge {
        wave_number,
        server_count: servers.len(),
        limit: quotas.max_servers_per_job,
    })
}

pub fn check_concurrent_jobs(state: &ExternalState, quotas: &ServiceQuotas) -> Option<Violation> {
    (state.active_jobs.len() + 1 > quotas.max_concurrent_jobs).then(|| Violation::ConcurrentJobLimit {
        region: state.region.clone(),
        active_jobs: state.active_jobs.len(),
        limit: quotas.max_concurrent_jobs,
    })
}

pub fn check_servers_in_flight(
    state: &ExternalState,
    wave_number: u32,
    servers: &[String],
    quotas: &ServiceQuotas,
) -> Option<Violation> {
    let in_flight = state.servers_in_active_jobs();
    (in_flight + servers.len() > quotas.max_servers_in_all_jobs).then(|| {
        Violation::ServersInFlightLimit {
            region: state.region.clone(),
            wave_number,
            in_flight,
            requested: servers.len(),
            limit: quotas.max_servers_in_all_jobs,
        }
    })
}

/// Servers already held by another execution's active wave or any active job
pub fn check_server_exclusivity(state: &ExternalState, wave_number: u32, servers: &[String]) -> Vec<Violation> {
    let mut job_holders: BTreeMap<&str, ConflictHolder> = BTreeMap::new();
    for job in &state.active_jobs {
        let holder = state
            .tracked_jobs
            .get(&job.job_id)
            .cloned()
            .unwrap_or_else(|| ConflictHolder::ExternalJob {
                job_id: job.job_id.clone(),
            });
        for server in job.server_ids() {
            job_holders.entry(server).or_insert_with(|| holder.clone());
        }
    }

    servers
        .iter()
        .filter_map(|server_id| {
            let holder = state
                .claimed_servers
                .get(server_id)
                .or_else(|| job_holders.get(server_id.as_str()))?;
            Some(Violation::ServerConflict {
                wave_number,
                server_id: server_id.clone(),
                holder: holder.clone(),
            })
        })
        .collect()
}

pub fn check_replication_health(state: &ExternalState, wave_number: u32, servers: &[String]) -> Vec<Violation> {
    servers
        .iter()
        .filter_map(|server_id| {
            let reason = match state.inventory.get(server_id) {
                None => "not found in replication inventory",
                Some(replication_state) => replication_state.health_issue()?,
            };
            Some(Violation::UnhealthyReplication {
                wave_number,
                server_id: server_id.clone(),
                reason: reason.to_string(),
            })
        })
        .collect()
}

/// Shape problems that make a plan unusable regardless of external state
pub fn check_plan_structure(plan: &ResolvedPlan) -> Vec<Violation> {
    if plan.plan.waves.is_empty() {
        return vec![Violation::EmptyPlan];
    }
    let mut violations = WaveGraph::validate(&plan.plan.waves);
    violations.extend(plan.issues.iter().cloned());
    for wave in &plan.waves {
        if wave.servers.is_empty() {
            violations.push(Violation::EmptyWave {
                wave_number: wave.spec.wave_number,
            });
        }
    }
    violations
}

/// Every violation for launching all of `plan` against `state`
pub fn evaluate_plan(plan: &ResolvedPlan, state: &ExternalState, quotas: &ServiceQuotas) -> Vec<Violation> {
    let mut violations = check_plan_structure(plan);
    violations.extend(check_concurrent_jobs(state, quotas));
    for wave in &plan.waves {
        let number = wave.spec.wave_number;
        violations.extend(check_wave_size(number, &wave.servers, quotas));
        violations.extend(check_servers_in_flight(state, number, &wave.servers, quotas));
        violations.extend(check_server_exclusivity(state, number, &wave.servers));
        violations.extend(check_replication_health(state, number, &wave.servers));
    }
    violations
}

/// Every violation for launching one wave against `state`
pub fn evaluate_wave(wave: &WaveStatus, state: &ExternalState, quotas: &ServiceQuotas) -> Vec<Violation> {
    let number = wave.wave_number;
    let mut violations = Vec::new();
    violations.extend(check_wave_size(number, &wave.servers, quotas));
    violations.extend(check_concurrent_jobs(state, quotas));
    violations.extend(check_servers_in_flight(state, number, &wave.servers, quotas));
    violations.extend(check_server_exclusivity(state, number, &wave.servers));
    violations.extend(check_replication_health(state, number, &wave.servers));
    violations
}

/// Gathers external state and runs the checks
#[derive(Clone)]
pub struct ConflictGuard {
    adapter: ReplicationAdapter,
    store: Arc<dyn ExecutionStore>,
    quotas: ServiceQuotas,
}

impl ConflictGuard {
    pub fn new(adapter: ReplicationAdapter, store: Arc<dyn ExecutionStore>, quotas: ServiceQuotas) -> Self {
        Self {
            adapter,
            store,
            quotas,
        }
    }

    pub fn quotas(&self) -> &ServiceQuotas {
        &self.quotas
    }

    /// Re-query the replication service and the store
    ///
    /// `exclude` is the execution being validated; its own waves never
    /// conflict with themselves.
    pub async fn gather(&self, account: &AccountContext, exclude: Option<Uuid>) -> FailoverResult<ExternalState> {
        let inventory = self
            .adapter
            .source_servers(account)
            .await?
            .into_iter()
            .map(|s| (s.server_id, s.replication_state))
            .collect();
        let active_jobs = self.adapter.active_jobs(account).await?;

        let mut claimed_servers = BTreeMap::new();
        let mut tracked_jobs = BTreeMap::new();
        let running = self.store.list_by_status(ExecutionStatus::Running).await?;
        for other in running
            .iter()
            .filter(|e| Some(e.id) != exclude && &e.account == account)
        {
            record_holdings(other, &mut claimed_servers, &mut tracked_jobs);
        }

        debug!(
            account = %account,
            active_jobs = active_jobs.len(),
            claimed = claimed_servers.len(),
            "guard state gathered"
        );
        Ok(ExternalState {
            region: account.region.clone(),
            active_jobs,
            inventory,
            claimed_servers,
            tracked_jobs,
        })
    }

    pub async fn validate_plan(
        &self,
        plan: &ResolvedPlan,
        account: &AccountContext,
    ) -> FailoverResult<Vec<Violation>> {
        let state = self.gather(account, None).await?;
        Ok(evaluate_plan(plan, &state, &self.quotas))
    }

    /// Launch-time re-validation of one wave of `execution`
    pub async fn validate_wave(
        &self,
        execution: &Execution,
        wave: &WaveStatus,
    ) -> FailoverResult<Vec<Violation>> {
        let mut state = self.gather(&execution.account, Some(execution.id)).await?;
        // Jobs launched by earlier waves of this execution are not conflicts
        let own_jobs: Vec<&String> = execution.waves.iter().flat_map(|w| &w.job_ids).collect();
        state.active_jobs.retain(|job| !own_jobs.contains(&&job.job_id));
        Ok(evaluate_wave(wave, &state, &self.quotas))
    }
}

fn record_holdings(
    execution: &Execution,
    claimed: &mut BTreeMap<String, ConflictHolder>,
    jobs: &mut BTreeMap<String, ConflictHolder>,
) {
    let Some(wave) = execution.active_wave() else {
        return;
    };
    let holder = ConflictHolder::Execution {
        execution_id: execution.id,
        wave_number: wave.wave_number,
    };
    for server in &wave.servers {
        claimed.entry(server.clone()).or_insert_with(|| holder.clone());
    }
    for job_id in &wave.job_ids {
        jobs.insert(job_id.clone(), holder.clone());
    }
}
