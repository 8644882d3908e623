//! Orchestrator surface
//!
//! Wires the adapter, store, guard, scheduler, aggregator and poller
//! together and exposes the operations callers use.

use crate::aggregator::{CapacityAggregator, CapacityReport};
use crate::config::OrchestratorConfig;
use crate::error::{FailoverError, FailoverResult};
use crate::guard::ConflictGuard;
use crate::models::execution::{AccountContext, Execution, ExecutionStatus};
use crate::models::plan::{resolve_plan, PlanSource};
use crate::models::violation::Violation;
use crate::notification::{NotificationSink, TracingSink};
use crate::poller::{ExecutionPoller, PollerHandle, ReconcileStats};
use crate::replication::{ReplicationAdapter, ReplicationService, RetryPolicy};
use crate::scheduler::{DriveMode, DriveReport, ExecutionRequest, WaveScheduler};
use crate::store::{open_store, CreateOutcome, ExecutionStore};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct FailoverOrchestrator {
    config: OrchestratorConfig,
    plans: Arc<dyn PlanSource>,
    store: Arc<dyn ExecutionStore>,
    adapter: ReplicationAdapter,
    guard: ConflictGuard,
    scheduler: Arc<WaveScheduler>,
    aggregator: CapacityAggregator,
    poller: Arc<ExecutionPoller>,
}

impl FailoverOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        plans: Arc<dyn PlanSource>,
        service: Arc<dyn ReplicationService>,
        store: Arc<dyn ExecutionStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let adapter = ReplicationAdapter::new(service, RetryPolicy::new(config.retry.clone()));
        let guard = ConflictGuard::new(adapter.clone(), Arc::clone(&store), config.quotas.clone());
        let scheduler = Arc::new(WaveScheduler::new(
            Arc::clone(&store),
            adapter.clone(),
            guard.clone(),
            notifier,
            config.scheduler.clone(),
            config.poller.launch_grace(),
        ));
        let aggregator = CapacityAggregator::new(
            adapter.clone(),
            config.quotas.clone(),
            config.aggregator.clone(),
        );
        let poller = Arc::new(ExecutionPoller::new(
            Arc::clone(&scheduler),
            Arc::clone(&store),
            config.poller.clone(),
        ));

        Self {
            config,
            plans,
            store,
            adapter,
            guard,
            scheduler,
            aggregator,
            poller,
        }
    }

    /// Open the configured store and log lifecycle events through tracing
    pub async fn from_config(
        config: OrchestratorConfig,
        plans: Arc<dyn PlanSource>,
        service: Arc<dyn ReplicationService>,
    ) -> FailoverResult<Self> {
        let store = open_store(&config.store).await?;
        Ok(Self::new(config, plans, service, store, Arc::new(TracingSink)))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    /// Validate, create and begin driving an execution in the configured mode
    ///
    /// A repeated idempotency key returns the original execution id without
    /// starting anything. A failure recorded while driving is returned as the
    /// error; the execution itself is then FAILED.
    pub async fn start_execution(&self, request: ExecutionRequest) -> FailoverResult<Uuid> {
        let mode = self.scheduler.default_mode();
        self.start_execution_in(request, mode).await
    }

    pub async fn start_execution_in(&self, request: ExecutionRequest, mode: DriveMode) -> FailoverResult<Uuid> {
        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = self.store.find_by_idempotency_key(key).await? {
                info!(execution_id = %existing.id, idempotency_key = %key, "returning existing execution");
                return Ok(existing.id);
            }
        }

        let plan = resolve_plan(self.plans.as_ref(), &request.plan_id, &request.account.region).await?;
        let violations = self.guard.validate_plan(&plan, &request.account).await?;
        if !violations.is_empty() {
            warn!(
                plan_id = %request.plan_id,
                violations = violations.len(),
                "plan rejected before execution"
            );
            return Err(FailoverError::Validation {
                execution_id: None,
                violations,
            });
        }

        let execution = match self.scheduler.create(&plan, request).await? {
            CreateOutcome::Created(execution) => execution,
            CreateOutcome::Existing(existing) => return Ok(existing.id),
        };
        let report = self.scheduler.drive_loaded(execution, mode).await?;
        into_result(report).map(|execution| execution.id)
    }

    pub async fn get_execution(&self, id: Uuid) -> FailoverResult<Execution> {
        self.store
            .get(id)
            .await?
            .ok_or(FailoverError::ExecutionNotFound(id))
    }

    pub async fn list_executions(&self, status: Option<ExecutionStatus>) -> FailoverResult<Vec<Execution>> {
        match status {
            Some(status) => self.store.list_by_status(status).await,
            None => self.store.list().await,
        }
    }

    /// Dry-run the guard for a plan without creating anything
    pub async fn validate_plan(&self, plan_id: &str, account: &AccountContext) -> FailoverResult<Vec<Violation>> {
        let plan = resolve_plan(self.plans.as_ref(), plan_id, &account.region).await?;
        self.guard.validate_plan(&plan, account).await
    }

    /// Continue a paused execution; the token is consumed exactly once
    pub async fn resume(&self, id: Uuid, pause_token: &str) -> FailoverResult<Execution> {
        let mode = self.scheduler.default_mode();
        let report = self.scheduler.resume(id, pause_token, mode).await?;
        into_result(report)
    }

    pub async fn resume_in(&self, id: Uuid, pause_token: &str, mode: DriveMode) -> FailoverResult<Execution> {
        into_result(self.scheduler.resume(id, pause_token, mode).await?)
    }

    pub async fn cancel(&self, id: Uuid) -> FailoverResult<Execution> {
        self.scheduler.cancel(id).await
    }

    /// Drive an existing execution, e.g. after a restart
    pub async fn drive(&self, id: Uuid, mode: DriveMode) -> FailoverResult<DriveReport> {
        self.scheduler.drive(id, mode).await
    }

    pub async fn aggregate_capacity(&self, accounts: &[AccountContext]) -> CapacityReport {
        self.aggregator.aggregate(accounts).await
    }

    /// Capacity across the accounts listed in configuration
    pub async fn aggregate_configured_capacity(&self) -> CapacityReport {
        self.aggregator.aggregate(&self.config.accounts).await
    }

    /// Terminate every recovered instance of an execution, returning the terminate job id
    ///
    /// Used to clean up after drills. The execution record is not changed.
    pub async fn terminate_recovery_instances(&self, id: Uuid) -> FailoverResult<Option<String>> {
        let execution = self.get_execution(id).await?;
        let instances = execution.recovery_instance_ids();
        if instances.is_empty() {
            return Ok(None);
        }
        if !execution.is_terminal() {
            warn!(execution_id = %id, status = %execution.status, "terminating instances of a live execution");
        }
        let job_id = self
            .adapter
            .terminate_instances(&execution.account, &instances)
            .await?;
        Ok(Some(job_id))
    }

    /// One poller pass
    pub async fn reconcile(&self) -> ReconcileStats {
        self.poller.reconcile_once().await
    }

    pub fn spawn_poller(&self) -> PollerHandle {
        Arc::clone(&self.poller).start()
    }
}

fn into_result(report: DriveReport) -> FailoverResult<Execution> {
    match report.failure {
        Some(failure) => Err(failure),
        None => Ok(report.execution),
    }
}
