//! Wave scheduler
//!
//! A step takes the latest record, decides the single next transition and
//! commits it with a conditional write. When the write loses, the drive
//! loop re-reads and decides again. Synchronous drivers, detached starts
//! and the poller all run the same steps.

use super::dependencies::WaveGraph;
use super::state_machine::{can_transition_wave, ensure_transition};
use crate::config::SchedulerConfig;
use crate::error::{FailoverError, FailoverResult};
use crate::guard::ConflictGuard;
use crate::models::execution::{
    AccountContext, Execution, ExecutionKind, ExecutionStatus, HistoryEvent, PauseToken,
    ServerOutcome, WaveState, WaveStatus,
};
use crate::models::plan::ResolvedPlan;
use crate::models::violation::Violation;
use crate::notification::{LifecycleEvent, NotificationSink};
use crate::replication::{JobStatus, JobView, LaunchStatus, ReplicationAdapter};
use crate::store::{CreateOutcome, ExecutionStore};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How far a drive goes before returning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveMode {
    /// Poll in-flight jobs and wait on them, up to the configured maximum
    Synchronous,
    /// Return as soon as a job is in flight
    Detached,
    /// One poller observation: poll in-flight jobs once, never wait
    Reconcile,
}

/// Parameters of a new execution
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub plan_id: String,
    pub kind: ExecutionKind,
    pub account: AccountContext,
    pub initiated_by: String,
    pub idempotency_key: Option<String>,
}

impl ExecutionRequest {
    pub fn new(plan_id: impl Into<String>, kind: ExecutionKind, account: AccountContext) -> Self {
        Self {
            plan_id: plan_id.into(),
            kind,
            account,
            initiated_by: "unknown".to_string(),
            idempotency_key: None,
        }
    }

    pub fn initiated_by(mut self, initiator: impl Into<String>) -> Self {
        self.initiated_by = initiator.into();
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// What a drive did
#[derive(Debug)]
pub struct DriveReport {
    /// Latest record seen
    pub execution: Execution,
    /// Error behind a failure this drive recorded
    pub failure: Option<FailoverError>,
    pub transitions: usize,
    pub waves_completed: usize,
    pub waves_failed: usize,
    pub conflicts: usize,
}

impl DriveReport {
    fn new(execution: Execution) -> Self {
        Self {
            execution,
            failure: None,
            transitions: 0,
            waves_completed: 0,
            waves_failed: 0,
            conflicts: 0,
        }
    }
}

enum Step {
    /// A write succeeded; keep going from the written record
    Advanced(Execution),
    /// Nothing to do until an in-flight job or another driver moves
    Waiting(Execution),
    /// Paused or terminal
    Halted(Execution),
    /// A conditional write lost; re-read and continue
    Conflict(Uuid),
}

pub struct WaveScheduler {
    store: Arc<dyn ExecutionStore>,
    adapter: ReplicationAdapter,
    guard: ConflictGuard,
    notifier: Arc<dyn NotificationSink>,
    config: SchedulerConfig,
    launch_grace: chrono::Duration,
}

impl WaveScheduler {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        adapter: ReplicationAdapter,
        guard: ConflictGuard,
        notifier: Arc<dyn NotificationSink>,
        config: SchedulerConfig,
        launch_grace: chrono::Duration,
    ) -> Self {
        Self {
            store,
            adapter,
            guard,
            notifier,
            config,
            launch_grace,
        }
    }

    /// Mode used when the caller does not choose one
    pub fn default_mode(&self) -> DriveMode {
        if self.config.synchronous {
            DriveMode::Synchronous
        } else {
            DriveMode::Detached
        }
    }

    /// Create the execution record, snapshotting waves in processing order
    pub async fn create(&self, plan: &ResolvedPlan, request: ExecutionRequest) -> FailoverResult<CreateOutcome> {
        let order = WaveGraph::from_specs(&plan.plan.waves)
            .topological_order()
            .map_err(|cycle| FailoverError::Validation {
                execution_id: None,
                violations: vec![Violation::DependencyCycle { waves: cycle }],
            })?;

        let now = Utc::now();
        let waves = order
            .iter()
            .filter_map(|number| plan.wave(*number))
            .map(|wave| {
                let mut status = WaveStatus::from_resolved(wave, now);
                status.timeout_secs = status.timeout_secs.or(self.config.default_wave_timeout_secs);
                status
            })
            .collect();

        let mut execution = Execution {
            id: Uuid::new_v4(),
            plan_id: request.plan_id,
            kind: request.kind,
            status: ExecutionStatus::Pending,
            version: 0,
            idempotency_key: request.idempotency_key,
            initiated_by: request.initiated_by,
            account: request.account,
            started_at: now,
            ended_at: None,
            updated_at: now,
            waves,
            pause_token: None,
            resumed_waves: BTreeSet::new(),
            failure_cause: None,
            violations: Vec::new(),
            history: Vec::new(),
        };
        execution.record(HistoryEvent::Created, now);

        let outcome = self.store.create(execution).await?;
        match &outcome {
            CreateOutcome::Created(created) => {
                info!(
                    execution_id = %created.id,
                    plan_id = %created.plan_id,
                    kind = ?created.kind,
                    waves = created.waves.len(),
                    "execution created"
                );
                self.notifier.notify(&LifecycleEvent::Started {
                    execution_id: created.id,
                    plan_id: created.plan_id.clone(),
                    kind: created.kind,
                    at: now,
                });
            }
            CreateOutcome::Existing(existing) => {
                debug!(execution_id = %existing.id, "idempotency key matched an existing execution");
            }
        }
        Ok(outcome)
    }

    pub async fn drive(&self, id: Uuid, mode: DriveMode) -> FailoverResult<DriveReport> {
        let execution = self.load(id).await?;
        self.drive_loaded(execution, mode).await
    }

    /// Drive from an already loaded record
    pub async fn drive_loaded(&self, execution: Execution, mode: DriveMode) -> FailoverResult<DriveReport> {
        let mut report = DriveReport::new(execution.clone());
        let step = self.step(execution, mode, &mut report).await?;
        self.run(step, mode, report).await
    }

    /// Consume the pause token and continue at launch-time validation
    pub async fn resume(&self, id: Uuid, token: &str, mode: DriveMode) -> FailoverResult<DriveReport> {
        let current = self.load(id).await?;
        let pause = match &current.pause_token {
            Some(pause) if current.status == ExecutionStatus::Paused && pause.token == token => {
                pause.clone()
            }
            _ => return Err(FailoverError::InvalidPauseToken { execution_id: id }),
        };

        let now = Utc::now();
        let version = current.version;
        let mut next = current;
        next.pause_token = None;
        next.resumed_waves.insert(pause.wave_number);
        if let Some(wave) = next.wave_mut(pause.wave_number) {
            set_wave_state(wave, WaveState::Running, now);
            wave.claimed_at = Some(now);
        }
        next.status = ExecutionStatus::Running;
        next.record(
            HistoryEvent::Resumed {
                wave_number: pause.wave_number,
            },
            now,
        );
        next.record(
            HistoryEvent::WaveClaimed {
                wave_number: pause.wave_number,
            },
            now,
        );

        // A lost write means the token was consumed or the execution cancelled
        let Some(resumed) = self.commit(&next, ExecutionStatus::Paused, version).await? else {
            return Err(FailoverError::InvalidPauseToken { execution_id: id });
        };
        info!(execution_id = %id, wave_number = pause.wave_number, "execution resumed");
        self.notifier.notify(&LifecycleEvent::Resumed {
            execution_id: id,
            wave_number: pause.wave_number,
            at: now,
        });

        let mut report = DriveReport::new(resumed.clone());
        report.transitions += 1;
        let step = self.launch(resumed, pause.wave_number, &mut report).await?;
        self.run(step, mode, report).await
    }

    /// Cancel a live execution; local state wins over external cleanup
    pub async fn cancel(&self, id: Uuid) -> FailoverResult<Execution> {
        let limit = self.config.cancel_retry_limit.max(1);
        let mut attempt = 0;
        loop {
            let current = self.load(id).await?;
            if current.status == ExecutionStatus::Cancelled {
                return Ok(current);
            }
            ensure_transition(id, current.status, ExecutionStatus::Cancelled)?;

            let now = Utc::now();
            let expected = current.status;
            let version = current.version;
            let mut next = current.clone();
            let mut cancelled_waves = Vec::new();
            for wave in next.waves.iter_mut().filter(|w| !w.state.is_terminal()) {
                set_wave_state(wave, WaveState::Cancelled, now);
                cancelled_waves.push(wave.wave_number);
            }
            for wave_number in cancelled_waves {
                next.record(HistoryEvent::WaveCancelled { wave_number }, now);
            }
            next.status = ExecutionStatus::Cancelled;
            next.pause_token = None;
            next.ended_at = Some(now);
            next.record(HistoryEvent::Cancelled, now);

            if let Some(written) = self.commit(&next, expected, version).await? {
                info!(execution_id = %id, from = %expected, "execution cancelled");
                self.notifier.notify(&LifecycleEvent::Cancelled {
                    execution_id: id,
                    at: now,
                });
                self.cancel_external(&current).await;
                return Ok(written);
            }

            attempt += 1;
            if attempt >= limit {
                return Err(FailoverError::ConsistencyConflict {
                    execution_id: id,
                    expected,
                    version,
                });
            }
            debug!(execution_id = %id, attempt, "cancel lost a conditional write, re-reading");
        }
    }

    async fn run(&self, mut step: Step, mode: DriveMode, mut report: DriveReport) -> FailoverResult<DriveReport> {
        let started = Instant::now();
        loop {
            let execution = match step {
                Step::Advanced(next) => {
                    report.transitions += 1;
                    next
                }
                Step::Conflict(id) => {
                    report.conflicts += 1;
                    self.load(id).await?
                }
                Step::Halted(done) => {
                    report.execution = done;
                    return Ok(report);
                }
                Step::Waiting(current) => {
                    if mode == DriveMode::Synchronous && started.elapsed() < self.config.sync_max_wait() {
                        tokio::time::sleep(self.config.sync_poll_interval()).await;
                        self.load(current.id).await?
                    } else {
                        if mode == DriveMode::Synchronous {
                            info!(
                                execution_id = %current.id,
                                "synchronous wait expired, leaving execution to the poller"
                            );
                        }
                        report.execution = current;
                        return Ok(report);
                    }
                }
            };
            step = self.step(execution, mode, &mut report).await?;
        }
    }

    async fn step(&self, execution: Execution, mode: DriveMode, report: &mut DriveReport) -> FailoverResult<Step> {
        if execution.is_terminal() || execution.status == ExecutionStatus::Paused {
            return Ok(Step::Halted(execution));
        }
        let now = Utc::now();

        if let Some(active) = execution.active_wave().cloned() {
            if active.is_launching() {
                let stale = active
                    .claimed_at
                    .map_or(true, |at| now - at >= self.launch_grace);
                if mode == DriveMode::Reconcile && stale {
                    return self
                        .fail_wave(
                            execution,
                            active.wave_number,
                            "launch interrupted before a job was recorded".to_string(),
                            None,
                            report,
                        )
                        .await;
                }
                return Ok(Step::Waiting(execution));
            }
            if mode == DriveMode::Detached {
                return Ok(Step::Waiting(execution));
            }
            return self.poll_wave(execution, &active, report).await;
        }

        let Some(wave) = execution.next_pending_wave().cloned() else {
            return self.complete(execution).await;
        };

        if let Some(cause) = unmet_prerequisite(&execution, &wave) {
            return self
                .fail_wave(execution, wave.wave_number, cause, None, report)
                .await;
        }

        if wave.pause_before && !execution.resumed_waves.contains(&wave.wave_number) {
            return self.pause(execution, wave.wave_number).await;
        }

        self.claim(execution, wave.wave_number, report).await
    }

    async fn pause(&self, execution: Execution, wave_number: u32) -> FailoverResult<Step> {
        let now = Utc::now();
        let expected = execution.status;
        let version = execution.version;
        let token = PauseToken::issue(wave_number, now);

        let mut next = execution;
        if let Some(wave) = next.wave_mut(wave_number) {
            set_wave_state(wave, WaveState::Paused, now);
        }
        next.status = ExecutionStatus::Paused;
        next.pause_token = Some(token.clone());
        next.record(HistoryEvent::Paused { wave_number }, now);

        match self.commit(&next, expected, version).await? {
            Some(written) => {
                info!(execution_id = %written.id, wave_number, "execution paused before wave");
                self.notifier.notify(&LifecycleEvent::Paused {
                    execution_id: written.id,
                    wave_number,
                    pause_token: token.token,
                    at: now,
                });
                Ok(Step::Halted(written))
            }
            None => Ok(Step::Conflict(next.id)),
        }
    }

    /// Mark the wave RUNNING without a job so that only one driver launches it
    async fn claim(&self, execution: Execution, wave_number: u32, report: &mut DriveReport) -> FailoverResult<Step> {
        let now = Utc::now();
        let expected = execution.status;
        let version = execution.version;

        let mut next = execution;
        if let Some(wave) = next.wave_mut(wave_number) {
            set_wave_state(wave, WaveState::Running, now);
            wave.claimed_at = Some(now);
        }
        next.status = ExecutionStatus::Running;
        next.record(HistoryEvent::WaveClaimed { wave_number }, now);

        match self.commit(&next, expected, version).await? {
            Some(claimed) => {
                debug!(execution_id = %claimed.id, wave_number, "wave claimed");
                report.transitions += 1;
                self.launch(claimed, wave_number, report).await
            }
            None => Ok(Step::Conflict(next.id)),
        }
    }

    /// Re-validate against live state and start the wave's job
    async fn launch(&self, execution: Execution, wave_number: u32, report: &mut DriveReport) -> FailoverResult<Step> {
        let Some(wave) = execution.wave(wave_number).cloned() else {
            return Err(FailoverError::store(format!(
                "execution {} has no wave {wave_number}",
                execution.id
            )));
        };

        let violations = match self.guard.validate_wave(&execution, &wave).await {
            Ok(violations) => violations,
            Err(error) => return self.fail_launch(execution, wave_number, error, report).await,
        };
        if !violations.is_empty() {
            warn!(
                execution_id = %execution.id,
                wave_number,
                violations = violations.len(),
                "launch-time validation rejected wave"
            );
            let error = FailoverError::Validation {
                execution_id: Some(execution.id),
                violations: violations.clone(),
            };
            let reason = format!("launch validation failed: {error}");
            let mut execution = execution;
            execution.violations = violations;
            return self
                .fail_wave(execution, wave_number, reason, Some(error), report)
                .await;
        }

        match self
            .adapter
            .start_job(&execution.account, &wave.servers, execution.kind.into())
            .await
        {
            Ok(job_id) => self.mark_launched(execution, wave_number, job_id).await,
            Err(error) => self.fail_launch(execution, wave_number, error, report).await,
        }
    }

    async fn fail_launch(
        &self,
        execution: Execution,
        wave_number: u32,
        error: FailoverError,
        report: &mut DriveReport,
    ) -> FailoverResult<Step> {
        self.escalate_if_exhausted(Some(execution.id), &error);
        let reason = format!("launch failed: {error}");
        self.fail_wave(execution, wave_number, reason, Some(error), report)
            .await
    }

    /// Record the job id on the claimed wave
    async fn mark_launched(&self, execution: Execution, wave_number: u32, job_id: String) -> FailoverResult<Step> {
        let id = execution.id;
        let account = execution.account.clone();
        let mut current = execution;
        for _ in 0..=self.config.cancel_retry_limit {
            let expected = current.status;
            let version = current.version;
            let now = Utc::now();
            let mut next = current.clone();
            match next.wave_mut(wave_number) {
                Some(wave) if wave.is_launching() => {
                    wave.job_ids.push(job_id.clone());
                    wave.started_at = Some(now);
                }
                _ => break,
            }
            next.record(
                HistoryEvent::WaveLaunched {
                    wave_number,
                    job_id: job_id.clone(),
                },
                now,
            );
            if let Some(written) = self.commit(&next, expected, version).await? {
                info!(execution_id = %id, wave_number, job_id = %job_id, "wave launched");
                return Ok(Step::Advanced(written));
            }
            current = self.load(id).await?;
            if current.is_terminal() {
                break;
            }
        }
        warn!(
            execution_id = %id,
            wave_number,
            job_id = %job_id,
            "job launched but the execution moved on, terminating its instances"
        );
        self.terminate_orphaned_job(&account, &job_id).await;
        Ok(Step::Conflict(id))
    }

    /// Best-effort cleanup of a job no execution will ever track
    async fn terminate_orphaned_job(&self, account: &AccountContext, job_id: &str) {
        match self.adapter.describe_job(account, job_id).await {
            Ok(job) => {
                let instances: Vec<String> = job
                    .servers
                    .into_iter()
                    .filter_map(|s| s.recovery_instance_id)
                    .collect();
                if instances.is_empty() {
                    warn!(job_id = %job_id, "orphaned job has no recovery instances yet");
                } else if let Some(terminate_job) = self.terminate_best_effort(account, &instances).await {
                    info!(
                        job_id = %job_id,
                        terminate_job = %terminate_job,
                        instances = instances.len(),
                        "orphaned job instances terminated"
                    );
                }
            }
            Err(e) => warn!(job_id = %job_id, error = %e, "could not inspect orphaned job"),
        }
    }

    async fn poll_wave(
        &self,
        execution: Execution,
        active: &WaveStatus,
        report: &mut DriveReport,
    ) -> FailoverResult<Step> {
        let Some(job_id) = active.job_ids.last() else {
            return Ok(Step::Waiting(execution));
        };
        let now = Utc::now();

        let job = match self.adapter.describe_job(&execution.account, job_id).await {
            Ok(job) => job,
            Err(error @ FailoverError::External { .. }) => {
                let reason = format!("job {job_id} could not be described: {error}");
                return self
                    .fail_wave(execution, active.wave_number, reason, Some(error), report)
                    .await;
            }
            Err(error) => {
                if active.timed_out(now) {
                    let limit = active.timeout_secs.unwrap_or_default();
                    let reason = format!(
                        "timed out after {limit}s while job {job_id} could not be described: {error}"
                    );
                    return self
                        .fail_wave(execution, active.wave_number, reason, None, report)
                        .await;
                }
                if !active.escalated && self.escalate_if_exhausted(Some(execution.id), &error) {
                    self.mark_escalated(execution, active.wave_number).await?;
                }
                return Err(error);
            }
        };

        if job.status == JobStatus::Completed {
            return self.finish_wave(execution, active, &job, report).await;
        }

        if active.timed_out(now) {
            let limit = active.timeout_secs.unwrap_or_default();
            let reason = format!("timed out after {limit}s without the job completing");
            let account = execution.account.clone();
            let step = self
                .fail_wave(execution, active.wave_number, reason, None, report)
                .await?;
            if matches!(step, Step::Halted(_)) {
                let instances: Vec<String> = job
                    .servers
                    .iter()
                    .filter_map(|s| s.recovery_instance_id.clone())
                    .collect();
                self.terminate_best_effort(&account, &instances).await;
            }
            return Ok(step);
        }

        Ok(Step::Waiting(execution))
    }

    /// Apply a terminal job: COMPLETED only if every server launched
    async fn finish_wave(
        &self,
        execution: Execution,
        active: &WaveStatus,
        job: &JobView,
        report: &mut DriveReport,
    ) -> FailoverResult<Step> {
        let wave_number = active.wave_number;
        let reported: BTreeMap<&str, _> = job
            .servers
            .iter()
            .map(|s| (s.server_id.as_str(), s))
            .collect();

        let mut outcomes = BTreeMap::new();
        let mut instances = BTreeMap::new();
        for server in &active.servers {
            match reported.get(server.as_str()) {
                Some(js) if js.launch_status == LaunchStatus::Launched => {
                    outcomes.insert(server.clone(), ServerOutcome::Launched);
                    if let Some(instance) = &js.recovery_instance_id {
                        instances.insert(server.clone(), instance.clone());
                    }
                }
                _ => {
                    outcomes.insert(server.clone(), ServerOutcome::Failed);
                }
            }
        }
        let failed: Vec<String> = outcomes
            .iter()
            .filter(|(_, o)| **o == ServerOutcome::Failed)
            .map(|(s, _)| s.clone())
            .collect();

        let now = Utc::now();
        let expected = execution.status;
        let version = execution.version;
        let mut next = execution;
        if let Some(wave) = next.wave_mut(wave_number) {
            wave.server_outcomes = outcomes;
            wave.recovery_instances = instances;
        }

        if !failed.is_empty() {
            let error = FailoverError::TerminalJobFailure {
                execution_id: next.id,
                wave_number,
                failed_servers: failed.clone(),
            };
            let reason = format!(
                "{} server(s) failed to launch: {}",
                failed.len(),
                failed.join(", ")
            );
            return self
                .fail_wave(next, wave_number, reason, Some(error), report)
                .await;
        }

        if let Some(wave) = next.wave_mut(wave_number) {
            set_wave_state(wave, WaveState::Completed, now);
        }
        next.record(HistoryEvent::WaveCompleted { wave_number }, now);
        match self.commit(&next, expected, version).await? {
            Some(written) => {
                info!(execution_id = %written.id, wave_number, "wave completed");
                report.waves_completed += 1;
                Ok(Step::Advanced(written))
            }
            None => Ok(Step::Conflict(next.id)),
        }
    }

    /// Fail one wave and finish the execution so that every wave is terminal
    async fn fail_wave(
        &self,
        execution: Execution,
        wave_number: u32,
        reason: String,
        failure: Option<FailoverError>,
        report: &mut DriveReport,
    ) -> FailoverResult<Step> {
        let now = Utc::now();
        let expected = execution.status;
        let version = execution.version;
        let dependents = WaveGraph::from_waves(&execution.waves).dependents_of(&BTreeSet::from([wave_number]));

        let mut next = execution;
        if let Some(wave) = next.wave_mut(wave_number) {
            set_wave_state(wave, WaveState::Failed, now);
            wave.failure_reason = Some(reason.clone());
        }
        next.record(
            HistoryEvent::WaveFailed {
                wave_number,
                reason: reason.clone(),
            },
            now,
        );

        let mut cancelled = Vec::new();
        for wave in next.waves.iter_mut().filter(|w| !w.state.is_terminal()) {
            if dependents.contains(&wave.wave_number) {
                wave.failure_reason = Some(format!("dependency wave {wave_number} failed"));
                set_wave_state(wave, WaveState::Failed, now);
            } else {
                set_wave_state(wave, WaveState::Cancelled, now);
                cancelled.push(wave.wave_number);
            }
        }
        for number in cancelled {
            next.record(HistoryEvent::WaveCancelled { wave_number: number }, now);
        }

        let cause = format!("wave {wave_number}: {reason}");
        next.status = ExecutionStatus::Failed;
        next.failure_cause = Some(cause.clone());
        next.pause_token = None;
        next.ended_at = Some(now);
        next.record(HistoryEvent::Failed { cause: cause.clone() }, now);

        match self.commit(&next, expected, version).await? {
            Some(written) => {
                warn!(execution_id = %written.id, wave_number, cause = %cause, "execution failed");
                report.waves_failed += 1;
                report.failure = failure;
                self.notifier.notify(&LifecycleEvent::Failed {
                    execution_id: written.id,
                    cause,
                    at: now,
                });
                Ok(Step::Halted(written))
            }
            None => Ok(Step::Conflict(next.id)),
        }
    }

    async fn complete(&self, execution: Execution) -> FailoverResult<Step> {
        let now = Utc::now();
        let expected = execution.status;
        let version = execution.version;

        if let Some(stray) = execution.waves.iter().find(|w| w.state != WaveState::Completed) {
            return Err(FailoverError::store(format!(
                "execution {} has no pending wave but wave {} is {}",
                execution.id, stray.wave_number, stray.state
            )));
        }

        let mut next = execution;
        next.status = ExecutionStatus::Completed;
        next.ended_at = Some(now);
        next.record(HistoryEvent::Completed, now);
        match self.commit(&next, expected, version).await? {
            Some(written) => {
                info!(execution_id = %written.id, waves = written.waves.len(), "execution completed");
                self.notifier.notify(&LifecycleEvent::Completed {
                    execution_id: written.id,
                    at: now,
                });
                Ok(Step::Halted(written))
            }
            None => Ok(Step::Conflict(next.id)),
        }
    }

    /// Best-effort termination of instances the active wave already launched
    async fn cancel_external(&self, before: &Execution) {
        let Some(active) = before.active_wave() else {
            return;
        };
        let mut instances: BTreeSet<String> = active.recovery_instances.values().cloned().collect();
        for job_id in &active.job_ids {
            match self.adapter.describe_job(&before.account, job_id).await {
                Ok(job) => instances.extend(job.servers.into_iter().filter_map(|s| s.recovery_instance_id)),
                Err(e) => warn!(execution_id = %before.id, job_id = %job_id, error = %e, "could not inspect job during cancel"),
            }
        }
        let instances: Vec<String> = instances.into_iter().collect();
        self.terminate_best_effort(&before.account, &instances).await;
    }

    async fn terminate_best_effort(&self, account: &AccountContext, instances: &[String]) -> Option<String> {
        if instances.is_empty() {
            return None;
        }
        match self.adapter.terminate_instances(account, instances).await {
            Ok(job_id) => Some(job_id),
            Err(e) => {
                warn!(account = %account, instances = instances.len(), error = %e, "instance termination failed");
                None
            }
        }
    }

    /// Notify an escalation for exhausted retries; returns whether one was sent
    fn escalate_if_exhausted(&self, execution_id: Option<Uuid>, error: &FailoverError) -> bool {
        let FailoverError::RetriesExhausted {
            operation,
            attempts,
        } = error
        else {
            return false;
        };
        self.notifier.notify(&LifecycleEvent::Escalation {
            execution_id,
            operation: operation.clone(),
            attempts: attempts.clone(),
            at: Utc::now(),
        });
        true
    }

    /// Remember that the wave's job was escalated so later passes stay quiet
    async fn mark_escalated(&self, execution: Execution, wave_number: u32) -> FailoverResult<()> {
        let expected = execution.status;
        let version = execution.version;
        let mut next = execution;
        match next.wave_mut(wave_number) {
            Some(wave) => wave.escalated = true,
            None => return Ok(()),
        }
        if self.commit(&next, expected, version).await?.is_none() {
            debug!(execution_id = %next.id, wave_number, "escalation flag not recorded");
        }
        Ok(())
    }

    async fn commit(
        &self,
        next: &Execution,
        expected: ExecutionStatus,
        version: u64,
    ) -> FailoverResult<Option<Execution>> {
        ensure_transition(next.id, expected, next.status)?;
        let written = self.store.update_if(next, expected, version).await?;
        if written.is_none() {
            debug!(execution_id = %next.id, %expected, version, "conditional write lost");
        }
        Ok(written)
    }

    async fn load(&self, id: Uuid) -> FailoverResult<Execution> {
        self.store
            .get(id)
            .await?
            .ok_or(FailoverError::ExecutionNotFound(id))
    }
}

fn set_wave_state(wave: &mut WaveStatus, state: WaveState, at: DateTime<Utc>) {
    debug_assert!(
        wave.state == state || can_transition_wave(wave.state, state),
        "wave {} cannot go from {} to {}",
        wave.wave_number,
        wave.state,
        state
    );
    wave.enter(state, at);
}

/// Cause naming the first prerequisite that did not complete
fn unmet_prerequisite(execution: &Execution, wave: &WaveStatus) -> Option<String> {
    wave.depends_on.iter().find_map(|dep| match execution.wave(*dep) {
        Some(prerequisite) if prerequisite.state == WaveState::Completed => None,
        Some(prerequisite) => Some(format!(
            "prerequisite wave {dep} is {} for wave {}",
            prerequisite.state, wave.wave_number
        )),
        None => Some(format!(
            "prerequisite wave {dep} of wave {} does not exist",
            wave.wave_number
        )),
    })
}
