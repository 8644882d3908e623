//! Integration tests for restart recovery, the poller and stuck waves

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::*;
use stratoswarm_failover_orchestrator::{
    DriveMode, ExecutionKind, ExecutionRequest, ExecutionStatus, ExecutionStore,
    FailoverOrchestrator, FileExecutionStore, InMemoryPlanSource, SimulatedReplicationService,
    StoreConfig, WaveState,
};
use tempfile::TempDir;

fn drill(plan_id: &str) -> ExecutionRequest {
    ExecutionRequest::new(plan_id, ExecutionKind::Drill, account())
}

#[tokio::test]
async fn test_paused_execution_survives_restart_and_resumes() {
    let dir = TempDir::new().unwrap();
    let sim = Arc::new(SimulatedReplicationService::new());
    let plans = Arc::new(InMemoryPlanSource::new());

    let (id, token) = {
        let store = Arc::new(FileExecutionStore::open(dir.path()).await.unwrap());
        let mut h = Harness::build(test_config(), sim.clone(), plans.clone(), store);
        h.install_three_wave_plan("plan-restart", Some(1));
        let id = h.orchestrator.start_execution(drill("plan-restart")).await.unwrap();
        (id, pause_token_from(&h.drain_events()).unwrap())
    };

    let mut config = test_config();
    config.store = StoreConfig::File {
        path: dir.path().to_string_lossy().into_owned(),
    };
    let orchestrator = FailoverOrchestrator::from_config(config, plans, sim.clone())
        .await
        .unwrap();

    let reloaded = orchestrator.get_execution(id).await.unwrap();
    assert_eq!(reloaded.status, ExecutionStatus::Paused);
    assert_eq!(reloaded.pause_token.as_ref().unwrap().token, token);
    assert_eq!(reloaded.waves[0].state, WaveState::Completed);

    let done = orchestrator.resume(id, &token).await.unwrap();
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(sim.jobs_started(&account()), 3);
}

#[tokio::test]
async fn test_in_flight_execution_is_picked_up_after_restart() {
    let dir = TempDir::new().unwrap();
    let sim = Arc::new(SimulatedReplicationService::new().with_describes_to_complete(2));
    let plans = Arc::new(InMemoryPlanSource::new());

    let id = {
        let store = Arc::new(FileExecutionStore::open(dir.path()).await.unwrap());
        let h = Harness::build(detached_config(), sim.clone(), plans.clone(), store);
        h.install_three_wave_plan("plan-crash", None);
        h.orchestrator.start_execution(drill("plan-crash")).await.unwrap()
    };

    let store = Arc::new(FileExecutionStore::open(dir.path()).await.unwrap());
    let h = Harness::build(detached_config(), sim.clone(), plans, store);
    for _ in 0..20 {
        h.orchestrator.reconcile().await;
        if h.orchestrator.get_execution(id).await.unwrap().is_terminal() {
            break;
        }
    }
    let execution = h.orchestrator.get_execution(id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(sim.jobs_started(&account()), 3);
}

#[tokio::test]
async fn test_reconcile_completes_detached_execution() {
    let h = Harness::with_config(detached_config());
    h.sim.set_describes_to_complete(2);
    h.install_three_wave_plan("plan-detached", None);

    let id = h.orchestrator.start_execution(drill("plan-detached")).await.unwrap();
    let started = h.orchestrator.get_execution(id).await.unwrap();
    assert_eq!(started.status, ExecutionStatus::Running);
    assert_eq!(started.waves[0].job_ids.len(), 1);

    let mut passes = 0;
    while !h.orchestrator.get_execution(id).await.unwrap().is_terminal() {
        let stats = h.orchestrator.reconcile().await;
        assert_eq!(stats.examined, 1);
        assert!(stats.errors.is_empty());
        passes += 1;
        assert!(passes < 20, "execution did not finish");
    }

    let execution = h.orchestrator.get_execution(id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(h.orchestrator.reconcile().await.examined, 0);
}

#[tokio::test]
async fn test_concurrent_reconcile_passes_launch_each_wave_once() {
    let h = Harness::with_config(detached_config());
    h.install_three_wave_plan("plan-overlap", None);

    let id = h.orchestrator.start_execution(drill("plan-overlap")).await.unwrap();
    for _ in 0..20 {
        let (first, second) = tokio::join!(h.orchestrator.reconcile(), h.orchestrator.reconcile());
        assert!(first.errors.is_empty() && second.errors.is_empty());
        if h.orchestrator.get_execution(id).await.unwrap().is_terminal() {
            break;
        }
    }

    let execution = h.orchestrator.get_execution(id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(h.sim.jobs_started(&account()), 3);
    for wave in &execution.waves {
        assert_eq!(wave.job_ids.len(), 1);
        assert_eq!(
            wave.state_history(),
            vec![WaveState::Pending, WaveState::Running, WaveState::Completed]
        );
    }
}

#[tokio::test]
async fn test_spawned_poller_drives_to_completion() {
    let h = Harness::with_config(detached_config());
    h.sim.set_describes_to_complete(2);
    h.install_three_wave_plan("plan-poller", None);

    let id = h.orchestrator.start_execution(drill("plan-poller")).await.unwrap();
    let handle = h.orchestrator.spawn_poller();
    assert!(handle.is_running());

    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let execution = h.orchestrator.get_execution(id).await.unwrap();
            if execution.is_terminal() {
                return execution;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(finished.status, ExecutionStatus::Completed);
    handle.stop().await;
}

#[tokio::test]
async fn test_wave_timeout_fails_execution() {
    let h = Harness::new();
    h.sim.set_describes_to_complete(0);
    h.install_plan(
        "plan-timeout",
        vec![
            (with_timeout(wave(0), 0), vec!["slow-1"]),
            (depends_on(wave(1), &[0]), vec!["after-1"]),
        ],
    );

    let id = h.orchestrator.start_execution(drill("plan-timeout")).await.unwrap();
    let execution = h.orchestrator.get_execution(id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    let wave = &execution.waves[0];
    assert_eq!(wave.state, WaveState::Failed);
    assert!(wave.failure_reason.as_deref().unwrap().starts_with("timed out after 0s"));
    assert_eq!(execution.waves[1].state, WaveState::Failed);
}

#[tokio::test]
async fn test_synchronous_wait_expiry_hands_off_to_poller() {
    let mut config = test_config();
    config.scheduler.sync_max_wait_ms = 30;
    let h = Harness::with_config(config);
    h.sim.set_describes_to_complete(0);
    h.install_three_wave_plan("plan-handoff", None);

    let id = h
        .orchestrator
        .start_execution_in(drill("plan-handoff"), DriveMode::Synchronous)
        .await
        .unwrap();
    let execution = h.orchestrator.get_execution(id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Running);
    assert_eq!(execution.waves[0].state, WaveState::Running);
}

#[tokio::test]
async fn test_interrupted_launch_fails_after_grace() {
    let mut config = detached_config();
    config.poller.launch_grace_ms = 1_000;
    let h = Harness::with_config(config);
    h.sim.set_describes_to_complete(0);
    h.install_three_wave_plan("plan-crash-launch", None);

    let id = h.orchestrator.start_execution(drill("plan-crash-launch")).await.unwrap();

    // simulate a driver that claimed the wave and died before recording its job
    let mut claimed = h.orchestrator.get_execution(id).await.unwrap();
    let version = claimed.version;
    claimed.waves[0].job_ids.clear();
    claimed.waves[0].claimed_at = Some(Utc::now());
    let fresh = h
        .store
        .update_if(&claimed, ExecutionStatus::Running, version)
        .await
        .unwrap()
        .unwrap();

    // inside the grace period nothing happens
    h.orchestrator.reconcile().await;
    assert_eq!(
        h.orchestrator.get_execution(id).await.unwrap().status,
        ExecutionStatus::Running
    );

    let mut stale = h.orchestrator.get_execution(id).await.unwrap();
    assert_eq!(stale.version, fresh.version);
    stale.waves[0].claimed_at = Some(Utc::now() - chrono::Duration::hours(1));
    h.store
        .update_if(&stale, ExecutionStatus::Running, stale.version)
        .await
        .unwrap()
        .unwrap();

    let stats = h.orchestrator.reconcile().await;
    assert_eq!(stats.waves_failed, 1);
    let execution = h.orchestrator.get_execution(id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(
        execution.waves[0].failure_reason.as_deref(),
        Some("launch interrupted before a job was recorded")
    );
}

#[tokio::test]
async fn test_wave_timeout_applies_while_service_is_unreachable() {
    let h = Harness::with_config(detached_config());
    h.sim.set_describes_to_complete(0);
    h.install_plan(
        "plan-outage-timeout",
        vec![(with_timeout(wave(0), 0), vec!["slow-1"])],
    );

    let id = h.orchestrator.start_execution(drill("plan-outage-timeout")).await.unwrap();
    assert_eq!(h.orchestrator.get_execution(id).await.unwrap().waves[0].job_ids.len(), 1);

    h.sim.set_unreachable(&account(), true);
    let stats = h.orchestrator.reconcile().await;
    assert_eq!(stats.waves_failed, 1);
    assert!(stats.errors.is_empty());

    let execution = h.orchestrator.get_execution(id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    let reason = execution.waves[0].failure_reason.as_deref().unwrap();
    assert!(reason.starts_with("timed out after 0s"));
    assert!(reason.contains("could not be described"));
    assert_eq!(h.orchestrator.reconcile().await.examined, 0);
}

#[tokio::test]
async fn test_unreachable_service_escalates_once_per_wave() {
    let mut h = Harness::with_config(detached_config());
    h.sim.set_describes_to_complete(0);
    h.install_three_wave_plan("plan-outage-escalation", None);

    let id = h
        .orchestrator
        .start_execution(drill("plan-outage-escalation"))
        .await
        .unwrap();
    h.sim.set_unreachable(&account(), true);
    for _ in 0..3 {
        let stats = h.orchestrator.reconcile().await;
        assert_eq!(stats.errors.len(), 1);
    }

    let escalations = event_names(&h.drain_events())
        .into_iter()
        .filter(|name| *name == "escalation")
        .count();
    assert_eq!(escalations, 1);

    let execution = h.orchestrator.get_execution(id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Running);
    assert!(execution.waves[0].escalated);
}

#[tokio::test]
async fn test_plan_without_timeout_gets_the_configured_default() {
    let mut config = detached_config();
    config.scheduler.default_wave_timeout_secs = Some(600);
    let h = Harness::with_config(config);
    h.install_plan(
        "plan-default-timeout",
        vec![
            (wave(0), vec!["a-1"]),
            (with_timeout(depends_on(wave(1), &[0]), 30), vec!["b-1"]),
        ],
    );

    let id = h.orchestrator.start_execution(drill("plan-default-timeout")).await.unwrap();
    let execution = h.orchestrator.get_execution(id).await.unwrap();
    assert_eq!(execution.waves[0].timeout_secs, Some(600));
    assert_eq!(execution.waves[1].timeout_secs, Some(30));
}
