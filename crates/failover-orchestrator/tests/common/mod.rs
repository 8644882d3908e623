//! Shared fixtures for orchestrator integration tests

#![allow(dead_code)]

use std::sync::Arc;

use stratoswarm_failover_orchestrator::{
    AccountContext, ChannelSink, ExecutionStore, FailoverOrchestrator, InMemoryExecutionStore,
    InMemoryPlanSource, LifecycleEvent, OrchestratorConfig, PollerConfig, ProtectionGroup,
    RecoveryPlan, RetryConfig, SchedulerConfig, SimulatedReplicationService, WaveSpec,
};
use tokio::sync::mpsc;

pub const REGION: &str = "us-east-1";

pub fn account() -> AccountContext {
    AccountContext::new("111122223333", REGION)
}

/// Fast retries and short synchronous waits
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        },
        scheduler: SchedulerConfig {
            synchronous: true,
            sync_poll_interval_ms: 5,
            sync_max_wait_ms: 2_000,
            cancel_retry_limit: 5,
            default_wave_timeout_secs: None,
        },
        poller: PollerConfig {
            interval_ms: 20,
            launch_grace_ms: 60_000,
        },
        ..Default::default()
    }
}

pub fn detached_config() -> OrchestratorConfig {
    let mut config = test_config();
    config.scheduler.synchronous = false;
    config
}

pub fn wave(number: u32) -> WaveSpec {
    WaveSpec {
        wave_number: number,
        name: Some(format!("wave-{number}")),
        group_ids: Vec::new(),
        depends_on: Vec::new(),
        pause_before: false,
        timeout_secs: None,
    }
}

pub fn depends_on(mut spec: WaveSpec, prerequisites: &[u32]) -> WaveSpec {
    spec.depends_on = prerequisites.to_vec();
    spec
}

pub fn paused(mut spec: WaveSpec) -> WaveSpec {
    spec.pause_before = true;
    spec
}

pub fn with_timeout(mut spec: WaveSpec, secs: u64) -> WaveSpec {
    spec.timeout_secs = Some(secs);
    spec
}

pub struct Harness {
    pub sim: Arc<SimulatedReplicationService>,
    pub plans: Arc<InMemoryPlanSource>,
    pub store: Arc<dyn ExecutionStore>,
    pub orchestrator: FailoverOrchestrator,
    pub config: OrchestratorConfig,
    events: mpsc::Receiver<LifecycleEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        Self::build(
            config,
            Arc::new(SimulatedReplicationService::new()),
            Arc::new(InMemoryPlanSource::new()),
            Arc::new(InMemoryExecutionStore::new()),
        )
    }

    pub fn build(
        config: OrchestratorConfig,
        sim: Arc<SimulatedReplicationService>,
        plans: Arc<InMemoryPlanSource>,
        store: Arc<dyn ExecutionStore>,
    ) -> Self {
        let (sink, events) = ChannelSink::new(256);
        let orchestrator = FailoverOrchestrator::new(
            config.clone(),
            plans.clone(),
            sim.clone(),
            store.clone(),
            Arc::new(sink),
        );
        Self {
            sim,
            plans,
            store,
            orchestrator,
            config,
            events,
        }
    }

    /// Register the plan, one protection group per wave, and healthy servers
    pub fn install_plan(&self, plan_id: &str, waves: Vec<(WaveSpec, Vec<&str>)>) {
        let mut specs = Vec::new();
        for (mut spec, servers) in waves {
            let group_id = format!("{plan_id}-pg-{}", spec.wave_number);
            self.plans.insert_group(ProtectionGroup {
                id: group_id.clone(),
                name: group_id.clone(),
                region: REGION.to_string(),
                server_ids: servers.iter().map(|s| s.to_string()).collect(),
            });
            self.sim.add_healthy_servers(&account(), &servers);
            spec.group_ids = vec![group_id];
            specs.push(spec);
        }
        self.plans.insert_plan(RecoveryPlan {
            id: plan_id.to_string(),
            name: plan_id.to_string(),
            waves: specs,
        });
    }

    /// Waves 0 -> 1 -> 2, pausing before `pause_at` if given
    pub fn install_three_wave_plan(&self, plan_id: &str, pause_at: Option<u32>) {
        let spec = |number: u32, prerequisites: &[u32]| {
            let spec = depends_on(wave(number), prerequisites);
            if pause_at == Some(number) {
                paused(spec)
            } else {
                spec
            }
        };
        self.install_plan(
            plan_id,
            vec![
                (spec(0, &[]), vec!["db-1", "db-2"]),
                (spec(1, &[0]), vec!["app-1", "app-2"]),
                (spec(2, &[1]), vec!["web-1"]),
            ],
        );
    }

    /// Every event delivered so far
    pub fn drain_events(&mut self) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn event_names(events: &[LifecycleEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}

pub fn pause_token_from(events: &[LifecycleEvent]) -> Option<String> {
    events.iter().rev().find_map(|event| match event {
        LifecycleEvent::Paused { pause_token, .. } => Some(pause_token.clone()),
        _ => None,
    })
}
