//! Orchestrator configuration
//!
//! Loaded from TOML or JSON, then overridden by `FAILOVER_*` environment
//! variables. Defaults follow the replication service's published limits.

use crate::error::{FailoverError, FailoverResult};
use crate::models::execution::AccountContext;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Hard quotas enforced by the replication service per account and region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceQuotas {
    /// Servers a single recovery job may cover
    pub max_servers_per_job: usize,
    /// Jobs that may be active at the same time
    pub max_concurrent_jobs: usize,
    /// Servers across all active jobs
    pub max_servers_in_all_jobs: usize,
    /// Servers that may be actively replicating
    pub max_replicating_servers: usize,
}

impl Default for ServiceQuotas {
    fn default() -> Self {
        Self {
            max_servers_per_job: 100,
            max_concurrent_jobs: 20,
            max_servers_in_all_jobs: 500,
            max_replicating_servers: 300,
        }
    }
}

/// Retry policy for transient replication service errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first call
    pub max_attempts: u32,
    /// Delay before the first retry (milliseconds)
    pub base_delay_ms: u64,
    /// Upper bound for any single delay (milliseconds)
    pub max_delay_ms: u64,
    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

/// Capacity classification thresholds, as percent of quota
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityThresholds {
    pub info_percent: f64,
    pub warning_percent: f64,
    pub critical_percent: f64,
}

impl Default for CapacityThresholds {
    fn default() -> Self {
        Self {
            info_percent: 80.0,
            warning_percent: 90.0,
            critical_percent: 100.0,
        }
    }
}

/// Cross-account aggregator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Queries in flight at once
    pub max_concurrency: usize,
    /// Per-query timeout (milliseconds)
    pub query_timeout_ms: u64,
    /// Status thresholds
    #[serde(default)]
    pub thresholds: CapacityThresholds,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            query_timeout_ms: 10_000,
            thresholds: CapacityThresholds::default(),
        }
    }
}

impl AggregatorConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Wave scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Block on job completion instead of handing off to the poller
    pub synchronous: bool,
    /// Interval between describe calls while driving synchronously (milliseconds)
    pub sync_poll_interval_ms: u64,
    /// Longest a synchronous drive waits on one wave before yielding (milliseconds)
    pub sync_max_wait_ms: u64,
    /// Conditional write attempts for cancel before giving up
    pub cancel_retry_limit: u32,
    /// Timeout for waves whose plan sets none (seconds); `None` lets them run unbounded
    #[serde(default = "default_wave_timeout_secs")]
    pub default_wave_timeout_secs: Option<u64>,
}

fn default_wave_timeout_secs() -> Option<u64> {
    Some(4 * 60 * 60)
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            synchronous: false,
            sync_poll_interval_ms: 5_000,
            sync_max_wait_ms: 15 * 60 * 1000,
            cancel_retry_limit: 5,
            default_wave_timeout_secs: default_wave_timeout_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn sync_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync_poll_interval_ms)
    }

    pub fn sync_max_wait(&self) -> Duration {
        Duration::from_millis(self.sync_max_wait_ms)
    }
}

/// Poller/reconciler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Interval between reconcile passes (milliseconds)
    pub interval_ms: u64,
    /// How long a claimed wave may go without a recorded job (milliseconds)
    pub launch_grace_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            launch_grace_ms: 5 * 60 * 1000,
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn launch_grace(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.launch_grace_ms as i64)
    }
}

/// Execution store backend selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process-local, lost on restart
    Memory,
    /// One JSON document per execution under `path`
    File { path: String },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory
    }
}

/// Top-level orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub quotas: ServiceQuotas,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Accounts and regions queried for capacity by default
    #[serde(default)]
    pub accounts: Vec<AccountContext>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            quotas: ServiceQuotas::default(),
            retry: RetryConfig::default(),
            aggregator: AggregatorConfig::default(),
            scheduler: SchedulerConfig::default(),
            poller: PollerConfig::default(),
            store: StoreConfig::default(),
            accounts: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from a `.toml` or `.json` file, apply env overrides, then validate
    pub fn load_from(path: impl AsRef<Path>) -> FailoverResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&raw)?,
            Some("toml") | None => toml::from_str(&raw)?,
            Some(other) => {
                return Err(FailoverError::configuration(format!(
                    "unsupported config format: .{other}"
                )))
            }
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with env overrides applied
    pub fn from_env() -> FailoverResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override individual settings from `FAILOVER_*` environment variables
    pub fn apply_env_overrides(&mut self) -> FailoverResult<()> {
        if let Some(v) = env_parse("FAILOVER_MAX_SERVERS_PER_JOB")? {
            self.quotas.max_servers_per_job = v;
        }
        if let Some(v) = env_parse("FAILOVER_MAX_CONCURRENT_JOBS")? {
            self.quotas.max_concurrent_jobs = v;
        }
        if let Some(v) = env_parse("FAILOVER_MAX_SERVERS_IN_ALL_JOBS")? {
            self.quotas.max_servers_in_all_jobs = v;
        }
        if let Some(v) = env_parse("FAILOVER_RETRY_MAX_ATTEMPTS")? {
            self.retry.max_attempts = v;
        }
        if let Some(v) = env_parse("FAILOVER_RETRY_BASE_DELAY_MS")? {
            self.retry.base_delay_ms = v;
        }
        if let Some(v) = env_parse("FAILOVER_RETRY_MAX_DELAY_MS")? {
            self.retry.max_delay_ms = v;
        }
        if let Some(v) = env_parse("FAILOVER_AGGREGATOR_CONCURRENCY")? {
            self.aggregator.max_concurrency = v;
        }
        if let Some(v) = env_parse("FAILOVER_QUERY_TIMEOUT_MS")? {
            self.aggregator.query_timeout_ms = v;
        }
        if let Some(v) = env_parse("FAILOVER_POLL_INTERVAL_MS")? {
            self.poller.interval_ms = v;
        }
        if let Some(v) = env_parse("FAILOVER_SYNCHRONOUS")? {
            self.scheduler.synchronous = v;
        }
        if let Some(v) = env_parse("FAILOVER_DEFAULT_WAVE_TIMEOUT_SECS")? {
            self.scheduler.default_wave_timeout_secs = Some(v);
        }
        if let Ok(path) = std::env::var("FAILOVER_STORE_PATH") {
            self.store = StoreConfig::File { path };
        }
        Ok(())
    }

    /// Reject settings that would make the orchestrator misbehave
    pub fn validate(&self) -> FailoverResult<()> {
        if self.quotas.max_servers_per_job == 0
            || self.quotas.max_concurrent_jobs == 0
            || self.quotas.max_servers_in_all_jobs == 0
            || self.quotas.max_replicating_servers == 0
        {
            return Err(FailoverError::configuration("quotas must be non-zero"));
        }
        if self.retry.max_attempts == 0 {
            return Err(FailoverError::configuration(
                "retry.max_attempts must be at least 1",
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(FailoverError::configuration(
                "retry.base_delay_ms must not exceed retry.max_delay_ms",
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(FailoverError::configuration(
                "retry.jitter_factor must be between 0.0 and 1.0",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(FailoverError::configuration(
                "retry.backoff_multiplier must be at least 1.0",
            ));
        }
        if self.aggregator.max_concurrency == 0 {
            return Err(FailoverError::configuration(
                "aggregator.max_concurrency must be at least 1",
            ));
        }
        let t = &self.aggregator.thresholds;
        if !(t.info_percent <= t.warning_percent && t.warning_percent <= t.critical_percent) {
            return Err(FailoverError::configuration(
                "capacity thresholds must be ordered info <= warning <= critical",
            ));
        }
        if self.poller.interval_ms == 0 {
            return Err(FailoverError::configuration(
                "poller.interval_ms must be non-zero",
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> FailoverResult<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
            FailoverError::configuration(format!("{key} has an invalid value: {raw}"))
        }),
        Err(_) => Ok(None),
    }
}
