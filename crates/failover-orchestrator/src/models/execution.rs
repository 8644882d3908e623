//! Execution records owned by the orchestrator

use super::plan::ResolvedWave;
use super::violation::Violation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Replication account and region an execution targets
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountContext {
    /// Account identifier
    pub account_id: String,
    /// Region name
    pub region: String,
}

impl AccountContext {
    pub fn new(account_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            region: region.into(),
        }
    }

    /// `account/region` key used for maps and logs
    pub fn key(&self) -> String {
        format!("{}/{}", self.account_id, self.region)
    }
}

impl fmt::Display for AccountContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account_id, self.region)
    }
}

/// Drill launches isolated recovery instances; live performs the real failover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    Drill,
    Live,
}

impl ExecutionKind {
    pub fn is_drill(self) -> bool {
        matches!(self, Self::Drill)
    }
}

/// Overall execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Created, no wave claimed yet
    Pending,
    /// A wave is active or about to launch
    Running,
    /// Halted before a pause-gated wave
    Paused,
    /// Every wave completed
    Completed,
    /// A wave or validation failed
    Failed,
    /// Cancelled by a caller
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-wave status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaveState {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WaveState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for WaveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Outcome of one server within a wave's job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerOutcome {
    Pending,
    Launched,
    Failed,
}

/// One state a wave entered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveTransition {
    pub state: WaveState,
    pub at: DateTime<Utc>,
}

/// State of one wave within an execution
///
/// The plan-derived fields are snapshotted at creation so that resuming a
/// paused execution does not depend on the plan still existing unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveStatus {
    pub wave_number: u32,
    #[serde(default)]
    pub name: Option<String>,
    pub group_ids: Vec<String>,
    pub servers: Vec<String>,
    pub depends_on: Vec<u32>,
    pub pause_before: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    pub state: WaveState,
    /// External job identifiers once launched
    #[serde(default)]
    pub job_ids: Vec<String>,
    #[serde(default)]
    pub server_outcomes: BTreeMap<String, ServerOutcome>,
    /// Server id to recovered instance id
    #[serde(default)]
    pub recovery_instances: BTreeMap<String, String>,
    /// When a driver claimed the wave for launch
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    /// An escalation was raised for this wave's job
    #[serde(default)]
    pub escalated: bool,
    #[serde(default)]
    pub transitions: Vec<WaveTransition>,
}

impl WaveStatus {
    pub fn from_resolved(wave: &ResolvedWave, at: DateTime<Utc>) -> Self {
        Self {
            wave_number: wave.spec.wave_number,
            name: wave.spec.name.clone(),
            group_ids: wave.spec.group_ids.clone(),
            servers: wave.servers.clone(),
            depends_on: wave.spec.depends_on.clone(),
            pause_before: wave.spec.pause_before,
            timeout_secs: wave.spec.timeout_secs,
            state: WaveState::Pending,
            job_ids: Vec::new(),
            server_outcomes: wave
                .servers
                .iter()
                .map(|s| (s.clone(), ServerOutcome::Pending))
                .collect(),
            recovery_instances: BTreeMap::new(),
            claimed_at: None,
            started_at: None,
            ended_at: None,
            failure_reason: None,
            escalated: false,
            transitions: vec![WaveTransition {
                state: WaveState::Pending,
                at,
            }],
        }
    }

    /// Move to `state`, recording the transition and terminal timestamp
    pub(crate) fn enter(&mut self, state: WaveState, at: DateTime<Utc>) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.transitions.push(WaveTransition { state, at });
        if state.is_terminal() {
            self.ended_at = Some(at);
        }
    }

    /// Visited states in order
    pub fn state_history(&self) -> Vec<WaveState> {
        self.transitions.iter().map(|t| t.state).collect()
    }

    pub fn failed_servers(&self) -> Vec<String> {
        self.server_outcomes
            .iter()
            .filter(|(_, outcome)| **outcome == ServerOutcome::Failed)
            .map(|(server, _)| server.clone())
            .collect()
    }

    /// Claimed but no job recorded yet
    pub fn is_launching(&self) -> bool {
        self.state == WaveState::Running && self.job_ids.is_empty()
    }

    /// Running longer than the wave timeout, measured from job start
    pub fn timed_out(&self, now: DateTime<Utc>) -> bool {
        match (self.timeout_secs, self.started_at) {
            (Some(limit), Some(started)) if self.state == WaveState::Running => {
                (now - started).num_seconds() >= limit as i64
            }
            _ => false,
        }
    }
}

/// One-shot continuation handle stored with a paused execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseToken {
    pub token: String,
    pub wave_number: u32,
    pub issued_at: DateTime<Utc>,
}

impl PauseToken {
    pub fn issue(wave_number: u32, at: DateTime<Utc>) -> Self {
        Self {
            token: format!("pt-{}", Uuid::new_v4().simple()),
            wave_number,
            issued_at: at,
        }
    }
}

/// Lifecycle entries appended to an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HistoryEvent {
    Created,
    WaveClaimed { wave_number: u32 },
    WaveLaunched { wave_number: u32, job_id: String },
    WaveCompleted { wave_number: u32 },
    WaveFailed { wave_number: u32, reason: String },
    WaveCancelled { wave_number: u32 },
    Paused { wave_number: u32 },
    Resumed { wave_number: u32 },
    Completed,
    Failed { cause: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: HistoryEvent,
}

/// A single run of a recovery plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub plan_id: String,
    pub kind: ExecutionKind,
    pub status: ExecutionStatus,
    /// Optimistic-lock counter, bumped by the store on every write
    pub version: u64,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Opaque caller identity
    pub initiated_by: String,
    pub account: AccountContext,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Waves in processing order
    pub waves: Vec<WaveStatus>,
    #[serde(default)]
    pub pause_token: Option<PauseToken>,
    /// Waves whose pause gate has been passed
    #[serde(default)]
    pub resumed_waves: BTreeSet<u32>,
    #[serde(default)]
    pub failure_cause: Option<String>,
    #[serde(default)]
    pub violations: Vec<Violation>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl Execution {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn wave(&self, wave_number: u32) -> Option<&WaveStatus> {
        self.waves.iter().find(|w| w.wave_number == wave_number)
    }

    pub(crate) fn wave_mut(&mut self, wave_number: u32) -> Option<&mut WaveStatus> {
        self.waves.iter_mut().find(|w| w.wave_number == wave_number)
    }

    /// Wave currently claimed or running a job
    pub fn active_wave(&self) -> Option<&WaveStatus> {
        self.waves.iter().find(|w| w.state == WaveState::Running)
    }

    /// First wave in processing order not yet started
    pub fn next_pending_wave(&self) -> Option<&WaveStatus> {
        self.waves
            .iter()
            .find(|w| matches!(w.state, WaveState::Pending | WaveState::Paused))
    }

    pub(crate) fn record(&mut self, event: HistoryEvent, at: DateTime<Utc>) {
        self.history.push(HistoryEntry { at, event });
        self.updated_at = at;
    }

    /// Every recovered instance launched so far
    pub fn recovery_instance_ids(&self) -> Vec<String> {
        self.waves
            .iter()
            .flat_map(|w| w.recovery_instances.values().cloned())
            .collect()
    }

    /// History events without timestamps
    pub fn events(&self) -> Vec<HistoryEvent> {
        self.history.iter().map(|h| h.event.clone()).collect()
    }
}
