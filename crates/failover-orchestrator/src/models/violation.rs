//! Typed guard and plan-structure violations

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Who currently holds a server that a wave wants to launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictHolder {
    /// Another execution tracked in the execution store
    Execution {
        /// Execution holding the server
        execution_id: Uuid,
        /// Active wave of that execution
        wave_number: u32,
    },
    /// A job the replication service reports active that no tracked execution owns
    ExternalJob {
        /// External job identifier
        job_id: String,
    },
}

impl fmt::Display for ConflictHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Execution {
                execution_id,
                wave_number,
            } => write!(f, "execution {execution_id} wave {wave_number}"),
            Self::ExternalJob { job_id } => write!(f, "external job {job_id}"),
        }
    }
}

/// A single reason a plan or wave cannot be launched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Violation {
    /// Wave has more servers than one job may cover
    WaveTooLarge {
        wave_number: u32,
        server_count: usize,
        limit: usize,
    },
    /// Launching would exceed the concurrent job limit of the region
    ConcurrentJobLimit {
        region: String,
        active_jobs: usize,
        limit: usize,
    },
    /// Launching would exceed the servers-across-active-jobs limit
    ServersInFlightLimit {
        region: String,
        wave_number: u32,
        in_flight: usize,
        requested: usize,
        limit: usize,
    },
    /// Server already participates in another active wave or job
    ServerConflict {
        wave_number: u32,
        server_id: String,
        holder: ConflictHolder,
    },
    /// Server is not in healthy continuous replication
    UnhealthyReplication {
        wave_number: u32,
        server_id: String,
        reason: String,
    },
    /// Prerequisite graph contains a cycle
    DependencyCycle { waves: Vec<u32> },
    /// Prerequisite refers to a wave that does not exist
    UnknownDependency { wave_number: u32, depends_on: u32 },
    /// Wave numbers must be unique and strictly increasing
    WaveOrdering { wave_number: u32, previous: u32 },
    /// Wave resolves to no servers
    EmptyWave { wave_number: u32 },
    /// Wave references a protection group that cannot be found
    UnknownGroup { wave_number: u32, group_id: String },
    /// Protection group lives in a different region than the execution target
    RegionMismatch {
        wave_number: u32,
        group_id: String,
        group_region: String,
        target_region: String,
    },
    /// Plan has no waves at all
    EmptyPlan,
}

impl Violation {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::WaveTooLarge { .. } => "wave_too_large",
            Self::ConcurrentJobLimit { .. } => "concurrent_job_limit",
            Self::ServersInFlightLimit { .. } => "servers_in_flight_limit",
            Self::ServerConflict { .. } => "server_conflict",
            Self::UnhealthyReplication { .. } => "unhealthy_replication",
            Self::DependencyCycle { .. } => "dependency_cycle",
            Self::UnknownDependency { .. } => "unknown_dependency",
            Self::WaveOrdering { .. } => "wave_ordering",
            Self::EmptyWave { .. } => "empty_wave",
            Self::UnknownGroup { .. } => "unknown_group",
            Self::RegionMismatch { .. } => "region_mismatch",
            Self::EmptyPlan => "empty_plan",
        }
    }

    /// Violation is about plan shape rather than live external state
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::DependencyCycle { .. }
                | Self::UnknownDependency { .. }
                | Self::WaveOrdering { .. }
                | Self::EmptyWave { .. }
                | Self::UnknownGroup { .. }
                | Self::RegionMismatch { .. }
                | Self::EmptyPlan
        )
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaveTooLarge {
                wave_number,
                server_count,
                limit,
            } => write!(
                f,
                "wave {wave_number} has {server_count} servers, per-job limit is {limit}"
            ),
            Self::ConcurrentJobLimit {
                region,
                active_jobs,
                limit,
            } => write!(
                f,
                "{region} has {active_jobs} active jobs, launching one more exceeds limit {limit}"
            ),
            Self::ServersInFlightLimit {
                region,
                wave_number,
                in_flight,
                requested,
                limit,
            } => write!(
                f,
                "wave {wave_number} adds {requested} servers to {in_flight} already in jobs in {region}, limit {limit}"
            ),
            Self::ServerConflict {
                wave_number,
                server_id,
                holder,
            } => write!(
                f,
                "server {server_id} in wave {wave_number} is already held by {holder}"
            ),
            Self::UnhealthyReplication {
                wave_number,
                server_id,
                reason,
            } => write!(f, "server {server_id} in wave {wave_number}: {reason}"),
            Self::DependencyCycle { waves } => {
                write!(f, "dependency cycle between waves {waves:?}")
            }
            Self::UnknownDependency {
                wave_number,
                depends_on,
            } => write!(
                f,
                "wave {wave_number} depends on unknown wave {depends_on}"
            ),
            Self::WaveOrdering {
                wave_number,
                previous,
            } => write!(
                f,
                "wave {wave_number} does not follow wave {previous} in strictly increasing order"
            ),
            Self::EmptyWave { wave_number } => write!(f, "wave {wave_number} has no servers"),
            Self::UnknownGroup {
                wave_number,
                group_id,
            } => write!(
                f,
                "wave {wave_number} references unknown protection group {group_id}"
            ),
            Self::RegionMismatch {
                wave_number,
                group_id,
                group_region,
                target_region,
            } => write!(
                f,
                "wave {wave_number} group {group_id} is in {group_region}, execution targets {target_region}"
            ),
            Self::EmptyPlan => write!(f, "plan has no waves"),
        }
    }
}
