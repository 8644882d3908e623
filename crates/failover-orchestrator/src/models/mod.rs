//! Data model shared by every orchestrator component

pub mod capacity;
pub mod execution;
pub mod plan;
pub mod violation;

pub use capacity::{CapacitySnapshot, CapacityStatus};
pub use execution::{
    AccountContext, Execution, ExecutionKind, ExecutionStatus, HistoryEntry, HistoryEvent,
    PauseToken, ServerOutcome, WaveState, WaveStatus, WaveTransition,
};
pub use plan::{
    resolve_plan, InMemoryPlanSource, PlanDocument, PlanSource, ProtectionGroup, RecoveryPlan,
    ResolvedPlan, ResolvedWave, WaveSpec,
};
pub use violation::{ConflictHolder, Violation};
