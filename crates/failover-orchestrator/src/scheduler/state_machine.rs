//! Transition tables for execution and wave statuses

use crate::error::{FailoverError, FailoverResult};
use crate::models::execution::{ExecutionStatus, WaveState};
use uuid::Uuid;

/// Execution statuses reachable from `from`
pub fn execution_successors(from: ExecutionStatus) -> &'static [ExecutionStatus] {
    use ExecutionStatus::*;
    match from {
        Pending => &[Running, Paused, Failed, Cancelled],
        Running => &[Paused, Completed, Failed, Cancelled],
        Paused => &[Running, Cancelled],
        Completed | Failed | Cancelled => &[],
    }
}

/// Wave states reachable from `from`
pub fn wave_successors(from: WaveState) -> &'static [WaveState] {
    use WaveState::*;
    match from {
        Pending => &[Running, Paused, Failed, Cancelled],
        Paused => &[Running, Failed, Cancelled],
        Running => &[Completed, Failed, Cancelled],
        Completed | Failed | Cancelled => &[],
    }
}

pub fn can_transition(from: ExecutionStatus, to: ExecutionStatus) -> bool {
    execution_successors(from).contains(&to)
}

pub fn can_transition_wave(from: WaveState, to: WaveState) -> bool {
    wave_successors(from).contains(&to)
}

/// Reject a status change that is not in the table
pub fn ensure_transition(
    execution_id: Uuid,
    from: ExecutionStatus,
    to: ExecutionStatus,
) -> FailoverResult<()> {
    if from == to || can_transition(from, to) {
        Ok(())
    } else {
        Err(FailoverError::InvalidTransition {
            execution_id,
            from,
            to,
        })
    }
}
