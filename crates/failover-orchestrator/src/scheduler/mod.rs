//! Wave scheduling: dependency order, transition tables and the drive engine

pub mod dependencies;
pub mod engine;
pub mod state_machine;

pub use dependencies::WaveGraph;
pub use engine::{DriveMode, DriveReport, ExecutionRequest, WaveScheduler};
