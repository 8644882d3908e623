//! List command

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, ValueEnum};
use stratoswarm_failover_orchestrator::{Execution, ExecutionStatus};

use super::{open_file_store, CommandContext};
use crate::cli::OutputFormat;
use crate::render;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StatusFilter {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl From<StatusFilter> for ExecutionStatus {
    fn from(filter: StatusFilter) -> Self {
        match filter {
            StatusFilter::Pending => ExecutionStatus::Pending,
            StatusFilter::Running => ExecutionStatus::Running,
            StatusFilter::Paused => ExecutionStatus::Paused,
            StatusFilter::Completed => ExecutionStatus::Completed,
            StatusFilter::Failed => ExecutionStatus::Failed,
            StatusFilter::Cancelled => ExecutionStatus::Cancelled,
        }
    }
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Execution store directory
    #[arg(long)]
    pub store: PathBuf,

    /// Only executions in this status
    #[arg(long, value_enum)]
    pub status: Option<StatusFilter>,

    /// Only executions of this plan
    #[arg(long)]
    pub plan: Option<String>,
}

impl ListArgs {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let executions = self.collect().await?;
        match ctx.format {
            OutputFormat::Json => ctx.print_json(&executions)?,
            OutputFormat::Table => render::executions(&executions),
        }
        Ok(())
    }

    /// Matching executions, newest first
    pub async fn collect(&self) -> Result<Vec<Execution>> {
        let store = open_file_store(&self.store).await?;
        let mut executions = match self.status {
            Some(filter) => store.list_by_status(filter.into()).await?,
            None => store.list().await?,
        };
        if let Some(plan) = &self.plan {
            executions.retain(|e| &e.plan_id == plan);
        }
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(executions)
    }
}
