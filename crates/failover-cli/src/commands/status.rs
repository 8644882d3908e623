//! Status command

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use stratoswarm_failover_orchestrator::Execution;
use uuid::Uuid;

use super::{open_file_store, CommandContext};
use crate::cli::OutputFormat;
use crate::render;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Execution id
    pub id: Uuid,

    /// Execution store directory
    #[arg(long)]
    pub store: PathBuf,

    /// Also print the execution history
    #[arg(long)]
    pub history: bool,
}

impl StatusArgs {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let execution = self.fetch().await?;
        match ctx.format {
            OutputFormat::Json => ctx.print_json(&execution)?,
            OutputFormat::Table => {
                render::execution(&execution);
                if self.history {
                    render::history(&execution);
                }
            }
        }
        Ok(())
    }

    pub async fn fetch(&self) -> Result<Execution> {
        let store = open_file_store(&self.store).await?;
        match store.get(self.id).await? {
            Some(execution) => Ok(execution),
            None => bail!("execution {} not found in {}", self.id, self.store.display()),
        }
    }
}
