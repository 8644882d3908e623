//! Validate command

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Args;
use stratoswarm_failover_orchestrator::{
    FailoverOrchestrator, InMemoryExecutionStore, InMemoryPlanSource, NullSink, ReplicationState,
    Violation,
};

use super::{load_document, seeded_service, CommandContext, TargetArgs};
use crate::cli::OutputFormat;
use crate::render;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Plan document (JSON) with the plan and its protection groups
    pub plan: PathBuf,

    #[command(flatten)]
    pub target: TargetArgs,

    /// Treat a server as stalled in replication (repeatable)
    #[arg(long = "stalled-server")]
    pub stalled_servers: Vec<String>,
}

impl ValidateArgs {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let violations = self.check(ctx).await?;
        match ctx.format {
            OutputFormat::Json => ctx.print_json(&violations)?,
            OutputFormat::Table => render::violations(&violations),
        }
        if !violations.is_empty() {
            bail!("plan has {} violation(s)", violations.len());
        }
        Ok(())
    }

    pub async fn check(&self, ctx: &CommandContext) -> Result<Vec<Violation>> {
        let document = load_document(&self.plan)?;
        let account = self.target.context();
        let service = seeded_service(&document, &account);
        for server in &self.stalled_servers {
            service.set_replication_state(&account, server, ReplicationState::Stalled);
        }

        let plan_id = document.plan.id.clone();
        let orchestrator = FailoverOrchestrator::new(
            ctx.config.clone(),
            Arc::new(InMemoryPlanSource::from_document(document)),
            service,
            Arc::new(InMemoryExecutionStore::new()),
            Arc::new(NullSink),
        );
        Ok(orchestrator.validate_plan(&plan_id, &account).await?)
    }
}
