//! Drill command
//!
//! Runs a plan document end-to-end against the simulated replication
//! service, synchronously, wave by wave.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use stratoswarm_failover_orchestrator::{
    DriveMode, Execution, ExecutionKind, ExecutionRequest, ExecutionStatus, ExecutionStore,
    FailoverOrchestrator, InMemoryExecutionStore, InMemoryPlanSource, TracingSink,
};
use uuid::Uuid;

use super::{load_document, open_file_store, seeded_service, CommandContext, TargetArgs};
use crate::cli::OutputFormat;
use crate::render;

#[derive(Args, Debug)]
pub struct DrillArgs {
    /// Plan document (JSON) with the plan and its protection groups
    pub plan: PathBuf,

    #[command(flatten)]
    pub target: TargetArgs,

    /// Resume automatically at every pause gate
    #[arg(long)]
    pub auto_resume: bool,

    /// Persist executions under this directory instead of in memory
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Make a server fail to launch (repeatable)
    #[arg(long = "fail-server")]
    pub fail_servers: Vec<String>,

    /// Terminate recovered instances once the drill finishes
    #[arg(long)]
    pub cleanup: bool,

    /// Idempotency key for the start request
    #[arg(long)]
    pub idempotency_key: Option<String>,

    /// Recorded as the initiator of the execution
    #[arg(long, default_value = "failoverctl")]
    pub initiated_by: String,
}

impl DrillArgs {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let execution = self.run(ctx).await?;
        match ctx.format {
            OutputFormat::Json => ctx.print_json(&execution)?,
            OutputFormat::Table => render::execution(&execution),
        }
        match execution.status {
            ExecutionStatus::Completed | ExecutionStatus::Paused => Ok(()),
            status => bail!(
                "drill finished {status}: {}",
                execution.failure_cause.as_deref().unwrap_or("no cause recorded")
            ),
        }
    }

    /// Drive the drill and return the last stored record
    pub async fn run(&self, ctx: &CommandContext) -> Result<Execution> {
        let document = load_document(&self.plan)?;
        let account = self.target.context();
        let service = seeded_service(&document, &account);
        for server in &self.fail_servers {
            service.fail_launch_for(server);
        }

        let store: Arc<dyn ExecutionStore> = match &self.store {
            Some(path) => open_file_store(path).await?,
            None => Arc::new(InMemoryExecutionStore::new()),
        };
        let plan_id = document.plan.id.clone();
        let plans = Arc::new(InMemoryPlanSource::from_document(document));
        let orchestrator = FailoverOrchestrator::new(
            ctx.config.clone(),
            plans,
            service,
            store,
            Arc::new(TracingSink),
        );

        // a key is always set so that a failed start can still find its record
        let key = self
            .idempotency_key
            .clone()
            .unwrap_or_else(|| format!("drill-{}", Uuid::new_v4()));
        let request = ExecutionRequest::new(plan_id, ExecutionKind::Drill, account)
            .initiated_by(self.initiated_by.clone())
            .idempotency_key(key.clone());

        let mut execution = match orchestrator.start_execution_in(request, DriveMode::Synchronous).await {
            Ok(id) => orchestrator.get_execution(id).await?,
            Err(error) => match orchestrator.store().find_by_idempotency_key(&key).await? {
                Some(recorded) => recorded,
                None => return Err(error).context("drill could not start"),
            },
        };

        while execution.status == ExecutionStatus::Paused && self.auto_resume {
            let id = execution.id;
            let Some(pause) = execution.pause_token.clone() else {
                bail!("execution {id} is paused without a pause token");
            };
            eprintln!("resuming before wave {}", pause.wave_number);
            execution = match orchestrator
                .resume_in(id, &pause.token, DriveMode::Synchronous)
                .await
            {
                Ok(resumed) => resumed,
                Err(error) => {
                    let current = orchestrator.get_execution(id).await?;
                    if !current.is_terminal() {
                        return Err(error).with_context(|| format!("resuming execution {id}"));
                    }
                    current
                }
            };
        }

        if execution.status == ExecutionStatus::Paused {
            if let Some(pause) = &execution.pause_token {
                eprintln!(
                    "paused before wave {}; resume token {}",
                    pause.wave_number, pause.token
                );
            }
        }

        if self.cleanup && execution.is_terminal() {
            if let Some(job_id) = orchestrator
                .terminate_recovery_instances(execution.id)
                .await
                .context("terminating drill instances")?
            {
                eprintln!("terminating recovered instances in job {job_id}");
            }
        }
        Ok(execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures::{context as ctx, drill as args, write_document};
    use stratoswarm_failover_orchestrator::WaveState;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_drill_stops_at_pause_gate() {
        let dir = TempDir::new().unwrap();
        let execution = args(write_document(dir.path())).run(&ctx()).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Paused);
        assert_eq!(execution.pause_token.unwrap().wave_number, 1);
    }

    #[tokio::test]
    async fn test_drill_auto_resumes_to_completion() {
        let dir = TempDir::new().unwrap();
        let mut drill = args(write_document(dir.path()));
        drill.auto_resume = true;
        drill.cleanup = true;
        let execution = drill.run(&ctx()).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution.waves.iter().all(|w| w.state == WaveState::Completed));
    }

    #[tokio::test]
    async fn test_drill_persists_to_file_store() {
        let dir = TempDir::new().unwrap();
        let store_dir = dir.path().join("executions");
        let mut drill = args(write_document(dir.path()));
        drill.store = Some(store_dir.clone());
        let execution = drill.run(&ctx()).await.unwrap();

        let reopened = open_file_store(&store_dir).await.unwrap();
        let stored = reopened.get(execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Paused);
        assert_eq!(stored.pause_token, execution.pause_token);
    }

    #[tokio::test]
    async fn test_failed_server_is_reported_through_the_record() {
        let dir = TempDir::new().unwrap();
        let mut drill = args(write_document(dir.path()));
        drill.fail_servers = vec!["db-2".to_string()];
        let execution = drill.run(&ctx()).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.waves[0].failed_servers(), vec!["db-2".to_string()]);
    }
}
