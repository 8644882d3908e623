//! Subcommand implementations

mod capacity;
mod drill;
mod list;
mod status;
mod validate;

pub use capacity::CapacityArgs;
pub use drill::DrillArgs;
pub use list::ListArgs;
pub use status::StatusArgs;
pub use validate::ValidateArgs;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use stratoswarm_failover_orchestrator::{
    AccountContext, ExecutionStore, FileExecutionStore, OrchestratorConfig, PlanDocument,
    SimulatedReplicationService,
};

use crate::cli::OutputFormat;

/// Settings shared by every subcommand
pub struct CommandContext {
    pub config: OrchestratorConfig,
    pub format: OutputFormat,
}

impl CommandContext {
    pub fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// Target account and region of an execution
#[derive(Args, Clone, Debug)]
pub struct TargetArgs {
    /// Target account id
    #[arg(long, default_value = "000000000000")]
    pub account: String,

    /// Target region
    #[arg(long, default_value = "us-east-1")]
    pub region: String,
}

impl TargetArgs {
    pub fn context(&self) -> AccountContext {
        AccountContext::new(self.account.clone(), self.region.clone())
    }
}

pub fn load_document(path: &Path) -> Result<PlanDocument> {
    PlanDocument::load(path).with_context(|| format!("reading plan document {}", path.display()))
}

/// Simulated service whose inventory holds every server the document references
pub fn seeded_service(document: &PlanDocument, account: &AccountContext) -> Arc<SimulatedReplicationService> {
    let service = SimulatedReplicationService::new();
    for group in &document.groups {
        let servers: Vec<&str> = group.server_ids.iter().map(String::as_str).collect();
        service.add_healthy_servers(account, &servers);
    }
    Arc::new(service)
}

pub async fn open_file_store(path: &Path) -> Result<Arc<dyn ExecutionStore>> {
    let store = FileExecutionStore::open(path)
        .await
        .with_context(|| format!("opening execution store at {}", path.display()))?;
    Ok(Arc::new(store))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::{CommandContext, DrillArgs, OutputFormat, TargetArgs};
    use stratoswarm_failover_orchestrator::{
        OrchestratorConfig, PlanDocument, ProtectionGroup, RecoveryPlan, WaveSpec,
    };

    /// Two waves, the second paused and depending on the first
    pub fn document() -> PlanDocument {
        PlanDocument {
            plan: RecoveryPlan {
                id: "plan-cli".to_string(),
                name: "CLI drill".to_string(),
                waves: vec![
                    WaveSpec {
                        wave_number: 0,
                        name: Some("databases".to_string()),
                        group_ids: vec!["pg-db".to_string()],
                        depends_on: vec![],
                        pause_before: false,
                        timeout_secs: None,
                    },
                    WaveSpec {
                        wave_number: 1,
                        name: Some("applications".to_string()),
                        group_ids: vec!["pg-app".to_string()],
                        depends_on: vec![0],
                        pause_before: true,
                        timeout_secs: None,
                    },
                ],
            },
            groups: vec![
                ProtectionGroup {
                    id: "pg-db".to_string(),
                    name: "databases".to_string(),
                    region: "us-east-1".to_string(),
                    server_ids: ["db-1", "db-2"].iter().map(|s| s.to_string()).collect(),
                },
                ProtectionGroup {
                    id: "pg-app".to_string(),
                    name: "applications".to_string(),
                    region: "us-east-1".to_string(),
                    server_ids: ["app-1"].iter().map(|s| s.to_string()).collect(),
                },
            ],
        }
    }

    pub fn write_document(dir: &std::path::Path) -> std::path::PathBuf {
        let path = dir.join("plan.json");
        std::fs::write(&path, serde_json::to_string(&document()).unwrap()).unwrap();
        path
    }

    /// Default configuration with a short synchronous poll interval
    pub fn context() -> CommandContext {
        let mut config = OrchestratorConfig::default();
        config.scheduler.sync_poll_interval_ms = 5;
        CommandContext {
            config,
            format: OutputFormat::Table,
        }
    }

    pub fn target() -> TargetArgs {
        TargetArgs {
            account: "000000000000".to_string(),
            region: "us-east-1".to_string(),
        }
    }

    pub fn drill(plan: std::path::PathBuf) -> DrillArgs {
        DrillArgs {
            plan,
            target: target(),
            auto_resume: false,
            store: None,
            fail_servers: Vec::new(),
            cleanup: false,
            idempotency_key: None,
            initiated_by: "test".to_string(),
        }
    }
}
