//! Capacity command

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Args;
use stratoswarm_failover_orchestrator::{
    AccountContext, CapacityReport, FailoverOrchestrator, InMemoryExecutionStore,
    InMemoryPlanSource, NullSink, SimulatedReplicationService,
};

use super::CommandContext;
use crate::cli::OutputFormat;
use crate::render;

fn parse_target(value: &str) -> Result<AccountContext, String> {
    match value.split_once('/') {
        Some((account, region)) if !account.is_empty() && !region.is_empty() => {
            Ok(AccountContext::new(account, region))
        }
        _ => Err(format!("expected ACCOUNT/REGION, got '{value}'")),
    }
}

#[derive(Args, Debug)]
pub struct CapacityArgs {
    /// Account and region to query as ACCOUNT/REGION (repeatable); defaults to configured accounts
    #[arg(long = "target", value_parser = parse_target)]
    pub targets: Vec<AccountContext>,

    /// Healthy source servers to seed per region in the simulated service
    #[arg(long, default_value_t = 0)]
    pub servers: usize,
}

impl CapacityArgs {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let report = self.report(ctx).await?;
        match ctx.format {
            OutputFormat::Json => ctx.print_json(&report)?,
            OutputFormat::Table => render::capacity(&report),
        }
        Ok(())
    }

    pub async fn report(&self, ctx: &CommandContext) -> Result<CapacityReport> {
        let targets = if self.targets.is_empty() {
            ctx.config.accounts.clone()
        } else {
            self.targets.clone()
        };
        if targets.is_empty() {
            bail!("no accounts to query: pass --target or list accounts in the configuration");
        }

        let service = SimulatedReplicationService::new();
        let names: Vec<String> = (1..=self.servers).map(|n| format!("source-{n}")).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        for target in &targets {
            service.add_healthy_servers(target, &names);
        }

        let orchestrator = FailoverOrchestrator::new(
            ctx.config.clone(),
            Arc::new(InMemoryPlanSource::new()),
            Arc::new(service),
            Arc::new(InMemoryExecutionStore::new()),
            Arc::new(NullSink),
        );
        Ok(orchestrator.aggregate_capacity(&targets).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures::context;
    use stratoswarm_failover_orchestrator::CapacityStatus;

    #[test]
    fn test_parse_target() {
        let target = parse_target("111122223333/eu-west-1").unwrap();
        assert_eq!(target.account_id, "111122223333");
        assert_eq!(target.region, "eu-west-1");
        assert!(parse_target("111122223333").is_err());
        assert!(parse_target("/eu-west-1").is_err());
    }

    #[tokio::test]
    async fn test_report_covers_every_target() {
        let mut ctx = context();
        ctx.config.quotas.max_replicating_servers = 10;
        let args = CapacityArgs {
            targets: vec![
                AccountContext::new("111", "us-east-1"),
                AccountContext::new("222", "us-west-2"),
            ],
            servers: 9,
        };
        let report = args.report(&ctx).await.unwrap();
        assert_eq!(report.per_account.len(), 2);
        assert!(report.failed.is_empty());
        assert_eq!(report.per_account["111/us-east-1"].snapshot.replicating_servers, 9);
        assert_eq!(report.overall, Some(CapacityStatus::Warning));
    }

    #[tokio::test]
    async fn test_configured_accounts_are_the_default() {
        let mut ctx = context();
        ctx.config.accounts = vec![AccountContext::new("333", "ap-south-1")];
        let args = CapacityArgs {
            targets: Vec::new(),
            servers: 0,
        };
        let report = args.report(&ctx).await.unwrap();
        assert!(report.per_account.contains_key("333/ap-south-1"));
        assert_eq!(report.overall, Some(CapacityStatus::Ok));
    }

    #[tokio::test]
    async fn test_no_targets_is_an_error() {
        let args = CapacityArgs {
            targets: Vec::new(),
            servers: 0,
        };
        assert!(args.report(&context()).await.is_err());
    }
}
