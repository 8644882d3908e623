//! failoverctl command structure

use clap::{Parser, Subcommand};

use crate::commands::{CapacityArgs, DrillArgs, ListArgs, StatusArgs, ValidateArgs};

/// failoverctl - multi-wave disaster recovery failover
#[derive(Parser)]
#[command(name = "failoverctl")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format
    #[arg(short, long, default_value = "table", global = true)]
    pub format: OutputFormat,

    /// Configuration file path (.toml or .json)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a plan document against quotas and the replication inventory
    Validate(ValidateArgs),

    /// Run a plan end-to-end against the simulated replication service
    Drill(DrillArgs),

    /// Show one execution
    Status(StatusArgs),

    /// List executions
    List(ListArgs),

    /// Capacity across accounts and regions
    Capacity(CapacityArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_drill_flags_parse() {
        let cli = Cli::try_parse_from([
            "failoverctl",
            "-vv",
            "drill",
            "plan.json",
            "--auto-resume",
            "--store",
            "/tmp/executions",
            "--fail-server",
            "s-1",
            "--fail-server",
            "s-2",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Drill(args) => {
                assert!(args.auto_resume);
                assert_eq!(args.fail_servers, vec!["s-1".to_string(), "s-2".to_string()]);
                assert!(args.store.is_some());
            }
            _ => panic!("expected drill"),
        }
    }

    #[test]
    fn test_status_requires_store() {
        let result = Cli::try_parse_from([
            "failoverctl",
            "status",
            "6f1c2a58-51e4-4b53-a0f6-0d1e75d0c3d2",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_format_is_global() {
        let cli = Cli::try_parse_from(["failoverctl", "list", "--store", "/tmp/x", "--format", "json"])
            .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
    }
}
