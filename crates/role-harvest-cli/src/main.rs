mod commands;
mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "role-harvest")]
#[command(about = "Harvest IAM role definitions into a queryable table")]
struct Cli {
    /// Destination dataset [env: DATASET_NAME] [default: iam_roles]
    #[arg(long, global = true)]
    dataset: Option<String>,
    /// Destination table [env: TABLE_NAME] [default: roles]
    #[arg(long, global = true)]
    table: Option<String>,
    /// Directory holding one database file per dataset
    #[arg(long, global = true)]
    warehouse_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one harvest pass (the default)
    Sync {
        /// Harvest custom roles of a resource, e.g. organizations/123
        #[arg(long)]
        parent: Option<String>,
        /// Include soft-deleted roles in the listing
        #[arg(long)]
        show_deleted: bool,
        /// Maximum concurrent role lookups
        #[arg(long)]
        concurrency: Option<usize>,
        /// Fail the pass if it runs longer than this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,
    },
    /// Show when the destination was last harvested
    Status,
    /// Show one stored role
    Show {
        /// Full role name, e.g. roles/viewer
        name: String,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn iam_token() -> Option<String> {
    std::env::var("IAM_ACCESS_TOKEN").ok()
}

fn build_config(cli: &Cli) -> AppConfig {
    let mut config = config::load_config();

    if let Some(dataset) = &cli.dataset {
        config.dataset = dataset.clone();
    }
    if let Some(table) = &cli.table {
        config.table = table.clone();
    }
    if let Some(dir) = &cli.warehouse_dir {
        config.warehouse_dir = Some(dir.clone());
    }

    config
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = build_config(&cli);

    match cli.command.unwrap_or(Command::Sync {
        parent: None,
        show_deleted: false,
        concurrency: None,
        deadline_secs: None,
    }) {
        Command::Sync {
            parent,
            show_deleted,
            concurrency,
            deadline_secs,
        } => {
            if parent.is_some() {
                config.parent = parent;
            }
            config.show_deleted |= show_deleted;
            if let Some(concurrency) = concurrency {
                config.concurrency = concurrency;
            }
            if deadline_secs.is_some() {
                config.pass_deadline_secs = deadline_secs;
            }
            commands::sync::run(&config, iam_token()).await
        }
        Command::Status => commands::status::run(&config),
        Command::Show { name } => commands::show::run(&config, &name),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_sync() {
        let cli = Cli::try_parse_from(["role-harvest"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn destination_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "role-harvest",
            "sync",
            "--dataset",
            "audit",
            "--table",
            "gcp_roles",
            "--concurrency",
            "4",
        ])
        .unwrap();

        assert_eq!(cli.dataset.as_deref(), Some("audit"));
        assert_eq!(cli.table.as_deref(), Some("gcp_roles"));
        assert!(matches!(
            cli.command,
            Some(Command::Sync {
                concurrency: Some(4),
                ..
            })
        ));
    }

    #[test]
    fn show_requires_a_name() {
        assert!(Cli::try_parse_from(["role-harvest", "show"]).is_err());
    }
}
