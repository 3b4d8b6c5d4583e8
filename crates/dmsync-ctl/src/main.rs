// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! dmsync Control CLI
//!
//! Operator tool driving migration units defined in a JSON configuration
//! document.
//!
//! Usage:
//!   dmsync-ctl [--config <path>] [--verbose] <command> [options]
//!
//! Commands:
//!   sync <unit>... | --all        Provision and wait for the target phase
//!   progress <unit>               Percentage of data on the destination
//!   cleanup <unit>                Tear down job, source profile, instance
//!   promote <unit>                Cut over to the destination
//!   status <unit>                 Show the migration job
//!   list-units                    List configured units
//!   list-projects                 List visible cloud projects
//!   create-user <unit> <name> [--password <pw>]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use dmsync_core::{
    ConfigStore, JsonFileStore, MigrationOrchestrator, PostgresProbe, PostgresProgressEstimator,
    RestClient, SyncOutcome,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const DEFAULT_CONFIG: &str = "units.json";

fn print_usage() {
    eprintln!(
        r#"Usage: dmsync-ctl [--config <path>] [--verbose] <command> [options]

Drive continuous PostgreSQL migrations to Cloud SQL.

COMMANDS:
    sync <unit>...                  Provision and wait until the target phase
    sync --all                      Sync every configured unit concurrently
    progress <unit>                 Percentage of source data on the destination
    cleanup <unit>                  Delete the job, source profile and instance
    promote <unit>                  Promote the destination to primary
    status <unit>                   Show the migration job
    list-units                      List configured units
    list-projects                   List visible cloud projects
    create-user <unit> <username>   Create a user on the destination instance

GLOBAL OPTIONS:
    --config <path>                 Unit configuration (default: $DMSYNC_CONFIG or units.json)
    --verbose, -v                   Debug logging

CREATE-USER OPTIONS:
    --password <pw>                 Use this password instead of generating one

ENVIRONMENT:
    DMSYNC_ACCESS_TOKEN             OAuth bearer token (required for remote commands)
    DMSYNC_DMS_ENDPOINT             Database Migration API base URL
    DMSYNC_SQLADMIN_ENDPOINT        Cloud SQL Admin API base URL
    DMSYNC_RESOURCE_MANAGER_ENDPOINT Resource Manager API base URL
    DMSYNC_REQUEST_TIMEOUT_MS       Request timeout (default: 30000)
    RUST_LOG                        Log filter (default: dmsync=info)

EXAMPLES:
    # Sync one unit and wait for CDC
    dmsync-ctl --config prod.json sync orders

    # Check how far the initial dump has got
    dmsync-ctl progress orders
"#
    );
}

#[derive(Debug, PartialEq)]
enum Command {
    Sync { units: Vec<String>, all: bool },
    Progress { unit: String },
    Cleanup { unit: String },
    Promote { unit: String },
    Status { unit: String },
    ListUnits,
    ListProjects,
    CreateUser {
        unit: String,
        username: String,
        password: Option<String>,
    },
}

#[derive(Debug)]
struct Cli {
    config: PathBuf,
    verbose: bool,
    command: Command,
}

fn parse_args() -> Result<Cli, String> {
    let args: Vec<String> = std::env::args().collect();
    let default_config =
        std::env::var("DMSYNC_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
    parse_args_from_vec(&args, &default_config)
}

fn parse_args_from_vec(args: &[String], default_config: &str) -> Result<Cli, String> {
    let mut config = PathBuf::from(default_config);
    let mut verbose = false;
    let mut rest: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config = PathBuf::from(args.get(i).ok_or("--config requires a path")?);
            }
            "--verbose" | "-v" => verbose = true,
            other => rest.push(other.to_string()),
        }
        i += 1;
    }

    let command = match rest.first().map(String::as_str) {
        None => return Err("No command specified".to_string()),
        Some("help" | "--help" | "-h") => {
            print_usage();
            std::process::exit(0);
        }
        Some("sync") => {
            let all = rest[1..].iter().any(|a| a == "--all");
            let units: Vec<String> = rest[1..]
                .iter()
                .filter(|a| a.as_str() != "--all")
                .cloned()
                .collect();
            if let Some(flag) = units.iter().find(|u| u.starts_with("--")) {
                return Err(format!("Unknown argument: {}", flag));
            }
            if all == !units.is_empty() {
                return Err("sync needs unit names or --all".to_string());
            }
            Command::Sync { units, all }
        }
        Some("progress") => Command::Progress {
            unit: rest.get(1).ok_or("Unit name required")?.clone(),
        },
        Some("cleanup") => Command::Cleanup {
            unit: rest.get(1).ok_or("Unit name required")?.clone(),
        },
        Some("promote") => Command::Promote {
            unit: rest.get(1).ok_or("Unit name required")?.clone(),
        },
        Some("status") => Command::Status {
            unit: rest.get(1).ok_or("Unit name required")?.clone(),
        },
        Some("list-units") => Command::ListUnits,
        Some("list-projects") => Command::ListProjects,
        Some("create-user") => {
            let unit = rest.get(1).ok_or("Unit name required")?.clone();
            let username = rest.get(2).ok_or("Username required")?.clone();
            let mut password: Option<String> = None;

            let mut i = 3;
            while i < rest.len() {
                match rest[i].as_str() {
                    "--password" => {
                        i += 1;
                        password = Some(rest.get(i).ok_or("--password requires a value")?.clone());
                    }
                    arg => return Err(format!("Unknown argument: {}", arg)),
                }
                i += 1;
            }

            Command::CreateUser {
                unit,
                username,
                password,
            }
        }
        Some(other) => return Err(format!("Unknown command: {}", other)),
    };

    Ok(Cli {
        config,
        verbose,
        command,
    })
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "dmsync=debug" } else { "dmsync=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .init();
}

fn build_orchestrator(store: Arc<JsonFileStore>) -> anyhow::Result<MigrationOrchestrator> {
    let client = RestClient::from_env().context("failed to configure remote client")?;
    let orchestrator = MigrationOrchestrator::builder()
        .client(Arc::new(client))
        .store(store)
        .probe(Arc::new(PostgresProbe::default()))
        .progress(Arc::new(PostgresProgressEstimator::default()))
        .build()?;
    Ok(orchestrator)
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            token.cancel();
        }
    });
}

async fn sync_units(
    orchestrator: Arc<MigrationOrchestrator>,
    units: Vec<String>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut tasks = JoinSet::new();
    for unit in units {
        let orchestrator = orchestrator.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let outcome = orchestrator.sync(&unit, &cancel).await;
            (unit, outcome)
        });
    }

    let mut failed = 0usize;
    while let Some(joined) = tasks.join_next().await {
        let (unit, outcome) = joined.context("sync task panicked")?;
        match outcome {
            Ok(SyncOutcome::Synced { state, phase }) => {
                println!("{}: {} ({})", unit, phase, state);
            }
            Ok(SyncOutcome::SourceUnreachable) => {
                println!("{}: source unreachable, skipped", unit);
                failed += 1;
            }
            Err(e) => {
                error!(unit = %unit, error = %e, "Sync failed");
                println!("{}: failed: {}", unit, e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} unit(s) did not sync", failed);
    }
    Ok(())
}

async fn list_units(store: &JsonFileStore) -> anyhow::Result<()> {
    for (name, unit) in store.load_all().await? {
        println!("{}\t{}/{}", name, unit.project_id, unit.region);
    }
    Ok(())
}

/// Orchestrator plus a token that Ctrl-C cancels.
fn connect(
    store: &Arc<JsonFileStore>,
) -> anyhow::Result<(Arc<MigrationOrchestrator>, CancellationToken)> {
    let orchestrator = Arc::new(build_orchestrator(store.clone())?);
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());
    Ok((orchestrator, cancel))
}

async fn execute_command(cli: Cli) -> anyhow::Result<()> {
    let store = Arc::new(JsonFileStore::new(&cli.config));

    match cli.command {
        // Local only, no credentials needed.
        Command::ListUnits => list_units(&store).await?,

        Command::Sync { units, all } => {
            let (orchestrator, cancel) = connect(&store)?;
            let units = if all {
                store.load_all().await?.into_keys().collect()
            } else {
                units
            };
            info!(count = units.len(), stamp = orchestrator.stamp(), "Syncing units");
            sync_units(orchestrator, units, cancel).await?;
        }

        Command::Progress { unit } => {
            let (orchestrator, _) = connect(&store)?;
            let progress = orchestrator.get_progress(&unit).await?;
            println!("{:.2}", progress);
        }

        Command::Cleanup { unit } => {
            let (orchestrator, cancel) = connect(&store)?;
            let report = orchestrator.cleanup(&unit, &cancel).await?;
            if !report.job_found {
                println!("{}: no migration job, nothing to clean up", unit);
            }
            for step in &report.steps {
                match &step.error {
                    None => println!("deleted {:?} {}", step.target, step.resource),
                    Some(e) => println!("failed  {:?} {}: {}", step.target, step.resource, e),
                }
            }
        }

        Command::Promote { unit } => {
            let (orchestrator, _) = connect(&store)?;
            orchestrator.promote(&unit).await?;
            println!("{}: promotion requested", unit);
        }

        Command::Status { unit } => {
            let (orchestrator, _) = connect(&store)?;
            match orchestrator.status(&unit).await? {
                Some(job) => println!("{}", serde_json::to_string_pretty(&job)?),
                None => bail!("no migration job for {}", unit),
            }
        }

        Command::ListProjects => {
            let (orchestrator, _) = connect(&store)?;
            let projects = orchestrator.list_projects().await?;
            println!("{}", serde_json::to_string_pretty(projects)?);
        }

        Command::CreateUser {
            unit,
            username,
            password,
        } => {
            let (orchestrator, _) = connect(&store)?;
            let generated = password.is_none();
            let password = orchestrator
                .create_database_user(&unit, &username, password)
                .await?;
            if generated {
                println!("{}", password);
            } else {
                println!("{}: user {} created", unit, username);
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let dotenv = dotenvy::dotenv();

    let cli = match parse_args() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    init_tracing(cli.verbose);
    if let Err(e) = dotenv {
        tracing::debug!("No .env file loaded: {}", e);
    }

    match execute_command(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(a: &[&str]) -> Vec<String> {
        a.iter().map(|s| s.to_string()).collect()
    }

    fn parse(a: &[&str]) -> Result<Cli, String> {
        parse_args_from_vec(&args(a), DEFAULT_CONFIG)
    }

    #[test]
    fn test_parse_sync_units() {
        let cli = parse(&["dmsync-ctl", "sync", "orders", "billing"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Sync {
                units: vec!["orders".to_string(), "billing".to_string()],
                all: false
            }
        );
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG));
        assert!(!cli.verbose);
    }

    #[test]
    fn test_parse_sync_all_with_global_flags() {
        let cli = parse(&["dmsync-ctl", "--config", "prod.json", "sync", "--all", "-v"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Sync {
                units: vec![],
                all: true
            }
        );
        assert_eq!(cli.config, PathBuf::from("prod.json"));
        assert!(cli.verbose);
    }

    #[test]
    fn test_parse_sync_requires_target() {
        assert!(parse(&["dmsync-ctl", "sync"]).is_err());
        assert!(parse(&["dmsync-ctl", "sync", "--all", "orders"]).is_err());
    }

    #[test]
    fn test_parse_create_user() {
        let cli = parse(&[
            "dmsync-ctl",
            "create-user",
            "orders",
            "app",
            "--password",
            "s3cret",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::CreateUser {
                unit: "orders".to_string(),
                username: "app".to_string(),
                password: Some("s3cret".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_single_unit_commands() {
        assert_eq!(
            parse(&["dmsync-ctl", "progress", "orders"]).unwrap().command,
            Command::Progress {
                unit: "orders".to_string()
            }
        );
        assert_eq!(
            parse(&["dmsync-ctl", "cleanup", "orders"]).unwrap().command,
            Command::Cleanup {
                unit: "orders".to_string()
            }
        );
        assert!(parse(&["dmsync-ctl", "status"]).is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse(&["dmsync-ctl"]).is_err());
        assert!(parse(&["dmsync-ctl", "frobnicate"]).is_err());
        assert!(parse(&["dmsync-ctl", "--config"]).is_err());
    }
}
