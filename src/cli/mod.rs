//! CLI module for Seoflow
//!
//! One command per workflow step, plus:
//! - `sweep` / `maintain`: idle session expiry
//! - `demo`: the whole workflow with concurrent keyword requests
//! - `doctor`: backend health checks

use crate::app::{init_runtime, load_config};
use anyhow::Context;
use clap::{Parser, Subcommand};
use seoflow_core::{format_failure_for_cli, BusinessInfo, Failure, KeywordKind, Operation};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

pub mod demo;
pub mod doctor;

/// Seoflow CLI
#[derive(Parser, Debug)]
#[command(name = "seoflow")]
#[command(about = "SEO keyword research session engine")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a new session and print its id
    Start,
    /// Submit the business info form (JSON file) for a session
    Submit {
        session: String,
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Summarize product pages and render the client brief
    Process { session: String },
    /// Generate a keyword table (bofu, mofu or tofu)
    Keywords {
        session: String,
        #[arg(short, long, default_value = "bofu")]
        kind: KeywordKind,
        /// Give up after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Show a session's client context
    Context {
        session: String,
        /// Print only the markdown brief
        #[arg(long)]
        brief: bool,
    },
    /// Print a keyword table stored in a session
    Table { session: String, table_id: String },
    /// Expire idle sessions once
    Sweep,
    /// Expire idle sessions periodically until interrupted
    Maintain,
    /// Run the whole workflow with concurrent keyword requests
    Demo {
        #[arg(long, default_value_t = 8)]
        concurrency: usize,
    },
    /// Check the configured backends
    Doctor,
}

fn failure(f: Failure) -> anyhow::Error {
    anyhow::anyhow!(format_failure_for_cli(&f).trim_end().to_string())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let Some(command) = cli.command else {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        cmd.print_help()?;
        println!();
        return Ok(());
    };

    let config = load_config()?;
    if matches!(command, Commands::Doctor) {
        return doctor::run(&config).await;
    }

    let runtime = init_runtime(&config).await?;
    let orchestrator = &runtime.orchestrator;

    let result = match command {
        Commands::Start => {
            let session = orchestrator.start_session().await.map_err(failure)?;
            println!("{}", session);
            Ok(())
        }
        Commands::Submit { session, file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let info: BusinessInfo =
                serde_json::from_str(&raw).context("Invalid business info JSON")?;
            let ack = orchestrator
                .submit_business_info(&session, info)
                .await
                .map_err(failure)?;
            print_json(&ack)
        }
        Commands::Process { session } => {
            let summary = orchestrator
                .process_business_info(&session)
                .await
                .map_err(failure)?;
            print_json(&summary)
        }
        Commands::Keywords {
            session,
            kind,
            timeout_secs,
        } => {
            let output = orchestrator
                .execute(
                    &session,
                    Operation::GenerateKeywords { kind },
                    timeout_secs.map(Duration::from_secs),
                )
                .await
                .map_err(failure)?;
            print_json(&output)
        }
        Commands::Context { session, brief } => {
            let summary = orchestrator
                .get_client_context(&session)
                .await
                .map_err(failure)?;
            if brief {
                println!("{}", summary.client_context.as_deref().unwrap_or_default());
                Ok(())
            } else {
                print_json(&summary)
            }
        }
        Commands::Table { session, table_id } => {
            let table = orchestrator
                .keyword_table(&session, &table_id)
                .await
                .map_err(failure)?;
            print_json(&table)
        }
        Commands::Sweep => {
            let report = runtime.sweeper.sweep_once().await?;
            print_json(&report)
        }
        Commands::Maintain => {
            tokio::select! {
                _ = runtime.sweeper.run(runtime.shutdown.child_token()) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, stopping maintenance");
                }
            }
            Ok(())
        }
        Commands::Demo { concurrency } => demo::run(orchestrator, concurrency).await,
        Commands::Doctor => Ok(()),
    };

    runtime.shutdown();
    result
}
