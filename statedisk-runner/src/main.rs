//! Statedisk Runner
//!
//! Orchestrates expensive, stateful CI test disks:
//! - Configuration: one immutable value loaded from the environment
//! - Provider clients: gcloud compute and GCS blob storage
//! - Stages: provision, discover, stream, snapshot, hand off, reclaim
//!
//! The `regenerate` subcommand rebuilds the cached state snapshot when the
//! change decision calls for it and publishes its identity; `consume` boots
//! a later, independent run from a published snapshot. Both always finish
//! with teardown already attempted.

mod config;
mod discovery;
mod handoff;
mod provision;
mod snapshot;
mod stages;
mod stream;
mod teardown;

#[cfg(test)]
mod testutil;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use statedisk_core::domain::run::{CommitId, Network, PipelineRun, RefSlug, RunId};
use statedisk_core::error::RunError;
use statedisk_gcloud::{GcloudCompute, GcsBlobStore};

use crate::config::Config;
use crate::stages::{RegenerateOutcome, RunReport};

/// Exit code for failures worth retrying at the pipeline level
const EXIT_RECOVERABLE: u8 = 2;

#[derive(Parser)]
#[command(name = "statedisk")]
#[command(about = "Stateful snapshot orchestrator for CI test disks", long_about = None)]
struct Cli {
    /// Pipeline run id; generated when not supplied by the CI system
    #[arg(long, env = "STATEDISK_RUN_ID", global = true)]
    run_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Regenerate the cached state snapshot and publish its identity
    Regenerate {
        /// Git ref the run is for
        #[arg(long)]
        ref_name: String,

        /// Full commit id being built
        #[arg(long)]
        commit: String,

        /// Network to sync (mainnet or testnet)
        #[arg(long)]
        network: String,

        /// Regenerate even when no watched path changed
        #[arg(long)]
        force: bool,

        /// Changed path, repeatable; supplied by the change detector
        #[arg(long = "changed")]
        changed_paths: Vec<String>,
    },

    /// Run the test stage from a previously published snapshot
    Consume {
        /// Git ref the run is for
        #[arg(long)]
        ref_name: String,

        /// Full commit id being tested
        #[arg(long)]
        commit: String,

        /// Network to run against (mainnet or testnet)
        #[arg(long)]
        network: String,

        /// Boot from this commit's snapshot instead of resolving the handoff
        #[arg(long)]
        use_commit: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "statedisk=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let run_id = cli
        .run_id
        .map(RunId::new)
        .unwrap_or_else(RunId::generate);
    info!("Starting statedisk run {}", run_id);

    let provider = Arc::new(GcloudCompute::new(
        config.project.clone(),
        config.zone.clone(),
    ));
    let blob = Arc::new(GcsBlobStore::new(
        config.bucket.clone(),
        config.blob_prefix.clone(),
        config.gcs_token.clone(),
    ));

    match cli.command {
        Commands::Regenerate {
            ref_name,
            commit,
            network,
            force,
            changed_paths,
        } => {
            let run = build_run(run_id, &ref_name, &commit, &network)?;
            let report = stages::regenerate_snapshot(
                &config,
                provider,
                blob,
                &run,
                &changed_paths,
                force,
            )
            .await;
            Ok(report_regenerate(report))
        }
        Commands::Consume {
            ref_name,
            commit,
            network,
            use_commit,
        } => {
            let run = build_run(run_id, &ref_name, &commit, &network)?;
            let pinned = use_commit.map(CommitId::new);
            let report = stages::run_from_snapshot(&config, provider, blob, &run, pinned).await;
            Ok(report_consume(report))
        }
    }
}

fn build_run(run_id: RunId, ref_name: &str, commit: &str, network: &str) -> Result<PipelineRun> {
    let network: Network = network.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    Ok(PipelineRun::new(
        run_id,
        RefSlug::new(ref_name),
        CommitId::new(commit),
        network,
    ))
}

fn report_regenerate(report: RunReport<RegenerateOutcome>) -> ExitCode {
    let code = match &report.outcome {
        Ok(RegenerateOutcome::Snapshotted(snapshot)) => {
            println!(
                "{} Snapshot {} created and published",
                "✔".green(),
                snapshot.to_string().bold()
            );
            ExitCode::SUCCESS
        }
        Ok(RegenerateOutcome::Skipped) => {
            println!(
                "{} No regeneration needed; existing snapshot remains current",
                "✔".green()
            );
            ExitCode::SUCCESS
        }
        Err(e) => print_error(e),
    };

    print_teardown_warning(&report.teardown_warning);
    code
}

fn report_consume(report: RunReport<statedisk_core::domain::run::TerminalStatus>) -> ExitCode {
    let code = match &report.outcome {
        Ok(status) => {
            println!("{} Run completed with status: {}", "✔".green(), status);
            ExitCode::SUCCESS
        }
        Err(e) => print_error(e),
    };

    print_teardown_warning(&report.teardown_warning);
    code
}

fn print_error(error: &RunError) -> ExitCode {
    if error.is_recoverable() {
        println!("{} {} (retry may succeed)", "✘".yellow(), error);
        ExitCode::from(EXIT_RECOVERABLE)
    } else {
        println!("{} {}", "✘".red(), error);
        ExitCode::FAILURE
    }
}

fn print_teardown_warning(warning: &Option<String>) {
    if let Some(warning) = warning {
        println!("{} {}", "⚠".yellow(), warning.yellow());
    }
}
