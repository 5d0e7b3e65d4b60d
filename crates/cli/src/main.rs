// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! nb - Nimbus cluster CLI

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod commands;
mod completions;
mod error;
mod output;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{api, cluster, daemon, gpus, jobs, launch};
use nb_daemon::DaemonPaths;

use crate::client::{ClientError, DaemonClient};
use crate::completions::{generate_completions, CompletionsArgs};
use crate::error::NbError;

#[derive(Parser)]
#[command(
    name = "nb",
    version,
    about = "Nimbus - launch and manage jobs on GPU clusters"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a task, provisioning the cluster if needed
    Launch(launch::LaunchArgs),
    /// Run a task on an existing UP cluster
    Exec(launch::ExecArgs),
    /// Show clusters
    Status(cluster::StatusArgs),
    /// Stop a cluster, keeping its disks
    Stop(cluster::ClusterArgs),
    /// Restart a stopped cluster
    Start(cluster::ClusterArgs),
    /// Tear a cluster down
    Down(cluster::ClusterArgs),
    /// Print job output
    Logs(jobs::LogsArgs),
    /// Show the job queue of a cluster
    Queue(jobs::QueueArgs),
    /// Cancel jobs on a cluster
    Cancel(jobs::CancelArgs),
    /// Inspect asynchronous requests
    Api(api::ApiArgs),
    /// Show available accelerators per context
    ShowGpus(gpus::ShowGpusArgs),
    /// Daemon management
    Daemon(daemon::DaemonArgs),
    /// Generate shell completions
    Completions(CompletionsArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Stay quiet unless asked: stdout carries command output
    if std::env::var_os("RUST_LOG").is_some() {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    }

    let paths = DaemonPaths::from_env().ok();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            match e.downcast_ref::<ClientError>() {
                Some(client_err) => eprint!("{}", NbError::from_client(client_err, paths.as_ref())),
                None => eprint!("{}", NbError::new(format!("{:#}", e))),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    // Commands that do not talk to the daemon
    let command = match cli.command {
        Commands::Completions(args) => {
            generate_completions::<Cli>(args.shell);
            return Ok(ExitCode::SUCCESS);
        }
        other => other,
    };

    let paths = DaemonPaths::from_env().map_err(ClientError::from)?;
    let command = match command {
        Commands::Daemon(args) => return daemon::handle(&paths, args).await,
        other => other,
    };

    let client = DaemonClient::connect_or_start(&paths).await?;
    match command {
        Commands::Launch(args) => launch::launch(&client, args).await,
        Commands::Exec(args) => launch::exec(&client, args).await,
        Commands::Status(args) => cluster::status(&client, args).await,
        Commands::Stop(args) => cluster::lifecycle(&client, cluster::Action::Stop, args).await,
        Commands::Start(args) => cluster::lifecycle(&client, cluster::Action::Start, args).await,
        Commands::Down(args) => cluster::lifecycle(&client, cluster::Action::Down, args).await,
        Commands::Logs(args) => jobs::logs(&client, args).await,
        Commands::Queue(args) => jobs::queue(&client, args).await,
        Commands::Cancel(args) => jobs::cancel(&client, args).await,
        Commands::Api(args) => api::handle(&client, args).await,
        Commands::ShowGpus(args) => gpus::handle(&client, args).await,
        Commands::Daemon(_) | Commands::Completions(_) => Ok(ExitCode::SUCCESS),
    }
}
