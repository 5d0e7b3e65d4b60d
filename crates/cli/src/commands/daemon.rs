// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `nb daemon`: manage the background nbd process

use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::Subcommand;
use nb_daemon::DaemonPaths;

use crate::client::{
    daemon_stop, find_nbd_binary, start_daemon_background, timeout_connect, ClientError,
    DaemonClient,
};
use crate::output::format_duration;

#[derive(clap::Args, Debug)]
pub struct DaemonArgs {
    #[command(subcommand)]
    pub command: DaemonCommand,
}

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Start the daemon in the background
    Start,
    /// Stop the daemon
    Stop,
    /// Show daemon status
    Status,
    /// Run the daemon in the foreground
    Run,
}

pub async fn handle(paths: &DaemonPaths, args: DaemonArgs) -> Result<ExitCode> {
    match args.command {
        DaemonCommand::Start => start(paths).await,
        DaemonCommand::Stop => stop(paths).await,
        DaemonCommand::Status => status(paths).await,
        DaemonCommand::Run => run_foreground(),
    }
}

async fn start(paths: &DaemonPaths) -> Result<ExitCode> {
    if let Ok(client) = DaemonClient::connect(paths) {
        if let Ok(version) = client.hello().await {
            println!("Daemon already running (version {})", version);
            return Ok(ExitCode::SUCCESS);
        }
    }

    let child = start_daemon_background()?;
    let client = DaemonClient::connect_with_retry(paths, timeout_connect(), child).await?;
    let version = client.hello().await?;
    println!("Daemon started (version {})", version);
    Ok(ExitCode::SUCCESS)
}

async fn stop(paths: &DaemonPaths) -> Result<ExitCode> {
    if daemon_stop(paths).await? {
        println!("Daemon stopped");
    } else {
        println!("Daemon not running");
    }
    Ok(ExitCode::SUCCESS)
}

async fn status(paths: &DaemonPaths) -> Result<ExitCode> {
    let client = match DaemonClient::connect(paths) {
        Ok(client) => client,
        Err(ClientError::DaemonNotRunning) => {
            println!("Daemon not running");
            return Ok(ExitCode::SUCCESS);
        }
        Err(e) => return Err(e.into()),
    };

    let (version, status) = match (client.hello().await, client.status().await) {
        (Ok(version), Ok(status)) => (version, status),
        // A socket left behind by a crashed daemon
        (Err(ClientError::Io(_)), _) | (_, Err(ClientError::Io(_))) => {
            println!("Daemon not running (stale socket at {})", paths.socket_path.display());
            return Ok(ExitCode::SUCCESS);
        }
        (Err(e), _) | (_, Err(e)) => return Err(e.into()),
    };

    println!("Status: running");
    println!("Version: {}", version);
    println!("Uptime: {}", format_duration(status.uptime_secs * 1000));
    println!("Clusters up: {}", status.clusters_up);
    println!("Active jobs: {}", status.jobs_active);
    println!("In-flight requests: {}", status.requests_inflight);
    println!("Log: {}", paths.log_path.display());
    Ok(ExitCode::SUCCESS)
}

fn run_foreground() -> Result<ExitCode> {
    let nbd = find_nbd_binary();
    let status = std::process::Command::new(&nbd)
        .status()
        .map_err(|e| anyhow!("failed to run {}: {}", nbd.display(), e))?;
    Ok(match status.code() {
        Some(0) => ExitCode::SUCCESS,
        Some(code) => super::exit_with(code),
        None => ExitCode::FAILURE,
    })
}
