// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `nb status`, `nb stop`, `nb start`, `nb down`

use std::process::ExitCode;

use anyhow::Result;
use nb_daemon::Request;

use crate::client::{DaemonClient, Submission};
use crate::output::{self, format_clusters, format_ticket, OutputFormat};

#[derive(clap::Args, Debug)]
pub struct StatusArgs {
    /// Only show this cluster
    pub cluster: Option<String>,

    /// Ask the backend for the live status of each cluster first
    #[arg(short, long)]
    pub refresh: bool,

    #[arg(short = 'o', long, value_enum, default_value_t)]
    pub output: OutputFormat,
}

#[derive(clap::Args, Debug)]
pub struct ClusterArgs {
    pub cluster: String,

    /// Return a request id immediately instead of waiting
    #[arg(short, long)]
    pub detach: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Stop,
    Start,
    Down,
}

impl Action {
    fn done_message(self) -> &'static str {
        match self {
            Action::Stop => "stopped",
            Action::Start => "started",
            Action::Down => "terminated",
        }
    }
}

pub async fn status(client: &DaemonClient, args: StatusArgs) -> Result<ExitCode> {
    let records = client
        .cluster_status(args.cluster.as_deref(), args.refresh)
        .await?;
    let now = output::now_ms();
    output::print(&records, args.output, |r| format_clusters(r, now));
    Ok(ExitCode::SUCCESS)
}

pub async fn lifecycle(client: &DaemonClient, action: Action, args: ClusterArgs) -> Result<ExitCode> {
    let cluster = args.cluster.clone();
    let detach = args.detach;
    let request = match action {
        Action::Stop => Request::Stop { cluster, detach },
        Action::Start => Request::Start { cluster, detach },
        Action::Down => Request::Down { cluster, detach },
    };
    let submission = client.submit(request).await?;
    match submission {
        Submission::Ticket(ticket) => print!("{}", format_ticket(&ticket)),
        Submission::Finished(_) | Submission::Launched(_) => {
            println!("Cluster {} {}.", args.cluster, action.done_message());
        }
    }
    Ok(ExitCode::SUCCESS)
}
