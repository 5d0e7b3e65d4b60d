// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `nb logs`, `nb queue`, `nb cancel`

use std::process::ExitCode;

use anyhow::Result;
use nb_core::JobId;
use nb_engine::{JobSelector, LogEntry, LogsOutput};

use super::exit_with;
use crate::client::DaemonClient;
use crate::output::{self, format_queue, OutputFormat};

#[derive(clap::Args, Debug)]
pub struct LogsArgs {
    pub cluster: String,

    /// Job ids, `latest`, or `*` for every job on the cluster [default: latest]
    pub jobs: Vec<JobSelector>,

    /// Print only the status of each job
    #[arg(long, conflicts_with = "sync_down")]
    pub status: bool,

    /// Copy the job logs into the local logs directory
    #[arg(long)]
    pub sync_down: bool,
}

#[derive(clap::Args, Debug)]
pub struct QueueArgs {
    pub cluster: String,

    #[arg(short = 'o', long, value_enum, default_value_t)]
    pub output: OutputFormat,
}

#[derive(clap::Args, Debug)]
pub struct CancelArgs {
    pub cluster: String,

    /// Jobs to cancel
    #[arg(required = true)]
    pub job_ids: Vec<u64>,
}

pub async fn logs(client: &DaemonClient, args: LogsArgs) -> Result<ExitCode> {
    let output = client.logs(&args.cluster, args.jobs, args.sync_down).await?;
    if args.status {
        print!("{}", format_statuses(&output));
    } else {
        print!("{}", format_logs(&output));
    }
    Ok(exit_with(output.exit_code))
}

fn status_label(entry: &LogEntry) -> String {
    entry
        .status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "NOT FOUND".to_string())
}

fn format_statuses(output: &LogsOutput) -> String {
    if output.entries.is_empty() {
        return "No jobs found.\n".to_string();
    }
    output
        .entries
        .iter()
        .map(|e| format!("Job {}: {}\n", e.job_id, status_label(e)))
        .collect()
}

fn format_logs(output: &LogsOutput) -> String {
    let mut out = String::new();
    let headers = output.entries.len() > 1;
    for entry in &output.entries {
        let status = status_label(entry);
        if headers {
            out.push_str(&format!("=== Job {} ({}) ===\n", entry.job_id, status));
        }
        out.push_str(&entry.text);
        if !entry.text.is_empty() && !entry.text.ends_with('\n') {
            out.push('\n');
        }
        if let Some(path) = &entry.path {
            out.push_str(&format!("Job {} logs synced to {}\n", entry.job_id, path.display()));
        }
    }
    out
}

pub async fn queue(client: &DaemonClient, args: QueueArgs) -> Result<ExitCode> {
    let jobs = client.queue(&args.cluster).await?;
    let now = output::now_ms();
    output::print(&jobs, args.output, |j| format_queue(&args.cluster, j, now));
    Ok(ExitCode::SUCCESS)
}

pub async fn cancel(client: &DaemonClient, args: CancelArgs) -> Result<ExitCode> {
    let mut failed = false;
    for id in args.job_ids {
        match client.cancel_job(&args.cluster, JobId(id)).await {
            Ok(status) => println!("Job {}: {}", id, status),
            Err(e) => {
                eprintln!("Job {}: {}", id, e);
                failed = true;
            }
        }
    }
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
