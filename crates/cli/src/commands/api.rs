// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `nb api`: inspect and cancel asynchronous requests

use std::process::ExitCode;

use anyhow::Result;
use clap::Subcommand;
use nb_core::RequestStatus;

use crate::client::DaemonClient;
use crate::output::{self, format_requests, OutputFormat};

#[derive(clap::Args, Debug)]
pub struct ApiArgs {
    #[command(subcommand)]
    pub command: ApiCommand,
}

#[derive(Subcommand, Debug)]
pub enum ApiCommand {
    /// Cancel a pending or running request
    Cancel { request_id: String },
    /// Print a request's log
    Logs {
        request_id: String,
        /// Wait for the request to finish before printing
        #[arg(short, long)]
        follow: bool,
    },
    /// Show one request, or all of them
    Status {
        request_id: Option<String>,
        #[arg(short = 'o', long, value_enum, default_value_t)]
        output: OutputFormat,
    },
}

pub async fn handle(client: &DaemonClient, args: ApiArgs) -> Result<ExitCode> {
    match args.command {
        ApiCommand::Cancel { request_id } => {
            let outcome = client.cancel_request(&request_id).await?;
            println!("Request {} is {}.", outcome.request_id, outcome.status);
            if let Some(job_id) = outcome.cancelled_job {
                println!("Cancelled job {}.", job_id);
            }
        }
        ApiCommand::Logs { request_id, follow } => {
            let (request, lines) = client.request_logs(&request_id, follow).await?;
            for line in &lines {
                println!("{}", line);
            }
            if request.status == RequestStatus::Failed {
                return Ok(ExitCode::FAILURE);
            }
        }
        ApiCommand::Status { request_id, output: format } => {
            let requests = client.requests(request_id.as_deref()).await?;
            let now = output::now_ms();
            output::print(&requests, format, |r| format_requests(r, now));
        }
    }
    Ok(ExitCode::SUCCESS)
}
