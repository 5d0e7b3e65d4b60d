// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `nb show-gpus`

use std::process::ExitCode;

use anyhow::Result;

use crate::client::DaemonClient;
use crate::output::{self, format_gpus, OutputFormat};

#[derive(clap::Args, Debug)]
pub struct ShowGpusArgs {
    /// Only query this context
    #[arg(long)]
    pub context: Option<String>,

    #[arg(short = 'o', long, value_enum, default_value_t)]
    pub output: OutputFormat,
}

pub async fn handle(client: &DaemonClient, args: ShowGpusArgs) -> Result<ExitCode> {
    let contexts = client.show_gpus(args.context.as_deref()).await?;
    output::print(&contexts, args.output, |c| format_gpus(c));
    Ok(ExitCode::SUCCESS)
}
