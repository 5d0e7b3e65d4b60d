// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `nb launch` and `nb exec`

use std::process::ExitCode;

use anyhow::Result;
use nb_core::{AcceleratorRequest, ResourceSpec, Task};
use nb_engine::{JobSelector, LaunchOptions};

use super::exit_with;
use crate::client::{DaemonClient, Submission};
use crate::output::format_ticket;

/// Task fields shared by launch and exec
#[derive(clap::Args, Debug)]
pub struct TaskArgs {
    /// Task name shown in the queue
    #[arg(long)]
    pub name: Option<String>,

    /// Environment variable for setup and run (KEY=VALUE, repeatable)
    #[arg(long = "env", value_parser = parse_env)]
    pub envs: Vec<(String, String)>,

    /// Return a request id immediately instead of waiting for the job
    #[arg(short, long)]
    pub detach: bool,
}

impl TaskArgs {
    fn into_task(self, command: Vec<String>, setup: Option<String>, resources: ResourceSpec) -> Task {
        let mut task = Task::new().with_resources(resources);
        task.name = self.name;
        task.setup = setup;
        if !command.is_empty() {
            task.run = Some(command.join(" "));
        }
        for (key, value) in self.envs {
            task = task.with_env(key, value);
        }
        task
    }
}

#[derive(clap::Args, Debug)]
pub struct LaunchArgs {
    /// Cluster to create or reuse
    #[arg(short = 'c', long)]
    pub cluster: String,

    /// Setup command, run before the task on a fresh cluster
    #[arg(long)]
    pub setup: Option<String>,

    /// Accelerators as NAME[:COUNT], e.g. H100:8
    #[arg(long)]
    pub gpus: Option<AcceleratorRequest>,

    #[arg(long)]
    pub cpus: Option<u32>,

    /// Pin the cluster to one context
    #[arg(long)]
    pub context: Option<String>,

    /// Stop after this many idle minutes; a negative value cancels autostop
    #[arg(short = 'i', long = "idle-minutes-to-autostop", allow_negative_numbers = true)]
    pub idle_minutes: Option<i32>,

    /// Tear the cluster down instead of stopping it when idle
    #[arg(long)]
    pub down: bool,

    /// Skip provisioning and setup when the cluster is already UP
    #[arg(long)]
    pub fast: bool,

    #[command(flatten)]
    pub task: TaskArgs,

    /// Command to run; without one the cluster is only brought up
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

#[derive(clap::Args, Debug)]
pub struct ExecArgs {
    /// UP cluster to run on
    pub cluster: String,

    #[command(flatten)]
    pub task: TaskArgs,

    /// Command to run on the cluster
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

fn parse_env(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("invalid env {:?}: expected KEY=VALUE", s)),
    }
}

pub async fn launch(client: &DaemonClient, args: LaunchArgs) -> Result<ExitCode> {
    let mut resources = ResourceSpec::default();
    resources.accelerator = args.gpus;
    resources.cpus = args.cpus;
    resources.context = args.context;

    let options = LaunchOptions {
        idle_minutes_to_autostop: args.idle_minutes,
        down: args.down,
        fast: args.fast,
    };
    let detach = args.task.detach;
    let task = args.task.into_task(args.command, args.setup, resources);

    let submission = client.launch(&args.cluster, task, options, detach).await?;
    report(client, &args.cluster, submission).await
}

pub async fn exec(client: &DaemonClient, args: ExecArgs) -> Result<ExitCode> {
    let detach = args.task.detach;
    let task = args.task.into_task(args.command, None, ResourceSpec::default());

    let submission = client.exec(&args.cluster, task, detach).await?;
    report(client, &args.cluster, submission).await
}

/// Print the outcome of a launch or exec
///
/// A synchronous run prints the job's output and exits with its status code.
async fn report(client: &DaemonClient, cluster: &str, submission: Submission) -> Result<ExitCode> {
    let result = match submission {
        Submission::Ticket(ticket) => {
            print!("{}", format_ticket(&ticket));
            return Ok(ExitCode::SUCCESS);
        }
        Submission::Launched(result) => result,
        Submission::Finished(_) => return Ok(ExitCode::SUCCESS),
    };

    let Some(job_id) = result.job_id else {
        println!("Nothing to run on cluster {}; no job submitted.", cluster);
        return Ok(ExitCode::SUCCESS);
    };

    match client.logs(cluster, vec![JobSelector::Id(job_id)], false).await {
        Ok(output) => {
            for entry in &output.entries {
                print!("{}", entry.text);
            }
        }
        Err(e) => tracing::warn!(error = %e, "could not fetch job output"),
    }

    match result.job_status {
        Some(status) if status.is_terminal() => {
            println!("Job {} on cluster {} finished: {}.", job_id, cluster, status);
            Ok(exit_with(status.exit_code()))
        }
        Some(status) => {
            println!(
                "Job {} on cluster {} is {} but the cluster is no longer UP.",
                job_id, cluster, status
            );
            Ok(exit_with(status.exit_code()))
        }
        None => {
            println!("Job {} submitted to cluster {}.", job_id, cluster);
            Ok(ExitCode::SUCCESS)
        }
    }
}
