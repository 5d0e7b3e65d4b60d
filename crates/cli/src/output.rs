// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output formatting for CLI commands

use std::fmt::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use nb_core::{Job, Request};
use nb_daemon::ContextGpus;
use nb_engine::{ClusterRecord, RequestTicket};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Print a value as JSON, or as the text `render` produces
pub fn print<T: Serialize + ?Sized>(value: &T, format: OutputFormat, render: impl FnOnce(&T) -> String) {
    match format {
        OutputFormat::Text => print!("{}", render(value)),
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(value) {
                println!("{}", json);
            }
        }
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// "5s ago", "3m ago", "2h ago", "4d ago"
pub fn format_age(then_ms: u64, now_ms: u64) -> String {
    format!("{} ago", format_duration(now_ms.saturating_sub(then_ms)))
}

pub fn format_duration(ms: u64) -> String {
    let secs = ms / 1000;
    match secs {
        0..=59 => format!("{}s", secs),
        60..=3599 => format!("{}m", secs / 60),
        3600..=86_399 => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / 86_400),
    }
}

pub fn format_ticket(ticket: &RequestTicket) -> String {
    format!(
        "Submitted request {}.\n  To cancel: {}\n  To stream logs: {}\n",
        ticket.request_id, ticket.cancel_hint, ticket.logs_hint
    )
}

pub fn format_clusters(records: &[ClusterRecord], now_ms: u64) -> String {
    if records.is_empty() {
        return "No existing clusters.\n".to_string();
    }
    let mut out = format!(
        "{:<20} {:<10} {:<30} {:<12} {:<6} LAUNCHED\n",
        "NAME", "STATUS", "RESOURCES", "AUTOSTOP", "JOBS"
    );
    for record in records {
        let cluster = &record.cluster;
        let resources = cluster
            .launched_resources
            .as_ref()
            .map_or_else(|| "-".to_string(), |r| r.to_string());
        let autostop = match (&cluster.autostop, record.autostop_in_ms) {
            (Some(policy), Some(left)) => format!(
                "{}m{} ({})",
                policy.idle_minutes,
                if policy.down { " down" } else { "" },
                format_duration(left)
            ),
            (Some(policy), None) => {
                format!("{}m{}", policy.idle_minutes, if policy.down { " down" } else { "" })
            }
            (None, _) => "-".to_string(),
        };
        let _ = writeln!(
            out,
            "{:<20} {:<10} {:<30} {:<12} {:<6} {}",
            cluster.name,
            cluster.status.to_string(),
            resources,
            autostop,
            record.active_jobs,
            format_age(cluster.created_at_ms, now_ms)
        );
    }
    out
}

pub fn format_queue(cluster: &str, jobs: &[Job], now_ms: u64) -> String {
    if jobs.is_empty() {
        return format!("No jobs on cluster {}.\n", cluster);
    }
    let mut out = format!(
        "{:<6} {:<20} {:<12} {:<10} STATUS\n",
        "ID", "NAME", "SUBMITTED", "DURATION"
    );
    for job in jobs {
        let duration = match (job.started_at_ms, job.ended_at_ms) {
            (Some(start), Some(end)) => format_duration(end.saturating_sub(start)),
            (Some(start), None) => format_duration(now_ms.saturating_sub(start)),
            _ => "-".to_string(),
        };
        let _ = writeln!(
            out,
            "{:<6} {:<20} {:<12} {:<10} {}",
            job.id.to_string(),
            job.name.as_deref().unwrap_or("-"),
            format_age(job.submitted_at_ms, now_ms),
            duration,
            job.status
        );
    }
    out
}

pub fn format_requests(requests: &[Request], now_ms: u64) -> String {
    if requests.is_empty() {
        return "No requests.\n".to_string();
    }
    let mut out = format!(
        "{:<38} {:<8} {:<20} {:<10} CREATED\n",
        "ID", "KIND", "CLUSTER", "STATUS"
    );
    for request in requests {
        let _ = writeln!(
            out,
            "{:<38} {:<8} {:<20} {:<10} {}",
            request.id.to_string(),
            request.kind.to_string(),
            request.cluster,
            request.status.to_string(),
            format_age(request.created_at_ms, now_ms)
        );
        if let Some(error) = &request.error {
            let _ = writeln!(out, "  error: {}", error);
        }
    }
    out
}

pub fn format_gpus(contexts: &[ContextGpus]) -> String {
    let mut out = format!("{:<20} {:<12} FREE\n", "CONTEXT", "ACCELERATOR");
    for ctx in contexts {
        match (&ctx.available, &ctx.error) {
            (Some(inventory), _) if !inventory.is_empty() => {
                for (accelerator, count) in inventory.iter() {
                    let _ = writeln!(out, "{:<20} {:<12} {}", ctx.context, accelerator, count);
                }
            }
            (Some(_), _) => {
                let _ = writeln!(out, "{:<20} {:<12} -", ctx.context, "-");
            }
            (None, error) => {
                let _ = writeln!(
                    out,
                    "{:<20} unavailable: {}",
                    ctx.context,
                    error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use nb_core::{Cluster, ClusterStatus, FakeClock, Inventory, JobId, JobStatus, RequestKind};

    #[test]
    fn durations_pick_largest_unit() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(59_999), "59s");
        assert_eq!(format_duration(60_000), "1m");
        assert_eq!(format_duration(2 * 3_600_000), "2h");
        assert_eq!(format_duration(3 * 86_400_000), "3d");
        assert_eq!(format_age(1_000, 6_000), "5s ago");
    }

    #[test]
    fn cluster_table_lists_status_and_jobs() {
        let clock = FakeClock::new();
        let mut cluster = Cluster::new("train", &clock);
        cluster.status = ClusterStatus::Up;
        let records = vec![ClusterRecord {
            cluster,
            active_jobs: 2,
            autostop_in_ms: None,
        }];

        let out = format_clusters(&records, 0);
        assert!(out.starts_with("NAME"));
        assert!(out.contains("train"));
        assert!(out.contains("UP"));
        assert_eq!(format_clusters(&[], 0), "No existing clusters.\n");
    }

    #[test]
    fn queue_table_shows_job_status() {
        let clock = FakeClock::new();
        let mut job = Job::new(JobId(3), "train", &clock);
        job.status = JobStatus::FailedDriver;

        let out = format_queue("train", &[job], 0);
        assert!(out.contains("FAILED_DRIVER"), "got: {}", out);
        assert_eq!(format_queue("train", &[], 0), "No jobs on cluster train.\n");
    }

    #[test]
    fn request_table_includes_errors() {
        let clock = FakeClock::new();
        let mut request = Request::new("abc", RequestKind::Launch, "train", &clock);
        request.error = Some("no context fits".to_string());

        let out = format_requests(&[request], 0);
        assert!(out.contains("abc"));
        assert!(out.contains("LAUNCH"));
        assert!(out.contains("error: no context fits"));
    }

    #[test]
    fn gpu_table_reports_unavailable_contexts() {
        let contexts = vec![
            ContextGpus {
                context: "a".to_string(),
                available: Some(Inventory::new().with("H100", 7)),
                error: None,
            },
            ContextGpus {
                context: "b".to_string(),
                available: None,
                error: Some("probe timed out".to_string()),
            },
        ];
        let out = format_gpus(&contexts);
        assert!(out.contains("H100"));
        assert!(out.contains('7'));
        assert!(out.contains("unavailable: probe timed out"));
    }
}
