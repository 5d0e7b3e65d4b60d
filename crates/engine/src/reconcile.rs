// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic reconciliation of job state against driver liveness

use crate::jobs::JobTracker;
use nb_adapters::Backend;
use nb_core::{Clock, ClusterHandle, ClusterStatus, JobId, JobStatus};
use nb_storage::Store;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Default interval between reconciliation ticks
pub const EVENT_INTERVAL_SECONDS: u64 = 300;

/// What one tick looked at and changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub clusters_checked: usize,
    pub jobs_checked: usize,
    /// Jobs moved to FAILED_DRIVER by this tick
    pub failed_driver: Vec<(String, JobId)>,
    /// Probe errors; these are retried on the next tick
    pub errors: usize,
}

#[derive(Clone)]
pub struct StaleJobReconciler<B, C> {
    store: Store,
    backend: B,
    jobs: JobTracker<B, C>,
}

impl<B, C> StaleJobReconciler<B, C>
where
    B: Backend,
    C: Clock,
{
    pub fn new(store: Store, backend: B, jobs: JobTracker<B, C>) -> Self {
        Self {
            store,
            backend,
            jobs,
        }
    }

    /// Run one reconciliation pass
    pub async fn tick(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let clusters: Vec<ClusterHandle> = self.store.read(|s| {
            s.clusters
                .values()
                .filter(|c| c.is_up())
                .filter_map(|c| c.handle.clone())
                .collect()
        });

        for handle in clusters {
            let cluster = handle.cluster_name.as_str();
            match self.backend.cluster_status(&handle).await {
                Ok(Some(ClusterStatus::Up)) => {}
                Ok(status) => {
                    tracing::debug!(cluster, ?status, "cluster not up on backend, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(cluster, error = %e, "cluster status check failed");
                    report.errors += 1;
                    continue;
                }
            }
            report.clusters_checked += 1;

            for job in self.jobs.active_jobs(cluster) {
                report.jobs_checked += 1;
                if job.status == JobStatus::Pending && self.jobs.has_worker(cluster, job.id) {
                    continue;
                }
                match self.backend.driver_alive(&handle, job.id).await {
                    Ok(true) => {}
                    Ok(false) => match self.jobs.mark_driver_lost(cluster, job.id) {
                        Ok(true) => {
                            tracing::warn!(cluster, job_id = %job.id, was = %job.status, "driver lost, job marked FAILED_DRIVER");
                            report.failed_driver.push((cluster.to_string(), job.id));
                        }
                        Ok(false) => {}
                        Err(e) => {
                            tracing::error!(cluster, job_id = %job.id, error = %e, "failed to record lost driver");
                            report.errors += 1;
                        }
                    },
                    Err(e) => {
                        tracing::warn!(cluster, job_id = %job.id, error = %e, "driver liveness check failed");
                        report.errors += 1;
                    }
                }
            }
        }

        if !report.failed_driver.is_empty() || report.errors > 0 {
            tracing::info!(
                clusters = report.clusters_checked,
                jobs = report.jobs_checked,
                failed_driver = report.failed_driver.len(),
                errors = report.errors,
                "reconciliation tick"
            );
        }
        report
    }

    /// Run ticks every `interval` until `shutdown` fires
    pub fn spawn(self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let span = tracing::info_span!("reconciler", interval_secs = interval.as_secs());
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                // The first tick completes immediately
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            self.tick().await;
                        }
                        _ = shutdown.cancelled() => {
                            tracing::debug!("reconciler stopping");
                            return;
                        }
                    }
                }
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
