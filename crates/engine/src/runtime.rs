// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime facade for the Nimbus control plane
//!
//! Wires the cluster manager, context scheduler, job tracker, request layer
//! and reconciler around one store, and exposes the operation surface the
//! daemon serves.

use crate::cluster::{ClusterManager, ClusterRecord, LaunchOptions};
use crate::failover::{ContextScheduler, FailoverConfig};
use crate::jobs::{JobSelector, JobTracker, LogsOutput};
use crate::lane::Lanes;
use crate::reconcile::{ReconcileReport, StaleJobReconciler, EVENT_INTERVAL_SECONDS};
use crate::requests::{CancelOutcome, Completion, RequestManager, RequestScope, RequestTicket};
use crate::{EngineError, Executor, Scheduler};
use nb_adapters::{Backend, ContextProbe};
use nb_core::{
    Clock, ClusterHandle, Effect, IdGen, Inventory, Job, JobId, JobStatus, Request, RequestId,
    RequestKind, RequestResult, Task,
};
use nb_storage::Store;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub failover: FailoverConfig,
    /// Where `logs --sync-down` writes job logs
    pub logs_root: PathBuf,
    pub reconcile_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            failover: FailoverConfig::default(),
            logs_root: std::env::temp_dir().join("nimbus-logs"),
            reconcile_interval: Duration::from_secs(EVENT_INTERVAL_SECONDS),
        }
    }
}

/// Runtime adapter dependencies
pub struct RuntimeDeps<B, P> {
    pub backend: B,
    pub probe: P,
    pub store: Store,
}

/// Outcome of a synchronous launch or exec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchResult {
    pub request_id: RequestId,
    /// `None` when the task had nothing to run
    pub job_id: Option<JobId>,
    pub handle: Option<ClusterHandle>,
    /// Terminal status of the job
    pub job_status: Option<JobStatus>,
}

pub type ExecResult = LaunchResult;

#[derive(Clone)]
pub struct Runtime<B, P, C, G> {
    store: Store,
    clock: C,
    executor: Executor<C>,
    failover: ContextScheduler<P>,
    clusters: ClusterManager<B, P, C>,
    jobs: JobTracker<B, C>,
    requests: RequestManager<B, C, G>,
    reconciler: StaleJobReconciler<B, C>,
    reconcile_interval: Duration,
}

impl<B, P, C, G> Runtime<B, P, C, G>
where
    B: Backend,
    P: ContextProbe,
    C: Clock,
    G: IdGen,
{
    pub fn new(deps: RuntimeDeps<B, P>, clock: C, id_gen: G, config: RuntimeConfig) -> Self {
        let store = deps.store;
        let executor = Executor::new(Arc::new(Mutex::new(Scheduler::new())), clock.clone());
        let lanes = Lanes::new();
        let failover = ContextScheduler::new(deps.probe, config.failover);
        let clusters = ClusterManager::new(
            store.clone(),
            deps.backend.clone(),
            failover.clone(),
            clock.clone(),
            executor.clone(),
            lanes.clone(),
        );
        let jobs = JobTracker::new(
            store.clone(),
            deps.backend.clone(),
            clock.clone(),
            executor.clone(),
            lanes,
            config.logs_root,
        );
        let requests = RequestManager::new(
            store.clone(),
            clock.clone(),
            id_gen,
            executor.clone(),
            jobs.clone(),
        );
        let reconciler = StaleJobReconciler::new(store.clone(), deps.backend, jobs.clone());
        Self {
            store,
            clock,
            executor,
            failover,
            clusters,
            jobs,
            requests,
            reconciler,
            reconcile_interval: config.reconcile_interval,
        }
    }

    // -- launch / exec --

    fn start_launch(
        &self,
        cluster: &str,
        task: Task,
        options: LaunchOptions,
    ) -> Result<(RequestTicket, Completion), EngineError> {
        let rt = self.clone();
        let name = cluster.to_string();
        self.requests
            .start(RequestKind::Launch, cluster, move |scope| async move {
                rt.launch_body(scope, name, task, options).await
            })
    }

    async fn launch_body(
        &self,
        scope: RequestScope<C>,
        cluster: String,
        task: Task,
        options: LaunchOptions,
    ) -> Result<RequestResult, EngineError> {
        scope.log(format!("Launching task on cluster {}.", cluster));
        let up = self
            .clusters
            .ensure_up(&cluster, &task.resources, scope.cancel_token())
            .await?;
        if up.reused {
            scope.log(format!("Cluster {} is UP; reusing it.", cluster));
        } else {
            scope.log(format!(
                "Cluster {} is UP on context {}.",
                cluster, up.handle.context
            ));
        }

        let run_setup = !(options.fast && up.reused);
        let job_id = self.submit_job(&scope, &up.handle, &task, run_setup).await?;

        if let Some(autostop) = options.autostop() {
            self.clusters.set_autostop(&cluster, autostop)?;
            match autostop {
                Some(a) => scope.log(format!(
                    "Autostop set: {} after {} idle minutes.",
                    if a.down { "down" } else { "stop" },
                    a.idle_minutes
                )),
                None => scope.log("Autostop cancelled."),
            }
        }

        Ok(RequestResult {
            job_id,
            handle: Some(up.handle),
            job_status: None,
        })
    }

    fn start_exec(&self, cluster: &str, task: Task) -> Result<(RequestTicket, Completion), EngineError> {
        let rt = self.clone();
        let name = cluster.to_string();
        self.requests
            .start(RequestKind::Exec, cluster, move |scope| async move {
                rt.exec_body(scope, name, task).await
            })
    }

    async fn exec_body(
        &self,
        scope: RequestScope<C>,
        cluster: String,
        task: Task,
    ) -> Result<RequestResult, EngineError> {
        let handle = self.clusters.require_up(&cluster).await?;
        let job_id = self.submit_job(&scope, &handle, &task, false).await?;
        Ok(RequestResult {
            job_id,
            handle: Some(handle),
            job_status: None,
        })
    }

    async fn submit_job(
        &self,
        scope: &RequestScope<C>,
        handle: &ClusterHandle,
        task: &Task,
        run_setup: bool,
    ) -> Result<Option<JobId>, EngineError> {
        let cancelled = || EngineError::Cancelled(format!("request {}", scope.id()));
        if scope.is_cancelled() {
            return Err(cancelled());
        }

        let Some(job_id) = self
            .jobs
            .submit(handle, task, run_setup, Some(scope.id()))
            .await?
        else {
            scope.log("Nothing to run; no job submitted.");
            return Ok(None);
        };
        scope.attach_job(job_id)?;
        scope.log(format!("Job submitted with ID: {}", job_id));

        // A cancel that landed before the job was attached could not see it
        if scope.is_cancelled() {
            self.jobs.cancel(&handle.cluster_name, job_id).await?;
            return Err(cancelled());
        }
        Ok(Some(job_id))
    }

    async fn finish_sync(
        &self,
        cluster: &str,
        ticket: RequestTicket,
        completion: Completion,
    ) -> Result<LaunchResult, EngineError> {
        let result = completion.wait().await?;
        let job_status = match result.job_id {
            Some(job_id) => Some(self.jobs.wait(cluster, job_id).await?.status),
            None => None,
        };
        Ok(LaunchResult {
            request_id: ticket.request_id,
            job_id: result.job_id,
            handle: result.handle,
            job_status,
        })
    }

    /// Bring the cluster up, run the task and wait for its job to finish
    pub async fn launch(
        &self,
        cluster: &str,
        task: Task,
        options: LaunchOptions,
    ) -> Result<LaunchResult, EngineError> {
        let (ticket, completion) = self.start_launch(cluster, task, options)?;
        self.finish_sync(cluster, ticket, completion).await
    }

    pub fn launch_async(
        &self,
        cluster: &str,
        task: Task,
        options: LaunchOptions,
    ) -> Result<RequestTicket, EngineError> {
        self.start_launch(cluster, task, options)
            .map(|(ticket, _)| ticket)
    }

    /// Run a task on an UP cluster, skipping setup
    pub async fn exec(&self, cluster: &str, task: Task) -> Result<ExecResult, EngineError> {
        let (ticket, completion) = self.start_exec(cluster, task)?;
        self.finish_sync(cluster, ticket, completion).await
    }

    pub fn exec_async(&self, cluster: &str, task: Task) -> Result<RequestTicket, EngineError> {
        self.start_exec(cluster, task).map(|(ticket, _)| ticket)
    }

    // -- cluster lifecycle --

    fn start_stop(&self, cluster: &str) -> Result<(RequestTicket, Completion), EngineError> {
        let clusters = self.clusters.clone();
        let name = cluster.to_string();
        self.requests
            .start(RequestKind::Stop, cluster, move |scope| async move {
                scope.log(format!("Stopping cluster {}.", name));
                let stopped = clusters.stop(&name).await?;
                scope.log(format!("Cluster {} is {}.", name, stopped.status));
                Ok::<_, EngineError>(RequestResult::default())
            })
    }

    fn start_start(&self, cluster: &str) -> Result<(RequestTicket, Completion), EngineError> {
        let clusters = self.clusters.clone();
        let name = cluster.to_string();
        self.requests
            .start(RequestKind::Start, cluster, move |scope| async move {
                scope.log(format!("Starting cluster {}.", name));
                let handle = clusters.start(&name, scope.cancel_token()).await?;
                scope.log(format!("Cluster {} is UP.", name));
                Ok::<_, EngineError>(RequestResult {
                    handle: Some(handle),
                    ..RequestResult::default()
                })
            })
    }

    fn start_down(&self, cluster: &str) -> Result<(RequestTicket, Completion), EngineError> {
        let rt = self.clone();
        let name = cluster.to_string();
        self.requests
            .start(RequestKind::Down, cluster, move |scope| async move {
                rt.down_body(scope, name).await
            })
    }

    async fn down_body(
        &self,
        scope: RequestScope<C>,
        cluster: String,
    ) -> Result<RequestResult, EngineError> {
        scope.log(format!("Tearing down cluster {}.", cluster));
        let requests = self.requests.cancel_cluster(&cluster, Some(scope.id()))?;
        if !requests.is_empty() {
            scope.log(format!("Cancelled {} in-flight request(s).", requests.len()));
        }
        let jobs = self.jobs.abandon_cluster(&cluster).await?;
        if jobs > 0 {
            scope.log(format!("Cancelled {} active job(s).", jobs));
        }
        self.clusters.down(&cluster).await?;
        scope.log(format!("Cluster {} torn down.", cluster));
        Ok(RequestResult::default())
    }

    pub async fn stop(&self, cluster: &str) -> Result<RequestResult, EngineError> {
        self.start_stop(cluster)?.1.wait().await
    }

    pub fn stop_async(&self, cluster: &str) -> Result<RequestTicket, EngineError> {
        self.start_stop(cluster).map(|(ticket, _)| ticket)
    }

    pub async fn start(&self, cluster: &str) -> Result<RequestResult, EngineError> {
        self.start_start(cluster)?.1.wait().await
    }

    pub fn start_async(&self, cluster: &str) -> Result<RequestTicket, EngineError> {
        self.start_start(cluster).map(|(ticket, _)| ticket)
    }

    pub async fn down(&self, cluster: &str) -> Result<RequestResult, EngineError> {
        self.start_down(cluster)?.1.wait().await
    }

    pub fn down_async(&self, cluster: &str) -> Result<RequestTicket, EngineError> {
        self.start_down(cluster).map(|(ticket, _)| ticket)
    }

    // -- queries --

    pub async fn status(
        &self,
        cluster: Option<&str>,
        refresh: bool,
    ) -> Result<Vec<ClusterRecord>, EngineError> {
        self.clusters.status(cluster, refresh).await
    }

    pub async fn logs(
        &self,
        cluster: &str,
        selectors: &[JobSelector],
        sync_down: bool,
    ) -> Result<LogsOutput, EngineError> {
        self.jobs.logs(cluster, selectors, sync_down).await
    }

    pub fn queue(&self, cluster: &str) -> Result<Vec<Job>, EngineError> {
        self.jobs.queue(cluster)
    }

    pub async fn cancel(&self, request_id: &str) -> Result<CancelOutcome, EngineError> {
        self.requests.cancel(request_id).await
    }

    pub async fn cancel_job(&self, cluster: &str, job_id: JobId) -> Result<JobStatus, EngineError> {
        self.jobs.cancel(cluster, job_id).await
    }

    pub fn request(&self, id: &str) -> Result<Request, EngineError> {
        self.requests
            .request(id)
            .ok_or_else(|| EngineError::RequestNotFound(id.to_string()))
    }

    pub fn request_logs(&self, id: &str) -> Result<Vec<String>, EngineError> {
        self.requests.request_logs(id)
    }

    pub fn list_requests(&self) -> Vec<Request> {
        self.requests.list()
    }

    pub async fn wait_request(&self, id: &str) -> Result<Request, EngineError> {
        self.requests.wait(id).await
    }

    pub fn contexts(&self) -> Vec<String> {
        self.failover.allowed_contexts().to_vec()
    }

    /// Free accelerators on a context
    pub async fn available(&self, context: &str) -> Result<Inventory, EngineError> {
        Ok(self.failover.available(context).await?)
    }

    // -- background work --

    /// Handle timers that are due; returns how many fired
    pub async fn tick_timers(&self) -> usize {
        let fired = self
            .executor
            .scheduler()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .fired_timers(self.clock.now());
        for id in &fired {
            match id.strip_prefix("autostop:") {
                Some(cluster) => {
                    if let Err(e) = self.clusters.on_autostop(cluster).await {
                        tracing::warn!(cluster, error = %e, "autostop failed");
                    }
                }
                None => tracing::warn!(timer = %id, "unknown timer fired"),
            }
        }
        fired.len()
    }

    pub async fn reconcile_once(&self) -> ReconcileReport {
        self.reconciler.tick().await
    }

    pub fn spawn_reconciler(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.reconciler
            .clone()
            .spawn(self.reconcile_interval, shutdown)
    }

    /// Rebuild in-memory bookkeeping from the store after a restart
    ///
    /// Restores ledger allocations and idle timers of UP clusters, then
    /// settles requests the previous daemon left in flight.
    pub fn recover(&self) -> Result<(), EngineError> {
        let now = self.clock.epoch_ms();
        let clusters: Vec<_> = self
            .store
            .read(|s| s.clusters.values().filter(|c| c.is_up()).cloned().collect());
        for cluster in &clusters {
            if let Some(resources) = &cluster.launched_resources {
                self.failover.restore(&cluster.name, resources);
            }
            if let Some(remaining) = cluster.autostop_remaining(now) {
                self.executor.execute(Effect::SetTimer {
                    id: cluster.timer_id(),
                    duration: remaining,
                });
            }
        }
        let settled = self.requests.recover_interrupted()?;
        tracing::info!(clusters = clusters.len(), requests_settled = settled, "state recovered");
        Ok(())
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
