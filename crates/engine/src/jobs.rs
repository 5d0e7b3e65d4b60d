// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job submission, execution workers, status and logs

use crate::cluster::apply_cluster_event;
use crate::executor::Executor;
use crate::lane::Lanes;
use crate::EngineError;
use nb_adapters::{Backend, Phase, PhaseOutcome};
use nb_core::{
    worst_exit_code, Clock, ClusterEvent, ClusterHandle, Job, JobEvent, JobId, JobStatus,
    Operation, RequestId, Task, EXIT_NOT_FOUND,
};
use nb_storage::Store;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// How often a waiter re-checks that the job's cluster is still UP
const CLUSTER_POLL: Duration = Duration::from_secs(1);

/// Which jobs `logs` covers; several selectors cover the union, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobSelector {
    Id(JobId),
    Latest,
    All,
}

impl FromStr for JobSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "latest" => Ok(JobSelector::Latest),
            "*" | "all" => Ok(JobSelector::All),
            other => other
                .parse::<u64>()
                .map(|n| JobSelector::Id(JobId(n)))
                .map_err(|_| format!("invalid job selector {:?}: expected an id, 'latest' or '*'", other)),
        }
    }
}

impl fmt::Display for JobSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobSelector::Id(id) => write!(f, "{}", id),
            JobSelector::Latest => f.write_str("latest"),
            JobSelector::All => f.write_str("*"),
        }
    }
}

/// Output of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub job_id: JobId,
    /// `None` when the job does not exist
    pub status: Option<JobStatus>,
    pub text: String,
    /// Directory the log was synced down to
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogsOutput {
    pub entries: Vec<LogEntry>,
    /// Worst exit code over all selected jobs
    pub exit_code: i32,
}

/// How a worker's run ended
enum Finish {
    /// Terminal event to record; the driver was registered
    Done(JobEvent),
    /// Terminal event to record; no driver was ever registered
    Unstarted(JobEvent),
    /// Driver went away; status is left for the reconciler
    DriverLost,
}

#[derive(Clone)]
pub struct JobTracker<B, C> {
    store: Store,
    backend: B,
    clock: C,
    executor: Executor<C>,
    lanes: Lanes,
    workers: Arc<Mutex<HashMap<(String, JobId), CancellationToken>>>,
    changed: Arc<watch::Sender<u64>>,
    logs_root: PathBuf,
}

impl<B, C> JobTracker<B, C>
where
    B: Backend,
    C: Clock,
{
    pub fn new(
        store: Store,
        backend: B,
        clock: C,
        executor: Executor<C>,
        lanes: Lanes,
        logs_root: PathBuf,
    ) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            store,
            backend,
            clock,
            executor,
            lanes,
            workers: Arc::new(Mutex::new(HashMap::new())),
            changed: Arc::new(changed),
            logs_root,
        }
    }

    fn workers(&self) -> std::sync::MutexGuard<'_, HashMap<(String, JobId), CancellationToken>> {
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self) {
        self.changed.send_modify(|generation| *generation += 1);
    }

    pub fn job(&self, cluster: &str, id: JobId) -> Option<Job> {
        self.store.read(|s| s.job(cluster, id).cloned())
    }

    /// All jobs of a cluster, oldest first
    pub fn queue(&self, cluster: &str) -> Result<Vec<Job>, EngineError> {
        self.store.read(|s| {
            if s.cluster(cluster).is_none() {
                return Err(EngineError::ClusterNotFound(cluster.to_string()));
            }
            Ok(s.jobs_of(cluster).cloned().collect())
        })
    }

    pub fn active_jobs(&self, cluster: &str) -> Vec<Job> {
        self.store.read(|s| {
            s.jobs_of(cluster)
                .filter(|j| !j.is_terminal())
                .cloned()
                .collect()
        })
    }

    /// Whether an in-process worker still owns the job
    pub fn has_worker(&self, cluster: &str, id: JobId) -> bool {
        self.workers().contains_key(&(cluster.to_string(), id))
    }

    /// Apply a job event through compare-and-set
    ///
    /// Returns the new record, or `None` when the event was not a legal
    /// transition (for example because the job is already terminal).
    pub(crate) fn transition(
        &self,
        cluster: &str,
        id: JobId,
        event: JobEvent,
    ) -> Result<Option<Job>, EngineError> {
        let mut effects = Vec::new();
        let committed = self.store.update(|state| {
            let current = state.job(cluster, id)?;
            let (next, fx) = current.transition(event, &self.clock);
            effects = fx;
            if &next == current {
                return None;
            }
            Some((Operation::JobUpsert { job: next.clone() }, next))
        })?;
        self.executor.execute_all(effects);
        if committed.is_some() {
            self.notify();
        }
        Ok(committed)
    }

    /// Submit a task to an UP cluster
    ///
    /// Returns `None` for a task with nothing to run; such a task never
    /// consumes a job id.
    pub async fn submit(
        &self,
        handle: &ClusterHandle,
        task: &Task,
        run_setup: bool,
        request_id: Option<&RequestId>,
    ) -> Result<Option<JobId>, EngineError> {
        let cluster = handle.cluster_name.as_str();
        if task.is_dummy(run_setup) {
            tracing::debug!(cluster, "nothing to run, no job submitted");
            return Ok(None);
        }
        let setup = task.effective_setup(run_setup).map(str::to_string);
        let run = task.effective_run().map(str::to_string);

        let (job, cancel) = {
            let _lane = self.lanes.lock(cluster).await;
            match self.store.read(|s| s.cluster(cluster).map(|c| c.status)) {
                None => return Err(EngineError::ClusterNotFound(cluster.to_string())),
                Some(status) if status != nb_core::ClusterStatus::Up => {
                    return Err(EngineError::ClusterNotUp {
                        cluster: cluster.to_string(),
                        status,
                    })
                }
                Some(_) => {}
            }

            let job = self.store.update(|state| {
                let mut job = Job::new(state.next_job_id(cluster), cluster, &self.clock);
                job.name = task.name.clone();
                job.setup = setup.clone();
                job.run = run.clone();
                job.request_id = request_id.map(|r| r.0.clone());
                Some((Operation::JobUpsert { job: job.clone() }, job))
            })?;
            let Some(job) = job else {
                return Err(EngineError::ClusterNotFound(cluster.to_string()));
            };

            // Registered before the lane is released so the reconciler never
            // sees a PENDING job without its worker
            let cancel = CancellationToken::new();
            self.workers()
                .insert((cluster.to_string(), job.id), cancel.clone());
            (job, cancel)
        };
        self.notify();
        apply_cluster_event(
            &self.store,
            &self.executor,
            &self.clock,
            cluster,
            ClusterEvent::Touched,
        )?;

        tracing::info!(cluster, job_id = %job.id, setup = setup.is_some(), "job submitted");

        let tracker = self.clone();
        let handle = handle.clone();
        let envs = task.envs.clone();
        let job_id = job.id;
        let span = tracing::info_span!("job", cluster = %handle.cluster_name, %job_id);
        tokio::spawn(
            async move {
                tracker.drive(handle, job_id, setup, run, envs, cancel).await;
            }
            .instrument(span),
        );

        Ok(Some(job_id))
    }

    async fn drive(
        &self,
        handle: ClusterHandle,
        job_id: JobId,
        setup: Option<String>,
        run: Option<String>,
        envs: BTreeMap<String, String>,
        cancel: CancellationToken,
    ) {
        let cluster = handle.cluster_name.as_str();
        let finish = self
            .run_phases(&handle, job_id, setup.as_deref(), run.as_deref(), &envs, &cancel)
            .await;

        match finish {
            Finish::Done(event) => {
                // Terminal state first, so a reconciler racing with the
                // release below sees a finished job
                self.record(cluster, job_id, event);
                if let Err(e) = self.backend.finish_driver(&handle, job_id).await {
                    tracing::warn!(error = %e, "failed to release driver");
                }
            }
            Finish::Unstarted(event) => self.record(cluster, job_id, event),
            Finish::DriverLost => {
                tracing::warn!("driver lost, leaving status for reconciliation");
            }
        }

        self.workers().remove(&(cluster.to_string(), job_id));
        if let Err(e) = apply_cluster_event(
            &self.store,
            &self.executor,
            &self.clock,
            cluster,
            ClusterEvent::Touched,
        ) {
            tracing::warn!(error = %e, "failed to record cluster activity");
        }
    }

    async fn run_phases(
        &self,
        handle: &ClusterHandle,
        job_id: JobId,
        setup: Option<&str>,
        run: Option<&str>,
        envs: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Finish {
        let cluster = handle.cluster_name.as_str();
        if cancel.is_cancelled() {
            return Finish::Unstarted(JobEvent::Cancel);
        }
        if let Err(e) = self.backend.start_driver(handle, job_id).await {
            tracing::error!(error = %e, "failed to start driver");
            return Finish::Unstarted(JobEvent::Failed { exit_code: None });
        }
        if cancel.is_cancelled() {
            return Finish::Done(JobEvent::Cancel);
        }

        if let Some(setup) = setup {
            self.record(cluster, job_id, JobEvent::SetupStarted);
            match self
                .backend
                .run_phase(handle, job_id, Phase::Setup, setup, envs, cancel)
                .await
            {
                Ok(PhaseOutcome::Exited(0)) => {}
                Ok(outcome) => return finish_for(outcome),
                Err(e) => {
                    tracing::error!(error = %e, "setup could not run");
                    return Finish::Done(JobEvent::Failed { exit_code: None });
                }
            }
        }

        if cancel.is_cancelled() {
            return Finish::Done(JobEvent::Cancel);
        }
        self.record(cluster, job_id, JobEvent::Started);

        let Some(run) = run else {
            return Finish::Done(JobEvent::Succeeded);
        };
        match self
            .backend
            .run_phase(handle, job_id, Phase::Run, run, envs, cancel)
            .await
        {
            Ok(outcome) => finish_for(outcome),
            Err(e) => {
                tracing::error!(error = %e, "run could not start");
                Finish::Done(JobEvent::Failed { exit_code: None })
            }
        }
    }

    fn record(&self, cluster: &str, job_id: JobId, event: JobEvent) {
        if let Err(e) = self.transition(cluster, job_id, event) {
            tracing::error!(error = %e, "failed to record job status");
        }
    }

    /// Cancel a job; terminal jobs are left alone and their status returned
    pub async fn cancel(&self, cluster: &str, job_id: JobId) -> Result<JobStatus, EngineError> {
        let job = self.job(cluster, job_id).ok_or_else(|| EngineError::JobNotFound {
            cluster: cluster.to_string(),
            job_id,
        })?;
        if job.is_terminal() {
            return Ok(job.status);
        }

        self.transition(cluster, job_id, JobEvent::Cancel)?;
        if let Some(token) = self.workers().get(&(cluster.to_string(), job_id)) {
            token.cancel();
        }

        if matches!(job.status, JobStatus::SettingUp | JobStatus::Running) {
            let handle = self.store.read(|s| s.cluster(cluster).and_then(|c| c.handle.clone()));
            if let Some(handle) = handle {
                if let Err(e) = self.backend.cancel_job(&handle, job_id).await {
                    tracing::warn!(cluster, %job_id, error = %e, "backend cancel failed");
                }
            }
        }

        let status = self
            .job(cluster, job_id)
            .map(|j| j.status)
            .unwrap_or(JobStatus::Cancelled);
        tracing::info!(cluster, %job_id, %status, "job cancel requested");
        Ok(status)
    }

    /// Cancel every non-terminal job of a cluster being torn down
    pub async fn abandon_cluster(&self, cluster: &str) -> Result<usize, EngineError> {
        let active = self.active_jobs(cluster);
        for job in &active {
            self.cancel(cluster, job.id).await?;
        }
        Ok(active.len())
    }

    /// Record that a job's driver is gone; only non-terminal jobs change
    pub fn mark_driver_lost(&self, cluster: &str, job_id: JobId) -> Result<bool, EngineError> {
        let changed = self.transition(cluster, job_id, JobEvent::DriverLost)?;
        if let Some(token) = self.workers().get(&(cluster.to_string(), job_id)) {
            token.cancel();
        }
        Ok(changed.is_some())
    }

    /// Resolve once the job reaches a terminal state or its cluster is no
    /// longer UP, returning the job as last recorded
    ///
    /// A stopped cluster's jobs stay non-terminal until the reconciler sees
    /// the cluster UP again.
    pub async fn wait(&self, cluster: &str, job_id: JobId) -> Result<Job, EngineError> {
        let mut changed = self.changed.subscribe();
        let mut poll = tokio::time::interval(CLUSTER_POLL);
        let mut last: Option<Job> = None;
        loop {
            let (job, up) = self.store.read(|s| {
                (
                    s.job(cluster, job_id).cloned(),
                    s.cluster(cluster).is_some_and(|c| c.is_up()),
                )
            });
            let job = match (job, last.take()) {
                (Some(job), _) | (None, Some(job)) => job,
                (None, None) => {
                    return Err(EngineError::JobNotFound {
                        cluster: cluster.to_string(),
                        job_id,
                    })
                }
            };
            if job.is_terminal() {
                return Ok(job);
            }
            if !up {
                tracing::info!(cluster, %job_id, status = %job.status, "cluster left UP, no longer waiting for job");
                return Ok(job);
            }
            last = Some(job);
            tokio::select! {
                _ = changed.changed() => {}
                _ = poll.tick() => {}
            }
        }
    }

    pub async fn logs(
        &self,
        cluster: &str,
        selectors: &[JobSelector],
        sync_down: bool,
    ) -> Result<LogsOutput, EngineError> {
        let selectors = if selectors.is_empty() {
            &[JobSelector::Latest][..]
        } else {
            selectors
        };
        let (handle, jobs) = self.store.read(|s| {
            let Some(record) = s.cluster(cluster) else {
                return Err(EngineError::ClusterNotFound(cluster.to_string()));
            };
            let mut ids: Vec<JobId> = Vec::new();
            for selector in selectors {
                let selected: Vec<JobId> = match selector {
                    JobSelector::Id(id) => vec![*id],
                    JobSelector::Latest => s.jobs_of(cluster).last().map(|j| j.id).into_iter().collect(),
                    JobSelector::All => s.jobs_of(cluster).map(|j| j.id).collect(),
                };
                for id in selected {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
            let jobs: Vec<(JobId, Option<Job>)> = ids
                .into_iter()
                .map(|id| (id, s.job(cluster, id).cloned()))
                .collect();
            Ok((record.handle.clone(), jobs))
        })?;

        let mut entries = Vec::with_capacity(jobs.len());
        for (job_id, job) in jobs {
            let Some(job) = job else {
                entries.push(LogEntry {
                    job_id,
                    status: None,
                    text: format!("Job {} not found.\n", job_id),
                    path: None,
                });
                continue;
            };

            let mut text = match &handle {
                Some(handle) => match self.backend.job_output(handle, job_id).await {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(cluster, %job_id, error = %e, "could not read job output");
                        String::new()
                    }
                },
                None => String::new(),
            };
            if let Some(trailer) = trailer(&job) {
                if !text.is_empty() && !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str(&trailer);
            }

            let path = if sync_down {
                let dir = self
                    .logs_root
                    .join(cluster)
                    .join(format!("job-{}", job_id));
                tokio::fs::create_dir_all(&dir).await?;
                tokio::fs::write(dir.join("run.log"), &text).await?;
                Some(dir)
            } else {
                None
            };

            entries.push(LogEntry {
                job_id,
                status: Some(job.status),
                text,
                path,
            });
        }

        let exit_code = if entries.is_empty() {
            EXIT_NOT_FOUND
        } else {
            worst_exit_code(entries.iter().map(|e| match e.status {
                Some(status) => status.exit_code(),
                None => EXIT_NOT_FOUND,
            }))
        };
        Ok(LogsOutput { entries, exit_code })
    }
}

fn finish_for(outcome: PhaseOutcome) -> Finish {
    match outcome {
        PhaseOutcome::Exited(0) => Finish::Done(JobEvent::Succeeded),
        PhaseOutcome::Exited(code) => Finish::Done(JobEvent::Failed {
            exit_code: Some(code),
        }),
        PhaseOutcome::Cancelled => Finish::Done(JobEvent::Cancel),
        PhaseOutcome::DriverLost => Finish::DriverLost,
    }
}

fn trailer(job: &Job) -> Option<String> {
    match job.status {
        JobStatus::Cancelled => Some(format!("Job {} was cancelled.\n", job.id)),
        JobStatus::FailedDriver => Some(format!(
            "Job {} failed: its driver was lost (cluster stopped or interrupted).\n",
            job.id
        )),
        _ => None,
    }
}

#[cfg(test)]
#[path = "jobs_tests.rs"]
mod tests;
