// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request records and their workers
//!
//! Every cluster operation runs as a request: a durable record, a worker
//! task that executes the body, and a cancellation token the body observes.
//! Synchronous callers start a request and wait on its [`Completion`].

use crate::executor::Executor;
use crate::jobs::JobTracker;
use crate::EngineError;
use nb_adapters::Backend;
use nb_core::{
    Clock, IdGen, JobId, Operation, Request, RequestEvent, RequestId, RequestKind, RequestResult,
    RequestStatus,
};
use nb_storage::Store;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Handed back immediately by asynchronous submissions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTicket {
    pub request_id: RequestId,
    pub cancel_hint: String,
    pub logs_hint: String,
}

impl RequestTicket {
    fn new(request_id: RequestId) -> Self {
        Self {
            cancel_hint: format!("nb api cancel {}", request_id),
            logs_hint: format!("nb api logs {}", request_id),
            request_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub request_id: RequestId,
    /// Recorded status after the cancel
    pub status: RequestStatus,
    /// Job that was asked to stop along with the request
    #[serde(default)]
    pub cancelled_job: Option<JobId>,
}

/// Commit a request event through compare-and-set
fn apply_request_event<C: Clock>(
    store: &Store,
    executor: &Executor<C>,
    clock: &C,
    changed: &watch::Sender<u64>,
    id: &RequestId,
    event: RequestEvent,
) -> Result<Option<Request>, EngineError> {
    let mut effects = Vec::new();
    let committed = store.update(|state| {
        let current = state.requests.get(id)?;
        let (next, fx) = current.transition(event, clock);
        effects = fx;
        if &next == current {
            return None;
        }
        Some((Operation::RequestUpsert { request: next.clone() }, next))
    })?;
    executor.execute_all(effects);
    if committed.is_some() {
        changed.send_modify(|generation| *generation += 1);
    }
    Ok(committed)
}

/// What a request body sees of its own request
#[derive(Clone)]
pub struct RequestScope<C> {
    id: RequestId,
    cancel: CancellationToken,
    store: Store,
    executor: Executor<C>,
    clock: C,
    changed: Arc<watch::Sender<u64>>,
}

impl<C: Clock> RequestScope<C> {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Append a line to the request log
    pub fn log(&self, line: impl Into<String>) {
        append_log(&self.store, &self.id, line.into());
    }

    /// Record the job this request submitted
    pub fn attach_job(&self, job_id: JobId) -> Result<(), EngineError> {
        apply_request_event(
            &self.store,
            &self.executor,
            &self.clock,
            &self.changed,
            &self.id,
            RequestEvent::AttachJob { job_id },
        )?;
        Ok(())
    }
}

fn append_log(store: &Store, id: &RequestId, line: String) {
    tracing::info!(request_id = %id, "{}", line);
    if let Err(e) = store.commit(Operation::RequestLog {
        id: id.clone(),
        line,
    }) {
        tracing::error!(request_id = %id, error = %e, "failed to append request log");
    }
}

/// Resolves when a request's worker finishes
pub struct Completion {
    id: RequestId,
    rx: oneshot::Receiver<Result<RequestResult, EngineError>>,
}

impl Completion {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub async fn wait(self) -> Result<RequestResult, EngineError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(EngineError::RequestFailed {
                id: self.id.0,
                message: "request worker exited".to_string(),
            }),
        }
    }
}

#[derive(Clone)]
pub struct RequestManager<B, C, G> {
    store: Store,
    clock: C,
    id_gen: G,
    executor: Executor<C>,
    jobs: JobTracker<B, C>,
    inflight: Arc<Mutex<HashMap<RequestId, CancellationToken>>>,
    changed: Arc<watch::Sender<u64>>,
}

impl<B, C, G> RequestManager<B, C, G>
where
    B: Backend,
    C: Clock,
    G: IdGen,
{
    pub fn new(
        store: Store,
        clock: C,
        id_gen: G,
        executor: Executor<C>,
        jobs: JobTracker<B, C>,
    ) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            store,
            clock,
            id_gen,
            executor,
            jobs,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            changed: Arc::new(changed),
        }
    }

    fn inflight(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, CancellationToken>> {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(
        &self,
        id: &RequestId,
        event: RequestEvent,
    ) -> Result<Option<Request>, EngineError> {
        apply_request_event(
            &self.store,
            &self.executor,
            &self.clock,
            &self.changed,
            id,
            event,
        )
    }

    /// Record a PENDING request and spawn its worker
    pub fn start<F, Fut>(
        &self,
        kind: RequestKind,
        cluster: &str,
        body: F,
    ) -> Result<(RequestTicket, Completion), EngineError>
    where
        F: FnOnce(RequestScope<C>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<RequestResult, EngineError>> + Send + 'static,
    {
        let id = self.id_gen.request_id();
        let request = Request::new(id.clone(), kind, cluster, &self.clock);
        self.store.commit(Operation::RequestUpsert { request })?;
        self.changed.send_modify(|generation| *generation += 1);

        let cancel = CancellationToken::new();
        self.inflight().insert(id.clone(), cancel.clone());
        tracing::info!(request_id = %id, %kind, cluster, "request submitted");

        let scope = RequestScope {
            id: id.clone(),
            cancel,
            store: self.store.clone(),
            executor: self.executor.clone(),
            clock: self.clock.clone(),
            changed: Arc::clone(&self.changed),
        };
        let (tx, rx) = oneshot::channel();
        let manager = self.clone();
        let span = tracing::info_span!("request", request_id = %id, %kind, cluster);
        tokio::spawn(
            async move {
                let request_id = scope.id.clone();
                let result = manager.run(scope, body).await;
                manager.inflight().remove(&request_id);
                // Nobody may be waiting
                let _ = tx.send(result);
            }
            .instrument(span),
        );

        Ok((RequestTicket::new(id.clone()), Completion { id, rx }))
    }

    /// Fire-and-forget variant of [`RequestManager::start`]
    pub fn submit<F, Fut>(
        &self,
        kind: RequestKind,
        cluster: &str,
        body: F,
    ) -> Result<RequestTicket, EngineError>
    where
        F: FnOnce(RequestScope<C>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<RequestResult, EngineError>> + Send + 'static,
    {
        self.start(kind, cluster, body).map(|(ticket, _)| ticket)
    }

    async fn run<F, Fut>(
        &self,
        scope: RequestScope<C>,
        body: F,
    ) -> Result<RequestResult, EngineError>
    where
        F: FnOnce(RequestScope<C>) -> Fut,
        Fut: Future<Output = Result<RequestResult, EngineError>>,
    {
        let id = scope.id.clone();
        let cancelled = || EngineError::Cancelled(format!("request {}", id));

        if self.transition(&id, RequestEvent::Dispatch)?.is_none() {
            tracing::info!("request cancelled before dispatch");
            return Err(cancelled());
        }

        let outcome = body(scope.clone()).await;
        match &outcome {
            Ok(result) => {
                let resolved = RequestEvent::Resolve {
                    result: result.clone(),
                };
                if self.transition(&id, resolved)?.is_some() {
                    scope.log("Request succeeded.");
                }
            }
            Err(e) if e.is_cancelled() => {
                if self.transition(&id, RequestEvent::Cancel)?.is_some() {
                    scope.log("cancelled");
                }
            }
            Err(e) => {
                let failed = RequestEvent::Fail {
                    error: e.to_string(),
                };
                if self.transition(&id, failed)?.is_some() {
                    scope.log(format!("failed: {}", e));
                }
            }
        }

        let Some(record) = self.request(&id.0) else {
            return Err(EngineError::RequestNotFound(id.0.clone()));
        };
        match (record.status, outcome) {
            (RequestStatus::Cancelled, _) => Err(cancelled()),
            (_, Ok(_)) => Ok(record.result),
            (_, Err(e)) => Err(e),
        }
    }

    /// Cancel a request, and the job it submitted if that is still running
    pub async fn cancel(&self, id: &str) -> Result<CancelOutcome, EngineError> {
        let request = self
            .request(id)
            .ok_or_else(|| EngineError::RequestNotFound(id.to_string()))?;
        let id = request.id.clone();

        if !request.is_terminal() {
            // No await before this commit: CANCELLED is durable before any
            // later completion can land
            if self.transition(&id, RequestEvent::Cancel)?.is_some() {
                append_log(&self.store, &id, "cancelled by user".to_string());
            }
            if let Some(token) = self.inflight().get(&id) {
                token.cancel();
            }
        }

        // Re-read: a job may have been attached since the first read
        let record = self
            .request(&id.0)
            .ok_or_else(|| EngineError::RequestNotFound(id.0.clone()))?;
        let mut cancelled_job = None;
        if matches!(
            record.status,
            RequestStatus::Cancelled | RequestStatus::Succeeded
        ) {
            if let Some(job_id) = record.result.job_id {
                let running = self
                    .jobs
                    .job(&record.cluster, job_id)
                    .is_some_and(|j| !j.is_terminal());
                if running {
                    self.jobs.cancel(&record.cluster, job_id).await?;
                    cancelled_job = Some(job_id);
                }
            }
        }

        tracing::info!(request_id = %id, status = %record.status, ?cancelled_job, "request cancel handled");
        Ok(CancelOutcome {
            request_id: id,
            status: record.status,
            cancelled_job,
        })
    }

    /// Cancel every in-flight request targeting a cluster being torn down
    pub fn cancel_cluster(
        &self,
        cluster: &str,
        except: Option<&RequestId>,
    ) -> Result<Vec<RequestId>, EngineError> {
        let targets: Vec<RequestId> = self.store.read(|s| {
            s.requests
                .values()
                .filter(|r| r.cluster == cluster && !r.is_terminal())
                .filter(|r| Some(&r.id) != except)
                .map(|r| r.id.clone())
                .collect()
        });

        let mut cancelled = Vec::new();
        for id in targets {
            if self.transition(&id, RequestEvent::Cancel)?.is_some() {
                append_log(
                    &self.store,
                    &id,
                    format!("cancelled: cluster {} was torn down", cluster),
                );
                cancelled.push(id.clone());
            }
            if let Some(token) = self.inflight().get(&id) {
                token.cancel();
            }
        }
        Ok(cancelled)
    }

    /// Resolve once the request is terminal
    pub async fn wait(&self, id: &str) -> Result<Request, EngineError> {
        let mut changed = self.changed.subscribe();
        loop {
            let request = self
                .request(id)
                .ok_or_else(|| EngineError::RequestNotFound(id.to_string()))?;
            if request.is_terminal() || changed.changed().await.is_err() {
                return Ok(request);
            }
        }
    }

    /// Look up a request by id or unique id prefix
    pub fn request(&self, id: &str) -> Option<Request> {
        self.store.read(|s| s.get_request(id).cloned())
    }

    pub fn request_logs(&self, id: &str) -> Result<Vec<String>, EngineError> {
        self.request(id)
            .map(|r| r.log)
            .ok_or_else(|| EngineError::RequestNotFound(id.to_string()))
    }

    /// All requests, oldest first
    pub fn list(&self) -> Vec<Request> {
        let mut requests: Vec<Request> =
            self.store.read(|s| s.requests.values().cloned().collect());
        requests.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.id.cmp(&b.id))
        });
        requests
    }

    /// Settle requests left in flight by a previous daemon
    pub fn recover_interrupted(&self) -> Result<usize, EngineError> {
        let stale: Vec<(RequestId, RequestStatus)> = self.store.read(|s| {
            s.requests
                .values()
                .filter(|r| !r.is_terminal())
                .map(|r| (r.id.clone(), r.status))
                .collect()
        });

        let mut settled = 0;
        for (id, status) in stale {
            let (event, line) = match status {
                RequestStatus::Pending => (
                    RequestEvent::Cancel,
                    "cancelled: daemon restarted before dispatch".to_string(),
                ),
                _ => (
                    RequestEvent::Fail {
                        error: "interrupted: daemon restarted".to_string(),
                    },
                    "failed: interrupted: daemon restarted".to_string(),
                ),
            };
            if self.transition(&id, event)?.is_some() {
                append_log(&self.store, &id, line);
                settled += 1;
            }
        }
        if settled > 0 {
            tracing::warn!(settled, "settled requests interrupted by restart");
        }
        Ok(settled)
    }
}

#[cfg(test)]
#[path = "requests_tests.rs"]
mod tests;
