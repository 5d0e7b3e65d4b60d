// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request state machine
//!
//! Every launch/exec/stop/start/down goes through a request record, whether
//! the caller waits for it or not.

use crate::clock::Clock;
use crate::cluster::ClusterHandle;
use crate::effect::{Effect, Event};
use crate::job::{JobId, JobStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a request
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestKind {
    Launch,
    Exec,
    Down,
    Stop,
    Start,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Launch => "LAUNCH",
            RequestKind::Exec => "EXEC",
            RequestKind::Down => "DOWN",
            RequestKind::Stop => "STOP",
            RequestKind::Start => "START",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Succeeded | RequestStatus::Failed | RequestStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Running => "RUNNING",
            RequestStatus::Succeeded => "SUCCEEDED",
            RequestStatus::Failed => "FAILED",
            RequestStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a request produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestResult {
    #[serde(default)]
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub handle: Option<ClusterHandle>,
    /// Terminal job status, filled in when the caller waited for the job
    #[serde(default)]
    pub job_status: Option<JobStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestEvent {
    /// Worker picked the request up
    Dispatch,
    /// The job service assigned a job id
    AttachJob { job_id: JobId },
    Resolve { result: RequestResult },
    Fail { error: String },
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub kind: RequestKind,
    pub cluster: String,
    pub status: RequestStatus,
    #[serde(default)]
    pub result: RequestResult,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub log: Vec<String>,
    pub created_at_ms: u64,
    #[serde(default)]
    pub finished_at_ms: Option<u64>,
}

impl Request {
    pub fn new(
        id: impl Into<RequestId>,
        kind: RequestKind,
        cluster: impl Into<String>,
        clock: &impl Clock,
    ) -> Self {
        Request {
            id: id.into(),
            kind,
            cluster: cluster.into(),
            status: RequestStatus::Pending,
            result: RequestResult::default(),
            error: None,
            log: Vec::new(),
            created_at_ms: clock.epoch_ms(),
            finished_at_ms: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn finish(&self, request: Request) -> (Request, Vec<Effect>) {
        let effects = vec![Effect::Emit(Event::RequestFinished {
            id: self.id.clone(),
            status: request.status,
        })];
        (request, effects)
    }

    /// Pure transition function - returns new state and effects
    pub fn transition(&self, event: RequestEvent, clock: &impl Clock) -> (Request, Vec<Effect>) {
        let now = clock.epoch_ms();

        match (self.status, event) {
            (RequestStatus::Pending, RequestEvent::Dispatch) => {
                let request = Request {
                    status: RequestStatus::Running,
                    ..self.clone()
                };
                (request, vec![])
            }

            // A job can be assigned after a cancel was recorded; keep the id so
            // the canceller can reach it.
            (RequestStatus::Running | RequestStatus::Cancelled, RequestEvent::AttachJob { job_id })
                if self.result.job_id.is_none() =>
            {
                let mut request = self.clone();
                request.result.job_id = Some(job_id);
                (request, vec![])
            }

            (RequestStatus::Running, RequestEvent::Resolve { result }) => {
                let request = Request {
                    status: RequestStatus::Succeeded,
                    result: RequestResult {
                        job_id: result.job_id.or(self.result.job_id),
                        handle: result.handle.or_else(|| self.result.handle.clone()),
                        job_status: result.job_status.or(self.result.job_status),
                    },
                    finished_at_ms: Some(now),
                    ..self.clone()
                };
                self.finish(request)
            }

            (RequestStatus::Running, RequestEvent::Fail { error }) => {
                let request = Request {
                    status: RequestStatus::Failed,
                    error: Some(error),
                    finished_at_ms: Some(now),
                    ..self.clone()
                };
                self.finish(request)
            }

            (RequestStatus::Pending | RequestStatus::Running, RequestEvent::Cancel) => {
                let request = Request {
                    status: RequestStatus::Cancelled,
                    finished_at_ms: Some(now),
                    ..self.clone()
                };
                self.finish(request)
            }

            // Invalid transitions - no change
            _ => (self.clone(), vec![]),
        }
    }
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
