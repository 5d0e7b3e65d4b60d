// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job state machine and the job exit-code convention

use crate::clock::Clock;
use crate::effect::{Effect, Event};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-cluster job number, starting at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for JobId {
    fn from(n: u64) -> Self {
        JobId(n)
    }
}

/// Exit code for a job that succeeded
pub const EXIT_SUCCEEDED: i32 = 0;
/// Exit code for a job that failed, including driver loss
pub const EXIT_FAILED: i32 = 100;
/// Exit code for a job that has not finished yet
pub const EXIT_NOT_FINISHED: i32 = 101;
/// Exit code for a job that does not exist
pub const EXIT_NOT_FOUND: i32 = 102;
/// Exit code for a cancelled job
pub const EXIT_CANCELLED: i32 = 103;

/// Combine exit codes of several jobs: 100 > 101 > 103 > 102 > 0
pub fn worst_exit_code(codes: impl IntoIterator<Item = i32>) -> i32 {
    fn rank(code: i32) -> u8 {
        match code {
            EXIT_FAILED => 4,
            EXIT_NOT_FINISHED => 3,
            EXIT_CANCELLED => 2,
            EXIT_NOT_FOUND => 1,
            _ => 0,
        }
    }
    codes
        .into_iter()
        .max_by_key(|c| rank(*c))
        .unwrap_or(EXIT_SUCCEEDED)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    SettingUp,
    Running,
    Succeeded,
    Failed,
    FailedDriver,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::FailedDriver | JobStatus::Cancelled
        )
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            JobStatus::Succeeded => EXIT_SUCCEEDED,
            JobStatus::Failed | JobStatus::FailedDriver => EXIT_FAILED,
            JobStatus::Cancelled => EXIT_CANCELLED,
            JobStatus::Pending | JobStatus::SettingUp | JobStatus::Running => EXIT_NOT_FINISHED,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::SettingUp => "SETTING_UP",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::FailedDriver => "FAILED_DRIVER",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that can change job state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    SetupStarted,
    Started,
    Succeeded,
    Failed { exit_code: Option<i32> },
    Cancel,
    /// Raised only by the reconciler when the driver is gone
    DriverLost,
}

/// A job on a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub cluster: String,
    #[serde(default)]
    pub name: Option<String>,
    pub status: JobStatus,
    #[serde(default)]
    pub setup: Option<String>,
    #[serde(default)]
    pub run: Option<String>,
    pub submitted_at_ms: u64,
    #[serde(default)]
    pub started_at_ms: Option<u64>,
    #[serde(default)]
    pub ended_at_ms: Option<u64>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl Job {
    /// Create a new job in PENDING
    pub fn new(id: JobId, cluster: impl Into<String>, clock: &impl Clock) -> Self {
        Job {
            id,
            cluster: cluster.into(),
            name: None,
            status: JobStatus::Pending,
            setup: None,
            run: None,
            submitted_at_ms: clock.epoch_ms(),
            started_at_ms: None,
            ended_at_ms: None,
            exit_code: None,
            request_id: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn finish(&self, status: JobStatus, exit_code: Option<i32>, now: u64) -> (Job, Vec<Effect>) {
        let job = Job {
            status,
            exit_code: exit_code.or(self.exit_code),
            ended_at_ms: Some(now),
            ..self.clone()
        };
        let effects = vec![Effect::Emit(Event::JobFinished {
            cluster: self.cluster.clone(),
            job_id: self.id,
            status,
        })];
        (job, effects)
    }

    /// Pure transition function - returns new state and effects
    pub fn transition(&self, event: JobEvent, clock: &impl Clock) -> (Job, Vec<Effect>) {
        let now = clock.epoch_ms();

        match (self.status, event) {
            // Terminal states absorb everything
            (s, _) if s.is_terminal() => (self.clone(), vec![]),

            (JobStatus::Pending, JobEvent::SetupStarted) => {
                let job = Job {
                    status: JobStatus::SettingUp,
                    started_at_ms: Some(now),
                    ..self.clone()
                };
                (job, vec![])
            }

            (JobStatus::Pending | JobStatus::SettingUp, JobEvent::Started) => {
                let job = Job {
                    status: JobStatus::Running,
                    started_at_ms: self.started_at_ms.or(Some(now)),
                    ..self.clone()
                };
                let effects = vec![Effect::Emit(Event::JobStarted {
                    cluster: self.cluster.clone(),
                    job_id: self.id,
                })];
                (job, effects)
            }

            (JobStatus::Running, JobEvent::Succeeded) => {
                self.finish(JobStatus::Succeeded, Some(0), now)
            }

            (_, JobEvent::Failed { exit_code }) => self.finish(JobStatus::Failed, exit_code, now),
            (_, JobEvent::Cancel) => self.finish(JobStatus::Cancelled, None, now),
            (_, JobEvent::DriverLost) => self.finish(JobStatus::FailedDriver, None, now),

            // Invalid transitions - no change
            _ => (self.clone(), vec![]),
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
