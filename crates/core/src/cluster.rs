// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster state machine
//!
//! A cluster record exists from the first launch attempt until teardown.
//! Absence of a record is the ABSENT state; INIT means provisioning has not
//! yet succeeded (first attempt in flight, or an earlier attempt failed).

use crate::clock::Clock;
use crate::effect::{Effect, Event};
use crate::resources::LaunchedResources;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle status of an existing cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterStatus {
    Init,
    Up,
    Stopped,
}

impl ClusterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStatus::Init => "INIT",
            ClusterStatus::Up => "UP",
            ClusterStatus::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque reference to a provisioned cluster, handed out by the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterHandle {
    pub cluster_name: String,
    pub context: String,
    pub backend_id: String,
}

/// Idle shutdown policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Autostop {
    pub idle_minutes: u32,
    /// Tear the cluster down instead of stopping it
    #[serde(default)]
    pub down: bool,
}

impl Autostop {
    pub fn idle(&self) -> Duration {
        Duration::from_secs(u64::from(self.idle_minutes) * 60)
    }
}

/// Events that can change cluster state
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    /// First successful provisioning (from INIT)
    Provisioned {
        handle: ClusterHandle,
        resources: LaunchedResources,
    },
    /// Stopped explicitly, by autostop, or observed stopped out-of-band
    Stopped,
    /// Brought back up on its original context
    Restarted { handle: ClusterHandle },
    /// A provisioning attempt failed; status is left as it was
    ProvisionFailed { reason: String },
    /// Activity on the cluster resets the idle clock
    Touched,
    /// Set or clear the autostop policy
    AutostopSet { autostop: Option<Autostop> },
}

/// A cluster record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    pub status: ClusterStatus,
    #[serde(default)]
    pub handle: Option<ClusterHandle>,
    #[serde(default)]
    pub launched_resources: Option<LaunchedResources>,
    #[serde(default)]
    pub autostop: Option<Autostop>,
    pub last_activity_ms: u64,
    pub created_at_ms: u64,
    pub status_updated_at_ms: u64,
}

/// Timer id used for a cluster's idle timer
pub fn autostop_timer_id(cluster: &str) -> String {
    format!("autostop:{}", cluster)
}

impl Cluster {
    /// Create a new record in INIT
    pub fn new(name: impl Into<String>, clock: &impl Clock) -> Self {
        let now = clock.epoch_ms();
        Cluster {
            name: name.into(),
            status: ClusterStatus::Init,
            handle: None,
            launched_resources: None,
            autostop: None,
            last_activity_ms: now,
            created_at_ms: now,
            status_updated_at_ms: now,
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == ClusterStatus::Up
    }

    pub fn timer_id(&self) -> String {
        autostop_timer_id(&self.name)
    }

    /// Time left before the idle timer should fire, measured from `now_ms`
    pub fn autostop_remaining(&self, now_ms: u64) -> Option<Duration> {
        let autostop = self.autostop?;
        let deadline = self
            .last_activity_ms
            .saturating_add(autostop.idle().as_millis() as u64);
        Some(Duration::from_millis(deadline.saturating_sub(now_ms)))
    }

    fn arm_timer(&self) -> Vec<Effect> {
        match self.autostop {
            Some(autostop) if self.is_up() => vec![Effect::SetTimer {
                id: self.timer_id(),
                duration: autostop.idle(),
            }],
            _ => vec![],
        }
    }

    /// Pure transition function - returns new state and effects
    pub fn transition(&self, event: ClusterEvent, clock: &impl Clock) -> (Cluster, Vec<Effect>) {
        let now = clock.epoch_ms();

        match (self.status, event) {
            (ClusterStatus::Init, ClusterEvent::Provisioned { handle, resources }) => {
                let cluster = Cluster {
                    status: ClusterStatus::Up,
                    handle: Some(handle.clone()),
                    launched_resources: Some(resources),
                    last_activity_ms: now,
                    status_updated_at_ms: now,
                    ..self.clone()
                };
                let mut effects = vec![Effect::Emit(Event::ClusterProvisioned {
                    cluster: self.name.clone(),
                    context: handle.context,
                })];
                effects.extend(cluster.arm_timer());
                (cluster, effects)
            }

            (ClusterStatus::Stopped, ClusterEvent::Restarted { handle }) => {
                let cluster = Cluster {
                    status: ClusterStatus::Up,
                    handle: Some(handle.clone()),
                    last_activity_ms: now,
                    status_updated_at_ms: now,
                    ..self.clone()
                };
                let mut effects = vec![Effect::Emit(Event::ClusterProvisioned {
                    cluster: self.name.clone(),
                    context: handle.context,
                })];
                effects.extend(cluster.arm_timer());
                (cluster, effects)
            }

            (ClusterStatus::Up, ClusterEvent::Stopped) => {
                let cluster = Cluster {
                    status: ClusterStatus::Stopped,
                    status_updated_at_ms: now,
                    ..self.clone()
                };
                let effects = vec![
                    Effect::CancelTimer { id: self.timer_id() },
                    Effect::Emit(Event::ClusterStopped {
                        cluster: self.name.clone(),
                    }),
                ];
                (cluster, effects)
            }

            (ClusterStatus::Init | ClusterStatus::Stopped, ClusterEvent::ProvisionFailed { reason }) => {
                let effects = vec![Effect::Emit(Event::ClusterProvisionFailed {
                    cluster: self.name.clone(),
                    reason,
                })];
                (self.clone(), effects)
            }

            (ClusterStatus::Up, ClusterEvent::Touched) => {
                let cluster = Cluster {
                    last_activity_ms: now,
                    ..self.clone()
                };
                let effects = cluster.arm_timer();
                (cluster, effects)
            }

            (_, ClusterEvent::AutostopSet { autostop }) => {
                let cluster = Cluster {
                    autostop,
                    last_activity_ms: now,
                    ..self.clone()
                };
                let effects = match autostop {
                    Some(_) => cluster.arm_timer(),
                    None => vec![Effect::CancelTimer { id: self.timer_id() }],
                };
                (cluster, effects)
            }

            // Invalid transitions - no change
            _ => (self.clone(), vec![]),
        }
    }
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod tests;
