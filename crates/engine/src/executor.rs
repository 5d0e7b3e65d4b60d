// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Effect executor

use crate::Scheduler;
use nb_core::{Clock, Effect, Event};
use std::sync::{Arc, Mutex};

/// Applies the effects returned by state-machine transitions
///
/// Emitted events are logged; timer effects go to the shared scheduler.
#[derive(Clone)]
pub struct Executor<C> {
    scheduler: Arc<Mutex<Scheduler>>,
    clock: C,
}

impl<C: Clock> Executor<C> {
    pub fn new(scheduler: Arc<Mutex<Scheduler>>, clock: C) -> Self {
        Self { scheduler, clock }
    }

    pub fn scheduler(&self) -> Arc<Mutex<Scheduler>> {
        Arc::clone(&self.scheduler)
    }

    pub fn execute_all(&self, effects: Vec<Effect>) {
        for effect in effects {
            self.execute(effect);
        }
    }

    pub fn execute(&self, effect: Effect) {
        match effect {
            Effect::Emit(event) => log_event(&event),
            Effect::SetTimer { id, duration } => {
                tracing::debug!(timer = %id, duration_ms = duration.as_millis() as u64, "timer set");
                self.scheduler
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .set_timer(id, duration, self.clock.now());
            }
            Effect::CancelTimer { id } => {
                tracing::debug!(timer = %id, "timer cancelled");
                self.scheduler
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .cancel_timer(&id);
            }
        }
    }
}

fn log_event(event: &Event) {
    let name = event.name();
    match event {
        Event::ClusterProvisioned { cluster, context } => {
            tracing::info!(event = name, cluster, context, "cluster up")
        }
        Event::ClusterStopped { cluster } => tracing::info!(event = name, cluster, "cluster stopped"),
        Event::ClusterProvisionFailed { cluster, reason } => {
            tracing::warn!(event = name, cluster, reason, "provisioning failed")
        }
        Event::JobStarted { cluster, job_id } => {
            tracing::info!(event = name, cluster, %job_id, "job running")
        }
        Event::JobFinished {
            cluster,
            job_id,
            status,
        } => tracing::info!(event = name, cluster, %job_id, %status, "job finished"),
        Event::RequestFinished { id, status } => {
            tracing::info!(event = name, request_id = %id, %status, "request finished")
        }
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
