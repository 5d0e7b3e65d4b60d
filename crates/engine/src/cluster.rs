// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster lifecycle: provisioning, restart, stop, teardown and autostop

use crate::executor::Executor;
use crate::failover::{describe_request, ContextScheduler};
use crate::lane::Lanes;
use crate::EngineError;
use nb_adapters::{Backend, BackendError, ContextProbe};
use nb_core::{
    Autostop, Clock, Cluster, ClusterEvent, ClusterHandle, ClusterStatus, Effect, Operation,
    ResourceSpec,
};
use nb_storage::Store;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Caller-supplied launch knobs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchOptions {
    /// Negative cancels autostop; `None` leaves the current policy alone
    #[serde(default)]
    pub idle_minutes_to_autostop: Option<i32>,
    /// Tear down instead of stopping when idle
    #[serde(default)]
    pub down: bool,
    /// Skip setup when an UP cluster is reused
    #[serde(default)]
    pub fast: bool,
}

impl LaunchOptions {
    /// Autostop change requested: `None` means unchanged, `Some(None)` cancels
    pub fn autostop(&self) -> Option<Option<Autostop>> {
        match (self.idle_minutes_to_autostop, self.down) {
            (Some(minutes), _) if minutes < 0 => Some(None),
            (Some(minutes), down) => Some(Some(Autostop {
                idle_minutes: minutes.unsigned_abs(),
                down,
            })),
            (None, true) => Some(Some(Autostop {
                idle_minutes: 0,
                down: true,
            })),
            (None, false) => None,
        }
    }
}

/// A cluster record as shown by `status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRecord {
    #[serde(flatten)]
    pub cluster: Cluster,
    /// Jobs not yet in a terminal state
    pub active_jobs: usize,
    /// Time left on the idle timer
    #[serde(default)]
    pub autostop_in_ms: Option<u64>,
}

/// Result of bringing a cluster up for a launch
#[derive(Debug, Clone)]
pub struct ClusterUp {
    pub handle: ClusterHandle,
    /// The cluster was already UP and nothing was provisioned
    pub reused: bool,
}

/// Apply a cluster event through compare-and-set, then run its effects
///
/// Nothing is written when the transition leaves the record unchanged.
pub(crate) fn apply_cluster_event<C: Clock>(
    store: &Store,
    executor: &Executor<C>,
    clock: &C,
    name: &str,
    event: ClusterEvent,
) -> Result<Option<Cluster>, EngineError> {
    let mut effects = Vec::new();
    let committed = store.update(|state| {
        let current = state.cluster(name)?;
        let (next, fx) = current.transition(event, clock);
        effects = fx;
        if &next == current {
            return None;
        }
        Some((Operation::ClusterUpsert { cluster: next.clone() }, next))
    })?;
    executor.execute_all(effects);
    Ok(committed)
}

#[derive(Clone)]
pub struct ClusterManager<B, P, C> {
    store: Store,
    backend: B,
    failover: ContextScheduler<P>,
    clock: C,
    executor: Executor<C>,
    lanes: Lanes,
}

impl<B, P, C> ClusterManager<B, P, C>
where
    B: Backend,
    P: ContextProbe,
    C: Clock,
{
    pub fn new(
        store: Store,
        backend: B,
        failover: ContextScheduler<P>,
        clock: C,
        executor: Executor<C>,
        lanes: Lanes,
    ) -> Self {
        Self {
            store,
            backend,
            failover,
            clock,
            executor,
            lanes,
        }
    }

    pub fn get(&self, name: &str) -> Option<Cluster> {
        self.store.read(|s| s.cluster(name).cloned())
    }

    fn apply(&self, name: &str, event: ClusterEvent) -> Result<Option<Cluster>, EngineError> {
        apply_cluster_event(&self.store, &self.executor, &self.clock, name, event)
    }

    fn existing(&self, name: &str) -> Result<Cluster, EngineError> {
        self.get(name)
            .ok_or_else(|| EngineError::ClusterNotFound(name.to_string()))
    }

    /// Make sure `name` is UP with resources satisfying `spec`
    ///
    /// An UP cluster is reused, a STOPPED one restarted on its original
    /// context, and an INIT or missing one placed and provisioned.
    pub async fn ensure_up(
        &self,
        name: &str,
        spec: &ResourceSpec,
        cancel: &CancellationToken,
    ) -> Result<ClusterUp, EngineError> {
        let _lane = self.lanes.lock(name).await;
        self.refresh_locked(name).await?;

        match self.get(name) {
            Some(cluster) if cluster.is_up() => {
                self.check_fits(&cluster, spec)?;
                let handle = up_handle(&cluster)?;
                self.apply(name, ClusterEvent::Touched)?;
                Ok(ClusterUp {
                    handle,
                    reused: true,
                })
            }
            Some(cluster) if cluster.status == ClusterStatus::Stopped => {
                self.check_fits(&cluster, spec)?;
                let handle = self.restart_locked(&cluster, cancel).await?;
                Ok(ClusterUp {
                    handle,
                    reused: false,
                })
            }
            Some(_) => {
                let handle = self.provision_locked(name, spec, cancel).await?;
                Ok(ClusterUp {
                    handle,
                    reused: false,
                })
            }
            None => {
                self.store.commit(Operation::ClusterUpsert {
                    cluster: Cluster::new(name, &self.clock),
                })?;
                let handle = self.provision_locked(name, spec, cancel).await?;
                Ok(ClusterUp {
                    handle,
                    reused: false,
                })
            }
        }
    }

    /// Handle of an UP cluster, after checking with the backend
    pub async fn require_up(&self, name: &str) -> Result<ClusterHandle, EngineError> {
        let _lane = self.lanes.lock(name).await;
        self.refresh_locked(name).await?;
        let cluster = self.existing(name)?;
        up_handle(&cluster)
    }

    pub async fn stop(&self, name: &str) -> Result<Cluster, EngineError> {
        let _lane = self.lanes.lock(name).await;
        self.refresh_locked(name).await?;
        let cluster = self.existing(name)?;
        match cluster.status {
            ClusterStatus::Stopped => Ok(cluster),
            ClusterStatus::Init => Err(EngineError::ClusterNotUp {
                cluster: name.to_string(),
                status: ClusterStatus::Init,
            }),
            ClusterStatus::Up => self.stop_locked(&cluster).await,
        }
    }

    pub async fn start(&self, name: &str, cancel: &CancellationToken) -> Result<ClusterHandle, EngineError> {
        let _lane = self.lanes.lock(name).await;
        self.refresh_locked(name).await?;
        let cluster = self.existing(name)?;
        match cluster.status {
            ClusterStatus::Up => up_handle(&cluster),
            ClusterStatus::Stopped => self.restart_locked(&cluster, cancel).await,
            ClusterStatus::Init => Err(EngineError::ClusterNotUp {
                cluster: name.to_string(),
                status: ClusterStatus::Init,
            }),
        }
    }

    /// Tear the cluster down and remove its record
    pub async fn down(&self, name: &str) -> Result<(), EngineError> {
        let _lane = self.lanes.lock(name).await;
        let cluster = self.existing(name)?;
        self.down_locked(&cluster).await
    }

    pub fn set_autostop(&self, name: &str, autostop: Option<Autostop>) -> Result<(), EngineError> {
        match autostop {
            Some(a) => tracing::info!(cluster = name, idle_minutes = a.idle_minutes, down = a.down, "autostop set"),
            None => tracing::info!(cluster = name, "autostop cancelled"),
        }
        self.apply(name, ClusterEvent::AutostopSet { autostop })?;
        Ok(())
    }

    /// Reset the idle clock
    pub fn touch(&self, name: &str) -> Result<(), EngineError> {
        self.apply(name, ClusterEvent::Touched)?;
        Ok(())
    }

    pub async fn status(&self, name: Option<&str>, refresh: bool) -> Result<Vec<ClusterRecord>, EngineError> {
        let names: Vec<String> = match name {
            Some(n) => vec![n.to_string()],
            None => self.store.read(|s| s.clusters.keys().cloned().collect()),
        };

        if refresh {
            for n in &names {
                let _lane = self.lanes.lock(n).await;
                self.refresh_locked(n).await?;
            }
        }

        let now = self.clock.epoch_ms();
        Ok(self.store.read(|s| {
            names
                .iter()
                .filter_map(|n| s.cluster(n))
                .map(|c| ClusterRecord {
                    cluster: c.clone(),
                    active_jobs: s.jobs_of(&c.name).filter(|j| !j.is_terminal()).count(),
                    autostop_in_ms: c
                        .is_up()
                        .then(|| c.autostop_remaining(now))
                        .flatten()
                        .map(|d| d.as_millis() as u64),
                })
                .collect()
        }))
    }

    /// Idle timer fired for `name`
    pub async fn on_autostop(&self, name: &str) -> Result<(), EngineError> {
        let _lane = self.lanes.lock(name).await;
        let Some(cluster) = self.get(name) else {
            return Ok(());
        };
        let (true, Some(autostop)) = (cluster.is_up(), cluster.autostop) else {
            return Ok(());
        };

        let active = self
            .store
            .read(|s| s.jobs_of(name).filter(|j| !j.is_terminal()).count());
        if active > 0 {
            tracing::debug!(cluster = name, active, "cluster busy, autostop re-armed");
            self.executor.execute(Effect::SetTimer {
                id: cluster.timer_id(),
                duration: autostop.idle(),
            });
            return Ok(());
        }

        tracing::info!(cluster = name, idle_minutes = autostop.idle_minutes, down = autostop.down, "cluster idle, autostopping");
        if autostop.down {
            self.down_locked(&cluster).await
        } else {
            self.stop_locked(&cluster).await.map(|_| ())
        }
    }

    /// Reconcile an UP record with what the backend reports
    async fn refresh_locked(&self, name: &str) -> Result<(), EngineError> {
        let Some(cluster) = self.get(name).filter(|c| c.is_up()) else {
            return Ok(());
        };
        let Some(handle) = cluster.handle.clone() else {
            return Ok(());
        };

        match self.backend.cluster_status(&handle).await {
            Ok(Some(ClusterStatus::Up)) => {}
            Ok(Some(status)) => {
                tracing::warn!(cluster = name, backend_status = %status, "cluster stopped out-of-band");
                self.apply(name, ClusterEvent::Stopped)?;
                self.failover.release(name);
            }
            Ok(None) => {
                tracing::warn!(cluster = name, "cluster no longer exists on the backend");
                self.forget(&cluster)?;
            }
            Err(e) => {
                tracing::warn!(cluster = name, error = %e, "could not refresh cluster status");
            }
        }
        Ok(())
    }

    fn check_fits(&self, cluster: &Cluster, spec: &ResourceSpec) -> Result<(), EngineError> {
        match &cluster.launched_resources {
            Some(launched) if !launched.satisfies(spec) => Err(EngineError::ResourcesMismatch {
                cluster: cluster.name.clone(),
                launched: launched.to_string(),
                requested: describe_request(spec),
            }),
            _ => Ok(()),
        }
    }

    async fn provision_locked(
        &self,
        name: &str,
        spec: &ResourceSpec,
        cancel: &CancellationToken,
    ) -> Result<ClusterHandle, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled(format!("launch of {}", name)));
        }

        let placement = match self.failover.place(name, spec).await {
            Ok(p) => p,
            Err(e) => {
                self.apply(name, ClusterEvent::ProvisionFailed { reason: e.to_string() })?;
                return Err(e.into());
            }
        };

        match self.backend.provision(name, &placement.resources, cancel).await {
            Ok(handle) => {
                self.apply(
                    name,
                    ClusterEvent::Provisioned {
                        handle: handle.clone(),
                        resources: placement.resources,
                    },
                )?;
                Ok(handle)
            }
            Err(BackendError::Cancelled) => {
                self.failover.release(name);
                Err(EngineError::Cancelled(format!("launch of {}", name)))
            }
            Err(e) => {
                self.failover.release(name);
                let reason = e.to_string();
                self.apply(name, ClusterEvent::ProvisionFailed { reason: reason.clone() })?;
                Err(EngineError::Provision {
                    cluster: name.to_string(),
                    reason,
                })
            }
        }
    }

    async fn restart_locked(
        &self,
        cluster: &Cluster,
        cancel: &CancellationToken,
    ) -> Result<ClusterHandle, EngineError> {
        let name = cluster.name.as_str();
        let (Some(handle), Some(resources)) = (&cluster.handle, &cluster.launched_resources) else {
            return Err(EngineError::ClusterNotUp {
                cluster: name.to_string(),
                status: cluster.status,
            });
        };
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled(format!("start of {}", name)));
        }

        if let Err(e) = self.failover.reserve(name, resources).await {
            self.apply(name, ClusterEvent::ProvisionFailed { reason: e.to_string() })?;
            return Err(e.into());
        }

        match self.backend.restart(handle, cancel).await {
            Ok(handle) => {
                self.apply(name, ClusterEvent::Restarted { handle: handle.clone() })?;
                Ok(handle)
            }
            Err(BackendError::Cancelled) => {
                self.failover.release(name);
                Err(EngineError::Cancelled(format!("start of {}", name)))
            }
            Err(e) => {
                self.failover.release(name);
                let reason = e.to_string();
                self.apply(name, ClusterEvent::ProvisionFailed { reason: reason.clone() })?;
                Err(EngineError::Provision {
                    cluster: name.to_string(),
                    reason,
                })
            }
        }
    }

    async fn stop_locked(&self, cluster: &Cluster) -> Result<Cluster, EngineError> {
        let handle = up_handle(cluster)?;
        self.backend.stop(&handle).await?;
        self.failover.release(&cluster.name);
        let stopped = self.apply(&cluster.name, ClusterEvent::Stopped)?;
        Ok(stopped.unwrap_or_else(|| cluster.clone()))
    }

    async fn down_locked(&self, cluster: &Cluster) -> Result<(), EngineError> {
        if let Some(handle) = &cluster.handle {
            self.backend.teardown(handle).await?;
        }
        self.forget(cluster)?;
        tracing::info!(cluster = %cluster.name, "cluster torn down");
        Ok(())
    }

    fn forget(&self, cluster: &Cluster) -> Result<(), EngineError> {
        self.failover.release(&cluster.name);
        self.executor.execute(Effect::CancelTimer {
            id: cluster.timer_id(),
        });
        self.store.commit(Operation::ClusterDelete {
            name: cluster.name.clone(),
        })?;
        Ok(())
    }
}

fn up_handle(cluster: &Cluster) -> Result<ClusterHandle, EngineError> {
    match (&cluster.handle, cluster.status) {
        (Some(handle), ClusterStatus::Up) => Ok(handle.clone()),
        (_, status) => Err(EngineError::ClusterNotUp {
            cluster: cluster.name.clone(),
            status,
        }),
    }
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod tests;
