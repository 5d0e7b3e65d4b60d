// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Context failover: pick a context for a new cluster and track allocations
//!
//! Candidates are tried in configured order. Each one is probed for
//! reachability and, when accelerators are requested, for inventory; the
//! first context with enough free accelerators wins and the allocation is
//! recorded in the ledger under the cluster's name.

use nb_adapters::ContextProbe;
use nb_core::{AcceleratorRequest, Inventory, LaunchedResources, Reachability, ResourceSpec};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Contexts tried for placement, in order
    pub allowed_contexts: Vec<String>,
    /// Upper bound for each reachability or inventory probe
    pub probe_timeout: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            allowed_contexts: Vec::new(),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// Why a candidate context was passed over
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Unreachable,
    Nonexistent,
    TimedOut,
    ProbeFailed(String),
    Insufficient {
        accelerator: String,
        available: u32,
        requested: u32,
    },
}

impl SkipReason {
    /// The context could not be talked to at all
    pub fn is_unreachable(&self) -> bool {
        !matches!(self, SkipReason::Insufficient { .. })
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Unreachable => f.write_str("unreachable"),
            SkipReason::Nonexistent => f.write_str("does not exist"),
            SkipReason::TimedOut => f.write_str("probe timed out"),
            SkipReason::ProbeFailed(message) => write!(f, "probe failed: {}", message),
            SkipReason::Insufficient {
                accelerator,
                available,
                requested,
            } => write!(
                f,
                "only {} of {} {} available",
                available, requested, accelerator
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub context: String,
    pub reason: SkipReason,
}

#[derive(Debug, Error)]
pub enum FailoverError {
    #[error("context {context} is not in allowed_contexts [{}]", .allowed.join(", "))]
    ContextNotAllowed {
        context: String,
        allowed: Vec<String>,
    },
    #[error("backend context {context} is unreachable: {reason}")]
    UnreachableBackend { context: String, reason: SkipReason },
    #[error("pinned context {context} cannot satisfy {requested}: {reason}")]
    PinnedUnavailable {
        context: String,
        requested: String,
        reason: SkipReason,
    },
    #[error("resources exhausted: no context satisfies {requested}{}", format_skipped(.skipped))]
    NoMatchingContext {
        requested: String,
        skipped: Vec<Skipped>,
    },
}

fn format_skipped(skipped: &[Skipped]) -> String {
    if skipped.is_empty() {
        return " (no contexts configured)".to_string();
    }
    let parts: Vec<String> = skipped
        .iter()
        .map(|s| format!("{} ({})", s.context, s.reason))
        .collect();
    format!("; tried {}", parts.join(", "))
}

/// Human-readable form of a resource request
pub fn describe_request(spec: &ResourceSpec) -> String {
    match (&spec.accelerator, spec.cpus) {
        (Some(acc), Some(cpus)) => format!("{} with {} CPUs", acc, cpus),
        (Some(acc), None) => acc.to_string(),
        (None, Some(cpus)) => format!("{} CPUs", cpus),
        (None, None) => "any resources".to_string(),
    }
}

/// Where a cluster was placed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub context: String,
    pub resources: LaunchedResources,
}

#[derive(Debug, Clone)]
struct Allocation {
    context: String,
    accelerator: Option<AcceleratorRequest>,
}

/// Picks a context for a resource request and owns the allocation ledger
#[derive(Clone)]
pub struct ContextScheduler<P> {
    probe: P,
    config: Arc<FailoverConfig>,
    ledger: Arc<Mutex<HashMap<String, Allocation>>>,
}

impl<P: ContextProbe> ContextScheduler<P> {
    pub fn new(probe: P, config: FailoverConfig) -> Self {
        Self {
            probe,
            config: Arc::new(config),
            ledger: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn allowed_contexts(&self) -> &[String] {
        &self.config.allowed_contexts
    }

    /// Choose a context for `cluster` and allocate its accelerators
    pub async fn place(&self, cluster: &str, spec: &ResourceSpec) -> Result<Placement, FailoverError> {
        let requested = describe_request(spec);

        if let Some(pin) = &spec.context {
            self.check_allowed(pin)?;
            return match self.try_context(cluster, pin, spec).await {
                Ok(()) => Ok(self.placement(pin, spec)),
                Err(reason) if reason.is_unreachable() => Err(FailoverError::UnreachableBackend {
                    context: pin.clone(),
                    reason,
                }),
                Err(reason) => Err(FailoverError::PinnedUnavailable {
                    context: pin.clone(),
                    requested,
                    reason,
                }),
            };
        }

        let mut skipped = Vec::new();
        for context in &self.config.allowed_contexts {
            match self.try_context(cluster, context, spec).await {
                Ok(()) => {
                    tracing::info!(cluster, context = %context, %requested, "context selected");
                    return Ok(self.placement(context, spec));
                }
                Err(reason) => {
                    tracing::info!(cluster, context = %context, %reason, "context skipped");
                    skipped.push(Skipped {
                        context: context.clone(),
                        reason,
                    });
                }
            }
        }

        // A lone candidate that cannot be reached is a connectivity problem,
        // not a capacity one
        if let [only] = skipped.as_slice() {
            if only.reason.is_unreachable() {
                return Err(FailoverError::UnreachableBackend {
                    context: only.context.clone(),
                    reason: only.reason.clone(),
                });
            }
        }
        Err(FailoverError::NoMatchingContext { requested, skipped })
    }

    /// Re-allocate the accelerators of a cluster restarting on its own context
    pub async fn reserve(&self, cluster: &str, resources: &LaunchedResources) -> Result<(), FailoverError> {
        self.allocate(cluster, &resources.context, resources.accelerator.as_ref())
            .await
            .map_err(|reason| {
                if reason.is_unreachable() {
                    FailoverError::UnreachableBackend {
                        context: resources.context.clone(),
                        reason,
                    }
                } else {
                    FailoverError::PinnedUnavailable {
                        context: resources.context.clone(),
                        requested: resources
                            .accelerator
                            .as_ref()
                            .map(|a| a.to_string())
                            .unwrap_or_else(|| "any resources".to_string()),
                        reason,
                    }
                }
            })
    }

    /// Record an allocation without checking inventory (state recovery)
    pub fn restore(&self, cluster: &str, resources: &LaunchedResources) {
        self.lock().insert(
            cluster.to_string(),
            Allocation {
                context: resources.context.clone(),
                accelerator: resources.accelerator.clone(),
            },
        );
    }

    /// Drop the allocation held by `cluster`; returns whether there was one
    pub fn release(&self, cluster: &str) -> bool {
        let released = self.lock().remove(cluster).is_some();
        if released {
            tracing::debug!(cluster, "allocation released");
        }
        released
    }

    /// Accelerators currently allocated on a context
    pub fn allocated(&self, context: &str) -> Inventory {
        let ledger = self.lock();
        let mut totals: HashMap<String, u32> = HashMap::new();
        for allocation in ledger.values().filter(|a| a.context == context) {
            if let Some(acc) = &allocation.accelerator {
                *totals.entry(acc.name.clone()).or_default() += acc.count;
            }
        }
        totals.into_iter().collect()
    }

    /// Live inventory minus the ledger
    pub async fn available(&self, context: &str) -> Result<Inventory, FailoverError> {
        self.check_allowed(context)?;
        let inventory = self
            .inventory(context)
            .await
            .map_err(|reason| FailoverError::UnreachableBackend {
                context: context.to_string(),
                reason,
            })?;
        let allocated = self.allocated(context);
        Ok(inventory
            .iter()
            .map(|(name, total)| (name.to_string(), total.saturating_sub(allocated.count(name))))
            .collect())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Allocation>> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_allowed(&self, context: &str) -> Result<(), FailoverError> {
        if self.config.allowed_contexts.iter().any(|c| c == context) {
            Ok(())
        } else {
            Err(FailoverError::ContextNotAllowed {
                context: context.to_string(),
                allowed: self.config.allowed_contexts.clone(),
            })
        }
    }

    fn placement(&self, context: &str, spec: &ResourceSpec) -> Placement {
        Placement {
            context: context.to_string(),
            resources: LaunchedResources::from_spec(context, spec),
        }
    }

    async fn try_context(&self, cluster: &str, context: &str, spec: &ResourceSpec) -> Result<(), SkipReason> {
        match tokio::time::timeout(self.config.probe_timeout, self.probe.probe(context)).await {
            Err(_) => return Err(SkipReason::TimedOut),
            Ok(Err(e)) => return Err(SkipReason::ProbeFailed(e.to_string())),
            Ok(Ok(Reachability::Unreachable)) => return Err(SkipReason::Unreachable),
            Ok(Ok(Reachability::Nonexistent)) => return Err(SkipReason::Nonexistent),
            Ok(Ok(Reachability::Reachable)) => {}
        }
        self.allocate(cluster, context, spec.accelerator.as_ref()).await
    }

    async fn inventory(&self, context: &str) -> Result<Inventory, SkipReason> {
        match tokio::time::timeout(self.config.probe_timeout, self.probe.inventory(context)).await {
            Err(_) => Err(SkipReason::TimedOut),
            Ok(Err(e)) => Err(SkipReason::ProbeFailed(e.to_string())),
            Ok(Ok(inventory)) => Ok(inventory),
        }
    }

    async fn allocate(
        &self,
        cluster: &str,
        context: &str,
        accelerator: Option<&AcceleratorRequest>,
    ) -> Result<(), SkipReason> {
        let Some(wanted) = accelerator else {
            self.lock().insert(
                cluster.to_string(),
                Allocation {
                    context: context.to_string(),
                    accelerator: None,
                },
            );
            return Ok(());
        };

        let inventory = self.inventory(context).await?;

        // Check and record under one lock
        let mut ledger = self.lock();
        let in_use: u32 = ledger
            .iter()
            .filter(|(name, a)| name.as_str() != cluster && a.context == context)
            .filter_map(|(_, a)| a.accelerator.as_ref())
            .filter(|a| a.name == wanted.name)
            .map(|a| a.count)
            .sum();
        let available = inventory.count(&wanted.name).saturating_sub(in_use);
        if available < wanted.count {
            return Err(SkipReason::Insufficient {
                accelerator: wanted.name.clone(),
                available,
                requested: wanted.count,
            });
        }
        ledger.insert(
            cluster.to_string(),
            Allocation {
                context: context.to_string(),
                accelerator: Some(wanted.clone()),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
#[path = "failover_tests.rs"]
mod tests;
