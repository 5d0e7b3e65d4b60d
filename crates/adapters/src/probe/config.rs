// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Probe backed by the daemon's context table

use super::{ContextProbe, ProbeError};
use async_trait::async_trait;
use nb_core::{Inventory, Reachability};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One `[[contexts]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConfiguredContext {
    pub name: String,
    #[serde(default = "default_reachable")]
    pub reachable: bool,
    /// `host:port` that must accept a TCP connection for the context to count as reachable
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub accelerators: BTreeMap<String, u32>,
}

fn default_reachable() -> bool {
    true
}

impl ConfiguredContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reachable: true,
            endpoint: None,
            accelerators: BTreeMap::new(),
        }
    }
}

/// Answers probes from a fixed list of contexts
///
/// A context missing from the list is NONEXISTENT.
#[derive(Clone)]
pub struct StaticContextProbe {
    contexts: Arc<BTreeMap<String, ConfiguredContext>>,
}

impl StaticContextProbe {
    pub fn new(contexts: impl IntoIterator<Item = ConfiguredContext>) -> Self {
        Self {
            contexts: Arc::new(
                contexts
                    .into_iter()
                    .map(|c| (c.name.clone(), c))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl ContextProbe for StaticContextProbe {
    async fn probe(&self, context: &str) -> Result<Reachability, ProbeError> {
        let Some(entry) = self.contexts.get(context) else {
            return Ok(Reachability::Nonexistent);
        };
        if !entry.reachable {
            return Ok(Reachability::Unreachable);
        }
        let Some(endpoint) = &entry.endpoint else {
            return Ok(Reachability::Reachable);
        };
        match tokio::net::TcpStream::connect(endpoint.as_str()).await {
            Ok(_) => Ok(Reachability::Reachable),
            Err(e) => {
                tracing::debug!(context, endpoint, error = %e, "endpoint refused connection");
                Ok(Reachability::Unreachable)
            }
        }
    }

    async fn inventory(&self, context: &str) -> Result<Inventory, ProbeError> {
        self.contexts
            .get(context)
            .map(|c| c.accelerators.clone().into_iter().collect())
            .ok_or_else(|| ProbeError::UnknownContext(context.to_string()))
    }
}
