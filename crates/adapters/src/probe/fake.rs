// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake context probe for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{ContextProbe, ProbeError};
use async_trait::async_trait;
use nb_core::{Inventory, Reachability};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Recorded probe call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeCall {
    Probe { context: String },
    Inventory { context: String },
}

#[derive(Debug, Clone)]
struct FakeContext {
    reachability: Reachability,
    inventory: Inventory,
    delay: Option<Duration>,
}

/// Fake context probe for testing
#[derive(Clone, Default)]
pub struct FakeContextProbe {
    contexts: Arc<Mutex<HashMap<String, FakeContext>>>,
    calls: Arc<Mutex<Vec<ProbeCall>>>,
}

impl FakeContextProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a context
    pub fn with_context(self, name: &str, reachability: Reachability, inventory: Inventory) -> Self {
        self.set_context(name, reachability, inventory);
        self
    }

    pub fn set_context(&self, name: &str, reachability: Reachability, inventory: Inventory) {
        self.contexts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                name.to_string(),
                FakeContext {
                    reachability,
                    inventory,
                    delay: None,
                },
            );
    }

    /// Make probes of this context hang for `delay`
    pub fn set_delay(&self, name: &str, delay: Duration) {
        if let Some(ctx) = self
            .contexts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(name)
        {
            ctx.delay = Some(delay);
        }
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<ProbeCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn lookup(&self, name: &str) -> Option<FakeContext> {
        self.contexts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }
}

#[async_trait]
impl ContextProbe for FakeContextProbe {
    async fn probe(&self, context: &str) -> Result<Reachability, ProbeError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ProbeCall::Probe {
                context: context.to_string(),
            });
        let Some(ctx) = self.lookup(context) else {
            return Ok(Reachability::Nonexistent);
        };
        if let Some(delay) = ctx.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(ctx.reachability)
    }

    async fn inventory(&self, context: &str) -> Result<Inventory, ProbeError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ProbeCall::Inventory {
                context: context.to_string(),
            });
        self.lookup(context)
            .map(|ctx| ctx.inventory)
            .ok_or_else(|| ProbeError::UnknownContext(context.to_string()))
    }
}
