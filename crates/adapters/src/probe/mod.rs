// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Context reachability and inventory probes

mod config;

pub use config::{ConfiguredContext, StaticContextProbe};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeContextProbe, ProbeCall};

use async_trait::async_trait;
use nb_core::{Inventory, Reachability};
use thiserror::Error;

/// Errors from probing a context
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("unknown context: {0}")]
    UnknownContext(String),
    #[error("probe failed for {context}: {message}")]
    Failed { context: String, message: String },
}

/// Adapter that answers "can I reach this context, and what does it have?"
#[async_trait]
pub trait ContextProbe: Clone + Send + Sync + 'static {
    async fn probe(&self, context: &str) -> Result<Reachability, ProbeError>;

    /// Total accelerators the context owns, ignoring what is allocated
    async fn inventory(&self, context: &str) -> Result<Inventory, ProbeError>;
}
