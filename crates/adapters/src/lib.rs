// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
// Enable coverage(off) attribute for excluding test infrastructure
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Adapters for external I/O: compute backends and context probes

pub mod backend;
pub mod probe;
pub mod retry;
pub mod traced;

pub use backend::{Backend, BackendError, LocalBackend, Phase, PhaseOutcome};
pub use probe::{ConfiguredContext, ContextProbe, ProbeError, StaticContextProbe};
pub use retry::RetryBackend;
pub use traced::TracedBackend;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub use backend::{BackendCall, FakeBackend};
#[cfg(any(test, feature = "test-support"))]
pub use probe::{FakeContextProbe, ProbeCall};
