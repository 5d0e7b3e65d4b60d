// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! nb-daemon: wire protocol, paths and configuration shared by `nbd` and `nb`

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod paths;
pub mod protocol;
pub mod settings;

pub use paths::{DaemonPaths, NoStateDir};
pub use protocol::{ContextGpus, DaemonStatus, Request, Response};
pub use settings::{Settings, SettingsError};

/// Startup marker prefix written to the log before anything else
///
/// The CLI uses it to find where the current startup attempt begins.
/// Full format: "--- nbd: starting (pid: 12345) ---"
pub const STARTUP_MARKER_PREFIX: &str = "--- nbd: starting (pid: ";
