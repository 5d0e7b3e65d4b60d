// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI command implementations

pub mod api;
pub mod cluster;
pub mod daemon;
pub mod gpus;
pub mod jobs;
pub mod launch;

use std::process::ExitCode;

/// Convert a job exit code convention value into a process exit code
pub fn exit_with(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
