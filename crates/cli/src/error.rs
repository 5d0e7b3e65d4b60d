// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-friendly error display with context and suggestions.
//!
//! This module provides enhanced error types that include:
//! - What went wrong (message)
//! - Why it might have happened (context)
//! - How to fix it (suggestions)

use std::fmt;

use nb_daemon::DaemonPaths;

use crate::client::ClientError;

/// Error with context and recovery suggestions for user-friendly display.
#[derive(Debug)]
pub struct NbError {
    /// What went wrong
    pub message: String,
    /// Why it might have happened
    pub context: Vec<String>,
    /// How to fix it
    pub suggestions: Vec<String>,
}

impl NbError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context.push(ctx.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Explain a client error, pointing at the daemon log where useful
    pub fn from_client(err: &ClientError, paths: Option<&DaemonPaths>) -> Self {
        let log_hint = paths.map(|p| format!("Check the daemon log: {}", p.log_path.display()));
        match err {
            ClientError::DaemonStartFailed(reason) => {
                let mut e = NbError::new("Failed to start the nimbus daemon")
                    .with_context(reason.clone());
                if let Some(hint) = log_hint {
                    e = e.with_suggestion(hint);
                }
                e.with_suggestion("Run it in the foreground to see errors: nb daemon run")
            }
            ClientError::DaemonStartTimeout => {
                let e = NbError::new("Timed out waiting for the nimbus daemon to start");
                match log_hint {
                    Some(hint) => e.with_suggestion(hint),
                    None => e,
                }
            }
            ClientError::DaemonNotRunning => NbError::new("The nimbus daemon is not running")
                .with_suggestion("Start it: nb daemon start"),
            ClientError::Rejected(message) => Self::rejected(message),
            other => NbError::new(other.to_string()),
        }
    }

    fn rejected(message: &str) -> Self {
        let e = NbError::new(message);
        if message.contains("does not exist") {
            e.with_suggestion("List clusters: nb status")
        } else if message.contains("request not found") {
            e.with_suggestion("List requests: nb api status")
        } else if message.contains("not UP") {
            e.with_context("exec only runs on an UP cluster")
                .with_suggestion("Bring it up with: nb start <cluster>")
        } else if message.contains("do not fit cluster") {
            e.with_suggestion("Tear it down first: nb down <cluster>")
        } else {
            e
        }
    }
}

impl fmt::Display for NbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "error: {}", self.message)?;

        if !self.context.is_empty() {
            writeln!(f)?;
            for ctx in &self.context {
                writeln!(f, "  -> {}", ctx)?;
            }
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            writeln!(f, "suggestions:")?;
            for (i, suggestion) in self.suggestions.iter().enumerate() {
                writeln!(f, "  {}. {}", i + 1, suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for NbError {}
