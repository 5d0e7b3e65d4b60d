// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task definition submitted by launch and exec

use crate::resources::ResourceSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A unit of work: optional setup, optional run command, and what it needs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(default)]
    pub resources: ResourceSpec,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub envs: BTreeMap<String, String>,
}

impl Task {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_setup(mut self, setup: impl Into<String>) -> Self {
        self.setup = Some(setup.into());
        self
    }

    pub fn with_run(mut self, run: impl Into<String>) -> Self {
        self.run = Some(run.into());
        self
    }

    pub fn with_resources(mut self, resources: ResourceSpec) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    /// Setup command that would run, given whether setup is wanted
    pub fn effective_setup(&self, run_setup: bool) -> Option<&str> {
        if run_setup {
            self.setup.as_deref().filter(|s| !s.trim().is_empty())
        } else {
            None
        }
    }

    /// Run command, ignoring blank strings
    pub fn effective_run(&self) -> Option<&str> {
        self.run.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// A task with nothing to execute never becomes a job
    pub fn is_dummy(&self, run_setup: bool) -> bool {
        self.effective_setup(run_setup).is_none() && self.effective_run().is_none()
    }
}
