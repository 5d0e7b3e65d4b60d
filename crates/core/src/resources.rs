// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource requests and the resources a cluster was actually launched with

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from parsing an accelerator request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("accelerator name is empty")]
    EmptyName,
    #[error("invalid accelerator count '{0}'")]
    InvalidCount(String),
}

/// An accelerator type and how many of them are wanted, e.g. `H100:8`
///
/// Names are normalized to uppercase so `h100` and `H100` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AcceleratorRequest {
    pub name: String,
    pub count: u32,
}

impl AcceleratorRequest {
    pub fn new(name: impl AsRef<str>, count: u32) -> Self {
        Self {
            name: name.as_ref().trim().to_uppercase(),
            count,
        }
    }
}

impl FromStr for AcceleratorRequest {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, count) = match s.split_once(':') {
            Some((name, count)) => (name, Some(count)),
            None => (s, None),
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(ResourceError::EmptyName);
        }
        let count = match count {
            None => 1,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ResourceError::InvalidCount(raw.to_string())),
            },
        };
        Ok(Self::new(name, count))
    }
}

impl fmt::Display for AcceleratorRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.count)
    }
}

/// What a task asks for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerator: Option<AcceleratorRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<u32>,
    /// Pin placement to one context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl ResourceSpec {
    pub fn with_accelerator(mut self, accelerator: AcceleratorRequest) -> Self {
        self.accelerator = Some(accelerator);
        self
    }

    pub fn with_cpus(mut self, cpus: u32) -> Self {
        self.cpus = Some(cpus);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Resources a cluster was provisioned with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchedResources {
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerator: Option<AcceleratorRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<u32>,
}

impl LaunchedResources {
    pub fn from_spec(context: impl Into<String>, spec: &ResourceSpec) -> Self {
        Self {
            context: context.into(),
            accelerator: spec.accelerator.clone(),
            cpus: spec.cpus,
        }
    }

    /// Whether a request can run on these resources without re-provisioning
    pub fn satisfies(&self, spec: &ResourceSpec) -> bool {
        if let Some(pin) = &spec.context {
            if pin != &self.context {
                return false;
            }
        }
        if let Some(wanted) = &spec.accelerator {
            match &self.accelerator {
                Some(have) if have.name == wanted.name && have.count >= wanted.count => {}
                _ => return false,
            }
        }
        match (spec.cpus, self.cpus) {
            (Some(wanted), Some(have)) => have >= wanted,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

impl fmt::Display for LaunchedResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.context)?;
        if let Some(acc) = &self.accelerator {
            write!(f, " {{{}}}", acc)?;
        }
        if let Some(cpus) = self.cpus {
            write!(f, " cpus={}", cpus)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod tests;
