// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compute contexts a cluster can be placed on

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Result of probing a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reachability {
    Reachable,
    Unreachable,
    Nonexistent,
}

impl fmt::Display for Reachability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Reachability::Reachable => "REACHABLE",
            Reachability::Unreachable => "UNREACHABLE",
            Reachability::Nonexistent => "NONEXISTENT",
        };
        f.write_str(s)
    }
}

/// Accelerator type to total count
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Inventory(BTreeMap<String, u32>);

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, accelerator: impl AsRef<str>, count: u32) -> Self {
        self.0.insert(accelerator.as_ref().to_uppercase(), count);
        self
    }

    pub fn count(&self, accelerator: &str) -> u32 {
        self.0.get(accelerator).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, u32)> for Inventory {
    fn from_iter<I: IntoIterator<Item = (String, u32)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.to_uppercase(), v))
                .collect(),
        )
    }
}
