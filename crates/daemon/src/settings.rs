// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration file (`config.toml`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use nb_adapters::ConfiguredContext;
use nb_engine::{FailoverConfig, RuntimeConfig, EVENT_INTERVAL_SECONDS};
use serde::Deserialize;
use thiserror::Error;

/// Name of the context available when no config file exists
pub const LOCAL_CONTEXT: &str = "local";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Parsed `config.toml`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub failover: FailoverSettings,
    pub reconcile: ReconcileSettings,
    pub provision: ProvisionSettings,
    pub requests: RequestSettings,
    pub contexts: Vec<ConfiguredContext>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FailoverSettings {
    /// Tried in this order
    pub allowed_contexts: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileSettings {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisionSettings {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestSettings {
    /// Finished requests older than this are dropped when the daemon starts
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            failover: FailoverSettings::default(),
            reconcile: ReconcileSettings::default(),
            provision: ProvisionSettings::default(),
            requests: RequestSettings::default(),
            contexts: vec![ConfiguredContext::new(LOCAL_CONTEXT)],
        }
    }
}

impl Default for FailoverSettings {
    fn default() -> Self {
        Self {
            allowed_contexts: vec![LOCAL_CONTEXT.to_string()],
            probe_timeout: FailoverConfig::default().probe_timeout,
        }
    }
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(EVENT_INTERVAL_SECONDS),
        }
    }
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(SettingsError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::parse(&content).map_err(|e| match e {
            SettingsError::Parse { source, .. } => SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content).map_err(|source| SettingsError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.provision.max_attempts == 0 {
            return Err(SettingsError::Invalid(
                "provision.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.reconcile.interval.is_zero() {
            return Err(SettingsError::Invalid(
                "reconcile.interval must be positive".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for ctx in &self.contexts {
            if !seen.insert(ctx.name.as_str()) {
                return Err(SettingsError::Invalid(format!(
                    "context {} is defined twice",
                    ctx.name
                )));
            }
        }
        // Unknown names are allowed; placement reports them as nonexistent
        for name in &self.failover.allowed_contexts {
            if !seen.contains(name.as_str()) {
                tracing::warn!(context = %name, "allowed context has no [[contexts]] entry");
            }
        }
        Ok(())
    }

    /// Runtime configuration derived from these settings
    pub fn runtime_config(&self, logs_root: PathBuf) -> RuntimeConfig {
        RuntimeConfig {
            failover: FailoverConfig {
                allowed_contexts: self.failover.allowed_contexts.clone(),
                probe_timeout: self.failover.probe_timeout,
            },
            logs_root,
            reconcile_interval: self.reconcile.interval,
        }
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
