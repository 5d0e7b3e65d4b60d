// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem layout shared by the daemon and the CLI

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
#[error("could not determine state directory (set NB_STATE_DIR or HOME)")]
pub struct NoStateDir;

/// Where the daemon keeps its socket, lock, log, WAL and cluster data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonPaths {
    pub state_dir: PathBuf,
    pub socket_path: PathBuf,
    /// Lock file holding the daemon PID
    pub lock_path: PathBuf,
    pub version_path: PathBuf,
    pub log_path: PathBuf,
    pub wal_path: PathBuf,
    pub config_path: PathBuf,
    /// Root of the local backend's cluster directories
    pub clusters_path: PathBuf,
    /// Destination of `logs --sync-down`
    pub logs_path: PathBuf,
}

impl DaemonPaths {
    /// Resolve paths from `NB_STATE_DIR`, `NB_SOCKET_DIR` and `NB_CONFIG`
    pub fn from_env() -> Result<Self, NoStateDir> {
        let mut paths = Self::at(&state_dir()?, &socket_dir());
        if let Ok(config) = std::env::var("NB_CONFIG") {
            paths.config_path = PathBuf::from(config);
        }
        Ok(paths)
    }

    pub fn at(state_dir: &Path, socket_dir: &Path) -> Self {
        Self {
            state_dir: state_dir.to_path_buf(),
            socket_path: socket_dir.join("nbd.sock"),
            lock_path: state_dir.join("daemon.pid"),
            version_path: state_dir.join("daemon.version"),
            log_path: state_dir.join("daemon.log"),
            wal_path: state_dir.join("wal").join("events.wal"),
            config_path: state_dir.join("config.toml"),
            clusters_path: state_dir.join("clusters"),
            logs_path: state_dir.join("logs"),
        }
    }
}

/// `NB_STATE_DIR`, else `$XDG_STATE_HOME/nimbus`, else `~/.local/state/nimbus`
fn state_dir() -> Result<PathBuf, NoStateDir> {
    if let Ok(dir) = std::env::var("NB_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("nimbus"));
    }
    let home = std::env::var("HOME").map_err(|_| NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/nimbus"))
}

/// Socket directory, kept short for SUN_LEN limits
fn socket_dir() -> PathBuf {
    std::env::var("NB_SOCKET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp/nimbus"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_under_state_dir() {
        let paths = DaemonPaths::at(Path::new("/state"), Path::new("/sock"));
        assert_eq!(paths.socket_path, PathBuf::from("/sock/nbd.sock"));
        assert_eq!(paths.lock_path, PathBuf::from("/state/daemon.pid"));
        assert_eq!(paths.wal_path, PathBuf::from("/state/wal/events.wal"));
        assert_eq!(paths.config_path, PathBuf::from("/state/config.toml"));
        assert_eq!(paths.clusters_path, PathBuf::from("/state/clusters"));
        assert_eq!(paths.logs_path, PathBuf::from("/state/logs"));
    }
}
