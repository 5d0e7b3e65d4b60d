// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test utilities for CLI integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

/// Isolated state and socket directories for one test
pub struct TestEnv {
    temp: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp directory");
        std::fs::create_dir_all(temp.path().join("state")).expect("Failed to create state dir");
        std::fs::create_dir_all(temp.path().join("sock")).expect("Failed to create socket dir");
        Self { temp }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.temp.path().join("state")
    }

    pub fn socket_dir(&self) -> PathBuf {
        self.temp.path().join("sock")
    }

    pub fn write_config(&self, contents: &str) {
        std::fs::write(self.state_dir().join("config.toml"), contents)
            .expect("Failed to write config");
    }

    /// `nb` pointed at this environment
    pub fn nb(&self) -> Command {
        let mut cmd = Command::cargo_bin("nb").expect("nb binary");
        cmd.env("NB_STATE_DIR", self.state_dir())
            .env("NB_SOCKET_DIR", self.socket_dir())
            .env_remove("NB_CONFIG")
            .env_remove("RUST_LOG")
            .timeout(std::time::Duration::from_secs(60));
        if let Some(nbd) = nbd_binary() {
            cmd.env("NB_DAEMON_BINARY", nbd);
        }
        cmd
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        let _ = self.nb().args(["daemon", "stop"]).output();
    }
}

/// The daemon binary, when the workspace has built it
pub fn nbd_binary() -> Option<PathBuf> {
    let nb = assert_cmd::cargo::cargo_bin("nb");
    let dir = nb.parent()?;
    let nbd = dir.join(format!("nbd{}", std::env::consts::EXE_SUFFIX));
    exists(&nbd).then_some(nbd)
}

fn exists(path: &Path) -> bool {
    path.is_file()
}
