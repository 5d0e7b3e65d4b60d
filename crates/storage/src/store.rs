// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared, durable state handle
//!
//! Every write is appended to the WAL before it is applied to the in-memory
//! state, and both happen under one lock so readers never observe a record
//! that is not yet durable.

use crate::{MaterializedState, Wal, WalError};
use nb_core::Operation;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

struct Inner {
    wal: Option<Wal>,
    path: Option<PathBuf>,
    state: MaterializedState,
}

/// Cloneable handle to the materialized state and its WAL
#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<Inner>>,
}

impl Store {
    /// Open the WAL at `path`, replaying it into a fresh state
    pub fn open(path: &Path) -> Result<Self, WalError> {
        let mut state = MaterializedState::default();
        for op in Wal::replay(path)? {
            state.apply(&op);
        }
        let wal = Wal::open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                wal: Some(wal),
                path: Some(path.to_path_buf()),
                state,
            })),
        })
    }

    /// A store with no backing file
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                wal: None,
                path: None,
                state: MaterializedState::default(),
            })),
        }
    }

    /// Persist and apply a single operation
    pub fn commit(&self, op: Operation) -> Result<(), WalError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(wal) = inner.wal.as_mut() {
            wal.append(&op)?;
        }
        inner.state.apply(&op);
        Ok(())
    }

    /// Read from the current state
    pub fn read<T>(&self, f: impl FnOnce(&MaterializedState) -> T) -> T {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&inner.state)
    }

    /// Compare-and-set: `f` inspects the current state and either returns
    /// the operation to commit along with a value, or `None` to leave the
    /// state untouched.
    pub fn update<T>(
        &self,
        f: impl FnOnce(&MaterializedState) -> Option<(Operation, T)>,
    ) -> Result<Option<T>, WalError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some((op, value)) = f(&inner.state) else {
            return Ok(None);
        };
        if let Some(wal) = inner.wal.as_mut() {
            wal.append(&op)?;
        }
        inner.state.apply(&op);
        Ok(Some(value))
    }

    /// Forget finished requests older than the cutoff
    ///
    /// Only the in-memory state changes; the next [`Store::compact`] makes
    /// it durable.
    pub fn prune_requests(&self, finished_before_ms: u64) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.state.prune_requests(finished_before_ms)
    }

    /// Rewrite the WAL to the minimal set of operations for the current state
    pub fn compact(&self) -> Result<(), WalError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(path) = inner.path.clone() else {
            return Ok(());
        };
        let ops = inner.state.snapshot();
        // Drop the old handle before the file is replaced
        inner.wal = None;
        inner.wal = Some(Wal::compact(&path, &ops)?);
        tracing::info!(path = %path.display(), entries = ops.len(), "compacted WAL");
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
