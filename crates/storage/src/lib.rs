// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! nb-storage: WAL-backed persistence for cluster, job and request records

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod state;
mod store;
mod wal;

pub use state::MaterializedState;
pub use store::Store;
pub use wal::{Wal, WalError};
