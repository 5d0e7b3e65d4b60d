// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request id generation

use crate::request::RequestId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Source of request ids
pub trait IdGen: Clone + Send + Sync + 'static {
    fn request_id(&self) -> RequestId;
}

/// Random ids: `req-` followed by the first 12 hex digits of a v4 UUID
#[derive(Clone, Default)]
pub struct UuidIdGen;

impl IdGen for UuidIdGen {
    fn request_id(&self) -> RequestId {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        RequestId(format!("req-{}", &uuid[..12]))
    }
}

/// Deterministic ids for tests: `<prefix>-1`, `<prefix>-2`, ...
///
/// Clones share the counter.
#[derive(Clone)]
pub struct SequentialIdGen {
    prefix: String,
    issued: Arc<AtomicU64>,
}

impl SequentialIdGen {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            issued: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Default for SequentialIdGen {
    fn default() -> Self {
        Self::new("req")
    }
}

impl IdGen for SequentialIdGen {
    fn request_id(&self) -> RequestId {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        RequestId(format!("{}-{}", self.prefix, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_prefixed_and_distinct() {
        let ids: std::collections::HashSet<_> =
            (0..64).map(|_| UuidIdGen.request_id().0).collect();
        assert_eq!(ids.len(), 64);
        for id in &ids {
            assert!(id.starts_with("req-"), "{}", id);
            assert_eq!(id.len(), 16);
        }
    }

    #[test]
    fn sequential_ids_count_across_clones() {
        let a = SequentialIdGen::new("t");
        let b = a.clone();
        assert_eq!(a.request_id().0, "t-1");
        assert_eq!(b.request_id().0, "t-2");
        assert_eq!(a.request_id().0, "t-3");
    }
}
