// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-cluster serialization

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// One async lock per cluster name
///
/// Lifecycle operations and job-id allocation on a cluster take its lane;
/// distinct clusters never contend.
#[derive(Clone, Default)]
pub struct Lanes {
    lanes: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl Lanes {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, cluster: &str) -> OwnedMutexGuard<()> {
        let lane = {
            let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(lanes.entry(cluster.to_string()).or_default())
        };
        lane.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_cluster_is_serialized() {
        let lanes = Lanes::new();
        let guard = lanes.lock("c1").await;

        let waiter = {
            let lanes = lanes.clone();
            tokio::spawn(async move {
                let _guard = lanes.lock("c1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn distinct_clusters_do_not_contend() {
        let lanes = Lanes::new();
        let _c1 = lanes.lock("c1").await;
        let c2 = tokio::time::timeout(Duration::from_secs(1), lanes.lock("c2")).await;
        assert!(c2.is_ok());
    }
}
