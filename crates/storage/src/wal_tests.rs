// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use nb_core::{Cluster, FakeClock, Job, JobId};

fn delete(name: &str) -> Operation {
    Operation::ClusterDelete {
        name: name.to_string(),
    }
}

#[test]
fn wal_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.wal");
    let clock = FakeClock::new();

    {
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&Operation::ClusterUpsert {
            cluster: Cluster::new("c1", &clock),
        })
        .unwrap();
        wal.append(&Operation::JobUpsert {
            job: Job::new(JobId(1), "c1", &clock),
        })
        .unwrap();
    }

    let ops = Wal::replay(&path).unwrap();
    assert_eq!(ops.len(), 2);
    assert!(matches!(ops[0], Operation::ClusterUpsert { .. }));
    assert!(matches!(ops[1], Operation::JobUpsert { .. }));
}

#[test]
fn wal_sequence_continues() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.wal");

    {
        let mut wal = Wal::open(&path).unwrap();
        assert_eq!(wal.sequence(), 0);
        wal.append(&delete("x")).unwrap();
        assert_eq!(wal.sequence(), 1);
    }

    {
        let wal = Wal::open(&path).unwrap();
        assert_eq!(wal.sequence(), 1);
    }
}

#[test]
fn wal_replay_nonexistent() {
    let path = Path::new("/nonexistent/path/wal");
    let ops = Wal::replay(path).unwrap();
    assert!(ops.is_empty());
}

#[test]
fn wal_replay_ignores_torn_tail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.wal");
    {
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&delete("a")).unwrap();
    }
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    write!(file, "{{\"seq\":2,\"op\":{{\"ClusterDel").unwrap();

    let ops = Wal::replay(&path).unwrap();
    assert_eq!(ops, vec![delete("a")]);
}

#[test]
fn wal_replay_rejects_corruption_in_the_middle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.wal");
    std::fs::write(&path, "garbage\n{\"seq\":1,\"op\":{\"ClusterDelete\":{\"name\":\"a\"}}}\n").unwrap();

    let err = Wal::replay(&path).unwrap_err();
    assert!(matches!(err, WalError::Corrupt { line: 1, .. }));
}

#[test]
fn compact_rewrites_log_and_resets_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.wal");
    {
        let mut wal = Wal::open(&path).unwrap();
        for name in ["a", "b", "c"] {
            wal.append(&delete(name)).unwrap();
        }
    }

    let wal = Wal::compact(&path, &[delete("c")]).unwrap();
    assert_eq!(wal.sequence(), 1);
    assert_eq!(Wal::replay(&path).unwrap(), vec![delete("c")]);
}
