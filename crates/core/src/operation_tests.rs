// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::clock::FakeClock;
use crate::job::{JobId, JobStatus};

#[test]
fn job_without_optional_fields_still_parses() {
    // Records written before optional fields existed must keep loading
    let json = r#"{"JobUpsert":{"job":{"id":2,"cluster":"c1","status":"RUNNING","submitted_at_ms":5}}}"#;

    let op: Operation = serde_json::from_str(json).unwrap();

    match op {
        Operation::JobUpsert { job } => {
            assert_eq!(job.id, JobId(2));
            assert_eq!(job.status, JobStatus::Running);
            assert!(job.request_id.is_none());
            assert!(job.exit_code.is_none());
        }
        _ => panic!("expected JobUpsert"),
    }
}

#[test]
fn operation_serialization_roundtrip() {
    let clock = FakeClock::new();
    let ops = vec![
        Operation::ClusterUpsert {
            cluster: Cluster::new("c1", &clock),
        },
        Operation::JobUpsert {
            job: Job::new(JobId(1), "c1", &clock),
        },
        Operation::RequestLog {
            id: RequestId::from("req-1"),
            line: "dispatched".to_string(),
        },
        Operation::ClusterDelete {
            name: "c1".to_string(),
        },
    ];

    for op in ops {
        let json = serde_json::to_string(&op).unwrap();
        let parsed: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(op, parsed);
    }
}
