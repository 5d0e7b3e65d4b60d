// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use proptest::prelude::*;
use yare::parameterized;

#[parameterized(
    bare_name = { "H100", "H100", 1 },
    lowercase = { "h100:8", "H100", 8 },
    padded = { " a10g : 2 ", "A10G", 2 },
)]
fn parses_accelerator_requests(input: &str, name: &str, count: u32) {
    let parsed: AcceleratorRequest = input.parse().unwrap();
    assert_eq!(parsed.name, name);
    assert_eq!(parsed.count, count);
}

#[parameterized(
    empty = { "" },
    missing_name = { ":4" },
    zero = { "H100:0" },
    not_a_number = { "H100:many" },
)]
fn rejects_malformed_accelerator_requests(input: &str) {
    assert!(input.parse::<AcceleratorRequest>().is_err());
}

#[test]
fn displays_as_name_and_count() {
    assert_eq!(AcceleratorRequest::new("h100", 8).to_string(), "H100:8");
}

fn launched(acc: Option<(&str, u32)>, cpus: Option<u32>) -> LaunchedResources {
    LaunchedResources {
        context: "ctx-a".to_string(),
        accelerator: acc.map(|(n, c)| AcceleratorRequest::new(n, c)),
        cpus,
    }
}

#[test]
fn request_without_accelerator_fits_anything() {
    assert!(launched(None, None).satisfies(&ResourceSpec::default()));
    assert!(launched(Some(("H100", 8)), Some(4)).satisfies(&ResourceSpec::default()));
}

#[test]
fn accelerator_must_match_name_and_have_enough() {
    let have = launched(Some(("H100", 2)), None);
    assert!(have.satisfies(&ResourceSpec::default().with_accelerator(AcceleratorRequest::new("H100", 1))));
    assert!(!have.satisfies(&ResourceSpec::default().with_accelerator(AcceleratorRequest::new("H100", 4))));
    assert!(!have.satisfies(&ResourceSpec::default().with_accelerator(AcceleratorRequest::new("A100", 1))));
    assert!(!launched(None, None)
        .satisfies(&ResourceSpec::default().with_accelerator(AcceleratorRequest::new("H100", 1))));
}

#[test]
fn context_pin_must_match() {
    let have = launched(None, None);
    assert!(have.satisfies(&ResourceSpec::default().with_context("ctx-a")));
    assert!(!have.satisfies(&ResourceSpec::default().with_context("ctx-b")));
}

#[test]
fn cpus_must_be_known_and_sufficient() {
    assert!(launched(None, Some(8)).satisfies(&ResourceSpec::default().with_cpus(4)));
    assert!(!launched(None, Some(2)).satisfies(&ResourceSpec::default().with_cpus(4)));
    assert!(!launched(None, None).satisfies(&ResourceSpec::default().with_cpus(1)));
}

proptest! {
    #[test]
    fn parse_accepts_any_positive_count(name in "[a-zA-Z][a-zA-Z0-9]{0,8}", count in 1u32..10_000) {
        let parsed: AcceleratorRequest = format!("{}:{}", name, count).parse().unwrap();
        prop_assert_eq!(parsed.name, name.to_uppercase());
        prop_assert_eq!(parsed.count, count);
    }

    #[test]
    fn launched_spec_always_satisfies_itself(count in 1u32..64, cpus in proptest::option::of(1u32..128)) {
        let mut spec = ResourceSpec::default().with_accelerator(AcceleratorRequest::new("H100", count));
        spec.cpus = cpus;
        let have = LaunchedResources::from_spec("ctx", &spec);
        prop_assert!(have.satisfies(&spec));
    }
}
