// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timer scheduling

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

/// One-shot timers keyed by id
///
/// Setting a timer that already exists replaces its deadline. Stale heap
/// entries are skipped by comparing against the live deadline map.
#[derive(Default)]
pub struct Scheduler {
    heap: BinaryHeap<Reverse<(Instant, String)>>,
    deadlines: HashMap<String, Instant>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_timer(&mut self, id: String, duration: Duration, now: Instant) {
        let fire_at = now + duration;
        self.deadlines.insert(id.clone(), fire_at);
        self.heap.push(Reverse((fire_at, id)));
    }

    pub fn cancel_timer(&mut self, id: &str) {
        self.deadlines.remove(id);
    }

    /// Remove and return the ids of every timer due at `now`
    pub fn fired_timers(&mut self, now: Instant) -> Vec<String> {
        let mut fired = Vec::new();
        while let Some(Reverse((fire_at, _))) = self.heap.peek() {
            if *fire_at > now {
                break;
            }
            let Some(Reverse((fire_at, id))) = self.heap.pop() else {
                break;
            };
            if self.deadlines.get(&id) == Some(&fire_at) {
                self.deadlines.remove(&id);
                fired.push(id);
            }
        }
        fired
    }

    pub fn has_timers(&self) -> bool {
        !self.deadlines.is_empty()
    }

    pub fn has_timer(&self, id: &str) -> bool {
        self.deadlines.contains_key(id)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
