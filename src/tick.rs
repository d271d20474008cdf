//  Copyright 2024 MrCroxx
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

/// External collaborator (spec §6): a monotonic, never-decreasing
/// count of implementation-defined time units. `timeout` is expressed
/// in the same units as `now()`.
pub trait TickSource: Send + Sync {
    fn now(&self) -> u64;
}

/// Default tick source for production use: nanoseconds since the
/// source was created, backed by `Instant` so it is immune to wall
/// clock adjustments.
#[derive(Debug)]
pub struct SystemTickSource {
    start: Instant,
}

impl SystemTickSource {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for SystemTickSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for SystemTickSource {
    fn now(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }
}

/// Deterministic tick source for tests: the caller advances the clock
/// explicitly rather than relying on real elapsed time, which is what
/// lets tests like "insert at t=0, sweep at t=11" be non-flaky.
#[derive(Debug, Default)]
pub struct ManualTickSource {
    now: AtomicU64,
}

impl ManualTickSource {
    pub fn new(start: u64) -> Self {
        Self { now: AtomicU64::new(start) }
    }

    pub fn set(&self, value: u64) {
        self.now.store(value, Ordering::Relaxed);
    }

    pub fn advance(&self, delta: u64) -> u64 {
        self.now.fetch_add(delta, Ordering::Relaxed) + delta
    }
}

impl TickSource for ManualTickSource {
    fn now(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_tick_source_advances() {
        let ticks = ManualTickSource::new(0);
        assert_eq!(ticks.now(), 0);
        ticks.advance(11);
        assert_eq!(ticks.now(), 11);
        ticks.set(100);
        assert_eq!(ticks.now(), 100);
    }

    #[test]
    fn system_tick_source_is_monotonic() {
        let ticks = SystemTickSource::new();
        let a = ticks.now();
        let b = ticks.now();
        assert!(b >= a);
    }
}
