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

use std::sync::atomic::AtomicU64;

/// Lock-free operation counters.
///
/// Mirrors the hand-rolled counter struct `foyer-memory`'s
/// `CacheShard` keeps internally (`state.metrics.hit.fetch_add(..)`),
/// rather than pulling in the full `metrics` facade crate: this cache
/// has no exporter surface of its own, so plain `AtomicU64`s are
/// enough for callers to read via `Cache::metrics`.
#[derive(Debug, Default)]
pub struct Metrics {
    pub insert: AtomicU64,
    pub hit: AtomicU64,
    pub miss: AtomicU64,
    pub expire: AtomicU64,
    pub remove: AtomicU64,
    pub reject_capacity: AtomicU64,
    pub reject_size: AtomicU64,
    pub reject_alloc: AtomicU64,
}
