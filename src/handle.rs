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

use std::num::NonZeroU64;

/// Opaque identifier for a live cache entry.
///
/// The wire-level contract this wraps still reserves `0` to mean "no
/// entry"; `Handle` makes that unrepresentable in the type instead of
/// relying on callers to compare against zero, so the public API
/// returns `Option<Handle>` wherever the original returns a `u64` that
/// may be `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(NonZeroU64);

impl Handle {
    pub(crate) fn new(value: u64) -> Self {
        Self(NonZeroU64::new(value).expect("handle allocator must never mint 0"))
    }

    /// The raw 64-bit identifier, for logging or external storage.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

/// Bucket index for a raw handle (spec §4.4: `handle mod bucket_count`).
pub(crate) fn bucket_of(handle: u64, bucket_count: usize) -> usize {
    (handle % bucket_count as u64) as usize
}

/// Monotonic handle allocator (spec §4.2).
///
/// Starts at zero; mints `next + 1`, wrapping to `1` rather than `0`
/// when `next` is `u64::MAX`. There is no recycling scheme beyond this
/// wraparound: collision with a still-live handle after wraparound is
/// assumed impossible in practice because `capacity` is vanishingly
/// small relative to 2^64.
#[derive(Debug, Default)]
pub(crate) struct HandleAllocator {
    next: u64,
}

impl HandleAllocator {
    /// Overwrites the last-minted value. Used by
    /// `Cache::seed_handle_allocator` to exercise wraparound without
    /// minting `u64::MAX` handles first.
    pub(crate) fn preload(next: u64) -> Self {
        Self { next }
    }

    /// Mints the next raw handle value. Never returns 0.
    pub(crate) fn mint(&mut self) -> u64 {
        self.next = if self.next == u64::MAX { 1 } else { self.next + 1 };
        self.next
    }
}
