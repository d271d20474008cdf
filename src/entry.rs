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
    ptr::NonNull,
    sync::atomic::{fence, AtomicUsize, Ordering},
};

use crate::blob::BlobBuffer;

/// One cached blob (spec §3).
///
/// Participates in exactly one bucket chain (`bucket_next`) and in the
/// insertion-ordered list (`list_prev`/`list_next`) while resident in
/// the cache; both link fields and `expires_at` are guarded by the
/// cache's mutex. `refcount` is not: it is manipulated with atomics so
/// that `Cache::return_blob` never needs the lock (spec §4.6, §9).
pub(crate) struct Entry {
    /// Raw handle value; `0` only ever appears transiently before the
    /// entry is published into the cache's tables under the lock.
    pub(crate) handle: u64,
    pub(crate) expires_at: u64,
    refcount: AtomicUsize,
    pub(crate) blob: BlobBuffer,

    pub(crate) bucket_next: Option<NonNull<Entry>>,
    pub(crate) list_prev: Option<NonNull<Entry>>,
    pub(crate) list_next: Option<NonNull<Entry>>,
}

impl Entry {
    pub(crate) fn boxed(handle: u64, expires_at: u64, blob: BlobBuffer) -> Box<Entry> {
        Box::new(Entry {
            handle,
            expires_at,
            refcount: AtomicUsize::new(1),
            blob,
            bucket_next: None,
            list_prev: None,
            list_next: None,
        })
    }

    /// Increments the refcount for a new borrow. Must be called while
    /// the entry is known to be reachable (under the cache's mutex, or
    /// while already holding a borrow).
    pub(crate) unsafe fn inc_refs(ptr: NonNull<Entry>) {
        ptr.as_ref().refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the refcount. Returns `true` if this decrement
    /// dropped the count to zero, meaning the caller must now free the
    /// entry (see `Entry::free`). Uses release/acquire so that all
    /// writes made by every prior borrower happen-before the free,
    /// mirroring `Arc`'s drop implementation.
    pub(crate) unsafe fn dec_refs(ptr: NonNull<Entry>) -> bool {
        if ptr.as_ref().refcount.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            true
        } else {
            false
        }
    }

    /// Frees an entry whose refcount has reached zero. The `BlobBuffer`
    /// is dropped (and its own allocation freed) as part of dropping
    /// the boxed `Entry`.
    ///
    /// # Safety
    /// `ptr` must not be reachable from any cache structure or any
    /// other borrow; this must be called at most once per entry.
    pub(crate) unsafe fn free(ptr: NonNull<Entry>) {
        drop(Box::from_raw(ptr.as_ptr()));
    }
}
