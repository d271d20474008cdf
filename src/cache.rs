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
    mem,
    ptr::NonNull,
    sync::atomic::Ordering,
};

use parking_lot::Mutex;

use crate::{
    blob::BlobBuffer,
    borrowed::Borrowed,
    entry::Entry,
    error::{CacheError, Result},
    handle::{bucket_of, Handle, HandleAllocator},
    metrics::Metrics,
    tick::{SystemTickSource, TickSource},
};

const PAGE_SIZE: usize = 4096;

/// Mirrors the fixed-size fields a single-page header layout would
/// carry ahead of its bucket array (spec §6); used only to size the
/// default bucket table, not as `Cache`'s actual memory layout.
#[repr(C)]
struct HeaderLayout {
    mutex: usize,
    list_head: usize,
    list_tail: usize,
    count: usize,
    next_handle: u64,
    capacity: usize,
    max_entry_size: usize,
    timeout: u64,
    bucket_count: usize,
}

fn default_bucket_count() -> usize {
    let header = mem::size_of::<HeaderLayout>();
    let slot = mem::size_of::<Option<NonNull<Entry>>>();
    (PAGE_SIZE.saturating_sub(header) / slot).max(1)
}

/// Construction parameters for `Cache::create` (spec §4.1).
///
/// Every field is public, following the teacher's plain-config-struct
/// idiom (`GenericCacheConfig`): there is nothing here a caller
/// shouldn't be able to set directly.
pub struct CacheConfig<T: TickSource = SystemTickSource> {
    /// Maximum number of resident entries.
    pub capacity: usize,
    /// Maximum payload size `Add` will accept, in bytes.
    pub max_entry_size: usize,
    /// Entry lifetime, in the same units as `ticks.now()`.
    pub timeout: u64,
    pub ticks: T,
}

impl CacheConfig<SystemTickSource> {
    pub fn new(capacity: usize, max_entry_size: usize, timeout: u64) -> Self {
        Self { capacity, max_entry_size, timeout, ticks: SystemTickSource::new() }
    }
}

/// The bucket table, insertion-ordered list, and handle allocator:
/// everything the cache's single mutex guards (spec §3).
struct Inner {
    buckets: Vec<Option<NonNull<Entry>>>,
    list_head: Option<NonNull<Entry>>,
    list_tail: Option<NonNull<Entry>>,
    count: usize,
    handles: HandleAllocator,
}

// SAFETY: `Inner` is only ever touched through `Cache`'s mutex; the
// `NonNull<Entry>`s it holds are never aliased across threads outside
// of that lock (refcount access aside, which doesn't touch `Inner`).
unsafe impl Send for Inner {}

impl Inner {
    fn find(&self, handle: u64, bucket_count: usize) -> Option<NonNull<Entry>> {
        let idx = bucket_of(handle, bucket_count);
        let mut cursor = self.buckets[idx];
        while let Some(node) = cursor {
            let node_ref = unsafe { node.as_ref() };
            if node_ref.handle == handle {
                return Some(node);
            }
            cursor = node_ref.bucket_next;
        }
        None
    }

    fn bucket_unlink(&mut self, idx: usize, target: NonNull<Entry>) {
        let mut cursor = &mut self.buckets[idx];
        loop {
            match *cursor {
                Some(node) if node == target => {
                    *cursor = unsafe { node.as_ref() }.bucket_next;
                    return;
                }
                Some(node) => {
                    // SAFETY: `node` is a live entry owned by this chain;
                    // only its `bucket_next` field is touched.
                    cursor = unsafe { &mut (*node.as_ptr()).bucket_next };
                }
                None => return,
            }
        }
    }

    fn list_push_tail(&mut self, ptr: NonNull<Entry>) {
        unsafe {
            (*ptr.as_ptr()).list_prev = self.list_tail;
            (*ptr.as_ptr()).list_next = None;
        }
        match self.list_tail {
            Some(old) => unsafe { (*old.as_ptr()).list_next = Some(ptr) },
            None => self.list_head = Some(ptr),
        }
        self.list_tail = Some(ptr);
    }

    fn list_unlink(&mut self, ptr: NonNull<Entry>) {
        let (prev, next) = unsafe { ((*ptr.as_ptr()).list_prev, (*ptr.as_ptr()).list_next) };
        match prev {
            Some(p) => unsafe { (*p.as_ptr()).list_next = next },
            None => self.list_head = next,
        }
        match next {
            Some(n) => unsafe { (*n.as_ptr()).list_prev = prev },
            None => self.list_tail = prev,
        }
    }

    /// Links a freshly allocated entry into both structures (spec
    /// §4.3). `ptr.handle` must already be set to its minted value.
    fn publish(&mut self, ptr: NonNull<Entry>, bucket_count: usize) {
        let handle = unsafe { ptr.as_ref() }.handle;
        debug_assert!(
            self.find(handle, bucket_count).is_none(),
            "handle allocator minted a handle that collides with a live entry"
        );
        self.list_push_tail(ptr);
        let idx = bucket_of(handle, bucket_count);
        unsafe { (*ptr.as_ptr()).bucket_next = self.buckets[idx] };
        self.buckets[idx] = Some(ptr);
        self.count += 1;
    }

    fn remove_by_handle(&mut self, handle: u64, bucket_count: usize) -> Option<NonNull<Entry>> {
        let ptr = self.find(handle, bucket_count)?;
        self.bucket_unlink(bucket_of(handle, bucket_count), ptr);
        self.list_unlink(ptr);
        self.count -= 1;
        Some(ptr)
    }

    /// Unlinks the insertion-order head if its `expires_at` is at or
    /// before `threshold`, for `InvalidateExpired`/`InvalidateAll`
    /// (spec §4.5, §4.6). Since the list is insertion-ordered rather
    /// than expiry-ordered, a single non-expired head does not mean
    /// every later entry is also non-expired; callers that need a full
    /// expiry sweep must walk past it. `Cache::invalidate_expired`
    /// intentionally stops at the first non-expired head, treating
    /// insertion order as expiry order (spec §4.5: entries are added
    /// with a fixed `timeout` from the current tick, so insertion
    /// order and expiry order coincide).
    fn unlink_head_if(&mut self, threshold: u64, bucket_count: usize) -> Option<NonNull<Entry>> {
        let head = self.list_head?;
        let head_ref = unsafe { head.as_ref() };
        if head_ref.expires_at > threshold {
            return None;
        }
        let handle = head_ref.handle;
        self.bucket_unlink(bucket_of(handle, bucket_count), head);
        self.list_unlink(head);
        self.count -= 1;
        Some(head)
    }
}

/// A bounded, time-expiring, reference-counted cache of opaque byte
/// blobs (spec §1-§9).
///
/// Guarded entirely by a single `parking_lot::Mutex` standing in for
/// the kernel spinlock the original driver uses (spec §3): there is no
/// sharding here, unlike this crate's ancestor `GenericCache`, because
/// the spec calls for exactly one structural lock. Borrowed payloads
/// are released without ever taking that lock (see `Borrowed`).
pub struct Cache<T: TickSource = SystemTickSource> {
    inner: Mutex<Inner>,
    capacity: usize,
    max_entry_size: usize,
    timeout: u64,
    bucket_count: usize,
    ticks: T,
    metrics: Metrics,
}

impl<T: TickSource> Cache<T> {
    /// `Create` (spec §4.1). The bucket table is sized once, up front,
    /// from a fixed page-size budget independent of `capacity` (spec
    /// §6); the only fallible step is that allocation.
    pub fn create(config: CacheConfig<T>) -> Result<Self> {
        let bucket_count = default_bucket_count();
        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(bucket_count)
            .map_err(|_| CacheError::OutOfMemory)?;
        buckets.resize(bucket_count, None);

        Ok(Self {
            inner: Mutex::new(Inner {
                buckets,
                list_head: None,
                list_tail: None,
                count: 0,
                handles: HandleAllocator::default(),
            }),
            capacity: config.capacity,
            max_entry_size: config.max_entry_size,
            timeout: config.timeout,
            bucket_count,
            ticks: config.ticks,
            metrics: Metrics::default(),
        })
    }

    /// `Add` (spec §4.2-§4.3). Allocates the entry and its blob before
    /// taking the lock, and only mints a handle and publishes once
    /// room has been confirmed; rejects (returns `None`) rather than
    /// evicting when the cache is at `capacity` or `data` exceeds
    /// `max_entry_size`.
    pub fn add(&self, data: &[u8]) -> Option<Handle> {
        if data.len() + crate::blob::HEADER_SIZE > self.max_entry_size {
            self.metrics.reject_size.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(size = data.len(), max = self.max_entry_size, "metacache: rejected oversized add");
            return None;
        }

        let Some(blob) = BlobBuffer::new(data) else {
            self.metrics.reject_alloc.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(size = data.len(), "metacache: rejected add, blob allocation failed");
            return None;
        };
        let expires_at = self.ticks.now().saturating_add(self.timeout);
        let boxed = Entry::boxed(0, expires_at, blob);
        let ptr = NonNull::new(Box::into_raw(boxed)).expect("Box::into_raw never returns null");
        // SAFETY: `ptr` was just boxed and is reachable from nowhere else yet.
        unsafe { (*ptr.as_ptr()).blob.set_owner(ptr) };

        let admitted = {
            let mut inner = self.inner.lock();
            if inner.count < self.capacity {
                let handle = inner.handles.mint();
                unsafe { (*ptr.as_ptr()).handle = handle };
                inner.publish(ptr, self.bucket_count);
                true
            } else {
                false
            }
        };

        if !admitted {
            self.metrics.reject_capacity.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(capacity = self.capacity, "metacache: rejected add at capacity");
            // SAFETY: `ptr` was never published, so it is reachable
            // from nowhere but this function; refcount is still 1.
            unsafe { Entry::free(ptr) };
            return None;
        }

        self.metrics.insert.fetch_add(1, Ordering::Relaxed);
        let handle = unsafe { ptr.as_ref() }.handle;
        tracing::trace!(handle, size = data.len(), "metacache: inserted entry");
        Some(Handle::new(handle))
    }

    /// `Borrow` (spec §4.4), returning the safe RAII guard. Dropping
    /// the returned `Borrowed` performs `Return`.
    pub fn borrow(&self, handle: Handle) -> Option<Borrowed> {
        let (ptr, len) = self.borrow_raw(handle)?;
        // SAFETY: `borrow_raw` incremented the refcount for this borrow.
        Some(Borrowed::new(unsafe { NonNull::new_unchecked(ptr as *mut u8) }, len))
    }

    /// `Borrow` (spec §4.4) at the raw pointer level, for callers that
    /// need to hand the pointer across an FFI boundary. Pair with
    /// `crate::return_blob`.
    pub fn borrow_raw(&self, handle: Handle) -> Option<(*const u8, usize)> {
        let mut inner = self.inner.lock();
        let Some(ptr) = inner.find(handle.get(), self.bucket_count) else {
            drop(inner);
            self.metrics.miss.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        // SAFETY: `ptr` is reachable from the bucket table we just
        // walked, so it is a live entry; incrementing under the lock
        // prevents a concurrent `invalidate` from freeing it first.
        unsafe { Entry::inc_refs(ptr) };
        drop(inner);

        self.metrics.hit.fetch_add(1, Ordering::Relaxed);
        let entry = unsafe { ptr.as_ref() };
        Some((entry.blob.payload_ptr().as_ptr() as *const u8, entry.blob.size()))
    }

    /// `Invalidate` (spec §4.5): removes a specific entry by handle,
    /// regardless of expiry, and releases the cache's own residency
    /// reference. The entry is only actually freed once every
    /// outstanding borrow has also been returned.
    pub fn invalidate(&self, handle: Handle) {
        let removed = {
            let mut inner = self.inner.lock();
            inner.remove_by_handle(handle.get(), self.bucket_count)
        };
        if let Some(ptr) = removed {
            self.metrics.remove.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(handle = handle.get(), "metacache: invalidated entry");
            // SAFETY: `ptr` was just unlinked from both structures, so
            // this is the cache's one residency reference.
            unsafe {
                if Entry::dec_refs(ptr) {
                    Entry::free(ptr);
                }
            }
        }
    }

    /// `InvalidateExpired` (spec §4.5): walks the insertion-ordered
    /// list from the head, removing every entry whose `expires_at` is
    /// at or before the current tick, and stops at the first one that
    /// isn't.
    pub fn invalidate_expired(&self) {
        self.sweep(self.ticks.now(), true);
    }

    /// `InvalidateAll` (spec §4.6): removes every resident entry,
    /// regardless of expiry.
    pub fn invalidate_all(&self) {
        self.sweep(u64::MAX, false);
    }

    fn sweep(&self, threshold: u64, expiring: bool) {
        loop {
            let removed = {
                let mut inner = self.inner.lock();
                inner.unlink_head_if(threshold, self.bucket_count)
            };
            let Some(ptr) = removed else { break };
            if expiring {
                self.metrics.expire.fetch_add(1, Ordering::Relaxed);
            } else {
                self.metrics.remove.fetch_add(1, Ordering::Relaxed);
            }
            // SAFETY: `ptr` was just unlinked from both structures, so
            // this is the cache's one residency reference.
            unsafe {
                tracing::trace!(handle = ptr.as_ref().handle, "metacache: swept entry");
                if Entry::dec_refs(ptr) {
                    Entry::free(ptr);
                }
            }
        }
    }

    /// Number of entries currently resident (not the number of live
    /// borrows, which may exceed this after `Invalidate`).
    pub fn len(&self) -> usize {
        self.inner.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Test-only hook: overwrites the handle allocator's last-minted
    /// value, so a test can park it at `u64::MAX` and observe the
    /// wraparound-to-1 behavior (spec §8 S5) on the very next `add`,
    /// without minting anywhere near 2^64 handles first. Not gated
    /// behind `cfg(test)` so the crate's own integration tests under
    /// `tests/` (a separate compilation unit) can reach it too,
    /// following `foyer-storage`'s `pub mod test_utils` convention of
    /// shipping test hooks as ordinary public API.
    #[doc(hidden)]
    pub fn seed_handle_allocator(&self, next: u64) {
        self.inner.lock().handles = HandleAllocator::preload(next);
    }
}

impl<T: TickSource> Drop for Cache<T> {
    /// `Destroy` (spec §4.7): releases every resident entry's cache
    /// reference. Entries still reachable through a live `Borrowed`
    /// are not freed here — they are freed when that borrow is
    /// dropped, since `Return` never needs a `Cache` reference.
    fn drop(&mut self) {
        self.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::SmallRng, RngCore, SeedableRng};

    use super::*;
    use crate::tick::ManualTickSource;

    fn cache(capacity: usize, max_entry_size: usize, timeout: u64) -> Cache<ManualTickSource> {
        Cache::create(CacheConfig {
            capacity,
            max_entry_size,
            timeout,
            ticks: ManualTickSource::new(0),
        })
        .unwrap()
    }

    #[test]
    fn add_then_borrow_round_trips_payload() {
        let cache = cache(4, 64, 10);
        let handle = cache.add(b"hello").unwrap();
        let borrowed = cache.borrow(handle).unwrap();
        assert_eq!(&*borrowed, b"hello");
    }

    #[test]
    fn borrow_of_unknown_handle_misses() {
        let cache = cache(4, 64, 10);
        let bogus = Handle::new(12345);
        assert!(cache.borrow(bogus).is_none());
        assert_eq!(cache.metrics().miss.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn add_rejects_past_capacity() {
        let cache = cache(2, 64, 10);
        assert!(cache.add(b"a").is_some());
        assert!(cache.add(b"b").is_some());
        assert!(cache.add(b"c").is_none());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.metrics().reject_capacity.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn add_rejects_oversized_payload() {
        let cache = cache(4, 4, 10);
        assert!(cache.add(b"12345").is_none());
        assert_eq!(cache.metrics().reject_size.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn invalidate_removes_entry_but_live_borrow_survives() {
        let cache = cache(4, 64, 10);
        let handle = cache.add(b"data").unwrap();
        let borrowed = cache.borrow(handle).unwrap();

        cache.invalidate(handle);
        assert_eq!(cache.len(), 0);
        assert!(cache.borrow(handle).is_none());

        // The borrow taken before invalidation is still valid payload.
        assert_eq!(&*borrowed, b"data");
        drop(borrowed);
    }

    #[test_log::test]
    fn invalidate_expired_sweeps_only_due_entries() {
        let cache = cache(4, 64, 10);
        let early = cache.add(b"early").unwrap();
        cache.ticks.advance(5);
        let late = cache.add(b"late").unwrap();

        cache.ticks.set(11); // early (expires_at=10) is due, late (15) is not.
        cache.invalidate_expired();

        assert_eq!(cache.len(), 1);
        assert!(cache.borrow(early).is_none());
        assert!(cache.borrow(late).is_some());
        assert_eq!(cache.metrics().expire.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn invalidate_all_clears_regardless_of_expiry() {
        let cache = cache(4, 64, 1000);
        cache.add(b"one").unwrap();
        cache.add(b"two").unwrap();
        cache.invalidate_all();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.metrics().remove.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn drop_releases_all_resident_entries() {
        let cache = cache(4, 64, 10);
        cache.add(b"one").unwrap();
        cache.add(b"two").unwrap();
        drop(cache);
        // No direct observation possible post-drop; absence of a leak
        // is exercised under a sanitizer/miri run, not asserted here.
    }

    #[test]
    fn handle_allocator_wraparound_mints_one_and_stays_usable() {
        let cache = cache(4, 64, 10);
        cache.seed_handle_allocator(u64::MAX);

        let wrapped = cache.add(b"wraps").unwrap();
        assert_eq!(wrapped.get(), 1);

        let borrowed = cache.borrow(wrapped).unwrap();
        assert_eq!(&*borrowed, b"wraps");
    }

    #[test]
    fn reinsert_after_capacity_freed_by_invalidate() {
        let cache = cache(1, 64, 10);
        let first = cache.add(b"first").unwrap();
        assert!(cache.add(b"second").is_none());
        cache.invalidate(first);
        assert!(cache.add(b"second").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clone_of_borrowed_keeps_payload_alive_independently() {
        let cache = cache(4, 64, 10);
        let handle = cache.add(b"shared").unwrap();
        let a = cache.borrow(handle).unwrap();
        let b = a.clone();
        cache.invalidate(handle);
        drop(a);
        assert_eq!(&*b, b"shared");
        drop(b);
    }

    #[test]
    fn fuzzy_add_borrow_invalidate_never_exceeds_capacity() {
        const CAPACITY: usize = 64;
        let cache = cache(CAPACITY, 64, u64::MAX);
        let mut rng = SmallRng::seed_from_u64(114514);
        let mut live = Vec::new();

        for _ in 0..20_000 {
            match rng.next_u32() % 3 {
                0 => {
                    if let Some(handle) = cache.add(&rng.next_u64().to_le_bytes()) {
                        live.push(handle);
                    }
                }
                1 => {
                    if let Some(handle) = live.pop() {
                        let borrowed = cache.borrow(handle);
                        // May already be gone if a prior iteration invalidated it.
                        drop(borrowed);
                    }
                }
                _ => {
                    if let Some(handle) = live.pop() {
                        cache.invalidate(handle);
                    }
                }
            }
            assert!(cache.len() <= CAPACITY);
        }
    }
}
