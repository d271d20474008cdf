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

use std::{ops::Deref, ptr::NonNull, slice};

use crate::{blob::BlobBuffer, entry::Entry};

/// A live reference to a cached payload (spec §4.4 `Borrow`).
///
/// Holds only the payload pointer and length, no reference to the
/// `Cache` that produced it: the owning `Entry` is recovered from the
/// pointer itself via `BlobBuffer::owner_of`, so a `Borrowed` can
/// outlive the `Cache` it came from (spec §9, "self-describing blob
/// pointer"). Dropping it is `Return`.
pub struct Borrowed {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the payload bytes are never mutated after `BlobBuffer::new`,
// and release is an atomic refcount operation independent of any
// `Cache`'s mutex.
unsafe impl Send for Borrowed {}
unsafe impl Sync for Borrowed {}

impl Borrowed {
    pub(crate) fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    /// Decomposes into the raw payload pointer and length without
    /// releasing the reference, for callers that need to cross an FFI
    /// boundary. Pair with `return_blob`.
    pub fn into_raw(self) -> (*const u8, usize) {
        let parts = (self.ptr.as_ptr() as *const u8, self.len);
        std::mem::forget(self);
        parts
    }
}

impl Deref for Borrowed {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: `ptr` points to `len` bytes that stay initialized and
        // immutable for as long as this borrow (and thus this slice's
        // lifetime) is alive.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Clone for Borrowed {
    fn clone(&self) -> Self {
        unsafe {
            let owner = BlobBuffer::owner_of(self.ptr);
            Entry::inc_refs(owner);
        }
        Self { ptr: self.ptr, len: self.len }
    }
}

impl Drop for Borrowed {
    fn drop(&mut self) {
        // SAFETY: `self.ptr` was obtained from `Cache::borrow`, which
        // incremented the refcount to account for this borrow.
        unsafe { release(self.ptr) };
    }
}

/// Releases one reference to the payload at `ptr`, freeing the owning
/// entry if it was the last one. Shared by `Borrowed::drop` and the
/// raw `return_blob` entry point; takes no `Cache` reference, matching
/// the original driver's `MetaCacheDereferenceItemBuffer(PVOID Buffer)`.
///
/// # Safety
/// `ptr` must be a payload pointer handed out by `Cache::borrow`/
/// `Cache::borrow_raw` for which this reference has not already been
/// released.
pub(crate) unsafe fn release(ptr: NonNull<u8>) {
    let owner = BlobBuffer::owner_of(ptr);
    if Entry::dec_refs(owner) {
        Entry::free(owner);
    }
}

/// Low-level `Return` (spec §4.4): releases a reference obtained via
/// `Borrowed::into_raw`.
///
/// # Safety
/// `ptr` must be non-null and must be a payload pointer previously
/// obtained from this cache and not yet returned.
pub unsafe fn return_blob(ptr: *const u8) {
    let payload = NonNull::new(ptr as *mut u8).expect("return_blob: null pointer");
    release(payload);
}
