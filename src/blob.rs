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
    alloc::{self, Layout},
    mem,
    ptr::NonNull,
    slice,
};

use crate::entry::Entry;

/// Precedes the payload at a fixed negative offset (spec §3).
///
/// `owner` recovers the `Entry` a payload pointer belongs to without a
/// table lookup; `size` is the byte length of the payload that
/// immediately follows this header in the same allocation.
#[repr(C, align(16))]
struct BlobHeader {
    owner: NonNull<Entry>,
    size: usize,
}

/// The fixed offset a `Return` call subtracts from a payload pointer
/// to locate the header (spec §4.4).
pub(crate) const HEADER_SIZE: usize = mem::size_of::<BlobHeader>();
const HEADER_ALIGN: usize = mem::align_of::<BlobHeader>();

/// A detachable, self-describing payload (spec §3).
///
/// A single heap allocation holds a `BlobHeader` immediately followed
/// by `size` bytes of payload, aligned for the platform's maximum
/// scalar alignment. The payload pointer handed out to borrowers is
/// `header_ptr + HEADER_SIZE`; subtracting `HEADER_SIZE` from that
/// pointer recovers the header, whose `owner` field recovers the
/// `Entry` (spec §4.4, §9 "Self-describing blob pointer").
pub(crate) struct BlobBuffer {
    header: NonNull<BlobHeader>,
}

// SAFETY: a `BlobBuffer` is moved between threads only while its
// owning `Entry` is reachable solely through the cache's mutex or
// through atomically-refcounted borrows; the payload bytes are never
// mutated after `new`.
unsafe impl Send for BlobBuffer {}
unsafe impl Sync for BlobBuffer {}

impl BlobBuffer {
    fn layout(size: usize) -> Layout {
        Layout::from_size_align(HEADER_SIZE + size, HEADER_ALIGN)
            .expect("blob size must not overflow the allocator's size limit")
    }

    /// Allocates a buffer holding a copy of `data`. The header's
    /// `owner` is left dangling until `set_owner` stamps the entry's
    /// final address (mirrors the original driver allocating the item
    /// buffer before the owning item has a stable address).
    ///
    /// Returns `None` on allocation failure rather than aborting, so
    /// `Cache::add` can report it as an ordinary rejection (spec
    /// §4.3, §7).
    pub(crate) fn new(data: &[u8]) -> Option<Self> {
        let layout = Self::layout(data.len());
        // SAFETY: `layout` always has non-zero size (`HEADER_SIZE` > 0).
        let raw = unsafe { alloc::alloc(layout) };
        let base = NonNull::new(raw)?;
        let header = base.cast::<BlobHeader>();
        unsafe {
            header.as_ptr().write(BlobHeader {
                owner: NonNull::dangling(),
                size: data.len(),
            });
            let payload = base.as_ptr().add(HEADER_SIZE);
            std::ptr::copy_nonoverlapping(data.as_ptr(), payload, data.len());
        }
        Some(Self { header })
    }

    /// Stamps the owning entry's address into the header. Must be
    /// called once, before the buffer is reachable from any other
    /// thread, with the entry's final (boxed) address.
    pub(crate) fn set_owner(&mut self, owner: NonNull<Entry>) {
        unsafe { self.header.as_mut() }.owner = owner;
    }

    pub(crate) fn size(&self) -> usize {
        unsafe { self.header.as_ref() }.size
    }

    pub(crate) fn payload_ptr(&self) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(self.header.as_ptr().cast::<u8>().add(HEADER_SIZE)) }
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        // SAFETY: `payload_ptr` points to `size()` initialized bytes
        // allocated together in `new`.
        unsafe { slice::from_raw_parts(self.payload_ptr().as_ptr(), self.size()) }
    }

    /// Recovers the owning `Entry` from a payload pointer previously
    /// handed out by `Cache::borrow` (spec §4.4, §9).
    ///
    /// # Safety
    /// `payload` must be a pointer previously returned for a buffer
    /// that has not yet been freed.
    pub(crate) unsafe fn owner_of(payload: NonNull<u8>) -> NonNull<Entry> {
        let header = payload.as_ptr().sub(HEADER_SIZE).cast::<BlobHeader>();
        (*header).owner
    }
}

impl Drop for BlobBuffer {
    fn drop(&mut self) {
        let layout = Self::layout(self.size());
        // SAFETY: `self.header` was allocated by `alloc::alloc` with
        // this exact layout in `new` and is dropped at most once.
        unsafe { alloc::dealloc(self.header.as_ptr().cast::<u8>(), layout) };
    }
}
