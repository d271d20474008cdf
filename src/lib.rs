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

//! A bounded, time-expiring, reference-counted cache for small,
//! immutable metadata blobs — the kind of accelerator a kernel-mode
//! filesystem driver keeps in front of repeated directory/attribute
//! lookups, modeled on WinFsp's `meta.c`.
//!
//! An entry is admitted with [`Cache::add`], looked up and pinned with
//! [`Cache::borrow`], and released either by dropping the returned
//! [`Borrowed`] guard or, at the raw-pointer level, with
//! [`return_blob`]. [`Cache::invalidate`], [`Cache::invalidate_expired`]
//! and [`Cache::invalidate_all`] remove entries from the table without
//! waiting for outstanding borrows to drop; an entry's backing memory
//! is only freed once its refcount reaches zero, so a borrow taken
//! before invalidation — or before the `Cache` itself is dropped —
//! stays valid until it is returned.
//!
//! ```
//! use fsp_metacache::{Cache, CacheConfig};
//!
//! let cache = Cache::create(CacheConfig::new(/* capacity */ 64, /* max_entry_size */ 256, /* timeout */ 1_000_000_000)).unwrap();
//! let handle = cache.add(b"some metadata blob").unwrap();
//! let borrowed = cache.borrow(handle).unwrap();
//! assert_eq!(&*borrowed, b"some metadata blob");
//! ```

mod blob;
mod borrowed;
mod cache;
mod entry;
mod error;
mod handle;
mod metrics;
mod sweeper;
mod tick;

pub use crate::{
    borrowed::{return_blob, Borrowed},
    cache::{CacheConfig, Cache},
    error::{CacheError, Result},
    handle::Handle,
    metrics::Metrics,
    sweeper::Sweeper,
    tick::{ManualTickSource, SystemTickSource, TickSource},
};
