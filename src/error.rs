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

use thiserror::Error;

/// Errors surfaced by the cache's public API.
///
/// Construction is the only fallible operation. Every other operation
/// (`add`, `borrow`, `invalidate`, ...) reports absence or rejection
/// through an in-band `None`/no-op rather than an `Err`, because the
/// cache is an opportunistic accelerator with a well-defined fallback
/// at every call site.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The bucket table could not be allocated at construction time.
    #[error("failed to allocate metadata cache bucket table")]
    OutOfMemory,
}

pub type Result<T> = std::result::Result<T, CacheError>;
