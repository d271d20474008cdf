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
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{cache::Cache, tick::TickSource};

/// Drives `Cache::invalidate_expired` on a fixed interval from a
/// background thread (supplemental: the cache's contract never depends
/// on this running, driver code is free to call `invalidate_expired`
/// from wherever it already polls). Grounded on `foyer-storage`'s
/// periodic flush/compaction loop, which follows the same spawn/stop
/// flag/join-on-drop shape.
///
/// Requires `Arc<Cache<T>>` rather than `&Cache<T>` because the thread
/// must be able to outlive the caller's stack frame; a plain `Cache`
/// never needs to be `Arc`'d unless a `Sweeper` (or cross-thread
/// sharing in general) is wanted.
pub struct Sweeper {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub fn spawn<T>(cache: Arc<Cache<T>>, interval: Duration) -> Self
    where
        T: TickSource + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_inner = Arc::clone(&stop);
        let join = thread::Builder::new()
            .name("metacache-sweeper".into())
            .spawn(move || {
                while !stop_inner.load(Ordering::Relaxed) {
                    thread::sleep(interval);
                    if stop_inner.load(Ordering::Relaxed) {
                        break;
                    }
                    cache.invalidate_expired();
                }
            })
            .expect("failed to spawn metacache sweeper thread");

        Self { stop, join: Some(join) }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
