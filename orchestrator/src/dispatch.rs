// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded worker pool for the orchestrator's asynchronous units of work
//!
//! Every async unit (a request's configuration phase plus task dispatch)
//! runs as a tokio task gated by a shared semaphore: spawning never
//! blocks the caller, but at most `max_parallelism` units execute at
//! once.  Given a bursty stream of requests this keeps the process from
//! running an unbounded amount of work concurrently.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// The default number of parallel units used by [`DispatchPool`]
pub const DEFAULT_MAX_PARALLELISM: usize = 16;

/// A semaphore-bounded spawner
#[derive(Clone, Debug)]
pub struct DispatchPool {
    semaphore: Arc<Semaphore>,
}

impl DispatchPool {
    pub fn new(max_parallelism: usize) -> DispatchPool {
        DispatchPool { semaphore: Arc::new(Semaphore::new(max_parallelism)) }
    }

    /// Spawns a unit of work immediately, but only allows it to execute
    /// once the pool is within its parallelism constraint.
    pub fn spawn<F>(&self, unit: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            // Hold the permit until the unit finishes executing.
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("we never close the semaphore");
            unit.await
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_parallelism_bounded() {
        let limit = 4;
        let pool = DispatchPool::new(limit);
        let running = Arc::new(AtomicUsize::new(0));
        let high_watermark = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..limit * 8 {
            let running = Arc::clone(&running);
            let high_watermark = Arc::clone(&high_watermark);
            handles.push(pool.spawn(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                high_watermark.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.expect("task panicked");
        }
        assert!(high_watermark.load(Ordering::SeqCst) <= limit);
    }
}
