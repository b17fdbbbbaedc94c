// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Async byte-budget limiter used to cap in-flight comm and disk bytes.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A single run's `acquire` is an async wait for capacity, never a hard
/// failure: backpressure comes from the caller stalling, not erroring.
pub struct ResourceLimiter {
    semaphore: Arc<Semaphore>,
    capacity: u32,
}

impl ResourceLimiter {
    /// `capacity_bytes` is clamped to `u32::MAX`; shuffle payload volumes in
    /// the tens of gigabytes are handled by acquiring in several calls, not
    /// by widening this type.
    pub fn new(capacity_bytes: u64) -> Self {
        let capacity = capacity_bytes.min(u32::MAX as u64) as u32;
        ResourceLimiter {
            semaphore: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity as u64
    }

    pub fn in_use(&self) -> u64 {
        self.capacity as u64 - self.semaphore.available_permits() as u64
    }

    /// Waits until `n` bytes of headroom are available and returns a lease
    /// holding that credit. Dropping the lease releases the credit.
    ///
    /// `n` is clamped to the limiter's total capacity so a single
    /// oversized shard cannot deadlock forever waiting for more permits
    /// than will ever exist.
    pub async fn acquire(&self, n: u64) -> ResourceLease {
        let n = (n.min(u32::MAX as u64) as u32).clamp(1, self.capacity.max(1));
        let permit = self
            .semaphore
            .clone()
            .acquire_many_owned(n)
            .await
            .expect("semaphore is never closed");
        ResourceLease {
            _permit: permit,
            bytes: n as u64,
        }
    }
}

/// Held-open credit against a [`ResourceLimiter`]. Release by dropping it.
pub struct ResourceLease {
    _permit: OwnedSemaphorePermit,
    bytes: u64,
}

impl ResourceLease {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// Bounds how many CPU-bound partition-splitting tasks run concurrently,
/// the Rust analogue of the fixed-size worker thread pool partitioning
/// work is offloaded to.
#[derive(Clone)]
pub struct OffloadPool {
    semaphore: Arc<Semaphore>,
}

impl OffloadPool {
    pub fn new(size: usize) -> Self {
        OffloadPool {
            semaphore: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    /// Runs `f` on the blocking thread pool, holding one pool slot for its
    /// duration.
    pub async fn run<F, R>(&self, f: F) -> crate::error::Result<R>
    where
        F: FnOnce() -> crate::error::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore is never closed");
        let result = tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| crate::error::ShuffleError::DataError {
                message: format!("offloaded task panicked: {e}"),
            })?;
        drop(permit);
        result
    }
}
