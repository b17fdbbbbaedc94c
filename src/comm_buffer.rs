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

//! Per-destination outbound item queue with size-bounded flushing.
//!
//! Each write is one producer's contribution to one destination, tagged
//! with the [`ProducerId`] it came from. Contributions accumulate per
//! destination worker until the buffer crosses the configured flush
//! threshold, at which point they are handed to
//! [`crate::rpc::PeerRpc::shuffle_receive`] as a typed list and the
//! comm-limiter credit backing them is released.

use std::collections::HashMap;
use std::sync::Arc;

use log::error;
use parking_lot::Mutex;

use crate::error::{ExceptionCell, Result};
use crate::ids::{ProducerId, RunId, ShuffleId, WorkerAddress};
use crate::limiter::{ResourceLease, ResourceLimiter};
use crate::rpc::PeerRpc;

#[derive(Default)]
struct Pending {
    items: Vec<(ProducerId, Vec<u8>)>,
    size: u64,
    leases: Vec<ResourceLease>,
}

pub struct CommBuffer {
    shuffle_id: ShuffleId,
    run_id: RunId,
    peer_rpc: Arc<dyn PeerRpc>,
    limiter: Arc<ResourceLimiter>,
    flush_threshold: u64,
    exception: ExceptionCell,
    state: Mutex<HashMap<WorkerAddress, Pending>>,
}

impl CommBuffer {
    pub fn new(
        shuffle_id: ShuffleId,
        run_id: RunId,
        peer_rpc: Arc<dyn PeerRpc>,
        limiter: Arc<ResourceLimiter>,
        flush_threshold: u64,
        exception: ExceptionCell,
    ) -> Self {
        CommBuffer {
            shuffle_id,
            run_id,
            peer_rpc,
            limiter,
            flush_threshold,
            exception,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Queues one producer's contribution addressed to `worker`, acquiring
    /// comm-limiter credit for its size, then flushes that destination if
    /// it has crossed the threshold.
    pub async fn write(&self, worker: WorkerAddress, producer_id: ProducerId, bytes: Vec<u8>) -> Result<()> {
        self.exception.check()?;
        if bytes.is_empty() {
            return Ok(());
        }
        let lease = self.limiter.acquire(bytes.len() as u64).await;

        let should_flush = {
            let mut state = self.state.lock();
            let pending = state.entry(worker.clone()).or_default();
            pending.size += bytes.len() as u64;
            pending.items.push((producer_id, bytes));
            pending.leases.push(lease);
            pending.size >= self.flush_threshold
        };

        if should_flush {
            self.flush_one(&worker).await?;
        }
        Ok(())
    }

    async fn flush_one(&self, worker: &WorkerAddress) -> Result<()> {
        let pending = self.state.lock().remove(worker);
        let Some(pending) = pending else {
            return Ok(());
        };
        if pending.items.is_empty() {
            return Ok(());
        }

        match self
            .peer_rpc
            .shuffle_receive(worker, self.shuffle_id.clone(), self.run_id, pending.items)
            .await
        {
            Ok(()) => {
                drop(pending.leases);
                Ok(())
            }
            Err(e) => {
                error!("shuffle {} run {} failed to flush to {worker}: {e}", self.shuffle_id, self.run_id);
                self.exception.set_if_absent(e.clone());
                Err(e)
            }
        }
    }

    /// Flushes every destination with buffered bytes, regardless of
    /// threshold. Called when transfer finishes or the run closes.
    pub async fn flush_all(&self) -> Result<()> {
        let workers: Vec<WorkerAddress> = self.state.lock().keys().cloned().collect();
        for worker in workers {
            self.flush_one(&worker).await?;
        }
        Ok(())
    }
}
