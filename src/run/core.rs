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

//! State and behavior shared by every shuffle run, regardless of which
//! dataset kind it carries: the `ACCEPTING -> TRANSFERRING -> BARRIERED ->
//! UNPACKING -> CLOSED` lifecycle, the sticky exception, duplicate-delivery
//! dedup, and ownership of this run's comm/disk buffers and offload pool.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, info};
use parking_lot::Mutex;

use crate::comm_buffer::CommBuffer;
use crate::disk_buffer::DiskBuffer;
use crate::error::{ExceptionCell, Result, ShuffleError};
use crate::ids::{ProducerId, RunId, ShuffleId, WorkerAddress};
use crate::limiter::OffloadPool;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RunState {
    Accepting,
    Transferring,
    Barriered,
    Unpacking,
    Closed,
}

pub struct ShuffleRunCore {
    pub shuffle_id: ShuffleId,
    pub run_id: RunId,
    pub local_address: WorkerAddress,
    pub comm_buffer: CommBuffer,
    pub disk_buffer: Arc<DiskBuffer>,
    pub offload_pool: OffloadPool,
    pub exception: ExceptionCell,
    state: Mutex<RunState>,
    received: Mutex<HashSet<ProducerId>>,
    total_recvd: AtomicU64,
    total_sent: AtomicU64,
}

impl ShuffleRunCore {
    pub fn new(
        shuffle_id: ShuffleId,
        run_id: RunId,
        local_address: WorkerAddress,
        comm_buffer: CommBuffer,
        disk_buffer: Arc<DiskBuffer>,
        offload_pool: OffloadPool,
        exception: ExceptionCell,
    ) -> Self {
        ShuffleRunCore {
            shuffle_id,
            run_id,
            local_address,
            comm_buffer,
            disk_buffer,
            offload_pool,
            exception,
            state: Mutex::new(RunState::Accepting),
            received: Mutex::new(HashSet::new()),
            total_recvd: AtomicU64::new(0),
            total_sent: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    pub fn raise_if_closed(&self) -> Result<()> {
        self.exception.check()?;
        if *self.state.lock() == RunState::Closed {
            return Err(ShuffleError::ShuffleClosed {
                shuffle_id: self.shuffle_id.clone(),
            });
        }
        Ok(())
    }

    /// Marks the given producer's contribution as applied. Returns `false`
    /// if it was already marked, meaning the caller should treat this
    /// delivery as a no-op duplicate rather than apply it again.
    pub fn mark_received(&self, id: ProducerId) -> bool {
        self.received.lock().insert(id)
    }

    /// Bumps the wire-bytes-received counter. Callers only call this for
    /// deliveries `mark_received` accepted as new, so redelivering the same
    /// producer's contribution any number of times leaves the counter
    /// exactly where one delivery would have.
    pub fn record_recvd(&self, bytes: u64) {
        self.total_recvd.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_sent(&self, bytes: u64) {
        self.total_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn total_recvd(&self) -> u64 {
        self.total_recvd.load(Ordering::Relaxed)
    }

    pub fn total_sent(&self) -> u64 {
        self.total_sent.load(Ordering::Relaxed)
    }

    pub fn begin_transfer(&self) {
        let mut state = self.state.lock();
        if *state == RunState::Accepting {
            *state = RunState::Transferring;
        }
    }

    /// Rejects a caller trying to add a partition once this run's local
    /// barrier has already landed. Ported from the source's
    /// `if self.transferred: raise RuntimeError(...)` guard, which
    /// `begin_transfer`'s silent no-op does not reproduce on its own.
    pub fn raise_if_transferred(&self) -> Result<()> {
        if self.transferred() {
            return Err(ShuffleError::DataError {
                message: format!(
                    "shuffle {} run {} is no longer accepting partitions",
                    self.shuffle_id, self.run_id
                ),
            });
        }
        Ok(())
    }

    /// Invoked on the single worker coordinating the barrier. Moves this
    /// run from `Accepting`/`Transferring` into `Barriered`; a run already
    /// past that point is left alone (the barrier step is idempotent).
    pub fn begin_barrier(&self) -> Result<()> {
        self.raise_if_closed()?;
        let mut state = self.state.lock();
        if matches!(*state, RunState::Accepting | RunState::Transferring) {
            info!("shuffle {} run {} entering barrier", self.shuffle_id, self.run_id);
            *state = RunState::Barriered;
        }
        Ok(())
    }

    /// Invoked by the `shuffle_inputs_done` handler on every worker once
    /// the barrier has broadcast. Marks local unpacking as allowed.
    pub fn mark_transferred(&self) {
        let mut state = self.state.lock();
        if *state != RunState::Closed {
            debug!("shuffle {} run {} transferred", self.shuffle_id, self.run_id);
            *state = RunState::Unpacking;
        }
    }

    pub fn transferred(&self) -> bool {
        matches!(*self.state.lock(), RunState::Unpacking)
    }

    pub fn fail(&self, e: ShuffleError) {
        error!("shuffle {} run {} failed: {e}", self.shuffle_id, self.run_id);
        self.exception.set_if_absent(e);
    }

    pub async fn close(&self) {
        *self.state.lock() = RunState::Closed;
        let _ = self.comm_buffer.flush_all().await;
        self.disk_buffer.close().await;
        info!("shuffle {} run {} closed", self.shuffle_id, self.run_id);
    }
}
