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

//! Per-worker registry owning every shuffle run active on this worker.
//!
//! Structural port of `ShuffleWorkerPlugin`: a map from [`ShuffleId`] to
//! its current run, supersession on a higher incoming run id, and a
//! teardown that waits for every run, including ones already superseded
//! and closing in the background, to finish closing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;

use crate::brick::Brick;
use crate::config::ShuffleConfig;
use crate::disk_buffer::DiskBuffer;
use crate::error::{ExceptionCell, Result, ShuffleError};
use crate::ids::{NdIndex, ProducerId, RunId, ShuffleId, TablePartitionId, WorkerAddress};
use crate::limiter::{OffloadPool, ResourceLimiter};
use crate::row::TableRow;
use crate::rpc::{PeerRpc, SchedulerRpc, ShuffleSpec};
use crate::run::array::ArrayRechunkRun;
use crate::run::core::ShuffleRunCore;
use crate::run::table::TableShuffleRun;
use crate::run::AnyShuffleRun;
use crate::split::array::split_axes;

pub struct WorkerPlugin {
    local_address: WorkerAddress,
    config: ShuffleConfig,
    peer_rpc: Arc<dyn PeerRpc>,
    scheduler_rpc: Arc<dyn SchedulerRpc>,
    comm_limiter: Arc<ResourceLimiter>,
    disk_limiter: Arc<ResourceLimiter>,
    offload_pool: OffloadPool,
    shuffles: Mutex<HashMap<ShuffleId, AnyShuffleRun>>,
    closing_tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    closed: AtomicBool,
}

impl WorkerPlugin {
    pub fn new(
        local_address: WorkerAddress,
        config: ShuffleConfig,
        peer_rpc: Arc<dyn PeerRpc>,
        scheduler_rpc: Arc<dyn SchedulerRpc>,
    ) -> Self {
        let comm_limiter = Arc::new(ResourceLimiter::new(config.comm_limit_bytes));
        let disk_limiter = Arc::new(ResourceLimiter::new(config.disk_limit_bytes));
        let offload_pool = OffloadPool::new(config.offload_pool_size);
        WorkerPlugin {
            local_address,
            config,
            peer_rpc,
            scheduler_rpc,
            comm_limiter,
            disk_limiter,
            offload_pool,
            shuffles: Mutex::new(HashMap::new()),
            closing_tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn local_address(&self) -> &WorkerAddress {
        &self.local_address
    }

    /// Bytes currently accounted against the comms limiter, across every
    /// shuffle this worker is party to.
    pub fn comm_bytes_in_use(&self) -> u64 {
        self.comm_limiter.in_use()
    }

    /// Bytes currently accounted against the disk limiter, across every
    /// shuffle this worker is party to.
    pub fn disk_bytes_in_use(&self) -> u64 {
        self.disk_limiter.in_use()
    }

    fn raise_if_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ShuffleError::DataError {
                message: "worker plugin has been torn down".into(),
            });
        }
        Ok(())
    }

    fn build_run(&self, id: ShuffleId, run_id: RunId, spec: ShuffleSpec) -> Result<AnyShuffleRun> {
        let directory = self
            .config
            .scratch_root
            .join(format!("shuffle-{id}-{run_id}"));
        let disk_buffer = Arc::new(DiskBuffer::new(directory, self.disk_limiter.clone())?);
        let exception = ExceptionCell::new();
        let comm_buffer = crate::comm_buffer::CommBuffer::new(
            id.clone(),
            run_id,
            self.peer_rpc.clone(),
            self.comm_limiter.clone(),
            self.config.comm_flush_threshold_bytes,
            exception.clone(),
        );
        let core = ShuffleRunCore::new(
            id,
            run_id,
            self.local_address.clone(),
            comm_buffer,
            disk_buffer,
            self.offload_pool.clone(),
            exception,
        );

        Ok(match spec {
            ShuffleSpec::Table(t) => AnyShuffleRun::Table(Arc::new(TableShuffleRun::new(
                core,
                t.column_name,
                t.npartitions,
                t.worker_for,
                t.output_workers,
            ))),
            ShuffleSpec::Array(a) => {
                let axes = split_axes(&a.old, &a.new);
                AnyShuffleRun::Array(Arc::new(ArrayRechunkRun::new(
                    core,
                    axes,
                    a.worker_for,
                    a.output_workers,
                )))
            }
        })
    }

    /// Inserts `(run_id, spec)` as the authoritative state for `id`,
    /// superseding (failing and scheduling the close of) whatever run was
    /// previously registered, if its run id is lower.
    async fn install_run(&self, id: ShuffleId, run_id: RunId, spec: ShuffleSpec) -> Result<AnyShuffleRun> {
        let previous = {
            let mut shuffles = self.shuffles.lock();
            if let Some(existing) = shuffles.get(&id) {
                if existing.run_id() >= run_id {
                    return Ok(existing.clone());
                }
            }
            shuffles.remove(&id)
        };

        if let Some(prev) = previous {
            info!("shuffle {id} superseded: run {} -> run {run_id}", prev.run_id());
            prev.fail(ShuffleError::StaleRun {
                shuffle_id: id.clone(),
                current: run_id,
                got: prev.run_id(),
            });
            self.schedule_close(prev);
        }

        let run = self.build_run(id.clone(), run_id, spec)?;
        self.shuffles.lock().insert(id, run.clone());
        Ok(run)
    }

    /// Resolves the run for `id`. A caller with no opinion about which run
    /// is current (`wanted_run_id = None`) gets whatever this worker has
    /// cached, a scheduler round trip only on first reference. A caller
    /// tagging the call with a specific run id is always checked against a
    /// fresh fetch from the scheduler: this is how a worker that has not
    /// yet heard about a supersession discovers it, rather than trusting
    /// a possibly-stale local cache.
    async fn get_shuffle_run(&self, id: &ShuffleId, wanted_run_id: Option<RunId>) -> Result<AnyShuffleRun> {
        self.raise_if_closed()?;
        if wanted_run_id.is_none() {
            if let Some(existing) = self.shuffles.lock().get(id) {
                return Ok(existing.clone());
            }
        }

        let result = self.scheduler_rpc.shuffle_get(id, &self.local_address).await?;
        if let Some(wanted) = wanted_run_id {
            if wanted < result.run_id {
                return Err(ShuffleError::StaleRun {
                    shuffle_id: id.clone(),
                    current: result.run_id,
                    got: wanted,
                });
            }
        }
        self.install_run(id.clone(), result.run_id, result.spec).await
    }

    /// Fetches (or creates, if nobody has yet) the run for `id`, using
    /// `requested` as this worker's view of the spec if it must be
    /// created. Once a run is cached locally it is returned as-is, even
    /// if the scheduler's view has since changed: this worker learns
    /// about supersession reactively, the same way `_get_or_create_shuffle`
    /// never re-contacts the scheduler for an already-known shuffle id.
    pub async fn get_or_create_shuffle(&self, id: ShuffleId, requested: ShuffleSpec) -> Result<AnyShuffleRun> {
        self.raise_if_closed()?;
        if let Some(existing) = self.shuffles.lock().get(&id) {
            return Ok(existing.clone());
        }
        let result = self
            .scheduler_rpc
            .shuffle_get_or_create(&id, requested, &self.local_address)
            .await?;
        self.install_run(id, result.run_id, result.spec).await
    }

    /// `run_id` is the run this input is tagged for, if the caller already
    /// knows it (a retried or follow-up contribution); `None` the first
    /// time a worker touches this shuffle, letting it join or create
    /// whichever run is currently authoritative. A tagged call that has
    /// fallen behind a supersession raises `StaleRun` rather than silently
    /// folding its data into a run it was never assigned to. `partition_id`
    /// identifies this contribution's input partition, for the receiving
    /// side's dedup.
    pub async fn add_table_partition(
        &self,
        id: ShuffleId,
        spec: crate::rpc::TableShuffleSpec,
        run_id: Option<RunId>,
        partition_id: u64,
        rows: Vec<TableRow>,
    ) -> Result<RunId> {
        let run = match run_id {
            Some(rid) => self.get_shuffle_run(&id, Some(rid)).await?,
            None => self.get_or_create_shuffle(id, ShuffleSpec::Table(spec)).await?,
        };
        match run {
            AnyShuffleRun::Table(t) => t.add_partition(partition_id, rows).await,
            AnyShuffleRun::Array(_) => Err(ShuffleError::DataError {
                message: "shuffle id is registered as an array rechunk, not a table shuffle".into(),
            }),
        }
    }

    pub async fn add_array_partition(
        &self,
        id: ShuffleId,
        spec: crate::rpc::ArrayShuffleSpec,
        run_id: Option<RunId>,
        input_index: NdIndex,
        brick: Brick,
    ) -> Result<RunId> {
        let run = match run_id {
            Some(rid) => self.get_shuffle_run(&id, Some(rid)).await?,
            None => self.get_or_create_shuffle(id, ShuffleSpec::Array(spec)).await?,
        };
        match run {
            AnyShuffleRun::Array(a) => a.add_partition(input_index, brick).await,
            AnyShuffleRun::Table(_) => Err(ShuffleError::DataError {
                message: "shuffle id is registered as a table shuffle, not an array rechunk".into(),
            }),
        }
    }

    /// Handler for the peer RPC of the same name: applies one delivery
    /// from another worker's comm buffer flush.
    pub async fn shuffle_receive(
        &self,
        id: ShuffleId,
        run_id: RunId,
        data: Vec<(ProducerId, Vec<u8>)>,
    ) -> Result<()> {
        let run = self.get_shuffle_run(&id, Some(run_id)).await?;
        run.receive(data).await
    }

    /// Handler for the peer RPC of the same name: marks this worker's run
    /// as having received every input, unblocking `get_output_partition`.
    pub async fn shuffle_inputs_done(&self, id: ShuffleId, run_id: RunId) -> Result<()> {
        let run = self.get_shuffle_run(&id, Some(run_id)).await?;
        run.mark_transferred();
        Ok(())
    }

    /// Synchronous handler for the peer RPC of the same name: latches the
    /// failure and schedules the run's close in the background without
    /// blocking the caller.
    pub fn shuffle_fail(&self, id: ShuffleId, run_id: RunId, message: String) {
        let removed = {
            let mut shuffles = self.shuffles.lock();
            match shuffles.get(&id) {
                Some(existing) if existing.run_id() == run_id => shuffles.remove(&id),
                _ => None,
            }
        };
        if let Some(run) = removed {
            warn!("shuffle {id} run {run_id} failed remotely: {message}");
            run.fail(ShuffleError::PeerFailure { message });
            self.schedule_close(run);
        }
    }

    fn schedule_close(&self, run: AnyShuffleRun) {
        let handle = tokio::spawn(async move {
            run.close().await;
        });
        self.closing_tasks.lock().push(handle);
    }

    /// Invoked on exactly one worker once every transfer task for this run
    /// has completed. Marks the local run barriered, flushes its own comm
    /// buffer, then broadcasts `shuffle_inputs_done` to every output
    /// worker so they can start answering `get_output_partition`.
    pub async fn barrier(&self, id: ShuffleId, run_id: RunId) -> Result<()> {
        let run = self.get_shuffle_run(&id, Some(run_id)).await?;
        match &run {
            AnyShuffleRun::Table(t) => t.barrier()?,
            AnyShuffleRun::Array(a) => a.barrier()?,
        }
        run.flush_comm().await?;

        for worker in run.output_workers() {
            if worker == self.local_address {
                run.mark_transferred();
                continue;
            }
            if let Err(e) = self
                .peer_rpc
                .shuffle_inputs_done(&worker, id.clone(), run_id)
                .await
            {
                warn!("failed to notify {worker} that shuffle {id} run {run_id} transferred: {e}");
            }
        }
        Ok(())
    }

    pub async fn get_table_output_partition(
        &self,
        id: ShuffleId,
        run_id: RunId,
        partition_id: TablePartitionId,
    ) -> Result<Vec<TableRow>> {
        let run = self.get_shuffle_run(&id, Some(run_id)).await?;
        match run {
            AnyShuffleRun::Table(t) => t.get_output_partition(partition_id).await,
            AnyShuffleRun::Array(_) => Err(ShuffleError::DataError {
                message: "shuffle id is registered as an array rechunk, not a table shuffle".into(),
            }),
        }
    }

    pub async fn get_array_output_partition(
        &self,
        id: ShuffleId,
        run_id: RunId,
        new_chunk_index: NdIndex,
    ) -> Result<Brick> {
        let run = self.get_shuffle_run(&id, Some(run_id)).await?;
        match run {
            AnyShuffleRun::Array(a) => a.get_output_partition(new_chunk_index).await,
            AnyShuffleRun::Table(_) => Err(ShuffleError::DataError {
                message: "shuffle id is registered as a table shuffle, not an array rechunk".into(),
            }),
        }
    }

    /// Closes every run this worker knows about, including runs already
    /// superseded and closing in the background, then marks the plugin
    /// closed so no further shuffles can be created.
    pub async fn teardown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let runs: Vec<AnyShuffleRun> = self.shuffles.lock().drain().map(|(_, v)| v).collect();
        for run in runs {
            self.schedule_close(run);
        }
        let handles: Vec<_> = std::mem::take(&mut *self.closing_tasks.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }
}
