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

//! Shuffle run that redistributes table rows, already pre-categorized into
//! `npartitions` output partitions by the caller, to the worker that owns
//! each partition.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::codec;
use crate::error::{Result, ShuffleError};
use crate::ids::{PartitionKey, ProducerId, RunId, TablePartitionId, WorkerAddress};
use crate::row::TableRow;
use crate::run::core::ShuffleRunCore;
use crate::split::table::{partition_for_key, split_by_partition, split_by_worker};

pub struct TableShuffleRun {
    core: ShuffleRunCore,
    column_name: String,
    npartitions: u64,
    worker_for: HashMap<TablePartitionId, WorkerAddress>,
    output_workers: HashSet<WorkerAddress>,
}

impl TableShuffleRun {
    pub fn new(
        core: ShuffleRunCore,
        column_name: String,
        npartitions: u64,
        worker_for: HashMap<TablePartitionId, WorkerAddress>,
        output_workers: HashSet<WorkerAddress>,
    ) -> Self {
        TableShuffleRun {
            core,
            column_name,
            npartitions,
            worker_for,
            output_workers,
        }
    }

    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    pub fn core(&self) -> &ShuffleRunCore {
        &self.core
    }

    pub fn run_id(&self) -> RunId {
        self.core.run_id
    }

    /// Groups `rows` by the worker that owns the output partition their
    /// key was pre-categorized to, then hands each worker its whole group
    /// tagged with `partition_id`, the caller's identity for this
    /// contribution. Splitting by output partition happens on the
    /// receiving side, once the shards for a delivery are in hand.
    pub async fn add_partition(&self, partition_id: u64, rows: Vec<TableRow>) -> Result<RunId> {
        self.core.raise_if_closed()?;
        self.core.raise_if_transferred()?;
        self.core.begin_transfer();

        let npartitions = self.npartitions;
        let worker_for = self.worker_for.clone();
        let by_worker = self
            .core
            .offload_pool
            .run(move || -> Result<HashMap<WorkerAddress, Vec<u8>>> {
                let grouped = split_by_worker(rows, npartitions, &worker_for)?;
                let mut out = HashMap::with_capacity(grouped.len());
                for (worker, group) in grouped {
                    if group.is_empty() {
                        continue;
                    }
                    out.insert(worker, bincode::serialize(&group)?);
                }
                Ok(out)
            })
            .await?;

        let producer_id = ProducerId::Table(partition_id);
        for (worker, bytes) in by_worker {
            self.core.record_sent(bytes.len() as u64);
            self.core.comm_buffer.write(worker, producer_id.clone(), bytes).await?;
        }

        Ok(self.core.run_id)
    }

    /// Applies one delivery from a peer's comm buffer flush: drops any
    /// contribution whose producer was already seen, splits the rest by
    /// output partition on the offload pool, and appends each group to its
    /// disk file.
    pub async fn receive(&self, data: Vec<(ProducerId, Vec<u8>)>) -> Result<()> {
        self.core.raise_if_closed()?;

        let mut fresh = Vec::with_capacity(data.len());
        for (producer_id, bytes) in data {
            if !self.core.mark_received(producer_id.clone()) {
                debug!("ignoring duplicate delivery from producer {producer_id}");
                continue;
            }
            self.core.record_recvd(bytes.len() as u64);
            fresh.push(bytes);
        }
        if fresh.is_empty() {
            return Ok(());
        }

        let npartitions = self.npartitions;
        let by_partition = self
            .core
            .offload_pool
            .run(move || -> Result<Vec<(TablePartitionId, Vec<u8>)>> {
                let mut rows = Vec::new();
                for bytes in fresh {
                    let mut group: Vec<TableRow> = bincode::deserialize(&bytes)?;
                    rows.append(&mut group);
                }
                let grouped = split_by_partition(rows, npartitions);
                let mut out = Vec::with_capacity(grouped.len());
                for (partition_id, partition_rows) in grouped {
                    out.push((partition_id, bincode::serialize(&partition_rows)?));
                }
                Ok(out)
            })
            .await?;

        for (partition_id, bytes) in by_partition {
            let key = PartitionKey::Table(partition_id).as_disk_key();
            self.core.disk_buffer.append(&key, codec::frame_block(bytes)).await?;
        }
        Ok(())
    }

    pub fn barrier(&self) -> Result<()> {
        self.core.begin_barrier()
    }

    pub fn inputs_done(&self) {
        self.core.mark_transferred();
    }

    /// Reads back every shard written for `partition_id` and concatenates
    /// them into one row list. An output partition nothing was ever
    /// written to comes back empty rather than as an error: a partition
    /// can legitimately receive zero rows.
    pub async fn get_output_partition(&self, partition_id: TablePartitionId) -> Result<Vec<TableRow>> {
        self.core.raise_if_closed()?;
        if !self.core.transferred() {
            return Err(ShuffleError::Reschedule);
        }
        if let Some(owner) = self.worker_for.get(&partition_id) {
            if *owner != self.core.local_address {
                return Err(ShuffleError::WrongWorker {
                    owner: owner.clone(),
                });
            }
        }

        let key = PartitionKey::Table(partition_id).as_disk_key();
        let bytes = match self.core.disk_buffer.read(&key).await? {
            Some(b) => b,
            None => return Ok(Vec::new()),
        };

        let blobs = codec::decode_raw_blocks(&bytes)?;
        let mut rows = Vec::new();
        for blob in blobs {
            let mut shard: Vec<TableRow> = bincode::deserialize(&blob)?;
            rows.append(&mut shard);
        }
        Ok(rows)
    }

    /// Output partition this shard's pre-categorized key maps to, exposed
    /// for callers that need to know before the run has finished
    /// transferring.
    pub fn partition_for(&self, key: i64) -> TablePartitionId {
        partition_for_key(key, self.npartitions)
    }

    pub fn output_workers(&self) -> HashSet<WorkerAddress> {
        self.output_workers.clone()
    }
}
