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

//! Shuffle run that rechunks an n-dimensional array from one chunking to
//! another by splitting each input chunk along the Cartesian product of
//! per-axis splits and routing each resulting shard to the worker that
//! owns its destination chunk.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::brick::{concatenate_lattice, Brick};
use crate::codec;
use crate::error::{Result, ShuffleError};
use crate::ids::{NdIndex, PartitionKey, ProducerId, RunId, WorkerAddress};
use crate::run::core::ShuffleRunCore;
use crate::split::array::{CartesianSplits, SplitAxes};

pub struct ArrayRechunkRun {
    core: ShuffleRunCore,
    split_axes: SplitAxes,
    worker_for: HashMap<NdIndex, WorkerAddress>,
    output_workers: HashSet<WorkerAddress>,
}

type ShardKey = (NdIndex, NdIndex);

impl ArrayRechunkRun {
    pub fn new(
        core: ShuffleRunCore,
        split_axes: SplitAxes,
        worker_for: HashMap<NdIndex, WorkerAddress>,
        output_workers: HashSet<WorkerAddress>,
    ) -> Self {
        ArrayRechunkRun {
            core,
            split_axes,
            worker_for,
            output_workers,
        }
    }

    pub fn core(&self) -> &ShuffleRunCore {
        &self.core
    }

    pub fn run_id(&self) -> RunId {
        self.core.run_id
    }

    /// Splits one input chunk across every destination chunk it overlaps
    /// and routes each shard to the worker owning that destination, tagged
    /// with `input_index` as the producer of this contribution.
    pub async fn add_partition(&self, input_index: NdIndex, brick: Brick) -> Result<RunId> {
        self.core.raise_if_closed()?;
        self.core.raise_if_transferred()?;
        self.core.begin_transfer();

        let split_axes = self.split_axes.clone();
        let worker_for = self.worker_for.clone();
        let producer_index = input_index.clone();
        let grouped = self
            .core
            .offload_pool
            .run(move || Self::repartition_shards(&split_axes, &input_index, brick, &worker_for))
            .await?;

        let producer_id = ProducerId::Array(producer_index);
        for (worker, items) in grouped {
            if items.is_empty() {
                continue;
            }
            let bytes = codec::encode_block(&items)?;
            self.core.record_sent(bytes.len() as u64);
            self.core.comm_buffer.write(worker, producer_id.clone(), bytes).await?;
        }

        Ok(self.core.run_id)
    }

    fn repartition_shards(
        split_axes: &SplitAxes,
        input_index: &[usize],
        brick: Brick,
        worker_for: &HashMap<NdIndex, WorkerAddress>,
    ) -> Result<HashMap<WorkerAddress, Vec<(ShardKey, Vec<u8>)>>> {
        let axes: Vec<&[crate::split::array::Split]> = split_axes
            .iter()
            .zip(input_index.iter())
            .map(|(axis, &i)| axis[i].as_slice())
            .collect();

        let mut out: HashMap<WorkerAddress, Vec<(ShardKey, Vec<u8>)>> = HashMap::new();
        for combo in CartesianSplits::new(axes) {
            let new_chunk_index: NdIndex = combo.iter().map(|s| s.chunk_index).collect();
            let sub_index: NdIndex = combo.iter().map(|s| s.split_index).collect();
            let ranges: Vec<_> = combo.iter().map(|s| s.slice.clone()).collect();
            let shard = brick.slice(&ranges);

            let dest = worker_for
                .get(&new_chunk_index)
                .ok_or_else(|| ShuffleError::DataError {
                    message: format!("no worker assigned for array chunk {new_chunk_index:?}"),
                })?;
            let bytes = bincode::serialize(&shard)?;
            out.entry(dest.clone())
                .or_default()
                .push(((new_chunk_index, sub_index), bytes));
        }
        Ok(out)
    }

    /// Applies one delivery: drops any contribution whose producer was
    /// already seen, decodes the rest, and appends each shard, tagged with
    /// its sub-lattice coordinate, to its destination chunk's disk file.
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

        let grouped = self
            .core
            .offload_pool
            .run(move || -> Result<HashMap<NdIndex, Vec<u8>>> {
                let mut by_chunk: HashMap<NdIndex, Vec<(NdIndex, Vec<u8>)>> = HashMap::new();
                for bytes in fresh {
                    let items: Vec<(ShardKey, Vec<u8>)> = codec::decode_block(&bytes)?;
                    for ((new_chunk_index, sub_index), shard_bytes) in items {
                        by_chunk.entry(new_chunk_index).or_default().push((sub_index, shard_bytes));
                    }
                }
                let mut out = HashMap::with_capacity(by_chunk.len());
                for (new_chunk_index, shards) in by_chunk {
                    out.insert(new_chunk_index, bincode::serialize(&shards)?);
                }
                Ok(out)
            })
            .await?;

        for (new_chunk_index, bytes) in grouped {
            let key = PartitionKey::Array(new_chunk_index).as_disk_key();
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

    /// Number of old chunks contributing to `new_chunk_index` along each
    /// axis, i.e. the shape of the sub-lattice `get_output_partition`
    /// needs to reassemble.
    fn subshape_for(&self, new_chunk_index: &[usize]) -> Vec<usize> {
        self.split_axes
            .iter()
            .enumerate()
            .map(|(axis, split_axis)| {
                split_axis
                    .iter()
                    .flatten()
                    .filter(|s| s.chunk_index == new_chunk_index[axis])
                    .map(|s| s.split_index + 1)
                    .max()
                    .unwrap_or(0)
            })
            .collect()
    }

    pub async fn get_output_partition(&self, new_chunk_index: NdIndex) -> Result<Brick> {
        self.core.raise_if_closed()?;
        if !self.core.transferred() {
            return Err(ShuffleError::Reschedule);
        }
        if let Some(owner) = self.worker_for.get(&new_chunk_index) {
            if *owner != self.core.local_address {
                return Err(ShuffleError::WrongWorker {
                    owner: owner.clone(),
                });
            }
        }

        let key = PartitionKey::Array(new_chunk_index.clone()).as_disk_key();
        let bytes = self
            .core
            .disk_buffer
            .read(&key)
            .await?
            .ok_or_else(|| ShuffleError::NotFound { key: key.clone() })?;

        let blobs = codec::decode_raw_blocks(&bytes)?;
        let mut shards: HashMap<NdIndex, Brick> = HashMap::new();
        for blob in blobs {
            let group: Vec<(NdIndex, Vec<u8>)> = bincode::deserialize(&blob)?;
            for (sub_index, payload) in group {
                let brick: Brick = bincode::deserialize(&payload)?;
                shards.insert(sub_index, brick);
            }
        }

        let subshape = self.subshape_for(&new_chunk_index);
        concatenate_lattice(&shards, &subshape)
    }

    pub fn output_workers(&self) -> HashSet<WorkerAddress> {
        self.output_workers.clone()
    }
}
