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

//! Peer and scheduler collaborators, modeled as traits.
//!
//! The transport these run over (a connection pool talking gRPC, a flight
//! client, anything else) is out of scope here, the same way
//! `BallistaClient` is a thin wrapper the scheduler/executor plug a real
//! channel into. A production deployment implements these traits over its
//! real RPC layer; `testing::LocalCluster` implements them in-process for
//! tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::error::Result;
use crate::ids::{NdIndex, ProducerId, RunId, ShuffleId, TablePartitionId, WorkerAddress};

/// The two dataset kinds a shuffle run can carry, and everything a worker
/// needs to know to join one: who owns which output partition, and who
/// else participates.
#[derive(Clone, Debug)]
pub enum ShuffleSpec {
    Table(TableShuffleSpec),
    Array(ArrayShuffleSpec),
}

#[derive(Clone, Debug)]
pub struct TableShuffleSpec {
    /// Name of the column the caller partitioned rows on before handing
    /// them to this crate. Carried for peers/the scheduler to reason about;
    /// this crate never reads a row's columns itself, since it operates on
    /// the already-categorized `TableRow::key`.
    pub column_name: String,
    pub npartitions: u64,
    pub worker_for: HashMap<TablePartitionId, WorkerAddress>,
    pub output_workers: HashSet<WorkerAddress>,
}

#[derive(Clone, Debug)]
pub struct ArrayShuffleSpec {
    pub old: Vec<Vec<usize>>,
    pub new: Vec<Vec<usize>>,
    pub worker_for: HashMap<NdIndex, WorkerAddress>,
    pub output_workers: HashSet<WorkerAddress>,
}

#[derive(Clone, Debug)]
pub struct ShuffleGetResult {
    pub run_id: RunId,
    pub spec: ShuffleSpec,
}

/// Worker-to-worker calls a shuffle run issues while it is transferring
/// data. Mirrors the three RPCs `shuffle_receive` / `shuffle_inputs_done` /
/// `shuffle_fail` in §6.
#[async_trait]
pub trait PeerRpc: Send + Sync {
    /// Each item is one producer's contribution, tagged with the
    /// [`ProducerId`] of the input partition it came from so the receiving
    /// run can dedup a retried send regardless of which flush batch
    /// carries it.
    async fn shuffle_receive(
        &self,
        worker: &WorkerAddress,
        shuffle_id: ShuffleId,
        run_id: RunId,
        data: Vec<(ProducerId, Vec<u8>)>,
    ) -> Result<()>;

    async fn shuffle_inputs_done(
        &self,
        worker: &WorkerAddress,
        shuffle_id: ShuffleId,
        run_id: RunId,
    ) -> Result<()>;

    async fn shuffle_fail(
        &self,
        worker: &WorkerAddress,
        shuffle_id: ShuffleId,
        run_id: RunId,
        message: String,
    ) -> Result<()>;
}

/// Worker-to-scheduler calls used to resolve or create a shuffle's spec.
#[async_trait]
pub trait SchedulerRpc: Send + Sync {
    async fn shuffle_get(
        &self,
        id: &ShuffleId,
        worker: &WorkerAddress,
    ) -> Result<ShuffleGetResult>;

    async fn shuffle_get_or_create(
        &self,
        id: &ShuffleId,
        requested: ShuffleSpec,
        worker: &WorkerAddress,
    ) -> Result<ShuffleGetResult>;
}
