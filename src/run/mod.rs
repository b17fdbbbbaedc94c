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

pub mod array;
pub mod core;
pub mod table;

pub use array::ArrayRechunkRun;
pub use core::{RunState, ShuffleRunCore};
pub use table::TableShuffleRun;

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::Result;
use crate::ids::{ProducerId, RunId, WorkerAddress};

/// Dispatches the lifecycle operations common to both run kinds without a
/// trait object: `WorkerPlugin` only ever holds one of exactly two
/// concrete run types, so a closed enum is simpler and cheaper than
/// `Arc<dyn ShuffleRun>`.
#[derive(Clone)]
pub enum AnyShuffleRun {
    Table(Arc<TableShuffleRun>),
    Array(Arc<ArrayRechunkRun>),
}

impl AnyShuffleRun {
    pub fn run_id(&self) -> RunId {
        match self {
            AnyShuffleRun::Table(r) => r.run_id(),
            AnyShuffleRun::Array(r) => r.run_id(),
        }
    }

    pub async fn receive(&self, data: Vec<(ProducerId, Vec<u8>)>) -> Result<()> {
        match self {
            AnyShuffleRun::Table(r) => r.receive(data).await,
            AnyShuffleRun::Array(r) => r.receive(data).await,
        }
    }

    pub fn mark_transferred(&self) {
        match self {
            AnyShuffleRun::Table(r) => r.core().mark_transferred(),
            AnyShuffleRun::Array(r) => r.core().mark_transferred(),
        }
    }

    pub fn fail(&self, e: crate::error::ShuffleError) {
        match self {
            AnyShuffleRun::Table(r) => r.core().fail(e),
            AnyShuffleRun::Array(r) => r.core().fail(e),
        }
    }

    pub async fn close(&self) {
        match self {
            AnyShuffleRun::Table(r) => r.core().close().await,
            AnyShuffleRun::Array(r) => r.core().close().await,
        }
    }

    pub async fn flush_comm(&self) -> Result<()> {
        match self {
            AnyShuffleRun::Table(r) => r.core().comm_buffer.flush_all().await,
            AnyShuffleRun::Array(r) => r.core().comm_buffer.flush_all().await,
        }
    }

    pub fn output_workers(&self) -> HashSet<WorkerAddress> {
        match self {
            AnyShuffleRun::Table(r) => r.output_workers(),
            AnyShuffleRun::Array(r) => r.output_workers(),
        }
    }
}
