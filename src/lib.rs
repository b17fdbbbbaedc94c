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

//! Peer-to-peer shuffle runtime for redistributing partitioned tables and
//! rechunked arrays across a worker fleet.
//!
//! A [`worker_plugin::WorkerPlugin`] lives on every worker and owns every
//! shuffle run active there. Producers feed rows or array chunks into it
//! through `add_table_partition`/`add_array_partition`; it splits and routes
//! each input across the fleet via the [`rpc::PeerRpc`] collaborator, spills
//! incoming shards to a [`disk_buffer::DiskBuffer`], and serves the final
//! output partitions back out once the run has barriered.

pub mod brick;
pub mod codec;
pub mod comm_buffer;
pub mod config;
pub mod disk_buffer;
pub mod error;
pub mod ids;
pub mod limiter;
pub mod row;
pub mod rpc;
pub mod run;
pub mod split;
pub mod testing;
pub mod worker_plugin;

pub use config::ShuffleConfig;
pub use error::{Result, ShuffleError};
pub use ids::{ProducerId, RunId, ShuffleId, WorkerAddress};
pub use worker_plugin::WorkerPlugin;
