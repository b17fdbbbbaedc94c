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

//! In-process test double standing in for the real RPC transport.
//!
//! `LocalCluster` plays both collaborator roles a [`WorkerPlugin`] needs:
//! the peer fleet (dispatching `PeerRpc` calls to whichever worker they
//! name) and the scheduler (tracking each shuffle's current run id and
//! spec, the way `shuffle_get`/`shuffle_get_or_create` would against the
//! real scheduler). Nothing here crosses a process boundary; it exists so
//! the run state machine can be exercised without a transport.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::ShuffleConfig;
use crate::error::{Result, ShuffleError};
use crate::ids::{ProducerId, RunId, ShuffleId, WorkerAddress};
use crate::rpc::{PeerRpc, SchedulerRpc, ShuffleGetResult, ShuffleSpec};
use crate::worker_plugin::WorkerPlugin;

pub struct LocalCluster {
    workers: Mutex<HashMap<WorkerAddress, Arc<WorkerPlugin>>>,
    shuffles: Mutex<HashMap<ShuffleId, (RunId, ShuffleSpec)>>,
}

impl LocalCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(LocalCluster {
            workers: Mutex::new(HashMap::new()),
            shuffles: Mutex::new(HashMap::new()),
        })
    }

    /// Creates and registers a worker at `address`, wired up to dispatch
    /// its peer and scheduler calls back through this cluster.
    pub fn add_worker(self: &Arc<Self>, address: WorkerAddress, config: ShuffleConfig) -> Arc<WorkerPlugin> {
        let plugin = Arc::new(WorkerPlugin::new(
            address.clone(),
            config,
            self.clone() as Arc<dyn PeerRpc>,
            self.clone() as Arc<dyn SchedulerRpc>,
        ));
        self.workers.lock().insert(address, plugin.clone());
        plugin
    }

    pub fn worker(&self, address: &WorkerAddress) -> Option<Arc<WorkerPlugin>> {
        self.workers.lock().get(address).cloned()
    }

    /// Seeds the scheduler's view of a shuffle ahead of any worker asking
    /// for it, as a test fixture would register a shuffle's plan up front.
    pub fn register_shuffle(&self, id: ShuffleId, spec: ShuffleSpec) {
        self.shuffles.lock().insert(id, (RunId::FIRST, spec));
    }

    /// Bumps a shuffle to a new run, optionally with a new spec, so tests
    /// can exercise supersession: any worker still holding the old run
    /// id sees it rejected as stale the next time it consults the
    /// scheduler.
    pub fn supersede(&self, id: &ShuffleId, spec: Option<ShuffleSpec>) -> RunId {
        let mut shuffles = self.shuffles.lock();
        let entry = shuffles
            .get(id)
            .unwrap_or_else(|| panic!("shuffle {id} was never registered"));
        let next_run = entry.0.next();
        let next_spec = spec.unwrap_or_else(|| entry.1.clone());
        shuffles.insert(id.clone(), (next_run, next_spec));
        next_run
    }

    pub fn current_run(&self, id: &ShuffleId) -> Option<RunId> {
        self.shuffles.lock().get(id).map(|(run_id, _)| *run_id)
    }
}

#[async_trait]
impl PeerRpc for LocalCluster {
    async fn shuffle_receive(
        &self,
        worker: &WorkerAddress,
        shuffle_id: ShuffleId,
        run_id: RunId,
        data: Vec<(ProducerId, Vec<u8>)>,
    ) -> Result<()> {
        let plugin = self.worker(worker).ok_or_else(|| ShuffleError::DataError {
            message: format!("no worker registered at {worker}"),
        })?;
        plugin.shuffle_receive(shuffle_id, run_id, data).await
    }

    async fn shuffle_inputs_done(&self, worker: &WorkerAddress, shuffle_id: ShuffleId, run_id: RunId) -> Result<()> {
        let plugin = self.worker(worker).ok_or_else(|| ShuffleError::DataError {
            message: format!("no worker registered at {worker}"),
        })?;
        plugin.shuffle_inputs_done(shuffle_id, run_id).await
    }

    async fn shuffle_fail(
        &self,
        worker: &WorkerAddress,
        shuffle_id: ShuffleId,
        run_id: RunId,
        message: String,
    ) -> Result<()> {
        let plugin = self.worker(worker).ok_or_else(|| ShuffleError::DataError {
            message: format!("no worker registered at {worker}"),
        })?;
        plugin.shuffle_fail(shuffle_id, run_id, message);
        Ok(())
    }
}

#[async_trait]
impl SchedulerRpc for LocalCluster {
    async fn shuffle_get(&self, id: &ShuffleId, _worker: &WorkerAddress) -> Result<ShuffleGetResult> {
        self.shuffles
            .lock()
            .get(id)
            .map(|(run_id, spec)| ShuffleGetResult {
                run_id: *run_id,
                spec: spec.clone(),
            })
            .ok_or_else(|| ShuffleError::UnknownShuffle {
                shuffle_id: id.clone(),
                message: "not registered with the test cluster".into(),
            })
    }

    async fn shuffle_get_or_create(
        &self,
        id: &ShuffleId,
        requested: ShuffleSpec,
        _worker: &WorkerAddress,
    ) -> Result<ShuffleGetResult> {
        let mut shuffles = self.shuffles.lock();
        let entry = shuffles
            .entry(id.clone())
            .or_insert_with(|| (RunId::FIRST, requested));
        Ok(ShuffleGetResult {
            run_id: entry.0,
            spec: entry.1.clone(),
        })
    }
}
