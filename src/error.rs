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

use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;

use crate::ids::{RunId, ShuffleId, WorkerAddress};

#[derive(Error, Debug, Clone)]
pub enum ShuffleError {
    #[error("shuffle {shuffle_id}: run {got} is stale, current run is {current}")]
    StaleRun {
        shuffle_id: ShuffleId,
        current: RunId,
        got: RunId,
    },

    #[error("shuffle {shuffle_id} has no known spec: {message}")]
    UnknownShuffle { shuffle_id: ShuffleId, message: String },

    #[error("shuffle {shuffle_id} is closed")]
    ShuffleClosed { shuffle_id: ShuffleId },

    #[error("output partition is owned by worker {owner}, not this worker")]
    WrongWorker { owner: WorkerAddress },

    #[error("peer rpc failed: {message}")]
    PeerFailure { message: String },

    #[error("invalid shuffle data: {message}")]
    DataError { message: String },

    #[error("scheduler rpc failed: {message}")]
    Scheduler { message: String },

    #[error("output partition {key} was never written")]
    NotFound { key: String },

    #[error("io error: {0}")]
    Io(String),

    #[error("task must be rescheduled")]
    Reschedule,
}

pub type Result<T> = std::result::Result<T, ShuffleError>;

impl From<std::io::Error> for ShuffleError {
    fn from(e: std::io::Error) -> Self {
        ShuffleError::Io(e.to_string())
    }
}

impl From<bincode::Error> for ShuffleError {
    fn from(e: bincode::Error) -> Self {
        ShuffleError::DataError {
            message: e.to_string(),
        }
    }
}

impl ShuffleError {
    /// Whether a caller holding a task bound to a superseded or closed run
    /// should simply retry against the new run rather than treat this as
    /// a hard failure.
    pub fn is_reschedule(&self) -> bool {
        matches!(
            self,
            ShuffleError::Reschedule
                | ShuffleError::StaleRun { .. }
                | ShuffleError::ShuffleClosed { .. }
                | ShuffleError::WrongWorker { .. }
        )
    }
}

/// A sticky, write-once-per-run error cell shared by a run's comm buffer,
/// disk buffer, and public API. Once set, every later operation on the run
/// re-raises the same error instead of attempting partial progress.
#[derive(Clone, Default)]
pub struct ExceptionCell(Arc<RwLock<Option<ShuffleError>>>);

impl ExceptionCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self) -> Result<()> {
        match self.0.read().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn set_if_absent(&self, e: ShuffleError) {
        let mut guard = self.0.write();
        if guard.is_none() {
            *guard = Some(e);
        }
    }

    pub fn get(&self) -> Option<ShuffleError> {
        self.0.read().clone()
    }
}
