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

//! Identifiers threaded through the whole crate.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Names one shuffle. Stable across the shuffle's lifetime even as it is
/// superseded by successive runs.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct ShuffleId(pub String);

impl fmt::Display for ShuffleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ShuffleId {
    fn from(s: &str) -> Self {
        ShuffleId(s.to_string())
    }
}

/// Monotonically increasing attempt counter for a [`ShuffleId`]. A higher
/// `RunId` always supersedes a lower one.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl RunId {
    pub const FIRST: RunId = RunId(1);

    pub fn next(self) -> RunId {
        RunId(self.0 + 1)
    }
}

/// Opaque network address of a worker. Left as a bare string since the
/// connection pool behind it is out of scope here.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct WorkerAddress(pub String);

impl fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkerAddress {
    fn from(s: &str) -> Self {
        WorkerAddress(s.to_string())
    }
}

/// Coordinate of an array chunk: one index per axis.
pub type NdIndex = Vec<usize>;

/// Flat index of a table output partition.
pub type TablePartitionId = u64;

/// Identifies the output partition an operation targets, unified across the
/// two dataset kinds a shuffle run can carry.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum PartitionKey {
    Table(TablePartitionId),
    Array(NdIndex),
}

impl PartitionKey {
    /// Stable, filesystem-safe key used to name the on-disk shard file for
    /// this partition.
    pub fn as_disk_key(&self) -> String {
        match self {
            PartitionKey::Table(id) => format!("t-{id}"),
            PartitionKey::Array(idx) => {
                let parts: Vec<String> = idx.iter().map(|i| i.to_string()).collect();
                format!("a-{}", parts.join("-"))
            }
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_disk_key())
    }
}

/// Identifies the input partition a contribution came from: an integer for
/// a table shuffle, a chunk coordinate for an array rechunk. Carried on
/// every delivery so the receiving run can dedup a redelivered contribution
/// by what produced it, not by which flush batch or transport retry
/// happened to carry it.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum ProducerId {
    Table(u64),
    Array(NdIndex),
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProducerId::Table(id) => write!(f, "t-{id}"),
            ProducerId::Array(idx) => {
                let parts: Vec<String> = idx.iter().map(|i| i.to_string()).collect();
                write!(f, "a-{}", parts.join("-"))
            }
        }
    }
}
