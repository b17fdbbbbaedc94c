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

//! Stand-in row type for table shuffles.
//!
//! The real columnar representation (Arrow `RecordBatch` or equivalent) is
//! out of scope; callers own the decision of how a row's non-key columns
//! are encoded. `payload` is treated as an opaque blob here.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    /// Value of the shuffle column for this row; drives both worker
    /// assignment (hash sharding) and output-partition assignment (range
    /// sharding).
    pub key: i64,
    pub payload: Vec<u8>,
}

impl TableRow {
    pub fn new(key: i64, payload: impl Into<Vec<u8>>) -> Self {
        TableRow {
            key,
            payload: payload.into(),
        }
    }

    pub fn size_bytes(&self) -> u64 {
        (std::mem::size_of::<i64>() + self.payload.len()) as u64
    }
}
