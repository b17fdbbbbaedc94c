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

//! Table row grouping: route rows to the worker owning their output
//! partition for the transfer phase, then group by output partition for
//! the unpack phase.

use std::collections::HashMap;

use crate::error::{Result, ShuffleError};
use crate::ids::{TablePartitionId, WorkerAddress};
use crate::row::TableRow;

/// The key a row carries in is already the pre-categorized output
/// partition code (the caller derives it, e.g. by hashing a column before
/// handing rows to this crate), so this reduces to a direct modulo rather
/// than a hash of its own.
pub fn partition_for_key(key: i64, npartitions: u64) -> TablePartitionId {
    key.rem_euclid(npartitions.max(1) as i64) as u64
}

/// Groups rows by the worker that owns the output partition their key
/// was pre-categorized to. Used on the producing side during transfer.
pub fn split_by_worker(
    rows: Vec<TableRow>,
    npartitions: u64,
    worker_for: &HashMap<TablePartitionId, WorkerAddress>,
) -> Result<HashMap<WorkerAddress, Vec<TableRow>>> {
    let mut out: HashMap<WorkerAddress, Vec<TableRow>> = HashMap::new();
    for row in rows {
        let partition = partition_for_key(row.key, npartitions);
        let dest = worker_for
            .get(&partition)
            .ok_or_else(|| ShuffleError::DataError {
                message: format!("no worker assigned for output partition {partition}"),
            })?;
        out.entry(dest.clone()).or_default().push(row);
    }
    Ok(out)
}

/// Groups rows already local to a worker by the output partition their key
/// was pre-categorized to, ahead of writing each group to its own disk
/// shard.
pub fn split_by_partition(
    rows: Vec<TableRow>,
    npartitions: u64,
) -> HashMap<TablePartitionId, Vec<TableRow>> {
    let mut out: HashMap<TablePartitionId, Vec<TableRow>> = HashMap::new();
    for row in rows {
        let partition = partition_for_key(row.key, npartitions);
        out.entry(partition).or_default().push(row);
    }
    out
}

/// Range-sharding assignment: which worker owns `output_partition` out of
/// `npartitions`, spreading partitions evenly across `workers` in order.
/// This is a scheduler concern (the scheduler hands every worker the
/// resulting `worker_for` map rather than computing it itself), kept here
/// as the pure function a scheduler implementation would call to build
/// that map.
pub fn worker_for_range_sharding(
    npartitions: u64,
    output_partition: TablePartitionId,
    workers: &[WorkerAddress],
) -> Option<WorkerAddress> {
    if workers.is_empty() {
        return None;
    }
    let i = (workers.len() as u64 * output_partition / npartitions.max(1)) as usize;
    workers.get(i.min(workers.len() - 1)).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_for_key_is_plain_modulo() {
        assert_eq!(partition_for_key(0, 2), 0);
        assert_eq!(partition_for_key(1, 2), 1);
        assert_eq!(partition_for_key(2, 2), 0);
        assert_eq!(partition_for_key(-1, 2), 1);
    }

    #[test]
    fn split_by_worker_routes_every_row() {
        let mut worker_for = HashMap::new();
        worker_for.insert(0, WorkerAddress::from("w0"));
        worker_for.insert(1, WorkerAddress::from("w1"));
        let rows: Vec<TableRow> = (0..20).map(|i| TableRow::new(i, vec![i as u8])).collect();
        let total = rows.len();
        let grouped = split_by_worker(rows, 2, &worker_for).unwrap();
        let routed: usize = grouped.values().map(|v| v.len()).sum();
        assert_eq!(routed, total);
    }

    #[test]
    fn split_by_partition_groups_all_rows() {
        let rows: Vec<TableRow> = (0..20).map(|i| TableRow::new(i, vec![])).collect();
        let total = rows.len();
        let grouped = split_by_partition(rows, 4);
        let routed: usize = grouped.values().map(|v| v.len()).sum();
        assert_eq!(routed, total);
        for key in grouped.keys() {
            assert!(*key < 4);
        }
    }

    #[test]
    fn range_sharding_spreads_partitions_evenly() {
        let workers = vec![WorkerAddress::from("w0"), WorkerAddress::from("w1")];
        assert_eq!(worker_for_range_sharding(4, 0, &workers), Some(workers[0].clone()));
        assert_eq!(worker_for_range_sharding(4, 1, &workers), Some(workers[0].clone()));
        assert_eq!(worker_for_range_sharding(4, 2, &workers), Some(workers[1].clone()));
        assert_eq!(worker_for_range_sharding(4, 3, &workers), Some(workers[1].clone()));
    }

    #[test]
    fn range_sharding_with_no_workers_is_none() {
        assert_eq!(worker_for_range_sharding(4, 0, &[]), None);
    }
}
