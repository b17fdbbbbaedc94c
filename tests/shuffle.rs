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

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ballista_shuffle::brick::DenseBrick;
use ballista_shuffle::config::ShuffleConfig;
use ballista_shuffle::error::ShuffleError;
use ballista_shuffle::ids::{RunId, ShuffleId, WorkerAddress};
use ballista_shuffle::row::TableRow;
use ballista_shuffle::rpc::{ArrayShuffleSpec, TableShuffleSpec};
use ballista_shuffle::testing::LocalCluster;
use ballista_shuffle::worker_plugin::WorkerPlugin;

fn worker_config() -> ShuffleConfig {
    let mut config = ShuffleConfig::default();
    config.scratch_root = tempfile::tempdir().unwrap().into_path();
    config
}

fn worker(cluster: &Arc<LocalCluster>, name: &str) -> (WorkerAddress, Arc<WorkerPlugin>) {
    let address = WorkerAddress::from(name);
    let plugin = cluster.add_worker(address.clone(), worker_config());
    (address, plugin)
}

#[tokio::test]
async fn s1_tabular_happy_path() {
    let cluster = LocalCluster::new();
    let (w0_addr, w0) = worker(&cluster, "w0");
    let (w1_addr, w1) = worker(&cluster, "w1");

    let npartitions = 2u64;
    let mut worker_for = HashMap::new();
    worker_for.insert(0, w0_addr.clone());
    worker_for.insert(1, w1_addr.clone());
    let output_workers: HashSet<WorkerAddress> = [w0_addr.clone(), w1_addr.clone()].into_iter().collect();

    let spec = TableShuffleSpec {
        column_name: "k".into(),
        npartitions,
        worker_for: worker_for.clone(),
        output_workers,
    };

    let id = ShuffleId::from("s1-tabular");
    let rows: Vec<TableRow> = (0..6i64).map(|k| TableRow::new(k, vec![k as u8])).collect();

    let run_id = w0
        .add_table_partition(id.clone(), spec, None, 0, rows.clone())
        .await
        .unwrap();
    assert_eq!(run_id, RunId::FIRST);

    w0.barrier(id.clone(), run_id).await.unwrap();

    let out0 = w0.get_table_output_partition(id.clone(), run_id, 0).await.unwrap();
    let out1 = w1.get_table_output_partition(id.clone(), run_id, 1).await.unwrap();

    // spec scenario: "hash = identity mod 2" -- a literal `k mod 2`, not a
    // call back into the function under test.
    let mut expected0: Vec<TableRow> = rows
        .iter()
        .filter(|r| r.key % 2 == 0)
        .cloned()
        .collect();
    let mut expected1: Vec<TableRow> = rows
        .iter()
        .filter(|r| r.key % 2 == 1)
        .cloned()
        .collect();
    expected0.sort_by_key(|r| r.key);
    expected1.sort_by_key(|r| r.key);

    let mut got0 = out0.clone();
    let mut got1 = out1.clone();
    got0.sort_by_key(|r| r.key);
    got1.sort_by_key(|r| r.key);

    assert_eq!(got0, expected0);
    assert_eq!(got1, expected1);
    assert_eq!(out0.len() + out1.len(), rows.len());
}

#[tokio::test]
async fn s2_array_rechunk_1d() {
    let cluster = LocalCluster::new();
    let (w0_addr, w0) = worker(&cluster, "w0");
    let (w1_addr, w1) = worker(&cluster, "w1");

    let old = vec![vec![4usize, 4, 4]];
    let new = vec![vec![3usize, 3, 3, 3]];
    let mut worker_for = HashMap::new();
    worker_for.insert(vec![0], w0_addr.clone());
    worker_for.insert(vec![1], w0_addr.clone());
    worker_for.insert(vec![2], w1_addr.clone());
    worker_for.insert(vec![3], w1_addr.clone());
    let output_workers: HashSet<WorkerAddress> = [w0_addr.clone(), w1_addr.clone()].into_iter().collect();

    let spec = ArrayShuffleSpec {
        old,
        new,
        worker_for,
        output_workers,
    };

    let id = ShuffleId::from("s2-rechunk");
    let chunk0 = DenseBrick::new(vec![4], vec![0.0, 1.0, 2.0, 3.0]);
    let chunk1 = DenseBrick::new(vec![4], vec![4.0, 5.0, 6.0, 7.0]);
    let chunk2 = DenseBrick::new(vec![4], vec![8.0, 9.0, 10.0, 11.0]);

    let run_id = w0
        .add_array_partition(id.clone(), spec.clone(), None, vec![0], chunk0)
        .await
        .unwrap();
    w1.add_array_partition(id.clone(), spec.clone(), Some(run_id), vec![1], chunk1)
        .await
        .unwrap();
    w0.add_array_partition(id.clone(), spec, Some(run_id), vec![2], chunk2)
        .await
        .unwrap();

    w0.barrier(id.clone(), run_id).await.unwrap();

    let b0 = w0.get_array_output_partition(id.clone(), run_id, vec![0]).await.unwrap();
    let b1 = w0.get_array_output_partition(id.clone(), run_id, vec![1]).await.unwrap();
    let b2 = w1.get_array_output_partition(id.clone(), run_id, vec![2]).await.unwrap();
    let b3 = w1.get_array_output_partition(id.clone(), run_id, vec![3]).await.unwrap();

    assert_eq!(b0, DenseBrick::new(vec![3], vec![0.0, 1.0, 2.0]));
    assert_eq!(b1, DenseBrick::new(vec![3], vec![3.0, 4.0, 5.0]));
    assert_eq!(b2, DenseBrick::new(vec![3], vec![6.0, 7.0, 8.0]));
    assert_eq!(b3, DenseBrick::new(vec![3], vec![9.0, 10.0, 11.0]));
}

#[tokio::test]
async fn s3_duplicate_delivery_is_idempotent() {
    use ballista_shuffle::comm_buffer::CommBuffer;
    use ballista_shuffle::disk_buffer::DiskBuffer;
    use ballista_shuffle::error::ExceptionCell;
    use ballista_shuffle::ids::ProducerId;
    use ballista_shuffle::limiter::{OffloadPool, ResourceLimiter};
    use ballista_shuffle::run::core::ShuffleRunCore;
    use ballista_shuffle::run::table::TableShuffleRun;

    let cluster = LocalCluster::new();
    let local = WorkerAddress::from("w0");
    let dir = tempfile::tempdir().unwrap();
    let disk_limiter = Arc::new(ResourceLimiter::new(1 << 30));
    let comm_limiter = Arc::new(ResourceLimiter::new(1 << 30));
    let exception = ExceptionCell::new();

    let comm_buffer = CommBuffer::new(
        ShuffleId::from("s3"),
        RunId::FIRST,
        cluster.clone(),
        comm_limiter,
        4 * 1024 * 1024,
        exception.clone(),
    );
    let disk_buffer = Arc::new(DiskBuffer::new(dir.path().join("run"), disk_limiter).unwrap());
    let core = ShuffleRunCore::new(
        ShuffleId::from("s3"),
        RunId::FIRST,
        local.clone(),
        comm_buffer,
        disk_buffer,
        OffloadPool::new(2),
        exception,
    );

    let mut worker_for = HashMap::new();
    worker_for.insert(0, local.clone());
    let output_workers: HashSet<WorkerAddress> = [local.clone()].into_iter().collect();
    let run = TableShuffleRun::new(core, "k".into(), 1, worker_for, output_workers);

    let rows = vec![TableRow::new(1, vec![9, 9, 9]), TableRow::new(2, vec![1, 2, 3])];
    let bytes = bincode::serialize(&rows).unwrap();
    let producer_id = ProducerId::Table(7);

    // Two separate `receive` calls carrying the same producer id, as a
    // genuine application-level retry (a different flush batch) would,
    // not just the same batch redelivered.
    run.receive(vec![(producer_id.clone(), bytes.clone())]).await.unwrap();
    let recvd_after_first = run.core().total_recvd();
    run.receive(vec![(producer_id, bytes)]).await.unwrap();

    run.core().mark_transferred();
    let out = run.get_output_partition(0).await.unwrap();
    assert_eq!(out.len(), rows.len(), "duplicate delivery must not double the rows");
    assert_eq!(
        run.core().total_recvd(),
        recvd_after_first,
        "total_recvd must not double-count a redelivered producer contribution"
    );
}

#[tokio::test]
async fn s4_run_supersession() {
    let cluster = LocalCluster::new();
    let (w0_addr, w0) = worker(&cluster, "w0");
    let (w1_addr, w1) = worker(&cluster, "w1");
    let (w2_addr, w2) = worker(&cluster, "w2");

    let mut worker_for_v1 = HashMap::new();
    worker_for_v1.insert(0, w0_addr.clone());
    worker_for_v1.insert(1, w1_addr.clone());
    let spec_v1 = TableShuffleSpec {
        column_name: "k".into(),
        npartitions: 2,
        worker_for: worker_for_v1,
        output_workers: [w0_addr.clone(), w1_addr.clone()].into_iter().collect(),
    };

    let id = ShuffleId::from("s4-supersede");
    cluster.register_shuffle(id.clone(), ballista_shuffle::rpc::ShuffleSpec::Table(spec_v1.clone()));

    let first_rows = vec![TableRow::new(10, vec![1])];
    let run1 = w0
        .add_table_partition(id.clone(), spec_v1.clone(), None, 0, first_rows)
        .await
        .unwrap();
    assert_eq!(run1, RunId::FIRST);

    // worker lost and replaced: w1 -> w2, new run installed at the scheduler
    let mut worker_for_v2 = HashMap::new();
    worker_for_v2.insert(0, w0_addr.clone());
    worker_for_v2.insert(1, w2_addr.clone());
    let spec_v2 = TableShuffleSpec {
        column_name: "k".into(),
        npartitions: 2,
        worker_for: worker_for_v2,
        output_workers: [w0_addr.clone(), w2_addr.clone()].into_iter().collect(),
    };
    let run2 = cluster.supersede(&id, Some(ballista_shuffle::rpc::ShuffleSpec::Table(spec_v2.clone())));
    assert_eq!(run2, run1.next());

    // a producer still tagging its input with the stale run id is rejected
    let stale_rows = vec![TableRow::new(11, vec![2])];
    let err = w0
        .add_table_partition(id.clone(), spec_v1.clone(), Some(run1), 1, stale_rows)
        .await
        .unwrap_err();
    assert!(matches!(err, ShuffleError::StaleRun { .. }));

    // the new run proceeds normally
    let more_rows = vec![TableRow::new(12, vec![3]), TableRow::new(13, vec![4])];
    let joined_run = w0
        .add_table_partition(id.clone(), spec_v2.clone(), Some(run2), 2, more_rows)
        .await
        .unwrap();
    assert_eq!(joined_run, run2);

    w0.barrier(id.clone(), run2).await.unwrap();

    let out0 = w0.get_table_output_partition(id.clone(), run2, 0).await.unwrap();
    let out1 = w2.get_table_output_partition(id.clone(), run2, 1).await.unwrap();
    assert_eq!(out0.len() + out1.len(), 2);
}

#[tokio::test]
async fn s5_wrong_worker_unpack_reschedules() {
    let cluster = LocalCluster::new();
    let (w0_addr, w0) = worker(&cluster, "w0");
    let (w1_addr, w1) = worker(&cluster, "w1");

    let mut worker_for = HashMap::new();
    worker_for.insert(0, w0_addr.clone());
    worker_for.insert(1, w1_addr.clone());
    let spec = TableShuffleSpec {
        column_name: "k".into(),
        npartitions: 2,
        worker_for,
        output_workers: [w0_addr.clone(), w1_addr.clone()].into_iter().collect(),
    };

    let id = ShuffleId::from("s5-wrong-worker");
    let rows: Vec<TableRow> = (0..4i64).map(|k| TableRow::new(k, vec![])).collect();
    let run_id = w0.add_table_partition(id.clone(), spec, None, 0, rows).await.unwrap();
    w0.barrier(id.clone(), run_id).await.unwrap();

    let err = w1
        .get_table_output_partition(id.clone(), run_id, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ShuffleError::WrongWorker { .. }));
    assert!(err.is_reschedule());
}

#[tokio::test]
async fn s6_limiter_backpressure() {
    let cluster = LocalCluster::new();
    let address = WorkerAddress::from("w0");
    let mut config = worker_config();
    config.comm_limit_bytes = 1024 * 1024;
    config.comm_flush_threshold_bytes = 256 * 1024;
    let w0 = cluster.add_worker(address.clone(), config);

    let mut worker_for = HashMap::new();
    worker_for.insert(0, address.clone());
    let spec = TableShuffleSpec {
        column_name: "k".into(),
        npartitions: 1,
        worker_for,
        output_workers: [address.clone()].into_iter().collect(),
    };

    let id = ShuffleId::from("s6-backpressure");
    let mut run_id = None;
    let mut total_rows = 0usize;
    for batch in 0..20u8 {
        let rows: Vec<TableRow> = (0..50u32)
            .map(|i| TableRow::new(i as i64, vec![batch; 10_000]))
            .collect();
        total_rows += rows.len();
        let got = w0
            .add_table_partition(id.clone(), spec.clone(), run_id, batch as u64, rows)
            .await
            .unwrap();
        run_id = Some(got);
        assert!(w0.comm_bytes_in_use() <= 1024 * 1024);
    }

    let run_id = run_id.unwrap();
    w0.barrier(id.clone(), run_id).await.unwrap();
    assert_eq!(w0.comm_bytes_in_use(), 0);

    let out = w0.get_table_output_partition(id, run_id, 0).await.unwrap();
    assert_eq!(out.len(), total_rows);
}
