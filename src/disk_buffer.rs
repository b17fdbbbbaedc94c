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

//! Per-output-partition append-only scratch file.
//!
//! One file per partition under the run's scratch directory, exactly the
//! layout `ShuffleWriter` uses under `work_dir` in the teacher, except data
//! is appended as it arrives rather than written once at the end.
//! Disk-limiter credit is held for the lifetime of the run, not released
//! until the run closes and its files are removed: unlike the comm
//! buffer, this data does not leave local storage until then.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::Result;
use crate::limiter::{ResourceLease, ResourceLimiter};

pub struct DiskBuffer {
    directory: PathBuf,
    limiter: Arc<ResourceLimiter>,
    files: SyncMutex<HashMap<String, Arc<AsyncMutex<tokio::fs::File>>>>,
    leases: SyncMutex<Vec<ResourceLease>>,
}

impl DiskBuffer {
    pub fn new(directory: PathBuf, limiter: Arc<ResourceLimiter>) -> Result<Self> {
        std::fs::create_dir_all(&directory)?;
        Ok(DiskBuffer {
            directory,
            limiter,
            files: SyncMutex::new(HashMap::new()),
            leases: SyncMutex::new(Vec::new()),
        })
    }

    pub fn directory(&self) -> &std::path::Path {
        &self.directory
    }

    /// Appends `bytes` to the shard file for `key`, acquiring disk-limiter
    /// credit first. Concurrent writes to distinct keys proceed in
    /// parallel; writes to the same key are serialized.
    pub async fn append(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let lease = self.limiter.acquire(bytes.len() as u64).await;
        let file = self.file_for(key).await?;
        {
            let mut f = file.lock().await;
            f.write_all(&bytes).await?;
        }
        self.leases.lock().push(lease);
        Ok(())
    }

    async fn file_for(&self, key: &str) -> Result<Arc<AsyncMutex<tokio::fs::File>>> {
        if let Some(f) = self.files.lock().get(key).cloned() {
            return Ok(f);
        }
        let path = self.directory.join(key);
        let f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let arc = Arc::new(AsyncMutex::new(f));
        self.files.lock().insert(key.to_string(), arc.clone());
        Ok(arc)
    }

    /// Reads back everything written for `key`. `Ok(None)` means nothing
    /// was ever written for this key on this worker, which callers of
    /// tabular output partitions treat as an empty partition rather than
    /// an error.
    pub async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.directory.join(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Drops all open file handles, deletes the scratch directory, and
    /// releases every disk-limiter credit held by this buffer.
    pub async fn close(&self) {
        self.files.lock().clear();
        let _ = tokio::fs::remove_dir_all(&self.directory).await;
        self.leases.lock().clear();
    }
}
