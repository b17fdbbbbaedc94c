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

use std::env;
use std::path::PathBuf;

const ENV_PREFIX: &str = "BALLISTA_SHUFFLE_";

const DEFAULT_COMM_LIMIT_BYTES: u64 = 100 * 1024 * 1024;
const DEFAULT_DISK_LIMIT_BYTES: u64 = 1024 * 1024 * 1024;
const DEFAULT_COMM_FLUSH_THRESHOLD_BYTES: u64 = 4 * 1024 * 1024;

/// Tunables governing a worker's shuffle runtime. Mirrors the scalar config
/// surface `ballista-executor`/`ballista-scheduler` expose via
/// `configure_me`, minus the CLI/file layer this crate has no use for.
#[derive(Clone, Debug, PartialEq)]
pub struct ShuffleConfig {
    /// Cap on bytes buffered for outbound peer transfers across all shuffles
    /// on this worker.
    pub comm_limit_bytes: u64,
    /// Cap on bytes spilled to the local scratch directory across all
    /// shuffles on this worker.
    pub disk_limit_bytes: u64,
    /// Bound on concurrently running offloaded (CPU-bound) partition tasks.
    /// Defaults to the number of available cores.
    pub offload_pool_size: usize,
    /// Root directory under which each run gets its own
    /// `shuffle-{id}-{run}` subdirectory.
    pub scratch_root: PathBuf,
    /// A destination's outbound buffer is flushed once it reaches this many
    /// buffered bytes, rather than on every `add_partition` call.
    pub comm_flush_threshold_bytes: u64,
}

impl Default for ShuffleConfig {
    fn default() -> Self {
        ShuffleConfig {
            comm_limit_bytes: DEFAULT_COMM_LIMIT_BYTES,
            disk_limit_bytes: DEFAULT_DISK_LIMIT_BYTES,
            offload_pool_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            scratch_root: env::temp_dir().join("ballista-shuffle"),
            comm_flush_threshold_bytes: DEFAULT_COMM_FLUSH_THRESHOLD_BYTES,
        }
    }
}

impl ShuffleConfig {
    /// Loads defaults, overriding each field from `BALLISTA_SHUFFLE_*` when
    /// the corresponding environment variable is set and parses cleanly.
    /// Malformed values are logged and ignored rather than treated as fatal,
    /// matching the leniency of the teacher's config loader.
    pub fn from_env() -> Self {
        let mut config = ShuffleConfig::default();

        if let Some(v) = Self::env_u64("COMM_LIMIT_BYTES") {
            config.comm_limit_bytes = v;
        }
        if let Some(v) = Self::env_u64("DISK_LIMIT_BYTES") {
            config.disk_limit_bytes = v;
        }
        if let Some(v) = Self::env_usize("OFFLOAD_POOL_SIZE") {
            config.offload_pool_size = v;
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}SCRATCH_ROOT")) {
            config.scratch_root = PathBuf::from(v);
        }
        if let Some(v) = Self::env_u64("COMM_FLUSH_THRESHOLD_BYTES") {
            config.comm_flush_threshold_bytes = v;
        }

        config
    }

    fn env_u64(suffix: &str) -> Option<u64> {
        let key = format!("{ENV_PREFIX}{suffix}");
        match env::var(&key) {
            Ok(v) => match v.parse() {
                Ok(n) => Some(n),
                Err(_) => {
                    log::warn!("ignoring malformed {key}={v}");
                    None
                }
            },
            Err(_) => None,
        }
    }

    fn env_usize(suffix: &str) -> Option<usize> {
        let key = format!("{ENV_PREFIX}{suffix}");
        match env::var(&key) {
            Ok(v) => match v.parse() {
                Ok(n) => Some(n),
                Err(_) => {
                    log::warn!("ignoring malformed {key}={v}");
                    None
                }
            },
            Err(_) => None,
        }
    }
}
