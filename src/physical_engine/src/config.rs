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

use std::time::Duration;

use common::ReadableDuration;
use serde::{Deserialize, Serialize};

/// Lower bound of the storage poll interval, polling never spins.
pub const MIN_STORAGE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Knobs of the physical execution layer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Number of workers running in-memory task chains.
    pub memory_task_pool_size: usize,
    /// Number of tasks one storage engine may execute concurrently.
    pub physical_task_pool_size_per_storage: usize,
    /// Tasks are rejected once this many are waiting for a storage's executor.
    pub max_cached_physical_task_per_storage: usize,
    /// Sleep between two attempts to resolve a storage driver, at least
    /// [`MIN_STORAGE_POLL_INTERVAL`].
    pub storage_poll_interval: ReadableDuration,
    /// `None` means keep polling until the driver is ready.
    pub storage_poll_timeout: Option<ReadableDuration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            memory_task_pool_size: 200,
            physical_task_pool_size_per_storage: 100,
            max_cached_physical_task_per_storage: 500,
            storage_poll_interval: ReadableDuration::millis(5),
            storage_poll_timeout: None,
        }
    }
}

impl ExecutorConfig {
    /// The configured poll interval, raised to [`MIN_STORAGE_POLL_INTERVAL`].
    pub fn storage_poll_interval(&self) -> Duration {
        Duration::from(self.storage_poll_interval).max(MIN_STORAGE_POLL_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_config() {
        let config: ExecutorConfig = toml::from_str(
            r#"
max_cached_physical_task_per_storage = 8
storage_poll_timeout = "2s"
"#,
        )
        .unwrap();
        assert_eq!(config.max_cached_physical_task_per_storage, 8);
        assert_eq!(
            config.storage_poll_timeout,
            Some(ReadableDuration::secs(2))
        );
        assert_eq!(config.memory_task_pool_size, 200);
        assert_eq!(config.storage_poll_interval, ReadableDuration::millis(5));

        assert!(toml::from_str::<ExecutorConfig>("unknown_field = 1").is_err());
    }

    #[test]
    fn test_poll_interval_lower_bound() {
        let config: ExecutorConfig = toml::from_str(r#"storage_poll_interval = "0ms""#).unwrap();
        assert_eq!(config.storage_poll_interval(), MIN_STORAGE_POLL_INTERVAL);

        let config = ExecutorConfig::default();
        assert_eq!(config.storage_poll_interval(), Duration::from_millis(5));
    }
}
