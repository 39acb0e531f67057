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

use physical_engine::{
    config::ExecutorConfig,
    metadata::{StorageEngineMeta, StorageUnitMeta},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directives of the tracing env filter, e.g. `info,physical_engine=debug`.
    pub log_level: String,
    pub worker_threads: usize,
    /// Route reads to replicas by session instead of always to the master.
    pub read_from_replicas: bool,
    pub executor: ExecutorConfig,
    pub topology: TopologyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            worker_threads: 4,
            read_from_replicas: false,
            executor: ExecutorConfig::default(),
            topology: TopologyConfig::default(),
        }
    }
}

/// Static cluster seeded into the in-process metadata manager.
#[derive(Default, Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TopologyConfig {
    pub node_id: u64,
    pub storage_engines: Vec<StorageEngineMeta>,
    /// Masters must be listed before their replicas.
    pub storage_units: Vec<StorageUnitConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageUnitConfig {
    pub id: String,
    pub storage_engine_id: u64,
    /// Absent for masters.
    #[serde(default)]
    pub master_id: Option<String>,
}

impl From<&StorageUnitConfig> for StorageUnitMeta {
    fn from(config: &StorageUnitConfig) -> Self {
        match &config.master_id {
            Some(master_id) => {
                StorageUnitMeta::new_replica(&config.id, config.storage_engine_id, master_id)
            }
            None => StorageUnitMeta::new_master(&config.id, config.storage_engine_id),
        }
    }
}
