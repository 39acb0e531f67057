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

//! Cluster topology as seen by the execution layer, and the boundary to the
//! metadata service.

mod memory;
mod range;

use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};

pub use self::{memory::MemoryMetaManager, range::TimeSeriesRange};
use crate::{ensure, Result};

pub type StorageEngineId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageEngineMeta {
    pub id: StorageEngineId,
    pub ip: String,
    pub port: u16,
    /// Name of the driver factory serving this engine.
    pub engine_type: String,
    /// Prepended to every series path reported by this engine.
    #[serde(default)]
    pub schema_prefix: Option<String>,
    /// The engine holds data written before it joined the cluster.
    #[serde(default)]
    pub has_data: bool,
    /// Id of the node which registered the engine.
    #[serde(default)]
    pub created_by: u64,
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,
}

impl StorageEngineMeta {
    pub fn new(id: StorageEngineId, engine_type: impl Into<String>) -> Self {
        Self {
            id,
            ip: "127.0.0.1".to_string(),
            port: 0,
            engine_type: engine_type.into(),
            schema_prefix: None,
            has_data: false,
            created_by: 0,
            extra_params: BTreeMap::new(),
        }
    }

    /// Unit exposing the pre-existing data of the engine, if any.
    pub fn dummy_storage_unit(&self) -> Option<StorageUnitMeta> {
        self.has_data.then(|| StorageUnitMeta::dummy(self.id))
    }
}

/// One member of a replication group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageUnitMeta {
    pub id: String,
    pub storage_engine_id: StorageEngineId,
    pub master_id: String,
    pub is_master: bool,
    pub dummy: bool,
    /// Only filled on the master.
    pub replicas: Vec<StorageUnitMeta>,
}

pub type StorageUnitMetaRef = Arc<StorageUnitMeta>;

impl StorageUnitMeta {
    pub fn new_master(id: impl Into<String>, storage_engine_id: StorageEngineId) -> Self {
        let id = id.into();
        Self {
            master_id: id.clone(),
            id,
            storage_engine_id,
            is_master: true,
            dummy: false,
            replicas: Vec::new(),
        }
    }

    pub fn new_replica(
        id: impl Into<String>,
        storage_engine_id: StorageEngineId,
        master_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            storage_engine_id,
            master_id: master_id.into(),
            is_master: false,
            dummy: false,
            replicas: Vec::new(),
        }
    }

    pub fn dummy(storage_engine_id: StorageEngineId) -> Self {
        let mut unit = Self::new_master(format!("dummy{storage_engine_id:010}"), storage_engine_id);
        unit.dummy = true;
        unit
    }

    pub fn add_replica(&mut self, replica: StorageUnitMeta) -> Result<()> {
        ensure!(self.is_master, "only master can hold replicas, unit:{}", self.id);
        ensure!(
            !replica.is_master && replica.master_id == self.id,
            "replica {} doesn't belong to master {}",
            replica.id,
            self.id
        );
        ensure!(
            replica.id != self.id && self.replicas.iter().all(|r| r.id != replica.id),
            "duplicate replica, id:{}",
            replica.id
        );

        self.replicas.push(replica);
        Ok(())
    }

    /// Ids of the whole replication group, master first.
    pub fn replica_ids(&self) -> Vec<String> {
        let mut ids = Vec::with_capacity(self.replicas.len() + 1);
        ids.push(self.master_id.clone());
        ids.extend(self.replicas.iter().map(|r| r.id.clone()));
        ids
    }
}

/// Half open key (timestamp) interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyInterval {
    pub start: i64,
    pub end: i64,
}

impl KeyInterval {
    pub const ALL: KeyInterval = KeyInterval {
        start: i64::MIN,
        end: i64::MAX,
    };

    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &KeyInterval) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A partition of the series space owned by one replication group.
#[derive(Debug, Clone)]
pub struct FragmentMeta {
    pub ts_range: TimeSeriesRange,
    pub key_interval: KeyInterval,
    pub master_storage_unit: StorageUnitMetaRef,
}

pub type FragmentMetaRef = Arc<FragmentMeta>;

impl FragmentMeta {
    pub fn new(
        ts_range: TimeSeriesRange,
        key_interval: KeyInterval,
        master_storage_unit: StorageUnitMetaRef,
    ) -> Self {
        Self {
            ts_range,
            key_interval,
            master_storage_unit,
        }
    }

    pub fn master_storage_unit_id(&self) -> &str {
        &self.master_storage_unit.master_id
    }
}

pub type StorageUnitHook =
    Arc<dyn Fn(Option<&StorageUnitMeta>, Option<&StorageUnitMeta>) + Send + Sync>;
pub type StorageEngineChangeHook =
    Arc<dyn Fn(Option<&StorageEngineMeta>, Option<&StorageEngineMeta>) + Send + Sync>;

/// Metadata service boundary.
///
/// Hooks are called with `(before, after)`; `before == None && after !=
/// None` announces a newly created object.
pub trait MetaManager: Send + Sync {
    /// Id of the local node.
    fn node_id(&self) -> u64;

    fn storage_engine_list(&self) -> Vec<StorageEngineMeta>;

    fn register_storage_unit_hook(&self, hook: StorageUnitHook);

    fn register_storage_engine_change_hook(&self, hook: StorageEngineChangeHook);
}

pub type MetaManagerRef = Arc<dyn MetaManager>;
