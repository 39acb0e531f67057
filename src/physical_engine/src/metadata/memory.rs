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

use std::{
    collections::BTreeMap,
    sync::{Mutex, RwLock},
};

use anyhow::anyhow;
use tracing::info;

use super::{
    MetaManager, StorageEngineChangeHook, StorageEngineMeta, StorageUnitHook, StorageUnitMeta,
};
use crate::{ensure, Result};

#[derive(Default)]
struct Topology {
    engines: BTreeMap<u64, StorageEngineMeta>,
    units: BTreeMap<String, StorageUnitMeta>,
}

/// Metadata kept in the local process, hooks are called synchronously by the
/// thread changing the topology.
pub struct MemoryMetaManager {
    node_id: u64,
    topology: RwLock<Topology>,
    unit_hooks: Mutex<Vec<StorageUnitHook>>,
    engine_hooks: Mutex<Vec<StorageEngineChangeHook>>,
}

impl MemoryMetaManager {
    pub fn new(node_id: u64) -> Self {
        Self {
            node_id,
            topology: RwLock::new(Topology::default()),
            unit_hooks: Mutex::new(Vec::new()),
            engine_hooks: Mutex::new(Vec::new()),
        }
    }

    pub fn add_storage_engine(&self, engine: StorageEngineMeta) -> Result<()> {
        {
            let mut topology = self.topology.write().map_err(|e| anyhow!("{e}"))?;
            ensure!(
                !topology.engines.contains_key(&engine.id),
                "storage engine already exists, id:{}",
                engine.id
            );
            topology.engines.insert(engine.id, engine.clone());
        }
        info!(id = engine.id, engine_type = %engine.engine_type, "Storage engine added");

        self.notify_storage_engine_hooks(None, Some(&engine));
        Ok(())
    }

    /// Masters are registered as is, replicas are attached to their master
    /// which must already exist.
    pub fn add_storage_unit(&self, unit: StorageUnitMeta) -> Result<()> {
        {
            let mut topology = self.topology.write().map_err(|e| anyhow!("{e}"))?;
            ensure!(
                !topology.units.contains_key(&unit.id),
                "storage unit already exists, id:{}",
                unit.id
            );
            ensure!(
                topology.engines.contains_key(&unit.storage_engine_id),
                "storage engine of unit not found, unit:{}, engine:{}",
                unit.id,
                unit.storage_engine_id
            );
            if !unit.is_master {
                let master = topology
                    .units
                    .get_mut(&unit.master_id)
                    .ok_or_else(|| anyhow!("master of replica not found, unit:{}", unit.id))?;
                master.add_replica(unit.clone())?;
            }
            topology.units.insert(unit.id.clone(), unit.clone());
        }
        info!(id = %unit.id, master = %unit.master_id, "Storage unit added");

        self.notify_storage_unit_hooks(None, Some(&unit));
        Ok(())
    }

    pub fn storage_unit(&self, id: &str) -> Option<StorageUnitMeta> {
        let topology = self.topology.read().ok()?;
        topology.units.get(id).cloned()
    }

    /// Calls every registered unit hook, as the metadata service does when it
    /// observes a change.
    pub fn notify_storage_unit_hooks(
        &self,
        before: Option<&StorageUnitMeta>,
        after: Option<&StorageUnitMeta>,
    ) {
        // Hooks may call back into the manager, so don't hold the lock.
        let hooks = match self.unit_hooks.lock() {
            Ok(hooks) => hooks.clone(),
            Err(_) => return,
        };
        for hook in hooks {
            hook(before, after);
        }
    }

    pub fn notify_storage_engine_hooks(
        &self,
        before: Option<&StorageEngineMeta>,
        after: Option<&StorageEngineMeta>,
    ) {
        let hooks = match self.engine_hooks.lock() {
            Ok(hooks) => hooks.clone(),
            Err(_) => return,
        };
        for hook in hooks {
            hook(before, after);
        }
    }
}

impl MetaManager for MemoryMetaManager {
    fn node_id(&self) -> u64 {
        self.node_id
    }

    fn storage_engine_list(&self) -> Vec<StorageEngineMeta> {
        match self.topology.read() {
            Ok(topology) => topology.engines.values().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn register_storage_unit_hook(&self, hook: StorageUnitHook) {
        if let Ok(mut hooks) = self.unit_hooks.lock() {
            hooks.push(hook);
        }
    }

    fn register_storage_engine_change_hook(&self, hook: StorageEngineChangeHook) {
        if let Ok(mut hooks) = self.engine_hooks.lock() {
            hooks.push(hook);
        }
    }
}
