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
    collections::HashMap,
    sync::{Arc, RwLock},
};

use anyhow::anyhow;
use tokio::runtime::Handle;
use tracing::{error, info};

use super::{StorageDriverFactoryRef, StorageDriverRef};
use crate::{
    config::ExecutorConfig,
    metadata::{StorageEngineId, StorageEngineMeta},
    pool::{TaskPool, TaskPoolRef},
    Result,
};

struct Storage {
    driver: StorageDriverRef,
    pool: TaskPoolRef,
}

/// Resolves storage engines to their driver and the pool executing their
/// tasks.
pub struct StorageManager {
    runtime: Handle,
    pool_size: usize,
    factories: HashMap<String, StorageDriverFactoryRef>,
    storages: RwLock<HashMap<StorageEngineId, Storage>>,
}

pub type StorageManagerRef = Arc<StorageManager>;

impl StorageManager {
    /// Engines failing to build are logged and skipped, they stay not ready.
    pub fn new(
        runtime: Handle,
        config: &ExecutorConfig,
        factories: impl IntoIterator<Item = StorageDriverFactoryRef>,
        engines: &[StorageEngineMeta],
    ) -> Self {
        let factories = factories
            .into_iter()
            .map(|f| (f.engine_type().to_string(), f))
            .collect();
        let manager = Self {
            runtime,
            pool_size: config.physical_task_pool_size_per_storage,
            factories,
            storages: RwLock::new(HashMap::new()),
        };
        for engine in engines {
            if let Err(e) = manager.add_storage(engine) {
                error!(id = engine.id, "Failed to init storage engine, err:{e}");
            }
        }

        manager
    }

    /// Returns false if the engine is already registered.
    pub fn add_storage(&self, meta: &StorageEngineMeta) -> Result<bool> {
        if self.contains(meta.id) {
            return Ok(false);
        }

        let factory = self.factories.get(&meta.engine_type).ok_or_else(|| {
            anyhow!(
                "no driver for storage engine type, id:{}, type:{}",
                meta.id,
                meta.engine_type
            )
        })?;
        let driver = factory.build(meta)?;

        let mut storages = self
            .storages
            .write()
            .map_err(|e| anyhow!("storages lock poisoned, err:{e}"))?;
        if storages.contains_key(&meta.id) {
            return Ok(false);
        }
        let pool = TaskPool::new(
            format!("storage-{}", meta.id),
            self.pool_size,
            &self.runtime,
        );
        storages.insert(
            meta.id,
            Storage {
                driver,
                pool: Arc::new(pool),
            },
        );
        info!(id = meta.id, engine_type = %meta.engine_type, "Storage engine is ready");

        Ok(true)
    }

    /// `None` until the engine is added.
    pub fn get_storage(&self, id: StorageEngineId) -> Option<(StorageDriverRef, TaskPoolRef)> {
        let storages = self.storages.read().ok()?;
        storages
            .get(&id)
            .map(|s| (s.driver.clone(), s.pool.clone()))
    }

    fn contains(&self, id: StorageEngineId) -> bool {
        self.storages
            .read()
            .map(|s| s.contains_key(&id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::test_util::{RecordingDriver, StaticFactory, TEST_ENGINE_TYPE};

    #[test(tokio::test)]
    async fn test_add_and_get_storage() {
        let factory = Arc::new(StaticFactory::new(Arc::new(RecordingDriver::default())));
        let engines = [
            StorageEngineMeta::new(1, TEST_ENGINE_TYPE),
            StorageEngineMeta::new(2, "unknown"),
        ];
        let manager = StorageManager::new(
            Handle::current(),
            &ExecutorConfig::default(),
            [factory as StorageDriverFactoryRef],
            &engines,
        );

        let (_, pool) = manager.get_storage(1).unwrap();
        assert_eq!(pool.size(), 100);
        assert!(manager.get_storage(2).is_none());
        assert!(manager.add_storage(&engines[1]).is_err());

        assert!(manager.get_storage(3).is_none());
        assert!(manager
            .add_storage(&StorageEngineMeta::new(3, TEST_ENGINE_TYPE))
            .unwrap());
        assert!(!manager
            .add_storage(&StorageEngineMeta::new(3, TEST_ENGINE_TYPE))
            .unwrap());
        assert!(manager.get_storage(3).is_some());
    }
}
