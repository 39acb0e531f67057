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

//! Storage side of the execution layer: drivers of storage engines, the
//! manager resolving them, and the executor routing tasks to storage units.

mod executor;
mod global;
mod in_memory;
mod manager;

use std::sync::Arc;

use async_trait::async_trait;

pub use self::{
    executor::{Builder, StorageTaskExecutor},
    in_memory::{InMemoryStorage, InMemoryStorageFactory, MEMORY_ENGINE_TYPE},
    manager::{StorageManager, StorageManagerRef},
};
use crate::{
    metadata::StorageEngineMeta,
    task::StoragePhysicalTask,
    types::{Series, TaskOutput},
    Result,
};

/// Access to one storage engine.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Runs the operators of `task` against the unit stamped on the task.
    async fn execute(&self, task: &StoragePhysicalTask) -> Result<TaskOutput>;

    /// Every series known by the engine, paths are not prefixed.
    async fn list_series(&self) -> Result<Vec<Series>>;
}

pub type StorageDriverRef = Arc<dyn StorageDriver>;

/// Builds drivers for the engines of one type.
pub trait StorageDriverFactory: Send + Sync {
    fn engine_type(&self) -> &str;

    fn build(&self, meta: &StorageEngineMeta) -> Result<StorageDriverRef>;
}

pub type StorageDriverFactoryRef = Arc<dyn StorageDriverFactory>;
