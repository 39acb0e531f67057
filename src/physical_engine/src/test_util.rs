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

//! Builders and scripted storage drivers shared by tests.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::anyhow;
use arrow::{
    array::{Int64Array, RecordBatch},
    datatypes::{DataType, Field, Schema},
};
use async_trait::async_trait;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::{
    metadata::{
        FragmentMeta, FragmentMetaRef, KeyInterval, StorageEngineId, StorageEngineMeta,
        StorageUnitMeta, TimeSeriesRange,
    },
    operator::{Insert, Operator, Project},
    storage::{StorageDriver, StorageDriverFactory, StorageDriverRef},
    task::StoragePhysicalTask,
    types::{RowStream, Series, TaskOutput, KEY_COLUMN},
    Error, Result,
};

pub const TEST_ENGINE_TYPE: &str = "test";
pub const TEST_ENGINE_ID: StorageEngineId = 1;

/// One series named `path`, the values equal the keys.
pub fn int_rows(path: &str, keys: &[i64]) -> RowStream {
    let schema = Arc::new(Schema::new(vec![
        Field::new(KEY_COLUMN, DataType::Int64, false),
        Field::new(path, DataType::Int64, true),
    ]));
    let values = Int64Array::from(keys.to_vec());
    let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(values.clone()), Arc::new(values)])
        .unwrap();
    RowStream::new(schema, vec![batch])
}

/// Every unit of the group lives on [`TEST_ENGINE_ID`].
pub fn new_fragment(master_id: &str, replica_ids: &[&str]) -> FragmentMetaRef {
    let mut master = StorageUnitMeta::new_master(master_id, TEST_ENGINE_ID);
    for id in replica_ids {
        master
            .add_replica(StorageUnitMeta::new_replica(*id, TEST_ENGINE_ID, master_id))
            .unwrap();
    }
    Arc::new(FragmentMeta::new(
        TimeSeriesRange::all(),
        KeyInterval::ALL,
        Arc::new(master),
    ))
}

pub fn read_task(fragment: FragmentMetaRef) -> StoragePhysicalTask {
    StoragePhysicalTask::new(
        vec![Operator::Project(Project::new(["*"]))],
        fragment,
        true,
        false,
    )
}

pub fn write_task(fragment: FragmentMetaRef, needs_broadcasting: bool) -> StoragePhysicalTask {
    let batch = int_rows("a.b", &[1, 2, 3]).into_batches().remove(0);
    StoragePhysicalTask::new(
        vec![Operator::Insert(Insert { batch })],
        fragment,
        true,
        needs_broadcasting,
    )
}

/// Polls `cond` until it holds, panics after a few seconds.
pub async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed {
    pub unit_id: String,
    pub task_id: Uuid,
    pub is_sync: bool,
    pub needs_broadcasting: bool,
}

/// Remembers every task it executes, and succeeds unless the task runs on
/// `failing_unit`.
#[derive(Debug, Default)]
pub struct RecordingDriver {
    series: Vec<Series>,
    failing_unit: Option<String>,
    executed: Mutex<Vec<Executed>>,
}

impl RecordingDriver {
    pub fn with_series(series: Vec<Series>) -> Self {
        Self {
            series,
            ..Default::default()
        }
    }

    pub fn failing_on(unit_id: &str) -> Self {
        Self {
            failing_unit: Some(unit_id.to_string()),
            ..Default::default()
        }
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.executed.lock().unwrap().clone()
    }

    pub fn executed_on(&self, unit_id: &str) -> Vec<Executed> {
        self.executed()
            .into_iter()
            .filter(|e| e.unit_id == unit_id)
            .collect()
    }
}

#[async_trait]
impl StorageDriver for RecordingDriver {
    async fn execute(&self, task: &StoragePhysicalTask) -> Result<TaskOutput> {
        let unit_id = task.storage_unit().unwrap_or_default().to_string();
        self.executed.lock().unwrap().push(Executed {
            unit_id: unit_id.clone(),
            task_id: task.id(),
            is_sync: task.is_sync(),
            needs_broadcasting: task.needs_broadcasting(),
        });
        if self.failing_unit.as_ref() == Some(&unit_id) {
            Err(Error::execution(anyhow!("injected failure on {unit_id}")))
        } else if task.is_write() {
            Ok(TaskOutput::Done)
        } else {
            Ok(TaskOutput::Rows(int_rows("a.b", &[1])))
        }
    }

    async fn list_series(&self) -> Result<Vec<Series>> {
        Ok(self.series.clone())
    }
}

#[derive(Debug, Default)]
pub struct FailingDriver;

#[async_trait]
impl StorageDriver for FailingDriver {
    async fn execute(&self, _task: &StoragePhysicalTask) -> Result<TaskOutput> {
        Err(Error::execution(anyhow!("injected failure")))
    }

    async fn list_series(&self) -> Result<Vec<Series>> {
        Err(Error::execution(anyhow!("injected failure")))
    }
}

/// Panics on its first task, then succeeds.
#[derive(Debug, Default)]
pub struct PanicOnceDriver {
    panicked: AtomicBool,
}

#[async_trait]
impl StorageDriver for PanicOnceDriver {
    async fn execute(&self, _task: &StoragePhysicalTask) -> Result<TaskOutput> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("injected panic");
        }
        Ok(TaskOutput::Done)
    }

    async fn list_series(&self) -> Result<Vec<Series>> {
        Ok(Vec::new())
    }
}

/// Blocks every task until the test lets it pass.
#[derive(Debug)]
pub struct GatedDriver {
    gate: Semaphore,
    started: AtomicUsize,
}

impl Default for GatedDriver {
    fn default() -> Self {
        Self {
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
        }
    }
}

impl GatedDriver {
    pub fn open(&self, tasks: usize) {
        self.gate.add_permits(tasks);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageDriver for GatedDriver {
    async fn execute(&self, _task: &StoragePhysicalTask) -> Result<TaskOutput> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.gate
            .acquire()
            .await
            .map_err(|e| anyhow!("gate closed, err:{e}"))?
            .forget();
        Ok(TaskOutput::Done)
    }

    async fn list_series(&self) -> Result<Vec<Series>> {
        Ok(Vec::new())
    }
}

/// Hands out the same driver for every engine of its type.
pub struct StaticFactory {
    engine_type: String,
    driver: StorageDriverRef,
}

impl StaticFactory {
    pub fn new(driver: StorageDriverRef) -> Self {
        Self::with_type(TEST_ENGINE_TYPE, driver)
    }

    pub fn with_type(engine_type: impl Into<String>, driver: StorageDriverRef) -> Self {
        Self {
            engine_type: engine_type.into(),
            driver,
        }
    }
}

impl StorageDriverFactory for StaticFactory {
    fn engine_type(&self) -> &str {
        &self.engine_type
    }

    fn build(&self, _meta: &StorageEngineMeta) -> Result<StorageDriverRef> {
        Ok(self.driver.clone())
    }
}
