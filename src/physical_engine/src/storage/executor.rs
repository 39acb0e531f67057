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
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::{Duration, Instant},
};

use anyhow::anyhow;
use futures::FutureExt;
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::{global, StorageDriverRef, StorageManagerRef};
use crate::{
    config::ExecutorConfig,
    memory::MemoryTaskDispatcher,
    metadata::{MetaManagerRef, StorageEngineId, StorageEngineMeta, StorageUnitMeta},
    monitor::TaskMonitorRef,
    operator::Operator,
    pool::TaskPoolRef,
    queue::TaskQueue,
    replica::ReplicaDispatcherRef,
    task::{GlobalPhysicalTask, StoragePhysicalTask, TaskExecuteResult},
    types::TaskOutput,
    Error, ErrorKind, Result,
};

type StorageTaskQueue = TaskQueue<Arc<StoragePhysicalTask>>;

pub struct Builder {
    runtime: Handle,
    config: ExecutorConfig,
    meta: MetaManagerRef,
    storage_manager: StorageManagerRef,
    memory_dispatcher: MemoryTaskDispatcher,
    replica_dispatcher: Option<ReplicaDispatcherRef>,
    monitors: Vec<TaskMonitorRef>,
}

impl Builder {
    pub fn new(
        runtime: Handle,
        config: ExecutorConfig,
        meta: MetaManagerRef,
        storage_manager: StorageManagerRef,
        memory_dispatcher: MemoryTaskDispatcher,
    ) -> Self {
        Self {
            runtime,
            config,
            meta,
            storage_manager,
            memory_dispatcher,
            replica_dispatcher: None,
            monitors: Vec::new(),
        }
    }

    /// Without a replica dispatcher every task goes to the master unit.
    pub fn replica_dispatcher(mut self, dispatcher: ReplicaDispatcherRef) -> Self {
        self.replica_dispatcher = Some(dispatcher);
        self
    }

    pub fn monitor(mut self, monitor: TaskMonitorRef) -> Self {
        self.monitors.push(monitor);
        self
    }

    /// Registers the metadata hooks and starts a dispatch loop for the
    /// pre-existing data of every engine.
    pub fn build(self) -> StorageTaskExecutor {
        let inner = Arc::new(Inner {
            runtime: self.runtime,
            config: self.config,
            meta: self.meta,
            storage_manager: self.storage_manager,
            memory_dispatcher: self.memory_dispatcher,
            replica_dispatcher: self.replica_dispatcher,
            monitors: self.monitors,
            units: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        inner
            .meta
            .register_storage_unit_hook(Arc::new(move |before, after| {
                if let (None, Some(unit)) = (before, after) {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_storage_unit_created(unit);
                    }
                }
            }));
        let weak = Arc::downgrade(&inner);
        inner
            .meta
            .register_storage_engine_change_hook(Arc::new(move |before, after| {
                if let (None, Some(engine)) = (before, after) {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_storage_engine_created(engine);
                    }
                }
            }));

        for engine in inner.meta.storage_engine_list() {
            if let Some(dummy) = engine.dummy_storage_unit() {
                inner.on_storage_unit_created(&dummy);
            }
        }

        StorageTaskExecutor { inner }
    }
}

/// Routes storage tasks to the queue of their storage unit.
///
/// Every storage unit gets one queue and one dispatch loop the first time it
/// is announced by the metadata service. The loop hands tasks, in queue
/// order, to the pool of the unit's storage engine.
pub struct StorageTaskExecutor {
    inner: Arc<Inner>,
}

impl StorageTaskExecutor {
    pub fn commit(&self, task: Arc<StoragePhysicalTask>) -> Result<()> {
        let unit_id = match &self.inner.replica_dispatcher {
            Some(dispatcher) => dispatcher.choose_replica(&task),
            None => task.target_fragment().master_storage_unit_id().to_string(),
        };
        self.inner.enqueue(&unit_id, task)
    }

    /// Stops at the first task whose unit is unknown, tasks before it are
    /// already queued.
    pub fn commit_all(&self, tasks: impl IntoIterator<Item = Arc<StoragePhysicalTask>>) -> Result<()> {
        for task in tasks {
            self.commit(task)?;
        }
        Ok(())
    }

    /// Skips the replica choice, the caller already knows the unit.
    pub fn commit_with_target_storage_unit_id(
        &self,
        task: Arc<StoragePhysicalTask>,
        unit_id: &str,
    ) -> Result<()> {
        self.inner.enqueue(unit_id, task)
    }

    /// Runs a task spanning the whole cluster and waits for it.
    pub async fn execute_global_task(&self, task: &GlobalPhysicalTask) -> TaskExecuteResult {
        let begin = Instant::now();
        let result = match task.operator() {
            Operator::ShowTimeSeries(op) => {
                global::show_time_series(&*self.inner.meta, &self.inner.storage_manager, op)
                    .await
                    .map(TaskOutput::Rows)
            }
            other => Err(Error::unexpected_operator(other.op_type())),
        }
        .map_err(Arc::new);

        if let Err(e) = &result {
            error!(task = %task.id(), "Execute global task failed, err:{e}");
        }
        task.set_span(begin.elapsed());
        task.set_result(result.clone());
        result
    }

    pub fn unit_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = match self.inner.lock_units() {
            Ok(units) => units.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        ids.sort();
        ids
    }

    /// Tasks waiting in the unit's queue, `None` for an unknown unit.
    pub fn queue_len(&self, unit_id: &str) -> Option<usize> {
        let units = self.inner.lock_units().ok()?;
        units.get(unit_id).map(|u| u.queue.len())
    }

    /// Aborts every dispatch loop. Tasks already handed to a pool still run,
    /// queued ones are never dispatched.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(units) = self.inner.lock_units() {
            for unit in units.values() {
                unit.handle.abort();
            }
        }
        info!("Storage task executor is shutdown");
    }
}

impl Drop for StorageTaskExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Unit {
    queue: Arc<StorageTaskQueue>,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone)]
struct UnitContext {
    id: String,
    storage_engine_id: StorageEngineId,
    dummy: bool,
}

struct Inner {
    runtime: Handle,
    config: ExecutorConfig,
    meta: MetaManagerRef,
    storage_manager: StorageManagerRef,
    memory_dispatcher: MemoryTaskDispatcher,
    replica_dispatcher: Option<ReplicaDispatcherRef>,
    monitors: Vec<TaskMonitorRef>,
    units: Mutex<HashMap<String, Unit>>,
    closed: AtomicBool,
}

impl Inner {
    fn lock_units(&self) -> Result<MutexGuard<'_, HashMap<String, Unit>>> {
        let units = self
            .units
            .lock()
            .map_err(|e| anyhow!("storage units lock poisoned, err:{e}"))?;
        Ok(units)
    }

    fn enqueue(&self, unit_id: &str, task: Arc<StoragePhysicalTask>) -> Result<()> {
        let units = self.lock_units()?;
        let unit = units
            .get(unit_id)
            .ok_or_else(|| Error::unknown_storage_unit(unit_id))?;
        unit.queue.add_task(task);
        Ok(())
    }

    /// Creates the queue and dispatch loop of a new unit, a unit announced
    /// twice keeps its first loop.
    fn on_storage_unit_created(self: &Arc<Self>, unit: &StorageUnitMeta) {
        if self.closed.load(Ordering::Acquire) {
            warn!(unit_id = %unit.id, "Executor is shutdown, ignore new storage unit");
            return;
        }
        let mut units = match self.lock_units() {
            Ok(units) => units,
            Err(e) => {
                error!(unit_id = %unit.id, "Failed to register storage unit, err:{e}");
                return;
            }
        };
        if units.contains_key(&unit.id) {
            debug!(unit_id = %unit.id, "Storage unit is already known");
            return;
        }

        let ctx = UnitContext {
            id: unit.id.clone(),
            storage_engine_id: unit.storage_engine_id,
            dummy: unit.dummy,
        };
        let queue = Arc::new(StorageTaskQueue::new());
        let handle = self
            .runtime
            .spawn(self.clone().dispatch_loop(ctx, queue.clone()));
        units.insert(unit.id.clone(), Unit { queue, handle });
        info!(unit_id = %unit.id, storage_engine = unit.storage_engine_id, dummy = unit.dummy, "New storage unit, dispatch loop started");
    }

    fn on_storage_engine_created(&self, engine: &StorageEngineMeta) {
        if engine.created_by == self.meta.node_id() {
            return;
        }
        match self.storage_manager.add_storage(engine) {
            Ok(added) => debug!(id = engine.id, added, "Storage engine from other node"),
            Err(e) => error!(id = engine.id, "Failed to add storage engine, err:{e}"),
        }
    }

    async fn dispatch_loop(self: Arc<Self>, ctx: UnitContext, queue: Arc<StorageTaskQueue>) {
        let mut storage = self.wait_for_storage(&ctx).await;
        while let Some(task) = queue.get_task().await {
            task.stamp_storage_unit(&ctx.id, ctx.dummy);

            if storage.is_none() {
                storage = self.storage_manager.get_storage(ctx.storage_engine_id);
            }
            let Some((driver, pool)) = storage.clone() else {
                self.finish(
                    &task,
                    Err(Arc::new(Error::storage_not_ready(ctx.storage_engine_id))),
                );
                continue;
            };

            // Soft limit, the pool drains concurrently.
            let pending = pool.queue_len();
            let max = self.config.max_cached_physical_task_per_storage;
            if pending > max {
                warn!(unit_id = %ctx.id, task = %task.id(), pending, max, "Reject task of overloaded storage");
                let err = Error::too_many_tasks(ctx.storage_engine_id, &ctx.id, pending, max);
                self.finish(&task, Err(Arc::new(err)));
                continue;
            }

            pool.submit(self.clone().execute_task(driver, task));
        }
        error!(unit_id = %ctx.id, "Task queue closed, dispatch loop exits");
    }

    /// Polls the storage manager until the engine is ready or the configured
    /// timeout passes.
    async fn wait_for_storage(&self, ctx: &UnitContext) -> Option<(StorageDriverRef, TaskPoolRef)> {
        let interval = self.config.storage_poll_interval();
        let timeout = self.config.storage_poll_timeout.map(Duration::from);
        let begin = Instant::now();
        loop {
            if let Some(storage) = self.storage_manager.get_storage(ctx.storage_engine_id) {
                return Some(storage);
            }
            if timeout.is_some_and(|t| begin.elapsed() >= t) {
                warn!(unit_id = %ctx.id, storage_engine = ctx.storage_engine_id, "Storage is not ready after timeout");
                return None;
            }
            debug!(unit_id = %ctx.id, "Spinning for storage");
            tokio::time::sleep(interval).await;
        }
    }

    async fn execute_task(self: Arc<Self>, driver: StorageDriverRef, task: Arc<StoragePhysicalTask>) {
        let begin = Instant::now();
        let result = match AssertUnwindSafe(driver.execute(&task)).catch_unwind().await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) if e.kind() == ErrorKind::Execution => Err(e),
            Ok(Err(e)) => Err(Error::execution(e)),
            Err(_) => Err(Error::execution(anyhow!("storage driver panicked"))),
        };
        let span = begin.elapsed();
        if let Err(e) = &result {
            error!(task = ?task, "Execute storage task failed, err:{e}");
        }

        self.record(&task, span);
        task.set_span(span);

        let succeeded = result.is_ok();
        self.finish(&task, result.map_err(Arc::new));

        if task.needs_broadcasting() {
            if succeeded {
                self.broadcast(&task);
            } else {
                warn!(task = %task.id(), "Skip broadcasting failed task to replicas");
            }
        }
    }

    /// Monitors are best effort, their failures never reach the task.
    fn record(&self, task: &StoragePhysicalTask, span: Duration) {
        for monitor in &self.monitors {
            match std::panic::catch_unwind(AssertUnwindSafe(|| monitor.record(task, span))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(task = %task.id(), "Monitor failed to record task, err:{e}"),
                Err(_) => error!(task = %task.id(), "Monitor panicked while recording task"),
            }
        }
    }

    /// Sets the result and releases the follower once all its parents are
    /// done.
    fn finish(&self, task: &StoragePhysicalTask, result: TaskExecuteResult) {
        task.set_result(result);
        if !task.is_sync() {
            return;
        }
        if let Some(follower) = task.follower() {
            if follower.notify_parent_ready() {
                self.memory_dispatcher.add_memory_task(follower.clone());
            }
        }
    }

    /// Queues a copy of `task` on every unit of the replication group except
    /// the one which executed it. Copies are fire and forget.
    fn broadcast(&self, task: &StoragePhysicalTask) {
        let executed_by = task.storage_unit().unwrap_or_default();
        for replica_id in task.target_fragment().master_storage_unit.replica_ids() {
            if replica_id == executed_by {
                continue;
            }
            let copy = Arc::new(task.replica_copy());
            let copy_id = copy.id();
            match self.enqueue(&replica_id, copy) {
                Ok(()) => {
                    info!(task = %task.id(), copy = %copy_id, replica = %replica_id, "Broadcast task to replica")
                }
                Err(e) => {
                    error!(task = %task.id(), replica = %replica_id, "Failed to broadcast task, err:{e}")
                }
            }
        }
    }
}
