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

//! Units of work produced by the planner.

mod global;
mod memory;
mod storage;

use std::{
    fmt,
    sync::{Arc, OnceLock},
    time::Duration,
};

use itertools::Itertools;
use tokio::sync::Notify;
use tracing::warn;
use uuid::Uuid;

pub use self::{global::GlobalPhysicalTask, memory::MemoryPhysicalTask, storage::StoragePhysicalTask};
use crate::{ensure, operator::Operator, types::TaskOutput, Error, Result};

/// Outcome of a task. The error is shared since both the submitter and a
/// follower may observe it.
pub type TaskExecuteResult = std::result::Result<TaskOutput, Arc<Error>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Memory,
    Storage,
    Global,
}

/// Write-once result of a task.
///
/// Followers keep the slots of their parents instead of the parents, so a
/// chain that never runs is freed with its last owner.
pub struct ResultSlot {
    task_id: Uuid,
    result: OnceLock<TaskExecuteResult>,
    notify: Notify,
}

impl ResultSlot {
    fn new(task_id: Uuid) -> Self {
        Self {
            task_id,
            result: OnceLock::new(),
            notify: Notify::new(),
        }
    }

    /// Id of the task owning the slot.
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// The first result wins, later ones are dropped.
    pub fn set(&self, result: TaskExecuteResult) {
        if self.result.set(result).is_err() {
            warn!(task = %self.task_id, "Result of task is already set, ignore the new one");
            return;
        }
        self.notify.notify_waiters();
    }

    pub fn get(&self) -> Option<&TaskExecuteResult> {
        self.result.get()
    }

    pub async fn wait(&self) -> &TaskExecuteResult {
        loop {
            // Register interest before checking to not miss a wakeup.
            let notified = self.notify.notified();
            if let Some(result) = self.result.get() {
                return result;
            }
            notified.await;
        }
    }
}

/// State common to every kind of task.
pub struct TaskCore {
    id: Uuid,
    operators: Arc<[Operator]>,
    is_sync: bool,
    needs_broadcasting: bool,
    result: Arc<ResultSlot>,
    span: OnceLock<Duration>,
    follower: OnceLock<Arc<MemoryPhysicalTask>>,
}

impl TaskCore {
    fn new(operators: Arc<[Operator]>, is_sync: bool, needs_broadcasting: bool) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            operators,
            is_sync,
            needs_broadcasting,
            result: Arc::new(ResultSlot::new(id)),
            span: OnceLock::new(),
            follower: OnceLock::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    pub(crate) fn shared_operators(&self) -> Arc<[Operator]> {
        self.operators.clone()
    }

    /// Whether finishing this task may release its follower.
    pub fn is_sync(&self) -> bool {
        self.is_sync
    }

    pub fn needs_broadcasting(&self) -> bool {
        self.needs_broadcasting
    }

    /// The first result wins, later ones are dropped.
    pub fn set_result(&self, result: TaskExecuteResult) {
        self.result.set(result);
    }

    pub fn result(&self) -> Option<&TaskExecuteResult> {
        self.result.get()
    }

    pub async fn wait_result(&self) -> &TaskExecuteResult {
        self.result.wait().await
    }

    pub(crate) fn result_slot(&self) -> Arc<ResultSlot> {
        self.result.clone()
    }

    pub fn set_span(&self, span: Duration) {
        let _ = self.span.set(span);
    }

    pub fn span(&self) -> Option<Duration> {
        self.span.get().copied()
    }

    pub fn follower(&self) -> Option<&Arc<MemoryPhysicalTask>> {
        self.follower.get()
    }

    /// A task has at most one follower.
    pub fn set_follower(&self, follower: Arc<MemoryPhysicalTask>) -> Result<()> {
        let follower_id = follower.id();
        ensure!(
            self.follower.set(follower).is_ok(),
            "task {} already has a follower, new follower:{follower_id}",
            self.id
        );
        Ok(())
    }
}

impl fmt::Debug for TaskCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let operators = self.operators.iter().map(|o| o.op_type()).join(",");
        f.debug_struct("TaskCore")
            .field("id", &self.id)
            .field("operators", &operators)
            .field("is_sync", &self.is_sync)
            .field("needs_broadcasting", &self.needs_broadcasting)
            .field("finished", &self.result.get().is_some())
            .finish()
    }
}

/// Any kind of task, used where tasks of different kinds are mixed, e.g. the
/// parents of a memory task.
#[derive(Debug, Clone)]
pub enum PhysicalTask {
    Memory(Arc<MemoryPhysicalTask>),
    Storage(Arc<StoragePhysicalTask>),
    Global(Arc<GlobalPhysicalTask>),
}

impl PhysicalTask {
    pub fn task_type(&self) -> TaskType {
        match self {
            PhysicalTask::Memory(_) => TaskType::Memory,
            PhysicalTask::Storage(_) => TaskType::Storage,
            PhysicalTask::Global(_) => TaskType::Global,
        }
    }

    pub fn core(&self) -> &TaskCore {
        match self {
            PhysicalTask::Memory(t) => t,
            PhysicalTask::Storage(t) => t,
            PhysicalTask::Global(t) => t,
        }
    }
}

impl From<Arc<MemoryPhysicalTask>> for PhysicalTask {
    fn from(task: Arc<MemoryPhysicalTask>) -> Self {
        Self::Memory(task)
    }
}

impl From<Arc<StoragePhysicalTask>> for PhysicalTask {
    fn from(task: Arc<StoragePhysicalTask>) -> Self {
        Self::Storage(task)
    }
}

impl From<Arc<GlobalPhysicalTask>> for PhysicalTask {
    fn from(task: Arc<GlobalPhysicalTask>) -> Self {
        Self::Global(task)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use test_log::test;

    use super::*;
    use crate::operator::{Limit, Operator};

    fn new_core() -> Arc<TaskCore> {
        Arc::new(TaskCore::new(
            vec![Operator::Limit(Limit {
                limit: 1,
                offset: 0,
            })]
            .into(),
            true,
            false,
        ))
    }

    #[test(tokio::test)]
    async fn test_wait_result() {
        let core = new_core();
        let waiter = {
            let core = core.clone();
            tokio::spawn(async move { core.wait_result().await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(core.result().is_none());

        core.set_result(Ok(TaskOutput::Done));
        assert!(waiter.await.unwrap());
    }

    #[test]
    fn test_first_result_wins() {
        let core = new_core();
        core.set_result(Err(Arc::new(Error::storage_not_ready(1))));
        core.set_result(Ok(TaskOutput::Done));
        assert!(core.result().unwrap().is_err());

        core.set_span(Duration::from_millis(3));
        assert_eq!(core.span(), Some(Duration::from_millis(3)));
    }
}
