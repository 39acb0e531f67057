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
    collections::HashSet,
    fmt,
    ops::Deref,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::anyhow;

use super::{PhysicalTask, ResultSlot, TaskCore, TaskExecuteResult};
use crate::{
    ensure,
    memory::run_pipeline,
    operator::Operator,
    types::{RowStream, TaskOutput},
    Error, Result,
};

/// Task running over data already in memory: the results of its parents, or
/// a materialized source when it has none.
pub struct MemoryPhysicalTask {
    core: TaskCore,
    /// Result slots of the parents, dropped once the task runs.
    parents: Mutex<Vec<Arc<ResultSlot>>>,
    required_parents: usize,
    ready_parents: AtomicUsize,
    source: Option<RowStream>,
}

impl MemoryPhysicalTask {
    /// Builds a task fed by `parents` and registers it as their follower.
    ///
    /// Nothing is registered unless every parent is free to take it.
    pub fn follow(operators: Vec<Operator>, parents: Vec<PhysicalTask>) -> Result<Arc<Self>> {
        let mut ids = HashSet::with_capacity(parents.len());
        for parent in &parents {
            let core = parent.core();
            ensure!(ids.insert(core.id()), "parent {} is listed twice", core.id());
            ensure!(
                core.follower().is_none(),
                "task {} already has a follower",
                core.id()
            );
        }

        let task = Arc::new(Self {
            core: TaskCore::new(operators.into(), true, false),
            parents: Mutex::new(parents.iter().map(|p| p.core().result_slot()).collect()),
            required_parents: parents.len(),
            ready_parents: AtomicUsize::new(0),
            source: None,
        });
        for parent in &parents {
            parent.core().set_follower(task.clone())?;
        }

        Ok(task)
    }

    pub fn with_source(operators: Vec<Operator>, source: RowStream) -> Arc<Self> {
        Arc::new(Self {
            core: TaskCore::new(operators.into(), true, false),
            parents: Mutex::new(Vec::new()),
            required_parents: 0,
            ready_parents: AtomicUsize::new(0),
            source: Some(source),
        })
    }

    pub fn required_parents(&self) -> usize {
        self.required_parents
    }

    /// Called once by each parent when it finishes. Returns true exactly once:
    /// for the notification completing the set of required parents.
    pub fn notify_parent_ready(&self) -> bool {
        let ready = self.ready_parents.fetch_add(1, Ordering::AcqRel) + 1;
        ready == self.required_parents
    }

    pub fn execute(&self) -> TaskExecuteResult {
        let parents = match self.parents.lock() {
            Ok(mut parents) => std::mem::take(&mut *parents),
            Err(e) => return Err(Arc::new(anyhow!("parents lock poisoned, err:{e}").into())),
        };

        let mut inputs = Vec::with_capacity(parents.len() + 1);
        if let Some(source) = &self.source {
            inputs.push(source.clone());
        }
        for parent in &parents {
            match parent.get() {
                Some(Ok(output)) => {
                    if let Some(rows) = output.rows() {
                        inputs.push(rows.clone());
                    }
                }
                Some(Err(e)) => return Err(Arc::new(Error::parent_failed(e.clone()))),
                None => {
                    return Err(Arc::new(
                        anyhow!("parent {} finished without result", parent.task_id()).into(),
                    ))
                }
            }
        }

        run_pipeline(self.operators(), inputs)
            .map(TaskOutput::Rows)
            .map_err(Arc::new)
    }
}

impl Deref for MemoryPhysicalTask {
    type Target = TaskCore;

    fn deref(&self) -> &TaskCore {
        &self.core
    }
}

impl fmt::Debug for MemoryPhysicalTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPhysicalTask")
            .field("core", &self.core)
            .field("required_parents", &self.required_parents)
            .field("ready_parents", &self.ready_parents.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        operator::{Limit, Project},
        test_util::{int_rows, new_fragment, read_task},
        ErrorKind,
    };

    fn storage_parent() -> PhysicalTask {
        Arc::new(read_task(new_fragment("unit0", &[]))).into()
    }

    #[test]
    fn test_ready_only_once() {
        let parents = vec![storage_parent(), storage_parent(), storage_parent()];
        let task = MemoryPhysicalTask::follow(vec![Operator::Union], parents).unwrap();
        assert_eq!(task.required_parents(), 3);

        assert!(!task.notify_parent_ready());
        assert!(!task.notify_parent_ready());
        assert!(task.notify_parent_ready());
        // Extra notifications never make it ready again.
        assert!(!task.notify_parent_ready());
    }

    #[test]
    fn test_single_follower_per_task() {
        let parent = storage_parent();
        MemoryPhysicalTask::follow(vec![Operator::Union], vec![parent.clone()]).unwrap();
        assert!(MemoryPhysicalTask::follow(vec![Operator::Union], vec![parent]).is_err());
    }

    #[test]
    fn test_rejected_follow_registers_nothing() {
        let (a, b) = (storage_parent(), storage_parent());
        MemoryPhysicalTask::follow(vec![Operator::Union], vec![b.clone()]).unwrap();

        assert!(MemoryPhysicalTask::follow(vec![Operator::Union], vec![a.clone(), b]).is_err());
        assert!(a.core().follower().is_none());
        assert!(MemoryPhysicalTask::follow(vec![Operator::Union], vec![a.clone(), a.clone()]).is_err());
        assert!(a.core().follower().is_none());

        MemoryPhysicalTask::follow(vec![Operator::Union], vec![a]).unwrap();
    }

    #[test]
    fn test_unexecuted_chain_is_freed() {
        let parent = Arc::new(read_task(new_fragment("unit0", &[])));
        let follower =
            MemoryPhysicalTask::follow(vec![Operator::Union], vec![parent.clone().into()]).unwrap();
        let (weak_parent, weak_follower) = (Arc::downgrade(&parent), Arc::downgrade(&follower));

        drop(follower);
        assert!(weak_follower.upgrade().is_some());
        drop(parent);
        assert!(weak_parent.upgrade().is_none());
        assert!(weak_follower.upgrade().is_none());
    }

    #[test]
    fn test_execute_over_parents() {
        let parents = vec![storage_parent(), storage_parent()];
        for (i, parent) in parents.iter().enumerate() {
            let rows = int_rows("a.b", &[i as i64 * 10, i as i64 * 10 + 1]);
            parent.core().set_result(Ok(TaskOutput::Rows(rows)));
        }
        let task = MemoryPhysicalTask::follow(
            vec![
                Operator::Union,
                Operator::Limit(Limit {
                    limit: 3,
                    offset: 0,
                }),
            ],
            parents.clone(),
        )
        .unwrap();

        let output = task.execute().unwrap();
        assert_eq!(output.rows().unwrap().num_rows(), 3);
        assert!(task.parents.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failed_parent() {
        let parents = vec![storage_parent(), storage_parent()];
        parents[0]
            .core()
            .set_result(Ok(TaskOutput::Rows(int_rows("a.b", &[1]))));
        parents[1]
            .core()
            .set_result(Err(Arc::new(Error::storage_not_ready(2))));
        let task = MemoryPhysicalTask::follow(vec![Operator::Union], parents).unwrap();

        let err = task.execute().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParentTaskFailed);
    }

    #[test]
    fn test_execute_source() {
        let task = MemoryPhysicalTask::with_source(
            vec![Operator::Project(Project::new(["a.*"]))],
            int_rows("a.b", &[1, 2]),
        );
        assert_eq!(task.required_parents(), 0);
        assert!(!task.notify_parent_ready());

        let output = task.execute().unwrap();
        assert_eq!(output.rows().unwrap().num_rows(), 2);
    }
}
