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

//! Execution of in-memory task chains.

mod pipeline;

use std::{
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::Instant,
};

use anyhow::anyhow;
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{error, info, warn};

pub(crate) use self::pipeline::run_pipeline;
use crate::{
    config::ExecutorConfig, pool::TaskPool, queue::TaskQueue, task::MemoryPhysicalTask, Error,
};

/// One dispatch loop feeding a bounded pool of workers.
///
/// A worker finishing a task keeps running its follower as long as the
/// follower becomes ready, so a dependent chain stays on one worker.
#[derive(Clone)]
pub struct MemoryTaskDispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    runtime: Handle,
    queue: Arc<TaskQueue<Arc<MemoryPhysicalTask>>>,
    pool: Arc<TaskPool>,
    dispatch_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryTaskDispatcher {
    pub fn new(config: &ExecutorConfig, runtime: Handle) -> Self {
        let pool = TaskPool::new("memory-task", config.memory_task_pool_size, &runtime);
        Self {
            inner: Arc::new(Inner {
                runtime,
                queue: Arc::new(TaskQueue::new()),
                pool: Arc::new(pool),
                dispatch_handle: Mutex::new(None),
            }),
        }
    }

    pub fn add_memory_task(&self, task: Arc<MemoryPhysicalTask>) {
        self.inner.queue.add_task(task);
    }

    /// Starts the dispatch loop, a no-op if it's running.
    pub fn start(&self) {
        let Ok(mut handle) = self.inner.dispatch_handle.lock() else {
            error!("Memory dispatcher state is poisoned");
            return;
        };
        if handle.is_some() {
            warn!("Memory dispatcher is already started");
            return;
        }

        let queue = self.inner.queue.clone();
        let pool = self.inner.pool.clone();
        *handle = Some(self.inner.runtime.spawn(async move {
            Self::dispatch_loop(queue, pool).await;
        }));
        info!("Memory dispatcher started");
    }

    pub fn stop(&self) {
        if let Ok(mut handle) = self.inner.dispatch_handle.lock() {
            if let Some(handle) = handle.take() {
                handle.abort();
                info!("Memory dispatcher stopped");
            }
        }
    }

    pub fn pending_tasks(&self) -> usize {
        self.inner.queue.len() + self.inner.pool.queue_len()
    }

    async fn dispatch_loop(
        queue: Arc<TaskQueue<Arc<MemoryPhysicalTask>>>,
        pool: Arc<TaskPool>,
    ) {
        while let Some(task) = queue.get_task().await {
            pool.submit(Self::run_chain(task));
        }
        error!("Memory task queue closed, dispatcher exits");
    }

    async fn run_chain(task: Arc<MemoryPhysicalTask>) {
        let mut current = Some(task);
        while let Some(task) = current.take() {
            let begin = Instant::now();
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| task.execute()))
                .unwrap_or_else(|_| {
                    Err(Arc::new(Error::execution(anyhow!("memory task panicked"))))
                });
            if let Err(e) = &result {
                error!(task = %task.id(), "Execute memory task failed, err:{e}");
            }
            task.set_span(begin.elapsed());
            task.set_result(result);

            if let Some(follower) = task.follower() {
                if follower.notify_parent_ready() {
                    current = Some(follower.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::{
        operator::{Limit, Operator, Project},
        task::PhysicalTask,
        test_util::int_rows,
        ErrorKind,
    };

    fn new_dispatcher() -> MemoryTaskDispatcher {
        let config = ExecutorConfig {
            memory_task_pool_size: 4,
            ..Default::default()
        };
        let dispatcher = MemoryTaskDispatcher::new(&config, Handle::current());
        dispatcher.start();
        dispatcher
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_chain_runs_to_the_end() {
        let dispatcher = new_dispatcher();
        let head = MemoryPhysicalTask::with_source(
            vec![Operator::Project(Project::new(["a.*"]))],
            int_rows("a.b", &[1, 2, 3, 4]),
        );
        let middle = MemoryPhysicalTask::follow(
            vec![Operator::Limit(Limit {
                limit: 3,
                offset: 0,
            })],
            vec![PhysicalTask::from(head.clone())],
        )
        .unwrap();
        let tail = MemoryPhysicalTask::follow(
            vec![Operator::Limit(Limit {
                limit: 10,
                offset: 1,
            })],
            vec![PhysicalTask::from(middle.clone())],
        )
        .unwrap();

        dispatcher.add_memory_task(head.clone());
        let output = tail.wait_result().await.as_ref().unwrap();
        assert_eq!(output.rows().unwrap().num_rows(), 2);
        assert!(head.span().is_some() && middle.span().is_some());
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_follower_waits_for_all_parents() {
        let dispatcher = new_dispatcher();
        let left = MemoryPhysicalTask::with_source(vec![], int_rows("a.b", &[1]));
        let right = MemoryPhysicalTask::with_source(vec![], int_rows("a.b", &[2, 3]));
        let union = MemoryPhysicalTask::follow(
            vec![Operator::Union],
            vec![left.clone().into(), right.clone().into()],
        )
        .unwrap();

        dispatcher.add_memory_task(left.clone());
        left.wait_result().await.as_ref().unwrap();
        assert!(union.result().is_none());

        dispatcher.add_memory_task(right);
        let output = union.wait_result().await.as_ref().unwrap();
        assert_eq!(output.rows().unwrap().num_rows(), 3);
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_failure_is_recorded_and_loop_survives() {
        let dispatcher = new_dispatcher();
        // Delete is not runnable in memory.
        let bad = MemoryPhysicalTask::with_source(
            vec![Operator::Delete(crate::operator::Delete { patterns: vec![] })],
            int_rows("a.b", &[1]),
        );
        dispatcher.add_memory_task(bad.clone());
        let err = bad.wait_result().await.as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedOperator);

        let good = MemoryPhysicalTask::with_source(vec![], int_rows("a.b", &[1]));
        dispatcher.add_memory_task(good.clone());
        assert!(good.wait_result().await.is_ok());

        dispatcher.stop();
        assert_eq!(dispatcher.pending_tasks(), 0);
    }
}
