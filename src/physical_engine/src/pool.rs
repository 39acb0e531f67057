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

use std::{future::Future, panic::AssertUnwindSafe, pin::Pin, sync::Arc};

use futures::FutureExt;
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::error;

use crate::queue::TaskQueue;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Fixed number of workers pulling jobs from one FIFO queue.
///
/// Jobs start in submission order; at most `size` of them run at the same
/// time.
pub struct TaskPool {
    name: String,
    size: usize,
    jobs: Arc<TaskQueue<Job>>,
    workers: Vec<JoinHandle<()>>,
}

pub type TaskPoolRef = Arc<TaskPool>;

impl TaskPool {
    pub fn new(name: impl Into<String>, size: usize, runtime: &Handle) -> Self {
        let name = name.into();
        let size = size.max(1);
        let jobs: Arc<TaskQueue<Job>> = Arc::new(TaskQueue::new());
        let workers = (0..size)
            .map(|_| {
                let jobs = jobs.clone();
                let name = name.clone();
                runtime.spawn(async move {
                    while let Some(job) = jobs.get_task().await {
                        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                            error!(pool = %name, "Job panicked");
                        }
                    }
                })
            })
            .collect();

        Self {
            name,
            size,
            jobs,
            workers,
        }
    }

    pub fn submit<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.jobs.add_task(Box::pin(job));
    }

    /// Jobs submitted but not yet picked by a worker. Read without
    /// synchronization with `submit`, so it's only a hint.
    pub fn queue_len(&self) -> usize {
        self.jobs.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}
