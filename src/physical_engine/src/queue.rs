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

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    Mutex,
};

/// Unbounded FIFO queue, producers never block.
///
/// Consumers are serialized by a lock, so each task is handed out exactly
/// once and in the order it was added.
pub struct TaskQueue<T> {
    tx: UnboundedSender<T>,
    rx: Mutex<UnboundedReceiver<T>>,
    len: AtomicUsize,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            len: AtomicUsize::new(0),
        }
    }

    pub fn add_task(&self, task: T) {
        self.len.fetch_add(1, Ordering::Relaxed);
        // The receiver lives as long as `self`, so sending can't fail.
        let _ = self.tx.send(task);
    }

    /// Waits until a task is available.
    ///
    /// Returns `None` only if the queue is closed, which can't happen while
    /// `self` is alive.
    pub async fn get_task(&self) -> Option<T> {
        let mut rx = self.rx.lock().await;
        let task = rx.recv().await;
        if task.is_some() {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
        task
    }

    /// Number of queued tasks, may be stale by the time it's read.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
