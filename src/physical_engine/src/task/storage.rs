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
    fmt,
    ops::Deref,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
};

use super::TaskCore;
use crate::{metadata::FragmentMetaRef, operator::Operator};

/// Task executed by the storage unit owning `target_fragment`.
pub struct StoragePhysicalTask {
    core: TaskCore,
    target_fragment: FragmentMetaRef,
    session_id: Option<u64>,
    /// Stamped by the dispatch loop which dequeues the task.
    storage_unit: OnceLock<String>,
    dummy_storage_unit: AtomicBool,
}

impl StoragePhysicalTask {
    pub fn new(
        operators: Vec<Operator>,
        target_fragment: FragmentMetaRef,
        is_sync: bool,
        needs_broadcasting: bool,
    ) -> Self {
        Self::with_shared_operators(
            operators.into(),
            target_fragment,
            is_sync,
            needs_broadcasting,
        )
    }

    fn with_shared_operators(
        operators: Arc<[Operator]>,
        target_fragment: FragmentMetaRef,
        is_sync: bool,
        needs_broadcasting: bool,
    ) -> Self {
        Self {
            core: TaskCore::new(operators, is_sync, needs_broadcasting),
            target_fragment,
            session_id: None,
            storage_unit: OnceLock::new(),
            dummy_storage_unit: AtomicBool::new(false),
        }
    }

    /// Client session issuing the task, used to pin reads to one replica.
    pub fn with_session_id(mut self, session_id: u64) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Copy of the operators for another replica, it never releases followers
    /// nor broadcasts again.
    pub fn replica_copy(&self) -> Self {
        Self::with_shared_operators(
            self.core.shared_operators(),
            self.target_fragment.clone(),
            false,
            false,
        )
    }

    pub fn target_fragment(&self) -> &FragmentMetaRef {
        &self.target_fragment
    }

    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    pub fn is_write(&self) -> bool {
        self.operators().first().is_some_and(Operator::is_write)
    }

    /// Unit which dequeued the task, `None` before dispatching.
    pub fn storage_unit(&self) -> Option<&str> {
        self.storage_unit.get().map(String::as_str)
    }

    pub fn is_dummy_storage_unit(&self) -> bool {
        self.dummy_storage_unit.load(Ordering::Acquire)
    }

    pub(crate) fn stamp_storage_unit(&self, unit_id: &str, dummy: bool) {
        let _ = self.storage_unit.set(unit_id.to_string());
        self.dummy_storage_unit.store(dummy, Ordering::Release);
    }
}

impl Deref for StoragePhysicalTask {
    type Target = TaskCore;

    fn deref(&self) -> &TaskCore {
        &self.core
    }
}

impl fmt::Debug for StoragePhysicalTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoragePhysicalTask")
            .field("core", &self.core)
            .field("fragment", &self.target_fragment.ts_range.to_string())
            .field("storage_unit", &self.storage_unit.get())
            .finish()
    }
}
