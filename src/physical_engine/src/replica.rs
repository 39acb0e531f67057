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

//! Choice of the replica serving a storage task.

use std::sync::Arc;

use crate::task::StoragePhysicalTask;

pub trait ReplicaDispatcher: Send + Sync {
    /// Id of the unit which should execute `task`, must belong to the
    /// replication group of the task's fragment.
    fn choose_replica(&self, task: &StoragePhysicalTask) -> String;
}

pub type ReplicaDispatcherRef = Arc<dyn ReplicaDispatcher>;

/// Writes go to the master, reads of one session always hit the same unit so
/// a session observes its own writes once they reach that replica.
///
/// Reads without a session are spread by fragment.
#[derive(Debug, Default)]
pub struct SessionAffinityDispatcher;

impl ReplicaDispatcher for SessionAffinityDispatcher {
    fn choose_replica(&self, task: &StoragePhysicalTask) -> String {
        let master = &task.target_fragment().master_storage_unit;
        if task.is_write() || master.replicas.is_empty() {
            return master.master_id.clone();
        }

        let mut ids = master.replica_ids();
        ids.sort();
        let hash = match task.session_id() {
            Some(session_id) => seahash::hash(&session_id.to_le_bytes()),
            None => seahash::hash(task.target_fragment().ts_range.to_string().as_bytes()),
        };
        let idx = (hash % ids.len() as u64) as usize;
        ids.swap_remove(idx)
    }
}
