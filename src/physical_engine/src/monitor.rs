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

//! Telemetry of executed storage tasks.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::anyhow;

use crate::{
    metadata::{FragmentMeta, KeyInterval, TimeSeriesRange},
    operator::OperatorType,
    task::StoragePhysicalTask,
    Result,
};

/// Observes every storage task once it's executed. Errors are only logged
/// by the caller.
pub trait TaskMonitor: Send + Sync {
    fn record(&self, task: &StoragePhysicalTask, span: Duration) -> Result<()>;
}

pub type TaskMonitorRef = Arc<dyn TaskMonitor>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestStats {
    pub count: u64,
    pub total_span: Duration,
}

type FragmentKey = (TimeSeriesRange, KeyInterval);

/// Counts requests per fragment and type of the leading operator.
#[derive(Debug, Default)]
pub struct RequestsMonitor {
    stats: Mutex<BTreeMap<FragmentKey, BTreeMap<OperatorType, RequestStats>>>,
}

impl RequestsMonitor {
    pub fn stats(&self, fragment: &FragmentMeta) -> BTreeMap<OperatorType, RequestStats> {
        let key = (fragment.ts_range.clone(), fragment.key_interval);
        self.stats
            .lock()
            .ok()
            .and_then(|stats| stats.get(&key).cloned())
            .unwrap_or_default()
    }

    /// Returns the collected stats and starts over.
    pub fn take(&self) -> BTreeMap<FragmentKey, BTreeMap<OperatorType, RequestStats>> {
        self.stats
            .lock()
            .map(|mut stats| std::mem::take(&mut *stats))
            .unwrap_or_default()
    }
}

impl TaskMonitor for RequestsMonitor {
    fn record(&self, task: &StoragePhysicalTask, span: Duration) -> Result<()> {
        let Some(op) = task.operators().first() else {
            return Err(anyhow!("task has no operator, task:{}", task.id()).into());
        };
        let op_type = op.op_type();

        let fragment = task.target_fragment();
        let key = (fragment.ts_range.clone(), fragment.key_interval);
        let mut stats = self
            .stats
            .lock()
            .map_err(|e| anyhow!("requests monitor lock poisoned, err:{e}"))?;
        let entry = stats.entry(key).or_default().entry(op_type).or_default();
        entry.count += 1;
        entry.total_span += span;
        Ok(())
    }
}
