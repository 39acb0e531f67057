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

use std::collections::BTreeMap;

use tracing::debug;

use super::StorageManager;
use crate::{
    metadata::MetaManager,
    operator::{WildcardPattern, ShowTimeSeries},
    types::{RowStream, Series},
    Result,
};

/// Lists the series of every ready storage engine.
///
/// Engines not ready yet are skipped, while an error of any engine fails the
/// whole listing. Series are deduplicated and ordered by physical path before
/// filtering and pagination.
pub(crate) async fn show_time_series(
    meta: &dyn MetaManager,
    storage_manager: &StorageManager,
    op: &ShowTimeSeries,
) -> Result<RowStream> {
    let mut all_series = BTreeMap::new();
    for engine in meta.storage_engine_list() {
        let Some((driver, _)) = storage_manager.get_storage(engine.id) else {
            debug!(id = engine.id, "Skip storage engine which is not ready");
            continue;
        };

        for mut series in driver.list_series().await? {
            if let Some(prefix) = &engine.schema_prefix {
                series.path = format!("{prefix}.{}", series.path);
            }
            all_series.entry(series.physical_path()).or_insert(series);
        }
    }

    let patterns = op
        .path_regex_set
        .iter()
        .map(|p| WildcardPattern::new(p))
        .collect::<Result<Vec<_>>>()?;
    let selected = all_series
        .values()
        .filter(|s| patterns.is_empty() || patterns.iter().any(|p| p.matches(&s.path)))
        .filter(|s| op.tag_filter.as_ref().map_or(true, |f| f.matches(&s.tags)))
        .skip(op.offset)
        .take(op.limit.unwrap_or(usize::MAX))
        .collect::<Vec<&Series>>();

    Series::to_row_stream(selected)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::{array::AsArray, datatypes::DataType};
    use test_log::test;
    use tokio::runtime::Handle;

    use super::*;
    use crate::{
        config::ExecutorConfig,
        metadata::{MemoryMetaManager, StorageEngineMeta},
        operator::TagFilter,
        storage::StorageDriverFactoryRef,
        test_util::{FailingDriver, RecordingDriver, StaticFactory, TEST_ENGINE_TYPE},
        ErrorKind,
    };

    fn paths(rows: &RowStream) -> Vec<String> {
        let batch = rows.concat().unwrap();
        batch
            .column(0)
            .as_string::<i32>()
            .iter()
            .map(|p| p.unwrap().to_string())
            .collect()
    }

    /// Engine 1 and 2 share `a.b`, engine 3 is prefixed, and engine 4 is
    /// either not ready or failing.
    fn new_cluster(with_failing: bool) -> (MemoryMetaManager, StorageManager) {
        let first = RecordingDriver::with_series(vec![
            Series::new("a.b", DataType::Int64),
            Series::new("a.c", DataType::Float64).with_tag("host", "h1"),
            Series::new("x.y", DataType::Utf8),
        ]);
        let second = RecordingDriver::with_series(vec![
            Series::new("a.b", DataType::Int64),
            Series::new("a.c", DataType::Float64).with_tag("host", "h2"),
        ]);
        let third = RecordingDriver::with_series(vec![Series::new("b.d", DataType::Boolean)]);

        let meta = MemoryMetaManager::new(1);
        let mut engines = Vec::new();
        for id in 1..=4 {
            let mut engine = StorageEngineMeta::new(id, format!("{TEST_ENGINE_TYPE}{id}"));
            if id == 3 {
                engine.schema_prefix = Some("pre".to_string());
            }
            meta.add_storage_engine(engine.clone()).unwrap();
            engines.push(engine);
        }
        let mut factories: Vec<StorageDriverFactoryRef> = vec![
            Arc::new(StaticFactory::with_type(format!("{TEST_ENGINE_TYPE}1"), Arc::new(first))),
            Arc::new(StaticFactory::with_type(format!("{TEST_ENGINE_TYPE}2"), Arc::new(second))),
            Arc::new(StaticFactory::with_type(format!("{TEST_ENGINE_TYPE}3"), Arc::new(third))),
        ];
        if with_failing {
            factories.push(Arc::new(StaticFactory::with_type(
                format!("{TEST_ENGINE_TYPE}4"),
                Arc::new(FailingDriver),
            )));
        }
        let manager = StorageManager::new(
            Handle::current(),
            &ExecutorConfig::default(),
            factories,
            &engines,
        );
        (meta, manager)
    }

    #[test(tokio::test)]
    async fn test_list_all_series() {
        let (meta, manager) = new_cluster(false);
        let rows = show_time_series(&meta, &manager, &ShowTimeSeries::default())
            .await
            .unwrap();
        assert_eq!(
            paths(&rows),
            vec!["a.b", "a.c", "a.c", "pre.b.d", "x.y"]
        );
        let batch = rows.concat().unwrap();
        let tags = batch.column(1).as_string::<i32>();
        assert_eq!(tags.value(1), "{host=h1}");
        assert_eq!(tags.value(2), "{host=h2}");
    }

    #[test(tokio::test)]
    async fn test_filter_and_paginate() {
        let (meta, manager) = new_cluster(false);

        let op = ShowTimeSeries {
            limit: Some(2),
            offset: 1,
            ..Default::default()
        };
        let rows = show_time_series(&meta, &manager, &op).await.unwrap();
        assert_eq!(paths(&rows), vec!["a.c", "a.c"]);

        let op = ShowTimeSeries {
            limit: Some(2),
            offset: 4,
            ..Default::default()
        };
        let rows = show_time_series(&meta, &manager, &op).await.unwrap();
        assert_eq!(paths(&rows), vec!["x.y"]);

        let op = ShowTimeSeries {
            path_regex_set: ["a.*".to_string(), "pre.b.*".to_string()].into(),
            ..Default::default()
        };
        let rows = show_time_series(&meta, &manager, &op).await.unwrap();
        assert_eq!(paths(&rows), vec!["a.b", "a.c", "a.c", "pre.b.d"]);

        let op = ShowTimeSeries {
            path_regex_set: ["a.*".to_string()].into(),
            tag_filter: Some(TagFilter::base("host", "h2").unwrap()),
            ..Default::default()
        };
        let rows = show_time_series(&meta, &manager, &op).await.unwrap();
        assert_eq!(rows.num_rows(), 1);
        let batch = rows.concat().unwrap();
        assert_eq!(batch.column(1).as_string::<i32>().value(0), "{host=h2}");
    }

    #[test(tokio::test)]
    async fn test_driver_error_aborts_listing() {
        let (meta, manager) = new_cluster(true);
        let err = show_time_series(&meta, &manager, &ShowTimeSeries::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
    }

    #[test(tokio::test)]
    async fn test_invalid_pattern() {
        let (meta, manager) = new_cluster(false);
        let op = ShowTimeSeries {
            path_regex_set: ["a{".to_string()].into(),
            ..Default::default()
        };
        // `{` is escaped, so the pattern is valid but matches nothing.
        let rows = show_time_series(&meta, &manager, &op).await.unwrap();
        assert_eq!(rows.num_rows(), 0);
    }
}
