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
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock},
};

use anyhow::anyhow;
use arrow::{
    array::{new_null_array, RecordBatch},
    datatypes::{DataType, Field, FieldRef, Schema},
};
use async_trait::async_trait;

use super::{StorageDriver, StorageDriverFactory, StorageDriverRef};
use crate::{
    ensure,
    memory::run_pipeline,
    metadata::StorageEngineMeta,
    operator::{Operator, WildcardPattern},
    task::StoragePhysicalTask,
    types::{RowStream, Series, TaskOutput, Tags, KEY_COLUMN},
    Error, Result,
};

pub const MEMORY_ENGINE_TYPE: &str = "memory";

/// Storage engine keeping inserted batches in process, per storage unit.
///
/// The first column of a batch is the key, every other column is a series
/// named by its path. Tags of a series are read from its field metadata.
/// Operators after the first one run as in-memory operators over the rows
/// read by the first one.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    units: RwLock<HashMap<String, Vec<RecordBatch>>>,
}

impl InMemoryStorage {
    fn insert(&self, unit_id: &str, batch: &RecordBatch) -> Result<()> {
        ensure!(
            batch
                .schema()
                .fields()
                .first()
                .is_some_and(|f| f.name() == KEY_COLUMN),
            "first column of inserted batch must be {KEY_COLUMN}"
        );

        let mut units = self.units.write().map_err(|e| anyhow!("{e}"))?;
        units
            .entry(unit_id.to_string())
            .or_default()
            .push(batch.clone());
        Ok(())
    }

    fn delete(&self, unit_id: &str, patterns: &[WildcardPattern]) -> Result<()> {
        let mut units = self.units.write().map_err(|e| anyhow!("{e}"))?;
        let Some(batches) = units.get_mut(unit_id) else {
            return Ok(());
        };

        let mut kept = Vec::with_capacity(batches.len());
        for batch in batches.drain(..) {
            let indices = column_indices(batch.schema_ref(), |name| {
                !patterns.iter().any(|p| p.matches(name))
            });
            // Only the key column left.
            if indices.len() > 1 {
                kept.push(batch.project(&indices).map_err(|e| anyhow!("{e}"))?);
            }
        }
        *batches = kept;
        Ok(())
    }

    /// Batches without any matching series are skipped. The others are
    /// aligned on the union of matching series, a series missing from a batch
    /// reads as nulls.
    fn project(&self, unit_id: &str, patterns: &[WildcardPattern]) -> Result<RowStream> {
        let units = self.units.read().map_err(|e| anyhow!("{e}"))?;
        let batches = units.get(unit_id).map(Vec::as_slice).unwrap_or_default();

        let mut key_field = None;
        let mut fields: Vec<FieldRef> = Vec::new();
        for batch in batches {
            let schema = batch.schema_ref();
            let mut matched = schema
                .fields()
                .iter()
                .skip(1)
                .filter(|f| patterns.iter().any(|p| p.matches(f.name())))
                .peekable();
            if matched.peek().is_none() {
                continue;
            }
            key_field.get_or_insert_with(|| schema.field(0).clone());

            for field in matched {
                match fields.iter().find(|f| f.name() == field.name()) {
                    Some(seen) => ensure!(
                        seen.data_type() == field.data_type(),
                        "series {} is stored with types {} and {}",
                        field.name(),
                        seen.data_type(),
                        field.data_type()
                    ),
                    None => fields.push(Arc::new(field.as_ref().clone().with_nullable(true))),
                }
            }
        }

        let Some(key_field) = key_field else {
            let schema = Schema::new(vec![Field::new(KEY_COLUMN, DataType::Int64, false)]);
            return Ok(RowStream::empty(Arc::new(schema)));
        };
        let schema = Arc::new(Schema::new(
            std::iter::once(Arc::new(key_field))
                .chain(fields.iter().cloned())
                .collect::<Vec<_>>(),
        ));

        let mut projected = Vec::new();
        for batch in batches {
            let batch_schema = batch.schema_ref();
            let mut has_match = false;
            let mut columns = Vec::with_capacity(fields.len() + 1);
            columns.push(batch.column(0).clone());
            for field in &fields {
                let column = match batch_schema.index_of(field.name()) {
                    Ok(i) if i > 0 => {
                        has_match = true;
                        batch.column(i).clone()
                    }
                    _ => new_null_array(field.data_type(), batch.num_rows()),
                };
                columns.push(column);
            }
            if has_match {
                projected.push(
                    RecordBatch::try_new(schema.clone(), columns).map_err(|e| anyhow!("{e}"))?,
                );
            }
        }

        Ok(RowStream::new(schema, projected))
    }

    fn read(&self, task: &StoragePhysicalTask, unit_id: &str) -> Result<Option<RowStream>> {
        let Some((first, rest)) = task.operators().split_first() else {
            return Err(anyhow!("storage task without operators, task:{}", task.id()).into());
        };

        let rows = match first {
            Operator::Insert(insert) => {
                self.insert(unit_id, &insert.batch)?;
                None
            }
            Operator::Delete(delete) => {
                self.delete(unit_id, &compile(&delete.patterns)?)?;
                None
            }
            Operator::Project(project) => Some(self.project(unit_id, &compile(&project.patterns)?)?),
            other => return Err(Error::unexpected_operator(other.op_type())),
        };

        match rows {
            Some(rows) => run_pipeline(rest, vec![rows]).map(Some),
            None => {
                ensure!(
                    rest.is_empty(),
                    "write operator must be the only one of a task, task:{}",
                    task.id()
                );
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl StorageDriver for InMemoryStorage {
    async fn execute(&self, task: &StoragePhysicalTask) -> Result<TaskOutput> {
        let unit_id = task
            .storage_unit()
            .ok_or_else(|| anyhow!("task is not dispatched to a storage unit, task:{}", task.id()))?;
        let output = match self.read(task, unit_id)? {
            Some(rows) => TaskOutput::Rows(rows),
            None => TaskOutput::Done,
        };
        Ok(output)
    }

    async fn list_series(&self) -> Result<Vec<Series>> {
        let units = self.units.read().map_err(|e| anyhow!("{e}"))?;
        let mut series = BTreeMap::new();
        for field in units
            .values()
            .flatten()
            .flat_map(|b| b.schema_ref().fields().iter().skip(1).cloned().collect::<Vec<_>>())
        {
            let tags: Tags = field
                .metadata()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let s = Series {
                path: field.name().clone(),
                data_type: field.data_type().clone(),
                tags,
            };
            series.entry(s.physical_path()).or_insert(s);
        }

        Ok(series.into_values().collect())
    }
}

fn compile(patterns: &[String]) -> Result<Vec<WildcardPattern>> {
    patterns.iter().map(|p| WildcardPattern::new(p)).collect()
}

/// Key column first, then the series accepted by `keep`.
fn column_indices(schema: &Schema, keep: impl Fn(&str) -> bool) -> Vec<usize> {
    schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(i, f)| *i == 0 || keep(f.name()))
        .map(|(i, _)| i)
        .collect()
}

#[derive(Debug, Default)]
pub struct InMemoryStorageFactory;

impl StorageDriverFactory for InMemoryStorageFactory {
    fn engine_type(&self) -> &str {
        MEMORY_ENGINE_TYPE
    }

    fn build(&self, meta: &StorageEngineMeta) -> Result<StorageDriverRef> {
        ensure!(
            meta.engine_type == MEMORY_ENGINE_TYPE,
            "unexpected engine type, id:{}, type:{}",
            meta.id,
            meta.engine_type
        );
        Ok(Arc::new(InMemoryStorage::default()))
    }
}
