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

use std::{collections::BTreeMap, fmt::Write, sync::Arc};

use anyhow::Context;
use arrow::{
    array::{ArrayRef, RecordBatch, StringArray},
    compute::concat_batches,
    datatypes::{DataType, Field, Schema, SchemaRef},
};

use crate::{ensure, Result};

pub type Tags = BTreeMap<String, String>;

/// Name of the leading key (timestamp) column of data rows.
pub const KEY_COLUMN: &str = "key";
pub const SERIES_PATH_COLUMN: &str = "path";
pub const SERIES_TAGS_COLUMN: &str = "tags";
pub const SERIES_TYPE_COLUMN: &str = "type";

/// Materialized rows produced by a task, batches share one schema.
#[derive(Debug, Clone)]
pub struct RowStream {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl RowStream {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self { schema, batches }
    }

    pub fn empty(schema: SchemaRef) -> Self {
        Self::new(schema, Vec::new())
    }

    pub fn try_from_batches(batches: Vec<RecordBatch>) -> Result<Self> {
        ensure!(!batches.is_empty(), "at least one batch is required");
        let schema = batches[0].schema();
        for batch in &batches[1..] {
            ensure!(
                batch.schema() == schema,
                "batches with different schemas, expected:{schema:?}, actual:{:?}",
                batch.schema()
            );
        }
        Ok(Self { schema, batches })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn into_batches(self) -> Vec<RecordBatch> {
        self.batches
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    /// Merges all batches into a single one.
    pub fn concat(&self) -> Result<RecordBatch> {
        let batch = concat_batches(&self.schema, &self.batches).context("concat row stream")?;
        Ok(batch)
    }
}

/// Successful outcome of a task.
#[derive(Debug, Clone)]
pub enum TaskOutput {
    /// Write like tasks produce nothing.
    Done,
    Rows(RowStream),
}

impl TaskOutput {
    pub fn rows(&self) -> Option<&RowStream> {
        match self {
            TaskOutput::Done => None,
            TaskOutput::Rows(rows) => Some(rows),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    pub path: String,
    pub data_type: DataType,
    pub tags: Tags,
}

impl Series {
    pub fn new(path: impl Into<String>, data_type: DataType) -> Self {
        Self {
            path: path.into(),
            data_type,
            tags: Tags::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Path with its tags, e.g. `cpu.usage{host=a,region=eu}`.
    pub fn physical_path(&self) -> String {
        let mut path = self.path.clone();
        if !self.tags.is_empty() {
            path.push_str(&render_tags(&self.tags));
        }
        path
    }

    pub fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new(SERIES_PATH_COLUMN, DataType::Utf8, false),
            Field::new(SERIES_TAGS_COLUMN, DataType::Utf8, true),
            Field::new(SERIES_TYPE_COLUMN, DataType::Utf8, false),
        ]))
    }

    pub fn to_row_stream<'a, I>(series: I) -> Result<RowStream>
    where
        I: IntoIterator<Item = &'a Series>,
    {
        let mut paths = Vec::new();
        let mut tags = Vec::new();
        let mut types = Vec::new();
        for s in series {
            paths.push(s.path.clone());
            tags.push((!s.tags.is_empty()).then(|| render_tags(&s.tags)));
            types.push(s.data_type.to_string());
        }

        let schema = Self::schema();
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(paths)),
            Arc::new(StringArray::from(tags)),
            Arc::new(StringArray::from(types)),
        ];
        let batch = RecordBatch::try_new(schema.clone(), columns).context("build series batch")?;
        Ok(RowStream::new(schema, vec![batch]))
    }
}

fn render_tags(tags: &Tags) -> String {
    let mut out = String::from("{");
    for (i, (k, v)) in tags.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{k}={v}");
    }
    out.push('}');
    out
}
