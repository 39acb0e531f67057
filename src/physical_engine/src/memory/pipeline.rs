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

use arrow::array::RecordBatch;

use crate::{
    ensure,
    operator::{Limit, Operator, WildcardPattern, Project},
    types::{RowStream, KEY_COLUMN},
    Error, Result,
};

/// Applies `operators` in order. Every operator but `Union` expects exactly
/// one input.
pub(crate) fn run_pipeline(operators: &[Operator], inputs: Vec<RowStream>) -> Result<RowStream> {
    let mut streams = inputs;
    for op in operators {
        let output = match op {
            Operator::Union => union(streams)?,
            Operator::Limit(limit) => apply_limit(single(streams)?, limit),
            Operator::Project(project) => apply_project(single(streams)?, project)?,
            other => return Err(Error::unexpected_operator(other.op_type())),
        };
        streams = vec![output];
    }

    single(streams)
}

fn single(mut streams: Vec<RowStream>) -> Result<RowStream> {
    ensure!(
        streams.len() == 1,
        "expect exactly one input stream, actual:{}",
        streams.len()
    );
    Ok(streams.remove(0))
}

fn union(streams: Vec<RowStream>) -> Result<RowStream> {
    ensure!(!streams.is_empty(), "union requires at least one input");
    let schema = streams[0].schema().clone();
    let mut batches = Vec::new();
    for stream in streams {
        ensure!(
            stream.schema() == &schema,
            "union inputs have different schemas, expected:{schema:?}, actual:{:?}",
            stream.schema()
        );
        batches.extend(stream.into_batches());
    }

    Ok(RowStream::new(schema, batches))
}

fn apply_limit(stream: RowStream, limit: &Limit) -> RowStream {
    let schema = stream.schema().clone();
    let mut to_skip = limit.offset;
    let mut to_take = limit.limit;
    let mut batches = Vec::new();
    for batch in stream.into_batches() {
        if to_take == 0 {
            break;
        }
        let rows = batch.num_rows();
        if to_skip >= rows {
            to_skip -= rows;
            continue;
        }
        let len = (rows - to_skip).min(to_take);
        batches.push(batch.slice(to_skip, len));
        to_take -= len;
        to_skip = 0;
    }

    RowStream::new(schema, batches)
}

/// Keeps the key column and the series columns matching any pattern.
fn apply_project(stream: RowStream, project: &Project) -> Result<RowStream> {
    let patterns = project
        .patterns
        .iter()
        .map(|p| WildcardPattern::new(p))
        .collect::<Result<Vec<_>>>()?;
    let indices: Vec<usize> = stream
        .schema()
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, f)| f.name() == KEY_COLUMN || patterns.iter().any(|p| p.matches(f.name())))
        .map(|(i, _)| i)
        .collect();

    let schema = stream
        .schema()
        .project(&indices)
        .map_err(|e| anyhow::anyhow!("project schema, err:{e}"))?;
    let batches = stream
        .into_batches()
        .iter()
        .map(|b| b.project(&indices))
        .collect::<std::result::Result<Vec<RecordBatch>, _>>()
        .map_err(|e| anyhow::anyhow!("project batch, err:{e}"))?;

    Ok(RowStream::new(schema.into(), batches))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::{
        array::{AsArray, Int64Array},
        datatypes::{DataType, Field, Int64Type, Schema},
    };

    use super::*;
    use crate::{operator::Delete, test_util::int_rows, ErrorKind};

    fn keys(stream: &RowStream) -> Vec<i64> {
        let batch = stream.concat().unwrap();
        batch
            .column(0)
            .as_primitive::<Int64Type>()
            .values()
            .to_vec()
    }

    #[test]
    fn test_limit_across_batches() {
        let input = union(vec![
            int_rows("a", &[1, 2]),
            int_rows("a", &[3, 4, 5]),
            int_rows("a", &[6]),
        ])
        .unwrap();
        let testcases = [
            // limit, offset, expected keys
            (10, 0, vec![1, 2, 3, 4, 5, 6]),
            (2, 1, vec![2, 3]),
            (3, 2, vec![3, 4, 5]),
            (5, 5, vec![6]),
            (1, 10, vec![]),
            (0, 0, vec![]),
        ];
        for (limit, offset, expected) in testcases {
            let output = apply_limit(input.clone(), &Limit { limit, offset });
            if expected.is_empty() {
                assert_eq!(output.num_rows(), 0);
            } else {
                assert_eq!(keys(&output), expected, "limit:{limit}, offset:{offset}");
            }
        }
    }

    #[test]
    fn test_project() {
        let schema = Arc::new(Schema::new(vec![
            Field::new(KEY_COLUMN, DataType::Int64, false),
            Field::new("cpu.usage", DataType::Int64, true),
            Field::new("mem.used", DataType::Int64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![1])),
                Arc::new(Int64Array::from(vec![2])),
                Arc::new(Int64Array::from(vec![3])),
            ],
        )
        .unwrap();
        let stream = RowStream::new(schema, vec![batch]);

        let output = apply_project(stream, &Project::new(["cpu.*"])).unwrap();
        let names: Vec<_> = output.schema().fields().iter().map(|f| f.name().clone()).collect();
        assert_eq!(names, vec![KEY_COLUMN, "cpu.usage"]);
        assert_eq!(output.batches()[0].num_columns(), 2);
    }

    #[test]
    fn test_pipeline_errors() {
        let err = run_pipeline(&[Operator::Union], vec![]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);

        let err = run_pipeline(
            &[Operator::Delete(Delete { patterns: vec![] })],
            vec![int_rows("a", &[1])],
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedOperator);

        // Two inputs without a union.
        let err = run_pipeline(&[], vec![int_rows("a", &[1]), int_rows("a", &[2])]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);

        let mismatched = union(vec![int_rows("a", &[1]), int_rows("b", &[2])]);
        assert!(mismatched.is_err());
    }
}
