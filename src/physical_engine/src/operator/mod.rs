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

//! Physical operators carried by tasks. Only the shape of each operator is
//! defined here, drivers and the memory executor give them meaning.

mod tag_filter;

use std::{collections::BTreeSet, fmt};

use anyhow::Context;
use arrow::array::RecordBatch;
use regex::Regex;

pub use self::tag_filter::TagFilter;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperatorType {
    Project,
    Insert,
    Delete,
    ShowTimeSeries,
    Limit,
    Union,
}

impl fmt::Display for OperatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone)]
pub enum Operator {
    Project(Project),
    Insert(Insert),
    Delete(Delete),
    ShowTimeSeries(ShowTimeSeries),
    Limit(Limit),
    /// Concatenates the outputs of all parents.
    Union,
}

impl Operator {
    pub fn op_type(&self) -> OperatorType {
        match self {
            Operator::Project(_) => OperatorType::Project,
            Operator::Insert(_) => OperatorType::Insert,
            Operator::Delete(_) => OperatorType::Delete,
            Operator::ShowTimeSeries(_) => OperatorType::ShowTimeSeries,
            Operator::Limit(_) => OperatorType::Limit,
            Operator::Union => OperatorType::Union,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Operator::Insert(_) | Operator::Delete(_))
    }
}

/// Reads the series matching any of `patterns`.
#[derive(Debug, Clone)]
pub struct Project {
    pub patterns: Vec<String>,
}

impl Project {
    pub fn new<S: Into<String>>(patterns: impl IntoIterator<Item = S>) -> Self {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }
}

/// Writes a batch whose first column is the key and every other column is a
/// series named by its path.
#[derive(Debug, Clone)]
pub struct Insert {
    pub batch: RecordBatch,
}

#[derive(Debug, Clone)]
pub struct Delete {
    pub patterns: Vec<String>,
}

/// Lists series of the whole cluster.
#[derive(Debug, Clone, Default)]
pub struct ShowTimeSeries {
    /// Empty means all series.
    pub path_regex_set: BTreeSet<String>,
    pub tag_filter: Option<TagFilter>,
    /// `None` means no limit.
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Limit {
    pub limit: usize,
    pub offset: usize,
}

/// Wildcard over paths and tag values, `*` matches any sequence and the
/// whole text must match.
#[derive(Debug, Clone)]
pub struct WildcardPattern {
    pattern: String,
    re: Regex,
}

impl WildcardPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let expr = format!("^{}$", regex::escape(pattern).replace(r"\*", ".*"));
        let re = Regex::new(&expr).with_context(|| format!("invalid wildcard pattern:{pattern}"))?;
        Ok(Self {
            pattern: pattern.to_string(),
            re,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, text: &str) -> bool {
        self.re.is_match(text)
    }
}

impl PartialEq for WildcardPattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for WildcardPattern {}
