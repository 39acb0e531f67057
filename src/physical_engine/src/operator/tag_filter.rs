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

use super::WildcardPattern;
use crate::{types::Tags, Result};

/// Predicate over the tags of a series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFilter {
    /// The tag `key` exists and its value matches `value`.
    Base { key: String, value: WildcardPattern },
    And(Vec<TagFilter>),
    Or(Vec<TagFilter>),
    /// Tags equal exactly one of the listed sets.
    Precise(Vec<Tags>),
    WithoutTag,
}

impl TagFilter {
    pub fn base(key: impl Into<String>, value: &str) -> Result<Self> {
        Ok(Self::Base {
            key: key.into(),
            value: WildcardPattern::new(value)?,
        })
    }

    pub fn matches(&self, tags: &Tags) -> bool {
        match self {
            TagFilter::Base { key, value } => tags
                .get(key)
                .is_some_and(|actual| value.matches(actual)),
            TagFilter::And(children) => children.iter().all(|c| c.matches(tags)),
            TagFilter::Or(children) => children.iter().any(|c| c.matches(tags)),
            TagFilter::Precise(sets) => sets.iter().any(|s| s == tags),
            TagFilter::WithoutTag => tags.is_empty(),
        }
    }
}
