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

use std::{cmp::Ordering, fmt, str::FromStr};

use crate::{ensure, Error, Result};

const UNBOUNDED: &str = "null";
const SPECIAL_CHARS: &[char] = &['*', '?', '[', ']', '{', '}', '(', ')', '|', '^', '$', '\\'];

/// Range of series paths owned by a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimeSeriesRange {
    /// `[start, end)`, `None` is unbounded.
    Interval {
        start: Option<String>,
        end: Option<String>,
    },
    /// The path itself and every path below it.
    Prefix(String),
}

impl TimeSeriesRange {
    pub fn all() -> Self {
        Self::Interval {
            start: None,
            end: None,
        }
    }

    pub fn interval(start: Option<&str>, end: Option<&str>) -> Self {
        Self::Interval {
            start: start.map(str::to_string),
            end: end.map(str::to_string),
        }
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    pub fn contains(&self, path: &str) -> bool {
        match self {
            TimeSeriesRange::Interval { start, end } => {
                start.as_deref().map_or(true, |s| s <= path)
                    && end.as_deref().map_or(true, |e| path < e)
            }
            TimeSeriesRange::Prefix(prefix) => {
                path == prefix
                    || path
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            }
        }
    }

    /// A prefix covers the path itself and `[prefix + ".", prefix + "/")`,
    /// since `/` follows `.` in byte order.
    pub fn intersects(&self, other: &TimeSeriesRange) -> bool {
        match (self, other) {
            (TimeSeriesRange::Prefix(lhs), TimeSeriesRange::Prefix(rhs)) => {
                self.contains(rhs) || other.contains(lhs)
            }
            (TimeSeriesRange::Prefix(prefix), interval @ TimeSeriesRange::Interval { .. })
            | (interval @ TimeSeriesRange::Interval { .. }, TimeSeriesRange::Prefix(prefix)) => {
                let below = (Some(format!("{prefix}.")), Some(format!("{prefix}/")));
                interval.contains(prefix) || overlaps(&interval.bounds(), &below)
            }
            _ => overlaps(&self.bounds(), &other.bounds()),
        }
    }

    /// Smallest interval covering the range, used for ordering.
    fn bounds(&self) -> Bounds {
        match self {
            TimeSeriesRange::Interval { start, end } => (start.clone(), end.clone()),
            TimeSeriesRange::Prefix(prefix) => (Some(prefix.clone()), Some(format!("{prefix}/"))),
        }
    }
}

type Bounds = (Option<String>, Option<String>);

fn overlaps((lhs_start, lhs_end): &Bounds, (rhs_start, rhs_end): &Bounds) -> bool {
    let start_before_end = |start: &Option<String>, end: &Option<String>| match (start, end) {
        (Some(s), Some(e)) => s < e,
        _ => true,
    };
    start_before_end(lhs_start, rhs_end) && start_before_end(rhs_start, lhs_end)
}

impl Ord for TimeSeriesRange {
    fn cmp(&self, other: &Self) -> Ordering {
        let (lhs_start, lhs_end) = self.bounds();
        let (rhs_start, rhs_end) = other.bounds();
        // `None` start sorts first, `None` end sorts last.
        lhs_start
            .cmp(&rhs_start)
            .then_with(|| match (&lhs_end, &rhs_end) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(l), Some(r)) => l.cmp(r),
            })
            .then_with(|| {
                matches!(self, TimeSeriesRange::Prefix(_))
                    .cmp(&matches!(other, TimeSeriesRange::Prefix(_)))
            })
    }
}

impl PartialOrd for TimeSeriesRange {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TimeSeriesRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeSeriesRange::Interval { start, end } => write!(
                f,
                "{}-{}",
                start.as_deref().unwrap_or(UNBOUNDED),
                end.as_deref().unwrap_or(UNBOUNDED)
            ),
            TimeSeriesRange::Prefix(prefix) => write!(f, "{prefix}.*"),
        }
    }
}

/// Accepts `prefix.*`, `start-end` (`null` for an open end) or a bare
/// `prefix`. A prefix containing `-` must carry the `.*` suffix.
impl FromStr for TimeSeriesRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(prefix) = s.strip_suffix(".*") {
            return Self::parse_prefix(prefix, s);
        }
        if let Some((start, end)) = s.split_once('-') {
            ensure!(
                !end.contains('-') && !s.contains(SPECIAL_CHARS),
                "invalid series interval:{s}"
            );
            let bound = |v: &str| (v != UNBOUNDED).then(|| v.to_string());
            return Ok(Self::Interval {
                start: bound(start),
                end: bound(end),
            });
        }

        Self::parse_prefix(s, s)
    }
}

impl TimeSeriesRange {
    fn parse_prefix(prefix: &str, input: &str) -> Result<Self> {
        ensure!(
            !prefix.is_empty() && !prefix.contains(SPECIAL_CHARS),
            "invalid series prefix:{input}"
        );
        Ok(Self::Prefix(prefix.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains() {
        let interval = TimeSeriesRange::interval(Some("a.b"), Some("a.d"));
        assert!(interval.contains("a.b"));
        assert!(interval.contains("a.c.x"));
        assert!(!interval.contains("a.d"));
        assert!(!interval.contains("a.a"));
        assert!(TimeSeriesRange::all().contains("anything"));

        let prefix = TimeSeriesRange::prefix("cpu");
        assert!(prefix.contains("cpu"));
        assert!(prefix.contains("cpu.usage"));
        assert!(!prefix.contains("cpus"));
    }

    #[test]
    fn test_intersects() {
        let a = TimeSeriesRange::interval(None, Some("m"));
        let b = TimeSeriesRange::interval(Some("m"), None);
        let c = TimeSeriesRange::interval(Some("k"), Some("p"));
        assert!(!a.intersects(&b));
        assert!(a.intersects(&c) && b.intersects(&c));

        let cpu = TimeSeriesRange::prefix("cpu");
        assert!(cpu.intersects(&a));
        assert!(!cpu.intersects(&b));
        assert!(!cpu.intersects(&TimeSeriesRange::prefix("mem")));
        assert!(cpu.intersects(&TimeSeriesRange::prefix("cpu.usage")));
        assert!(TimeSeriesRange::prefix("cpu.usage").intersects(&cpu));

        // `-` sorts between the prefix and its `.` children.
        let dashed = TimeSeriesRange::interval(Some("cpu-a"), Some("cpu-z"));
        assert!(!cpu.intersects(&dashed) && !dashed.intersects(&cpu));
        assert!(!cpu.intersects(&TimeSeriesRange::prefix("cpu-x")));
        assert!(cpu.intersects(&TimeSeriesRange::interval(Some("cpu"), Some("cpu-"))));
        assert!(cpu.intersects(&TimeSeriesRange::interval(Some("cpu.b"), None)));
        assert!(!cpu.intersects(&TimeSeriesRange::interval(Some("cpu/"), None)));
    }

    #[test]
    fn test_ordering() {
        let mut ranges = vec![
            TimeSeriesRange::interval(Some("m"), None),
            TimeSeriesRange::prefix("cpu"),
            TimeSeriesRange::interval(None, Some("m")),
            TimeSeriesRange::interval(Some("m"), Some("z")),
        ];
        ranges.sort();
        let expected = ["null-m", "cpu.*", "m-z", "m-null"];
        let actual: Vec<_> = ranges.iter().map(|r| r.to_string()).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_parse() {
        let testcases = [
            ("a.b-a.c", TimeSeriesRange::interval(Some("a.b"), Some("a.c"))),
            ("null-x", TimeSeriesRange::interval(None, Some("x"))),
            ("null-null", TimeSeriesRange::all()),
            ("root.sg.*", TimeSeriesRange::prefix("root.sg")),
            ("root", TimeSeriesRange::prefix("root")),
            ("host-1.cpu.*", TimeSeriesRange::prefix("host-1.cpu")),
        ];
        for (input, expected) in testcases {
            assert_eq!(input.parse::<TimeSeriesRange>().unwrap(), expected, "{input}");
        }

        for input in ["a-b-c", "a*-b", "", "root.*.x", ".*"] {
            assert!(input.parse::<TimeSeriesRange>().is_err(), "{input}");
        }
    }
}
