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

use std::{fmt, str::FromStr, time::Duration};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

const MILLIS_PER_SECOND: u64 = 1_000;
const MILLIS_PER_MINUTE: u64 = 60 * MILLIS_PER_SECOND;
const MILLIS_PER_HOUR: u64 = 60 * MILLIS_PER_MINUTE;
const MILLIS_PER_DAY: u64 = 24 * MILLIS_PER_HOUR;

/// Units in the order they must appear, largest first.
const UNITS: [(&str, u64); 5] = [
    ("d", MILLIS_PER_DAY),
    ("h", MILLIS_PER_HOUR),
    ("m", MILLIS_PER_MINUTE),
    ("s", MILLIS_PER_SECOND),
    ("ms", 1),
];

/// A millisecond precision duration written as `1d2h3m4s5ms` in config files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Ord, PartialOrd, Default, Hash)]
pub struct ReadableDuration(pub Duration);

impl ReadableDuration {
    pub const fn millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    pub const fn secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub const fn minutes(minutes: u64) -> Self {
        Self::secs(minutes * 60)
    }

    pub fn as_millis(&self) -> u64 {
        self.0.as_millis() as u64
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<Duration> for ReadableDuration {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}

impl From<ReadableDuration> for Duration {
    fn from(d: ReadableDuration) -> Self {
        d.0
    }
}

impl FromStr for ReadableDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty duration".to_string());
        }

        let mut rest = s;
        let mut total_millis = 0f64;
        // Index into `UNITS` that the next segment must not precede.
        let mut next_unit = 0;
        while !rest.is_empty() {
            let num_len = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ' '))
                .ok_or_else(|| format!("missing unit in duration: {s}"))?;
            let number: f64 = rest[..num_len]
                .trim()
                .parse()
                .map_err(|_| format!("invalid number in duration: {s}"))?;
            rest = &rest[num_len..];

            let unit_len = rest
                .find(|c: char| !c.is_ascii_alphabetic())
                .unwrap_or(rest.len());
            let unit = &rest[..unit_len];
            let pos = UNITS
                .iter()
                .position(|(name, _)| *name == unit)
                .ok_or_else(|| format!("unknown unit {unit:?}, only d, h, m, s, ms are supported"))?;
            if pos < next_unit {
                return Err(format!("units must appear in order d, h, m, s, ms: {s}"));
            }
            next_unit = pos + 1;
            total_millis += number * UNITS[pos].1 as f64;
            rest = rest[unit_len..].trim_start();
        }

        Ok(Self::millis(total_millis as u64))
    }
}

impl fmt::Display for ReadableDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut left = self.as_millis();
        if left == 0 {
            return write!(f, "0s");
        }
        for (name, millis) in UNITS {
            if left >= millis {
                write!(f, "{}{name}", left / millis)?;
                left %= millis;
            }
        }
        Ok(())
    }
}

impl Serialize for ReadableDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReadableDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
