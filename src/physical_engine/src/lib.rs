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

//! Physical execution layer: routes physical task chains to per storage unit
//! queues, runs in-memory followers, and propagates writes to replicas.

pub mod config;
mod error;
pub mod memory;
pub mod metadata;
pub mod monitor;
pub mod operator;
pub mod pool;
pub mod queue;
pub mod replica;
pub mod storage;
pub mod task;
#[cfg(test)]
mod test_util;
pub mod types;

pub use error::{Error, ErrorKind, Result};
