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

use std::sync::Arc;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(#[from] InnerError);

impl From<anyhow::Error> for Error {
    fn from(source: anyhow::Error) -> Self {
        Self(InnerError::Other { source })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Too many tasks are waiting for the storage's executor.
    TooManyTasks,
    /// A driver or memory task failed while executing.
    Execution,
    UnexpectedOperator,
    UnknownStorageUnit,
    StorageNotReady,
    ParentTaskFailed,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self.0 {
            InnerError::TooManyTasks { .. } => ErrorKind::TooManyTasks,
            InnerError::Execution { .. } => ErrorKind::Execution,
            InnerError::UnexpectedOperator { .. } => ErrorKind::UnexpectedOperator,
            InnerError::UnknownStorageUnit { .. } => ErrorKind::UnknownStorageUnit,
            InnerError::StorageNotReady { .. } => ErrorKind::StorageNotReady,
            InnerError::ParentTaskFailed { .. } => ErrorKind::ParentTaskFailed,
            InnerError::Other { .. } => ErrorKind::Internal,
        }
    }

    pub fn too_many_tasks(storage_engine_id: u64, unit_id: &str, pending: usize, max: usize) -> Self {
        Self(InnerError::TooManyTasks {
            storage_engine_id,
            unit_id: unit_id.to_string(),
            pending,
            max,
        })
    }

    pub fn execution(source: impl Into<anyhow::Error>) -> Self {
        Self(InnerError::Execution {
            source: source.into(),
        })
    }

    pub fn unexpected_operator(op: impl ToString) -> Self {
        Self(InnerError::UnexpectedOperator { op: op.to_string() })
    }

    pub fn unknown_storage_unit(unit_id: &str) -> Self {
        Self(InnerError::UnknownStorageUnit {
            unit_id: unit_id.to_string(),
        })
    }

    pub fn storage_not_ready(storage_engine_id: u64) -> Self {
        Self(InnerError::StorageNotReady { storage_engine_id })
    }

    pub fn parent_failed(source: Arc<Error>) -> Self {
        Self(InnerError::ParentTaskFailed { source })
    }
}

#[derive(Error, Debug)]
pub(crate) enum InnerError {
    #[error("too many pending tasks for this storage, storage_engine:{storage_engine_id}, unit:{unit_id}, pending:{pending}, max:{max}")]
    TooManyTasks {
        storage_engine_id: u64,
        unit_id: String,
        pending: usize,
        max: usize,
    },

    #[error("execute physical task failed, err:{source:#}")]
    Execution { source: anyhow::Error },

    #[error("unexpected operator:{op}")]
    UnexpectedOperator { op: String },

    #[error("storage unit not found, id:{unit_id}")]
    UnknownStorageUnit { unit_id: String },

    #[error("storage engine is not ready, id:{storage_engine_id}")]
    StorageNotReady { storage_engine_id: u64 },

    #[error("parent task failed, err:{source}")]
    ParentTaskFailed { source: Arc<Error> },

    #[error(transparent)]
    Other {
        #[from]
        source: anyhow::Error,
    },
}

/// Works like anyhow's `ensure!`, but returns `crate::Error`.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $msg:literal) => {
        if !$cond {
            return Err(anyhow::anyhow!($msg).into());
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(anyhow::anyhow!($fmt, $($arg)*).into());
        }
    };
}
