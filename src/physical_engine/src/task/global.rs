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

use std::{fmt, ops::Deref};

use super::TaskCore;
use crate::operator::Operator;

/// Task spanning the whole cluster, executed synchronously by the caller.
pub struct GlobalPhysicalTask {
    core: TaskCore,
}

impl GlobalPhysicalTask {
    pub fn new(operator: Operator) -> Self {
        Self {
            core: TaskCore::new(vec![operator].into(), true, false),
        }
    }

    pub fn operator(&self) -> &Operator {
        // Built from exactly one operator.
        &self.core.operators()[0]
    }
}

impl Deref for GlobalPhysicalTask {
    type Target = TaskCore;

    fn deref(&self) -> &TaskCore {
        &self.core
    }
}

impl fmt::Debug for GlobalPhysicalTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalPhysicalTask")
            .field("core", &self.core)
            .finish()
    }
}
