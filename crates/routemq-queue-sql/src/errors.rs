/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 RouteMQ Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

// src/errors.rs
// SqlQueueError wraps sqlx::Error with the failing query's name, the
// same annotate-at-the-call-site shape as `api-db`'s
// `DatabaseError::new(op_name, source)`, scaled down to this crate's
// single table pair rather than api-db's full resource model.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqlQueueError {
    #[error("sql queue error during {op}: {source}")]
    Query {
        op: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("corrupt job payload for job {id}: {source}")]
    CorruptPayload {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl SqlQueueError {
    pub fn query(op: &'static str, source: sqlx::Error) -> Self {
        Self::Query { op, source }
    }
}

impl From<SqlQueueError> for routemq::RouteMqError {
    fn from(err: SqlQueueError) -> Self {
        routemq::RouteMqError::Other(err.to_string())
    }
}
