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

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RedisQueueError {
    #[error("invalid redis url: {0}")]
    InvalidUrl(String),

    #[error("redis connection error: {0}")]
    Connection(String),

    #[error("redis command error: {0}")]
    Command(#[from] redis::RedisError),

    #[error("job record {id} disappeared from storage between reservation and read")]
    MissingRecord { id: String },

    #[error("corrupt job record for {id}: {source}")]
    CorruptRecord {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<RedisQueueError> for routemq::RouteMqError {
    fn from(err: RedisQueueError) -> Self {
        routemq::RouteMqError::Other(err.to_string())
    }
}
