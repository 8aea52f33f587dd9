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

// src/queue/mod.rs
// QueueManager presents one driver-independent API over whichever
// QueueDriver is configured (routemq-queue-redis or routemq-queue-sql
// implement this trait; routemq-core knows nothing about either).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::job::{Job, JobEnvelope, validate_fields};

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub queue: String,
    pub envelope: JobEnvelope,
    pub reserved_at: Option<DateTime<Utc>>,
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FailedJobRecord {
    pub id: String,
    pub connection: String,
    pub queue: String,
    pub envelope: JobEnvelope,
    pub exception_text: String,
    pub failed_at: DateTime<Utc>,
}

// QueueDriver is implemented once per backend. Every operation that
// spans more than one underlying structure (pop's delayed-migration +
// reserve, fail's insert+delete) must be atomic from the caller's
// point of view -- that's the driver's problem to solve with whatever
// primitive its store offers (spec.md §4.6/§4.7).
#[async_trait]
pub trait QueueDriver: Send + Sync {
    async fn push(&self, queue: &str, envelope: JobEnvelope, available_at: DateTime<Utc>) -> Result<String>;

    async fn bulk_push(
        &self,
        queue: &str,
        envelopes: Vec<(JobEnvelope, DateTime<Utc>)>,
    ) -> Result<Vec<String>>;

    // pop returns the next claimable envelope (migrating due delayed
    // jobs first) with attempts already incremented, or None if the
    // queue is empty.
    async fn pop(&self, queue: &str) -> Result<Option<JobRecord>>;

    async fn complete(&self, record: &JobRecord) -> Result<()>;

    async fn release(&self, record: &JobRecord, delay_seconds: u64) -> Result<()>;

    async fn fail(&self, record: &JobRecord, exception_text: &str) -> Result<()>;

    async fn size(&self, queue: &str) -> Result<u64>;
}

// QueueManager wraps a driver with the serialize/validate/timing
// concerns that are identical regardless of backend (spec.md §4.5).
pub struct QueueManager {
    driver: Arc<dyn QueueDriver>,
    default_queue: String,
}

impl QueueManager {
    pub fn new(driver: Arc<dyn QueueDriver>, default_queue: impl Into<String>) -> Self {
        Self {
            driver,
            default_queue: default_queue.into(),
        }
    }

    fn resolve_queue<'a>(&'a self, queue: Option<&'a str>) -> &'a str {
        queue.unwrap_or(&self.default_queue)
    }

    // envelope_for builds a fresh, zero-attempt envelope for a Job
    // value, applying its per-class defaults.
    pub fn envelope_for(job: &dyn Job, fields: serde_json::Value) -> Result<JobEnvelope> {
        validate_fields(&fields)?;
        let defaults = job.defaults();
        Ok(JobEnvelope {
            class: job.class_name().to_string(),
            fields,
            job_id: uuid::Uuid::new_v4().to_string(),
            attempts: 0,
            max_tries: defaults.max_tries,
            timeout_seconds: defaults.timeout_seconds,
            retry_after_seconds: defaults.retry_after_seconds,
        })
    }

    pub async fn push(&self, envelope: JobEnvelope, queue: Option<&str>) -> Result<String> {
        validate_fields(&envelope.fields)?;
        self.driver
            .push(self.resolve_queue(queue), envelope, Utc::now())
            .await
    }

    pub async fn later(
        &self,
        delay_seconds: i64,
        envelope: JobEnvelope,
        queue: Option<&str>,
    ) -> Result<String> {
        validate_fields(&envelope.fields)?;
        let available_at = Utc::now() + chrono::Duration::seconds(delay_seconds);
        self.driver
            .push(self.resolve_queue(queue), envelope, available_at)
            .await
    }

    pub async fn bulk(&self, envelopes: Vec<JobEnvelope>, queue: Option<&str>) -> Result<Vec<String>> {
        let now = Utc::now();
        let mut timed = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            validate_fields(&envelope.fields)?;
            timed.push((envelope, now));
        }
        self.driver.bulk_push(self.resolve_queue(queue), timed).await
    }

    pub async fn size(&self, queue: Option<&str>) -> Result<u64> {
        self.driver.size(self.resolve_queue(queue)).await
    }

    pub fn driver(&self) -> Arc<dyn QueueDriver> {
        self.driver.clone()
    }
}
