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

// src/driver.rs
// Queue Driver B (spec.md §4.7): two Postgres tables, `queue_jobs` and
// `queue_failed_jobs`, with reservation done via `SELECT ... FOR
// UPDATE SKIP LOCKED` inside a transaction so concurrent workers never
// claim the same row. Query style (raw SQL strings passed to
// `sqlx::query_as`/`sqlx::query`, one `PgConnection`/`PgPool` per call)
// is grounded on `crates/api-db/src/rack.rs`.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use routemq::job::JobEnvelope;
use routemq::queue::{FailedJobRecord, JobRecord, QueueDriver};
use routemq::{Result, RouteMqError};

use crate::errors::SqlQueueError;

const CREATE_QUEUE_JOBS: &str = r#"
CREATE TABLE IF NOT EXISTS queue_jobs (
    id TEXT PRIMARY KEY,
    queue TEXT NOT NULL,
    payload JSONB NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    reserved_at TIMESTAMPTZ,
    available_at TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const CREATE_QUEUE_JOBS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS queue_jobs_claim_idx
    ON queue_jobs (queue, reserved_at, available_at, id)
"#;

const CREATE_QUEUE_FAILED_JOBS: &str = r#"
CREATE TABLE IF NOT EXISTS queue_failed_jobs (
    id TEXT PRIMARY KEY,
    connection TEXT NOT NULL,
    queue TEXT NOT NULL,
    payload JSONB NOT NULL,
    exception TEXT NOT NULL,
    failed_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

pub struct SqlQueueDriver {
    pool: PgPool,
    connection_name: String,
}

impl SqlQueueDriver {
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_named(database_url, "sql").await
    }

    pub async fn connect_named(database_url: &str, connection_name: impl Into<String>) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|source| SqlQueueError::query("connect", source))?;
        let driver = Self {
            pool,
            connection_name: connection_name.into(),
        };
        driver.migrate().await?;
        Ok(driver)
    }

    pub fn from_pool(pool: PgPool, connection_name: impl Into<String>) -> Self {
        Self {
            pool,
            connection_name: connection_name.into(),
        }
    }

    // migrate creates both tables on first start if absent (spec.md
    // §6, "the framework creates them on first start if absent").
    async fn migrate(&self) -> Result<()> {
        sqlx::query(CREATE_QUEUE_JOBS)
            .execute(&self.pool)
            .await
            .map_err(|source| SqlQueueError::query("create queue_jobs", source))?;
        sqlx::query(CREATE_QUEUE_JOBS_INDEX)
            .execute(&self.pool)
            .await
            .map_err(|source| SqlQueueError::query("create queue_jobs index", source))?;
        sqlx::query(CREATE_QUEUE_FAILED_JOBS)
            .execute(&self.pool)
            .await
            .map_err(|source| SqlQueueError::query("create queue_failed_jobs", source))?;
        Ok(())
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<JobRecord> {
        let id: String = row.try_get("id").map_err(|source| SqlQueueError::query("decode row", source))?;
        let queue: String = row.try_get("queue").map_err(|source| SqlQueueError::query("decode row", source))?;
        let payload: serde_json::Value =
            row.try_get("payload").map_err(|source| SqlQueueError::query("decode row", source))?;
        let attempts: i32 = row.try_get("attempts").map_err(|source| SqlQueueError::query("decode row", source))?;
        let reserved_at: Option<DateTime<Utc>> =
            row.try_get("reserved_at").map_err(|source| SqlQueueError::query("decode row", source))?;
        let available_at: DateTime<Utc> =
            row.try_get("available_at").map_err(|source| SqlQueueError::query("decode row", source))?;
        let created_at: DateTime<Utc> =
            row.try_get("created_at").map_err(|source| SqlQueueError::query("decode row", source))?;

        let mut envelope: JobEnvelope = serde_json::from_value(payload)
            .map_err(|source| SqlQueueError::CorruptPayload { id: id.clone(), source })?;
        envelope.attempts = attempts.max(0) as u32;

        Ok(JobRecord {
            id,
            queue,
            envelope,
            reserved_at,
            available_at,
            created_at,
        })
    }
}

#[async_trait::async_trait]
impl QueueDriver for SqlQueueDriver {
    async fn push(&self, queue: &str, envelope: JobEnvelope, available_at: DateTime<Utc>) -> Result<String> {
        let payload = serde_json::to_value(&envelope).map_err(RouteMqError::from)?;
        let query = "INSERT INTO queue_jobs (id, queue, payload, attempts, reserved_at, available_at) \
                      VALUES ($1, $2, $3, $4, NULL, $5)";
        sqlx::query(query)
            .bind(&envelope.job_id)
            .bind(queue)
            .bind(payload)
            .bind(envelope.attempts as i32)
            .bind(available_at)
            .execute(&self.pool)
            .await
            .map_err(|source| SqlQueueError::query("push", source))?;
        Ok(envelope.job_id)
    }

    async fn bulk_push(
        &self,
        queue: &str,
        envelopes: Vec<(JobEnvelope, DateTime<Utc>)>,
    ) -> Result<Vec<String>> {
        // One transaction for the whole batch (spec.md §4.5, "a single
        // driver call that atomically inserts all envelopes on the
        // durable driver").
        let mut txn = self
            .pool
            .begin()
            .await
            .map_err(|source| SqlQueueError::query("bulk_push begin", source))?;
        let mut ids = Vec::with_capacity(envelopes.len());
        for (envelope, available_at) in envelopes {
            let payload = serde_json::to_value(&envelope).map_err(RouteMqError::from)?;
            let query = "INSERT INTO queue_jobs (id, queue, payload, attempts, reserved_at, available_at) \
                          VALUES ($1, $2, $3, $4, NULL, $5)";
            sqlx::query(query)
                .bind(&envelope.job_id)
                .bind(queue)
                .bind(payload)
                .bind(envelope.attempts as i32)
                .bind(available_at)
                .execute(&mut *txn)
                .await
                .map_err(|source| SqlQueueError::query("bulk_push insert", source))?;
            ids.push(envelope.job_id);
        }
        txn.commit()
            .await
            .map_err(|source| SqlQueueError::query("bulk_push commit", source))?;
        Ok(ids)
    }

    async fn pop(&self, queue: &str) -> Result<Option<JobRecord>> {
        // spec.md §4.7 pop: select-for-update-skip-locked, then
        // update reserved_at and attempts, all in one transaction so
        // two workers never observe and claim the same row.
        let mut txn = self
            .pool
            .begin()
            .await
            .map_err(|source| SqlQueueError::query("pop begin", source))?;

        let select = "SELECT id, queue, payload, attempts, reserved_at, available_at, created_at \
                       FROM queue_jobs \
                       WHERE queue = $1 AND reserved_at IS NULL AND available_at <= now() \
                       ORDER BY id \
                       FOR UPDATE SKIP LOCKED \
                       LIMIT 1";
        let row = sqlx::query(select)
            .bind(queue)
            .fetch_optional(&mut *txn)
            .await
            .map_err(|source| SqlQueueError::query("pop select", source))?;

        let Some(row) = row else {
            txn.commit().await.ok();
            return Ok(None);
        };

        let mut record = Self::row_to_record(&row)?;
        record.envelope.attempts += 1;
        let now = Utc::now();

        let update = "UPDATE queue_jobs SET reserved_at = $1, attempts = $2 WHERE id = $3";
        sqlx::query(update)
            .bind(now)
            .bind(record.envelope.attempts as i32)
            .bind(&record.id)
            .execute(&mut *txn)
            .await
            .map_err(|source| SqlQueueError::query("pop update", source))?;

        txn.commit()
            .await
            .map_err(|source| SqlQueueError::query("pop commit", source))?;

        record.reserved_at = Some(now);
        Ok(Some(record))
    }

    async fn complete(&self, record: &JobRecord) -> Result<()> {
        sqlx::query("DELETE FROM queue_jobs WHERE id = $1")
            .bind(&record.id)
            .execute(&self.pool)
            .await
            .map_err(|source| SqlQueueError::query("complete", source))?;
        Ok(())
    }

    async fn release(&self, record: &JobRecord, delay_seconds: u64) -> Result<()> {
        let available_at = Utc::now() + chrono::Duration::seconds(delay_seconds as i64);
        let query = "UPDATE queue_jobs SET reserved_at = NULL, available_at = $1 WHERE id = $2";
        sqlx::query(query)
            .bind(available_at)
            .bind(&record.id)
            .execute(&self.pool)
            .await
            .map_err(|source| SqlQueueError::query("release", source))?;
        Ok(())
    }

    async fn fail(&self, record: &JobRecord, exception_text: &str) -> Result<()> {
        // Insert-then-delete in one transaction (spec.md §4.7, "fail").
        let mut txn = self
            .pool
            .begin()
            .await
            .map_err(|source| SqlQueueError::query("fail begin", source))?;

        let payload = serde_json::to_value(&record.envelope).map_err(RouteMqError::from)?;
        let insert = "INSERT INTO queue_failed_jobs (id, connection, queue, payload, exception) \
                       VALUES ($1, $2, $3, $4, $5)";
        sqlx::query(insert)
            .bind(&record.id)
            .bind(&self.connection_name)
            .bind(&record.queue)
            .bind(payload)
            .bind(exception_text)
            .execute(&mut *txn)
            .await
            .map_err(|source| SqlQueueError::query("fail insert", source))?;

        sqlx::query("DELETE FROM queue_jobs WHERE id = $1")
            .bind(&record.id)
            .execute(&mut *txn)
            .await
            .map_err(|source| SqlQueueError::query("fail delete", source))?;

        txn.commit()
            .await
            .map_err(|source| SqlQueueError::query("fail commit", source))?;
        Ok(())
    }

    async fn size(&self, queue: &str) -> Result<u64> {
        let query = "SELECT count(*) AS count FROM queue_jobs WHERE queue = $1 AND reserved_at IS NULL";
        let row = sqlx::query(query)
            .bind(queue)
            .fetch_one(&self.pool)
            .await
            .map_err(|source| SqlQueueError::query("size", source))?;
        let count: i64 = row.try_get("count").map_err(|source| SqlQueueError::query("decode count", source))?;
        Ok(count.max(0) as u64)
    }
}

// read_failed and retry_failed are small operational helpers outside
// the QueueDriver trait proper -- spec.md §4.7 notes failed storage is
// "append-only from the worker's perspective; external tools may retry
// or delete" -- so they live here as inherent methods an operator
// binary can call directly rather than on the trait every backend must
// implement identically.
impl SqlQueueDriver {
    pub async fn list_failed(&self, queue: &str, limit: i64) -> Result<Vec<FailedJobRecord>> {
        let query = "SELECT id, connection, queue, payload, exception, failed_at \
                      FROM queue_failed_jobs WHERE queue = $1 ORDER BY failed_at DESC LIMIT $2";
        let rows = sqlx::query(query)
            .bind(queue)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|source| SqlQueueError::query("list_failed", source))?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(|source| SqlQueueError::query("decode failed row", source))?;
                let connection: String =
                    row.try_get("connection").map_err(|source| SqlQueueError::query("decode failed row", source))?;
                let queue: String = row.try_get("queue").map_err(|source| SqlQueueError::query("decode failed row", source))?;
                let payload: serde_json::Value =
                    row.try_get("payload").map_err(|source| SqlQueueError::query("decode failed row", source))?;
                let exception_text: String =
                    row.try_get("exception").map_err(|source| SqlQueueError::query("decode failed row", source))?;
                let failed_at: DateTime<Utc> =
                    row.try_get("failed_at").map_err(|source| SqlQueueError::query("decode failed row", source))?;
                let envelope: JobEnvelope = serde_json::from_value(payload)
                    .map_err(|source| SqlQueueError::CorruptPayload { id: id.clone(), source })?;
                Ok(FailedJobRecord {
                    id,
                    connection,
                    queue,
                    envelope,
                    exception_text,
                    failed_at,
                })
            })
            .collect::<std::result::Result<Vec<_>, SqlQueueError>>()
            .map_err(Into::into)
    }

    pub async fn delete_failed(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM queue_failed_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|source| SqlQueueError::query("delete_failed", source))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // row_to_record's attempts clamp is worth a unit test on its own
    // since a negative attempts column (which should never happen, but
    // Postgres INTEGER is signed) would otherwise underflow the u32
    // cast silently.
    #[test]
    fn attempts_never_go_negative() {
        assert_eq!((-1i32).max(0) as u32, 0);
    }
}
