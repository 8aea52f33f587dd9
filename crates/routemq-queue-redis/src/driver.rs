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

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::Script;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::warn;

use routemq::job::JobEnvelope;
use routemq::queue::{FailedJobRecord, JobRecord, QueueDriver};
use routemq::{Result, RouteMqError};

use crate::errors::RedisQueueError;

// The on-wire shape for a job record as it lives in `<queue>:data:<id>`.
// Timestamps are epoch seconds so the Lua side (which has no date
// library) can read and write them directly via cjson.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    id: String,
    queue: String,
    envelope: JobEnvelope,
    reserved_at: Option<i64>,
    available_at: i64,
    created_at: i64,
}

fn to_job_record(stored: StoredRecord) -> JobRecord {
    JobRecord {
        id: stored.id,
        queue: stored.queue,
        envelope: stored.envelope,
        reserved_at: stored.reserved_at.map(epoch_to_datetime),
        available_at: epoch_to_datetime(stored.available_at),
        created_at: epoch_to_datetime(stored.created_at),
    }
}

fn epoch_to_datetime(epoch: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(epoch, 0).single().unwrap_or_else(Utc::now)
}

// pop migrates due delayed jobs into the main list, then reserves the
// head of the list, incrementing its attempt count -- all in one
// round trip so no other worker can observe a half-migrated state
// (spec.md §4.6, "atomically move head of <queue> to <queue>:reserved,
// incrementing attempts").
const POP_SCRIPT: &str = r#"
local queue_key = KEYS[1]
local delayed_key = KEYS[2]
local reserved_key = KEYS[3]
local data_prefix = ARGV[2]
local now = tonumber(ARGV[1])

local due = redis.call('ZRANGEBYSCORE', delayed_key, '-inf', now)
for _, id in ipairs(due) do
    redis.call('ZREM', delayed_key, id)
    redis.call('RPUSH', queue_key, id)
end

local id = redis.call('LPOP', queue_key)
if not id then
    return false
end

local data_key = data_prefix .. id
local raw = redis.call('GET', data_key)
if not raw then
    return false
end

local record = cjson.decode(raw)
record.envelope.attempts = record.envelope.attempts + 1
record.reserved_at = now
local updated = cjson.encode(record)
redis.call('SET', data_key, updated)
redis.call('ZADD', reserved_key, now, id)
return updated
"#;

// release moves a reserved job back to either the delayed set (retry
// after a backoff) or straight back onto the claimable list, clearing
// its reservation either way (spec.md §4.6, "release").
const RELEASE_SCRIPT: &str = r#"
local queue_key = KEYS[1]
local delayed_key = KEYS[2]
local reserved_key = KEYS[3]
local id = ARGV[1]
local data_key = ARGV[2]
local delay = tonumber(ARGV[3])
local now = tonumber(ARGV[4])

redis.call('ZREM', reserved_key, id)

local raw = redis.call('GET', data_key)
if raw then
    local record = cjson.decode(raw)
    record.reserved_at = nil
    if delay > 0 then
        record.available_at = now + delay
    end
    redis.call('SET', data_key, cjson.encode(record))
end

if delay > 0 then
    redis.call('ZADD', delayed_key, now + delay, id)
else
    redis.call('RPUSH', queue_key, id)
end
return true
"#;

// fail removes a job from the reserved set and its working data key,
// then records it in failed storage (spec.md §4.6, "fail").
const FAIL_SCRIPT: &str = r#"
local reserved_key = KEYS[1]
local failed_list_key = KEYS[2]
local data_key = ARGV[1]
local failed_data_key = ARGV[2]
local id = ARGV[3]
local failed_record = ARGV[4]

redis.call('ZREM', reserved_key, id)
redis.call('DEL', data_key)
redis.call('RPUSH', failed_list_key, id)
redis.call('SET', failed_data_key, failed_record)
return true
"#;

pub struct RedisQueueDriver {
    conn: ConnectionManager,
    key_prefix: String,
    connection_name: String,
    pop_script: Script,
    release_script: Script,
    fail_script: Script,
}

impl RedisQueueDriver {
    pub async fn connect(redis_url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        Self::connect_named(redis_url, key_prefix, "redis").await
    }

    pub async fn connect_named(
        redis_url: &str,
        key_prefix: impl Into<String>,
        connection_name: impl Into<String>,
    ) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| RedisQueueError::InvalidUrl(err.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|err| RedisQueueError::Connection(err.to_string()))?;
        Ok(Self {
            conn,
            key_prefix: key_prefix.into(),
            connection_name: connection_name.into(),
            pop_script: Script::new(POP_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
            fail_script: Script::new(FAIL_SCRIPT),
        })
    }

    fn queue_key(&self, queue: &str) -> String {
        format!("{}{queue}", self.key_prefix)
    }

    fn delayed_key(&self, queue: &str) -> String {
        format!("{}{queue}:delayed", self.key_prefix)
    }

    fn reserved_key(&self, queue: &str) -> String {
        format!("{}{queue}:reserved", self.key_prefix)
    }

    fn data_prefix(&self, queue: &str) -> String {
        format!("{}{queue}:data:", self.key_prefix)
    }

    fn data_key(&self, queue: &str, id: &str) -> String {
        format!("{}{id}", self.data_prefix(queue))
    }

    fn failed_list_key(&self, queue: &str) -> String {
        format!("{}failed:{queue}", self.key_prefix)
    }

    fn failed_data_key(&self, queue: &str, id: &str) -> String {
        format!("{}failed:{queue}:data:{id}", self.key_prefix)
    }

    async fn push_one(
        &self,
        conn: &mut ConnectionManager,
        queue: &str,
        envelope: JobEnvelope,
        available_at: DateTime<Utc>,
    ) -> Result<String> {
        let id = envelope.job_id.clone();
        let now = Utc::now();
        let stored = StoredRecord {
            id: id.clone(),
            queue: queue.to_string(),
            envelope,
            reserved_at: None,
            available_at: available_at.timestamp(),
            created_at: now.timestamp(),
        };
        let payload = serde_json::to_string(&stored).map_err(RouteMqError::from)?;
        let mut pipe = redis::pipe();
        pipe.set(self.data_key(queue, &id), payload);
        if available_at <= now {
            pipe.rpush(self.queue_key(queue), &id);
        } else {
            pipe.zadd(self.delayed_key(queue), &id, available_at.timestamp());
        }
        pipe.query_async::<()>(conn)
            .await
            .map_err(RedisQueueError::from)?;
        Ok(id)
    }

    // sweep_reserved re-releases reserved entries whose reservation is
    // older than `visibility_timeout` (spec.md §9 open question: "a
    // reaper task (optional) sweeps <queue>:reserved for entries older
    // than a configurable visibility timeout"). Off by default; callers
    // opt in by spawning this on an interval.
    pub async fn sweep_reserved(&self, queue: &str, visibility_timeout: Duration) -> Result<u64> {
        let mut conn = self.conn.clone();
        let cutoff = (Utc::now() - chrono::Duration::from_std(visibility_timeout).unwrap_or_default())
            .timestamp();
        let stale: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.reserved_key(queue))
            .arg("-inf")
            .arg(cutoff)
            .query_async(&mut conn)
            .await
            .map_err(RedisQueueError::from)?;

        let mut swept = 0u64;
        for id in stale {
            let data_key = self.data_key(queue, &id);
            let raw: Option<String> = redis::cmd("GET")
                .arg(&data_key)
                .query_async(&mut conn)
                .await
                .map_err(RedisQueueError::from)?;
            let Some(raw) = raw else { continue };
            let record: JobRecord = to_job_record(
                serde_json::from_str(&raw)
                    .map_err(|source| RedisQueueError::CorruptRecord { id: id.clone(), source })?,
            );
            warn!(job_id = %id, queue = %queue, "reaping stale reservation past visibility timeout");
            self.release(&record, 0).await?;
            swept += 1;
        }
        Ok(swept)
    }
}

#[async_trait]
impl QueueDriver for RedisQueueDriver {
    async fn push(&self, queue: &str, envelope: JobEnvelope, available_at: DateTime<Utc>) -> Result<String> {
        let mut conn = self.conn.clone();
        self.push_one(&mut conn, queue, envelope, available_at).await
    }

    async fn bulk_push(
        &self,
        queue: &str,
        envelopes: Vec<(JobEnvelope, DateTime<Utc>)>,
    ) -> Result<Vec<String>> {
        // Pipelined rather than a single Lua script: each envelope is
        // independent (no shared key contention between them), so a
        // pipeline gets the same one-round-trip win without needing
        // variadic KEYS/ARGV plumbing (spec.md §4.5, "uses a pipelined
        // insert on the fast driver").
        let mut conn = self.conn.clone();
        let mut ids = Vec::with_capacity(envelopes.len());
        for (envelope, available_at) in envelopes {
            let id = self.push_one(&mut conn, queue, envelope, available_at).await?;
            ids.push(id);
        }
        Ok(ids)
    }

    async fn pop(&self, queue: &str) -> Result<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp();
        let result: redis::Value = self
            .pop_script
            .key(self.queue_key(queue))
            .key(self.delayed_key(queue))
            .key(self.reserved_key(queue))
            .arg(now)
            .arg(self.data_prefix(queue))
            .invoke_async(&mut conn)
            .await
            .map_err(RedisQueueError::from)?;

        let raw: Option<String> = match result {
            redis::Value::Nil => None,
            redis::Value::Boolean(false) => None,
            redis::Value::BulkString(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            other => {
                return Err(RouteMqError::Other(format!(
                    "unexpected redis reply from pop script: {other:?}"
                )));
            }
        };

        let Some(raw) = raw else { return Ok(None) };
        let stored: StoredRecord = serde_json::from_str(&raw).map_err(RouteMqError::from)?;
        Ok(Some(to_job_record(stored)))
    }

    async fn complete(&self, record: &JobRecord) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.zrem(self.reserved_key(&record.queue), &record.id);
        pipe.del(self.data_key(&record.queue, &record.id));
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(RedisQueueError::from)?;
        Ok(())
    }

    async fn release(&self, record: &JobRecord, delay_seconds: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp();
        let _: bool = self
            .release_script
            .key(self.queue_key(&record.queue))
            .key(self.delayed_key(&record.queue))
            .key(self.reserved_key(&record.queue))
            .arg(&record.id)
            .arg(self.data_key(&record.queue, &record.id))
            .arg(delay_seconds)
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(RedisQueueError::from)?;
        Ok(())
    }

    async fn fail(&self, record: &JobRecord, exception_text: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let failed = FailedJobRecord {
            id: record.id.clone(),
            connection: self.connection_name.clone(),
            queue: record.queue.clone(),
            envelope: record.envelope.clone(),
            exception_text: exception_text.to_string(),
            failed_at: Utc::now(),
        };
        let payload = serde_json::to_string(&FailedRecordWire::from(&failed)).map_err(RouteMqError::from)?;
        let _: bool = self
            .fail_script
            .key(self.reserved_key(&record.queue))
            .key(self.failed_list_key(&record.queue))
            .arg(self.data_key(&record.queue, &record.id))
            .arg(self.failed_data_key(&record.queue, &record.id))
            .arg(&record.id)
            .arg(payload)
            .invoke_async(&mut conn)
            .await
            .map_err(RedisQueueError::from)?;
        Ok(())
    }

    async fn size(&self, queue: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        // Counts everything not yet reserved -- both immediately
        // claimable entries and delayed-but-not-yet-due ones -- so a
        // job pushed via `later()` is reflected the instant it's
        // pushed (spec.md §8 scenario 4: "size(queue) returns 1
        // immediately" after `later(2, job)`), not only once its delay
        // elapses and it migrates onto the main list.
        let mut pipe = redis::pipe();
        pipe.llen(self.queue_key(queue));
        pipe.zcard(self.delayed_key(queue));
        let (claimable, delayed): (u64, u64) = pipe
            .query_async(&mut conn)
            .await
            .map_err(RedisQueueError::from)?;
        Ok(claimable + delayed)
    }
}

#[derive(Serialize)]
struct FailedRecordWire<'a> {
    id: &'a str,
    connection: &'a str,
    queue: &'a str,
    envelope: &'a JobEnvelope,
    exception_text: &'a str,
    failed_at: i64,
}

impl<'a> From<&'a FailedJobRecord> for FailedRecordWire<'a> {
    fn from(record: &'a FailedJobRecord) -> Self {
        Self {
            id: &record.id,
            connection: &record.connection,
            queue: &record.queue,
            envelope: &record.envelope,
            exception_text: &record.exception_text,
            failed_at: record.failed_at.timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_envelope() -> JobEnvelope {
        JobEnvelope {
            class: "ping".to_string(),
            fields: serde_json::json!({}),
            job_id: "job-1".to_string(),
            attempts: 1,
            max_tries: 3,
            timeout_seconds: 30,
            retry_after_seconds: 5,
        }
    }

    #[test]
    fn to_job_record_round_trips_epoch_timestamps() {
        let stored = StoredRecord {
            id: "job-1".to_string(),
            queue: "default".to_string(),
            envelope: sample_envelope(),
            reserved_at: Some(1_700_000_100),
            available_at: 1_700_000_000,
            created_at: 1_699_999_000,
        };
        let record = to_job_record(stored);
        assert_eq!(record.id, "job-1");
        assert_eq!(record.reserved_at.unwrap().timestamp(), 1_700_000_100);
        assert_eq!(record.available_at.timestamp(), 1_700_000_000);
        assert_eq!(record.created_at.timestamp(), 1_699_999_000);
    }

    #[test]
    fn failed_record_wire_preserves_exception_text() {
        let record = FailedJobRecord {
            id: "job-1".to_string(),
            connection: "redis".to_string(),
            queue: "default".to_string(),
            envelope: sample_envelope(),
            exception_text: "boom".to_string(),
            failed_at: Utc::now(),
        };
        let wire = FailedRecordWire::from(&record);
        assert_eq!(wire.exception_text, "boom");
        assert_eq!(wire.id, "job-1");
    }
}
