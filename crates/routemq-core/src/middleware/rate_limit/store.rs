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

// src/middleware/rate_limit/store.rs
// CounterStore is the storage contract the three rate-limit algorithms
// run against (spec.md §4.4). RedisCounterStore is the distributed
// implementation; routemq_core::middleware::rate_limit::fallback
// provides the process-local one used when the store is unreachable.

use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;

use crate::errors::{Result, RouteMqError};

// The outcome of a single rate-limit check, independent of algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitOutcome {
    pub allowed: bool,
    pub remaining: u64,
    pub retry_after_seconds: u64,
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn sliding_window_hit(
        &self,
        key: &str,
        window_seconds: u64,
        max_requests: u64,
    ) -> Result<HitOutcome>;

    async fn fixed_window_hit(
        &self,
        key: &str,
        window_seconds: u64,
        max_requests: u64,
    ) -> Result<HitOutcome>;

    async fn token_bucket_hit(
        &self,
        key: &str,
        window_seconds: u64,
        max_requests: u64,
        burst_allowance: u64,
    ) -> Result<HitOutcome>;
}

// Lua scripts implementing each algorithm's compound read-modify-write
// atomically, per spec.md §4.4's "steps must execute atomically; the
// store must support a compound operation or a server-side script."
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now_ms = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local max_requests = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now_ms - window_ms)
local count = redis.call('ZCARD', key)

if count >= max_requests then
    return {0, 0, math.ceil(window_ms / 1000)}
end

redis.call('ZADD', key, now_ms, now_ms .. '-' .. redis.call('INCR', key .. ':seq'))
redis.call('EXPIRE', key, math.ceil(window_ms / 1000) + 1)
redis.call('EXPIRE', key .. ':seq', math.ceil(window_ms / 1000) + 1)

return {1, max_requests - count - 1, 0}
"#;

const FIXED_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local window_seconds = tonumber(ARGV[1])
local max_requests = tonumber(ARGV[2])
local window_start = tonumber(ARGV[3])
local now = tonumber(ARGV[4])

local count = redis.call('INCR', key)
if count == 1 then
    redis.call('EXPIRE', key, window_seconds + 1)
end

if count > max_requests then
    return {0, 0, window_start + window_seconds - now}
end

return {1, max_requests - count, 0}
"#;

const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local max_requests = tonumber(ARGV[1])
local window_seconds = tonumber(ARGV[2])
local burst_allowance = tonumber(ARGV[3])
local now = tonumber(ARGV[4])

local capacity = max_requests + burst_allowance
local fields = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(fields[1]) or capacity
local last_refill = tonumber(fields[2]) or now

local elapsed = now - last_refill
if elapsed < 0 then elapsed = 0 end
tokens = math.min(capacity, tokens + elapsed * max_requests / window_seconds)

if tokens < 1 then
    local deficit = 1 - tokens
    local retry_after = math.ceil(deficit * window_seconds / max_requests)
    redis.call('HMSET', key, 'tokens', tokens, 'last_refill', now)
    redis.call('EXPIRE', key, window_seconds * 2)
    return {0, 0, retry_after}
end

tokens = tokens - 1
redis.call('HMSET', key, 'tokens', tokens, 'last_refill', now)
redis.call('EXPIRE', key, window_seconds * 2)

return {1, math.floor(tokens), 0}
"#;

pub struct RedisCounterStore {
    conn: ConnectionManager,
    sliding_window: Script,
    fixed_window: Script,
    token_bucket: Script,
}

impl RedisCounterStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| RouteMqError::Config(format!("invalid redis url: {err}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|err| RouteMqError::Other(format!("redis connection error: {err}")))?;
        Ok(Self {
            conn,
            sliding_window: Script::new(SLIDING_WINDOW_SCRIPT),
            fixed_window: Script::new(FIXED_WINDOW_SCRIPT),
            token_bucket: Script::new(TOKEN_BUCKET_SCRIPT),
        })
    }
}

fn to_outcome(raw: Vec<i64>) -> HitOutcome {
    HitOutcome {
        allowed: raw[0] == 1,
        remaining: raw[1].max(0) as u64,
        retry_after_seconds: raw[2].max(0) as u64,
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn sliding_window_hit(
        &self,
        key: &str,
        window_seconds: u64,
        max_requests: u64,
    ) -> Result<HitOutcome> {
        let mut conn = self.conn.clone();
        let now_ms = chrono::Utc::now().timestamp_millis();
        let raw: Vec<i64> = self
            .sliding_window
            .key(key)
            .arg(now_ms)
            .arg((window_seconds * 1000) as i64)
            .arg(max_requests as i64)
            .invoke_async(&mut conn)
            .await
            .map_err(|err| RouteMqError::Other(format!("redis sliding window error: {err}")))?;
        Ok(to_outcome(raw))
    }

    async fn fixed_window_hit(
        &self,
        key: &str,
        window_seconds: u64,
        max_requests: u64,
    ) -> Result<HitOutcome> {
        let mut conn = self.conn.clone();
        let now = chrono::Utc::now().timestamp();
        let window_start = (now / window_seconds as i64) * window_seconds as i64;
        let windowed_key = format!("{key}:{window_start}");
        let raw: Vec<i64> = self
            .fixed_window
            .key(&windowed_key)
            .arg(window_seconds as i64)
            .arg(max_requests as i64)
            .arg(window_start)
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(|err| RouteMqError::Other(format!("redis fixed window error: {err}")))?;
        Ok(to_outcome(raw))
    }

    async fn token_bucket_hit(
        &self,
        key: &str,
        window_seconds: u64,
        max_requests: u64,
        burst_allowance: u64,
    ) -> Result<HitOutcome> {
        let mut conn = self.conn.clone();
        let now = chrono::Utc::now().timestamp();
        let bucket_key = format!("{key}:bucket");
        let raw: Vec<i64> = self
            .token_bucket
            .key(&bucket_key)
            .arg(max_requests as i64)
            .arg(window_seconds as i64)
            .arg(burst_allowance as i64)
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(|err| RouteMqError::Other(format!("redis token bucket error: {err}")))?;
        Ok(to_outcome(raw))
    }
}
