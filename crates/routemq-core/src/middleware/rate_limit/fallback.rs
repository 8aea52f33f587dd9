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

// src/middleware/rate_limit/fallback.rs
// A process-local CounterStore used when the shared store is
// unreachable and fallback is enabled (spec.md §4.4). State here is
// per-process, not shared across instances, and is explicitly
// documented as degraded -- this is a safety net, not a replacement
// for the distributed store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::store::{CounterStore, HitOutcome};
use crate::errors::Result;

#[derive(Default)]
struct SlidingState {
    timestamps_ms: Vec<i64>,
}

#[derive(Default)]
struct FixedState {
    window_start: i64,
    count: u64,
}

#[derive(Clone, Copy)]
struct BucketState {
    tokens: f64,
    last_refill: i64,
}

#[derive(Default)]
pub struct ProcessLocalCounterStore {
    sliding: DashMap<String, SlidingState>,
    fixed: DashMap<String, FixedState>,
    bucket: DashMap<String, BucketState>,
}

impl ProcessLocalCounterStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // spawn_sweeper periodically evicts fallback-state entries that
    // can no longer affect a decision, keeping the fallback's memory
    // bounded under sustained degraded operation.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                store.sweep();
            }
        });
    }

    fn sweep(&self) {
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.sliding.retain(|_, state| {
            state.timestamps_ms.retain(|ts| *ts > now_ms - 24 * 3600 * 1000);
            !state.timestamps_ms.is_empty()
        });
        let now = chrono::Utc::now().timestamp();
        self.fixed.retain(|_, state| state.window_start + 3600 > now);
        self.bucket.retain(|_, state| state.last_refill + 3600 > now);
    }
}

#[async_trait]
impl CounterStore for ProcessLocalCounterStore {
    async fn sliding_window_hit(
        &self,
        key: &str,
        window_seconds: u64,
        max_requests: u64,
    ) -> Result<HitOutcome> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let window_ms = (window_seconds * 1000) as i64;
        let mut entry = self.sliding.entry(key.to_string()).or_default();
        entry.timestamps_ms.retain(|ts| *ts > now_ms - window_ms);

        if entry.timestamps_ms.len() as u64 >= max_requests {
            return Ok(HitOutcome {
                allowed: false,
                remaining: 0,
                retry_after_seconds: window_seconds,
            });
        }

        entry.timestamps_ms.push(now_ms);
        let remaining = max_requests - entry.timestamps_ms.len() as u64;
        Ok(HitOutcome {
            allowed: true,
            remaining,
            retry_after_seconds: 0,
        })
    }

    async fn fixed_window_hit(
        &self,
        key: &str,
        window_seconds: u64,
        max_requests: u64,
    ) -> Result<HitOutcome> {
        let now = chrono::Utc::now().timestamp();
        let window_start = (now / window_seconds as i64) * window_seconds as i64;
        let mut entry = self.fixed.entry(key.to_string()).or_default();
        if entry.window_start != window_start {
            entry.window_start = window_start;
            entry.count = 0;
        }
        entry.count += 1;

        if entry.count > max_requests {
            return Ok(HitOutcome {
                allowed: false,
                remaining: 0,
                retry_after_seconds: (window_start + window_seconds as i64 - now).max(0) as u64,
            });
        }

        Ok(HitOutcome {
            allowed: true,
            remaining: max_requests - entry.count,
            retry_after_seconds: 0,
        })
    }

    async fn token_bucket_hit(
        &self,
        key: &str,
        window_seconds: u64,
        max_requests: u64,
        burst_allowance: u64,
    ) -> Result<HitOutcome> {
        let now = chrono::Utc::now().timestamp();
        let capacity = (max_requests + burst_allowance) as f64;
        let mut entry = self.bucket.entry(key.to_string()).or_insert(BucketState {
            tokens: capacity,
            last_refill: now,
        });

        let elapsed = (now - entry.last_refill).max(0) as f64;
        entry.tokens = (entry.tokens + elapsed * max_requests as f64 / window_seconds as f64).min(capacity);
        entry.last_refill = now;

        if entry.tokens < 1.0 {
            let deficit = 1.0 - entry.tokens;
            let retry_after = (deficit * window_seconds as f64 / max_requests as f64).ceil() as u64;
            return Ok(HitOutcome {
                allowed: false,
                remaining: 0,
                retry_after_seconds: retry_after,
            });
        }

        entry.tokens -= 1.0;
        Ok(HitOutcome {
            allowed: true,
            remaining: entry.tokens.floor() as u64,
            retry_after_seconds: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sliding_window_denies_after_max_requests() {
        let store = ProcessLocalCounterStore::new();
        for _ in 0..5 {
            let outcome = store.sliding_window_hit("k", 60, 5).await.unwrap();
            assert!(outcome.allowed);
        }
        let outcome = store.sliding_window_hit("k", 60, 5).await.unwrap();
        assert!(!outcome.allowed);
        assert_eq!(outcome.retry_after_seconds, 60);
    }

    #[tokio::test]
    async fn token_bucket_allows_initial_burst_up_to_capacity() {
        let store = ProcessLocalCounterStore::new();
        for _ in 0..3 {
            let outcome = store.token_bucket_hit("k", 60, 3, 0).await.unwrap();
            assert!(outcome.allowed);
        }
        let outcome = store.token_bucket_hit("k", 60, 3, 0).await.unwrap();
        assert!(!outcome.allowed);
    }
}
