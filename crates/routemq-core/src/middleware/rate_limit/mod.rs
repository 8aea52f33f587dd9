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

// src/middleware/rate_limit/mod.rs
// The rate-limiting middleware (spec.md §4.4): three algorithms over a
// shared CounterStore, a whitelist bypass using the same segmented
// wildcard language as topics, and an automatic fallback to
// process-local state when the store is unreachable.

pub mod fallback;
pub mod store;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use self::fallback::ProcessLocalCounterStore;
use self::store::{CounterStore, HitOutcome};
use crate::errors::Result;
use crate::middleware::{Context, Middleware, Next, RateLimitDiagnostics};
use crate::router::{Segment, parse_pattern};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitAlgorithm {
    Sliding,
    Fixed,
    TokenBucket,
}

pub type KeyGenerator = Arc<dyn Fn(&Context) -> String + Send + Sync>;

pub fn default_key_generator() -> KeyGenerator {
    Arc::new(|ctx: &Context| format!("topic:{}", ctx.topic))
}

#[derive(Clone)]
pub struct RateLimitConfig {
    pub max_requests: u64,
    pub window_seconds: u64,
    pub algorithm: RateLimitAlgorithm,
    pub burst_allowance: u64,
    pub key_generator: KeyGenerator,
    pub whitelist: Vec<String>,
    pub fallback_enabled: bool,
    pub key_prefix: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_seconds: 60,
            algorithm: RateLimitAlgorithm::Sliding,
            burst_allowance: 0,
            key_generator: default_key_generator(),
            whitelist: Vec::new(),
            fallback_enabled: true,
            key_prefix: "routemq:ratelimit".to_string(),
        }
    }
}

// matches_whitelist checks a generated key against whitelist patterns
// written in the same segmented wildcard language as topic patterns
// (spec.md §4.4, "same segmented-wildcard language as topics").
pub fn matches_whitelist(whitelist: &[String], key: &str) -> bool {
    let key_segments: Vec<&str> = key.split('/').collect();
    whitelist.iter().any(|pattern| {
        parse_pattern(pattern)
            .map(|segments| matches_segments(&segments, &key_segments))
            .unwrap_or(false)
    })
}

fn matches_segments(pattern: &[Segment], topic: &[&str]) -> bool {
    match pattern.split_first() {
        None => topic.is_empty(),
        Some((Segment::Hash, _)) => true,
        Some((Segment::Literal(lit), rest)) => match topic.split_first() {
            Some((first, topic_rest)) if *first == lit.as_str() => matches_segments(rest, topic_rest),
            _ => false,
        },
        Some((Segment::Plus, rest)) | Some((Segment::Param(_), rest)) => match topic.split_first() {
            Some((_, topic_rest)) => matches_segments(rest, topic_rest),
            None => false,
        },
    }
}

pub struct RateLimitMiddleware {
    config: RateLimitConfig,
    store: Arc<dyn CounterStore>,
    fallback_store: Arc<ProcessLocalCounterStore>,
}

impl RateLimitMiddleware {
    pub fn new(config: RateLimitConfig, store: Arc<dyn CounterStore>) -> Arc<Self> {
        let fallback_store = ProcessLocalCounterStore::new();
        fallback_store.spawn_sweeper(std::time::Duration::from_secs(60));
        Arc::new(Self {
            config,
            store,
            fallback_store,
        })
    }

    async fn hit(&self, store: &dyn CounterStore, key: &str) -> Result<HitOutcome> {
        match self.config.algorithm {
            RateLimitAlgorithm::Sliding => {
                store
                    .sliding_window_hit(key, self.config.window_seconds, self.config.max_requests)
                    .await
            }
            RateLimitAlgorithm::Fixed => {
                store
                    .fixed_window_hit(key, self.config.window_seconds, self.config.max_requests)
                    .await
            }
            RateLimitAlgorithm::TokenBucket => {
                store
                    .token_bucket_hit(
                        key,
                        self.config.window_seconds,
                        self.config.max_requests,
                        self.config.burst_allowance,
                    )
                    .await
            }
        }
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<serde_json::Value> {
        let raw_key = (self.config.key_generator)(ctx);
        let key = format!("{}:{}", self.config.key_prefix, raw_key);

        if matches_whitelist(&self.config.whitelist, &raw_key) {
            return next.run(ctx).await;
        }

        let outcome = match self.hit(self.store.as_ref(), &key).await {
            Ok(outcome) => outcome,
            Err(err) if self.config.fallback_enabled => {
                warn!("rate limit store unreachable, using process-local fallback: {err}");
                self.hit(self.fallback_store.as_ref(), &key).await?
            }
            Err(err) => {
                warn!("rate limit store unreachable, failing open: {err}");
                return next.run(ctx).await;
            }
        };

        if !outcome.allowed {
            return Ok(serde_json::json!({
                "error": "rate_limit_exceeded",
                "message": "rate limit exceeded",
                "max_requests": self.config.max_requests,
                "window_seconds": self.config.window_seconds,
                "remaining": outcome.remaining,
                "reset_time": outcome.retry_after_seconds,
            }));
        }

        ctx.rate_limit = Some(RateLimitDiagnostics {
            remaining: outcome.remaining,
            retry_after_seconds: outcome.retry_after_seconds,
            exceeded: false,
        });
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_matches_topic_wildcard_language() {
        let whitelist = vec!["topic:health/#".to_string()];
        assert!(matches_whitelist(&whitelist, "topic:health/check"));
        assert!(!matches_whitelist(&whitelist, "topic:devices/d1"));
    }

    #[test]
    fn whitelist_plus_matches_single_segment() {
        let whitelist = vec!["topic:devices/+/status".to_string()];
        assert!(matches_whitelist(&whitelist, "topic:devices/d1/status"));
        assert!(!matches_whitelist(&whitelist, "topic:devices/d1/d2/status"));
    }
}
