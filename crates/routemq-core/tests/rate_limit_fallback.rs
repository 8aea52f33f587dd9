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

// tests/rate_limit_fallback.rs
// Runs RateLimitMiddleware in front of a handler using only the
// process-local fallback store (no Redis needed in this environment)
// to cover spec.md §8's rate-limit scenario: requests within budget
// pass through untouched, the request that exceeds it gets the
// structured rate_limit_exceeded payload instead of reaching the
// handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use routemq::client::NoopBrokerClient;
use routemq::middleware::rate_limit::fallback::ProcessLocalCounterStore;
use routemq::middleware::rate_limit::{RateLimitAlgorithm, RateLimitConfig, RateLimitMiddleware};
use routemq::middleware::{Context, Middleware, Payload, Pipeline, handler_fn};
use routemq::router::Params;

fn context() -> Context {
    Context::new(
        "devices/d1/control".to_string(),
        Payload::Raw(vec![]),
        Params::default(),
        Arc::new(NoopBrokerClient::default()),
    )
}

#[tokio::test]
async fn requests_beyond_budget_are_rejected_without_reaching_the_handler() {
    let handler_calls = Arc::new(AtomicUsize::new(0));
    let calls_for_handler = handler_calls.clone();
    let handler = handler_fn(move |_ctx: Context| {
        let calls = calls_for_handler.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({"ok": true}))
        }
    });

    let store = ProcessLocalCounterStore::new();
    let rate_limit: Arc<dyn Middleware> = RateLimitMiddleware::new(
        RateLimitConfig {
            max_requests: 2,
            window_seconds: 60,
            algorithm: RateLimitAlgorithm::Fixed,
            fallback_enabled: false,
            ..RateLimitConfig::default()
        },
        store,
    );

    let pipeline = Pipeline::new(vec![rate_limit], handler);

    for _ in 0..2 {
        let mut ctx = context();
        let result = pipeline.run(&mut ctx).await.unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    let mut ctx = context();
    let result = pipeline.run(&mut ctx).await.unwrap();
    assert_eq!(result["error"], serde_json::json!("rate_limit_exceeded"));
    assert_eq!(handler_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn whitelisted_topic_bypasses_the_limit_entirely() {
    let handler_calls = Arc::new(AtomicUsize::new(0));
    let calls_for_handler = handler_calls.clone();
    let handler = handler_fn(move |_ctx: Context| {
        let calls = calls_for_handler.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({"ok": true}))
        }
    });

    let store = ProcessLocalCounterStore::new();
    let rate_limit: Arc<dyn Middleware> = RateLimitMiddleware::new(
        RateLimitConfig {
            max_requests: 1,
            window_seconds: 60,
            whitelist: vec!["topic:devices/+/control".to_string()],
            ..RateLimitConfig::default()
        },
        store,
    );

    let pipeline = Pipeline::new(vec![rate_limit], handler);
    for _ in 0..5 {
        let mut ctx = context();
        let result = pipeline.run(&mut ctx).await.unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
    }
    assert_eq!(handler_calls.load(Ordering::SeqCst), 5);
}
