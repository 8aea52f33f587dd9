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

// src/middleware/mod.rs
// The context object threaded through a route's middleware chain, and
// the chain itself. A route's materialized middleware list runs
// outer-to-inner, terminating in the user handler.

pub mod rate_limit;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::client::BrokerClient;
use crate::errors::Result;
use crate::router::Params;

// Payload is the parsed message body: a structured document if the raw
// bytes decode as JSON, otherwise the raw byte sequence is preserved
// verbatim so binary payloads are never silently mangled.
#[derive(Debug, Clone)]
pub enum Payload {
    Structured(serde_json::Value),
    Raw(Vec<u8>),
}

impl Payload {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<serde_json::Value>(bytes) {
            Ok(value) => Payload::Structured(value),
            Err(_) => Payload::Raw(bytes.to_vec()),
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Structured(value) => Some(value),
            Payload::Raw(_) => None,
        }
    }

    pub fn as_bytes(&self) -> std::borrow::Cow<'_, [u8]> {
        match self {
            Payload::Structured(value) => {
                std::borrow::Cow::Owned(serde_json::to_vec(value).unwrap_or_default())
            }
            Payload::Raw(bytes) => std::borrow::Cow::Borrowed(bytes),
        }
    }
}

// RateLimitDiagnostics is written into the context by the rate-limit
// middleware on an allowed request (spec.md §4.4: "on allow,
// context.rate_limit = {remaining, retry_after, exceeded: false}").
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDiagnostics {
    pub remaining: u64,
    pub retry_after_seconds: u64,
    pub exceeded: bool,
}

// Context is the value threaded through the middleware pipeline for a
// single inbound message. It is created at dispatch and discarded when
// the pipeline returns.
#[derive(Debug, Clone)]
pub struct Context {
    pub topic: String,
    pub payload: Payload,
    pub params: Params,
    pub client: Arc<dyn BrokerClient>,
    pub request_id: Uuid,
    pub rate_limit: Option<RateLimitDiagnostics>,
    // scratch is the typed extension area for middleware-specific
    // additions (authenticated principal, trace spans, etc.) that
    // don't warrant a dedicated field on Context itself.
    pub scratch: HashMap<String, serde_json::Value>,
}

impl Context {
    pub fn new(
        topic: String,
        payload: Payload,
        params: Params,
        client: Arc<dyn BrokerClient>,
    ) -> Self {
        Self {
            topic,
            payload,
            params,
            client,
            request_id: Uuid::new_v4(),
            rate_limit: None,
            scratch: HashMap::new(),
        }
    }
}

pub type HandlerOutput = Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>;
pub type Handler = Arc<dyn Fn(Context) -> HandlerOutput + Send + Sync>;

// Build a type-erased Handler from an ordinary async function or
// closure returning a serializable value.
pub fn handler_fn<F, Fut, T>(f: F) -> Handler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: serde::Serialize,
{
    Arc::new(move |ctx| {
        let fut = f(ctx);
        Box::pin(async move {
            let value = fut.await?;
            serde_json::to_value(value).map_err(Into::into)
        })
    })
}

// Middleware wraps a handler invocation. It may inspect and mutate the
// context, short-circuit by returning without calling `next`, or wrap
// the call for post-processing after `next` resolves.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<serde_json::Value>;
}

// Next represents the remainder of the pipeline: zero or more
// middlewares followed by the route handler. Calling `run` invokes the
// next link in the chain.
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    handler: &'a Handler,
}

impl<'a> Next<'a> {
    pub async fn run(self, ctx: &mut Context) -> Result<serde_json::Value> {
        match self.middlewares.split_first() {
            Some((first, rest)) => {
                first
                    .handle(
                        ctx,
                        Next {
                            middlewares: rest,
                            handler: self.handler,
                        },
                    )
                    .await
            }
            None => (self.handler)(ctx.clone()).await,
        }
    }
}

// Pipeline is the ordered, materialized middleware chain for one
// route, terminating in its handler.
#[derive(Clone)]
pub struct Pipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
    handler: Handler,
}

impl Pipeline {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>, handler: Handler) -> Self {
        Self {
            middlewares,
            handler,
        }
    }

    pub async fn run(&self, ctx: &mut Context) -> Result<serde_json::Value> {
        let next = Next {
            middlewares: &self.middlewares,
            handler: &self.handler,
        };
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    use crate::client::NoopBrokerClient;

    struct CountingMiddleware {
        counter: StdArc<AtomicUsize>,
    }

    #[async_trait]
    impl Middleware for CountingMiddleware {
        async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<serde_json::Value> {
            self.counter.fetch_add(1, Ordering::SeqCst);
            next.run(ctx).await
        }
    }

    struct ShortCircuitMiddleware;

    #[async_trait]
    impl Middleware for ShortCircuitMiddleware {
        async fn handle(&self, _ctx: &mut Context, _next: Next<'_>) -> Result<serde_json::Value> {
            Ok(serde_json::json!({"short_circuited": true}))
        }
    }

    fn test_context() -> Context {
        Context::new(
            "a/b".to_string(),
            Payload::Raw(vec![]),
            Params::default(),
            Arc::new(NoopBrokerClient::default()),
        )
    }

    #[tokio::test]
    async fn runs_middlewares_outer_to_inner_then_handler() {
        let counter = StdArc::new(AtomicUsize::new(0));
        let handler = handler_fn(|_ctx: Context| async move { Ok(serde_json::json!({"ok": true})) });
        let pipeline = Pipeline::new(
            vec![
                StdArc::new(CountingMiddleware {
                    counter: counter.clone(),
                }),
                StdArc::new(CountingMiddleware {
                    counter: counter.clone(),
                }),
            ],
            handler,
        );
        let mut ctx = test_context();
        let result = pipeline.run(&mut ctx).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn short_circuit_skips_downstream_and_handler() {
        let counter = StdArc::new(AtomicUsize::new(0));
        let handler = handler_fn(|_ctx: Context| async move { Ok(serde_json::json!({"ok": true})) });
        let pipeline = Pipeline::new(
            vec![
                StdArc::new(ShortCircuitMiddleware),
                StdArc::new(CountingMiddleware {
                    counter: counter.clone(),
                }),
            ],
            handler,
        );
        let mut ctx = test_context();
        let result = pipeline.run(&mut ctx).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(result, serde_json::json!({"short_circuited": true}));
    }
}
