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

// tests/pipeline.rs
// End-to-end route resolution and pipeline execution without a real
// broker: a registered pattern resolves a topic to a handler with
// extracted parameters, and the materialized pipeline runs the route's
// middleware before the handler (spec.md §8, scenario 1).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rumqttc::QoS;

use routemq::client::NoopBrokerClient;
use routemq::middleware::{Context, Middleware, Next, Payload, Pipeline, handler_fn};
use routemq::router::{Params, RouteOptions, RouteTree};

struct TaggingMiddleware {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Middleware for TaggingMiddleware {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> routemq::Result<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ctx.scratch.insert("tagged".to_string(), serde_json::json!(true));
        next.run(ctx).await
    }
}

fn context_for(topic: &str, params: Params, body: &[u8]) -> Context {
    Context::new(
        topic.to_string(),
        Payload::from_bytes(body),
        params,
        Arc::new(NoopBrokerClient::default()),
    )
}

#[tokio::test]
async fn non_shared_route_with_parameters_echoes_device_and_command() {
    let mut tree = RouteTree::new("routemq".to_string());
    let calls = Arc::new(AtomicUsize::new(0));

    let handler = handler_fn(|ctx: Context| async move {
        let id = ctx.params.get("id").unwrap_or_default().to_string();
        let command = ctx
            .payload
            .as_json()
            .and_then(|v| v.get("command"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(serde_json::json!({"received": id, "command": command}))
    });

    let middleware: Vec<Arc<dyn Middleware>> = vec![Arc::new(TaggingMiddleware { calls: calls.clone() })];
    tree.register(
        "devices/{id}/control",
        handler,
        RouteOptions {
            qos: QoS::AtLeastOnce,
            ..RouteOptions::default()
        },
        middleware,
    )
    .unwrap();

    let matches = tree.resolve("devices/d42/control");
    assert_eq!(matches.len(), 1);
    let (route, params) = &matches[0];
    assert_eq!(params.get("id"), Some("d42"));

    let mut ctx = context_for("devices/d42/control", params.clone(), br#"{"command":"restart"}"#);
    let pipeline = Pipeline::new(route.middleware.clone(), route.handler.clone());
    let result = pipeline.run(&mut ctx).await.unwrap();

    assert_eq!(result, serde_json::json!({"received": "d42", "command": "restart"}));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.scratch.get("tagged"), Some(&serde_json::json!(true)));
}

#[tokio::test]
async fn unmatched_topic_resolves_to_no_routes() {
    let mut tree = RouteTree::new("routemq".to_string());
    tree.register(
        "devices/{id}/control",
        handler_fn(|_ctx: Context| async move { Ok(serde_json::json!({})) }),
        RouteOptions::default(),
        Vec::new(),
    )
    .unwrap();

    assert!(tree.resolve("devices/d42/status").is_empty());
}
