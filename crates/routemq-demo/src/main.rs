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

// src/main.rs
// An example application built on RouteMQ: one parameterized route, a
// shared route with a worker pool, a rate limit on a device-control
// topic, and a job dispatched from inside a handler.

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};

use routemq::job::{Job, JobDefaults};
use routemq::middleware::rate_limit::store::RedisCounterStore;
use routemq::middleware::rate_limit::{RateLimitConfig, RateLimitMiddleware};
use routemq::middleware::{Context, handler_fn};
use routemq::queue::QueueManager;
use routemq::router::RouteOptions;
use routemq::{JobRegistry, RouteMqBuilder};
use routemq_cli::{Cli, Command};

// NotifyOwnerJob sends a notification to a device's owner once a
// control command has been accepted. Registered under "notify_owner"
// so a worker process can reconstruct it from the queue.
#[derive(Debug, Serialize, Deserialize)]
struct NotifyOwnerJob {
    device_id: String,
    command: String,
}

#[async_trait]
impl Job for NotifyOwnerJob {
    fn class_name(&self) -> &'static str {
        "notify_owner"
    }

    fn defaults(&self) -> JobDefaults {
        JobDefaults {
            max_tries: 5,
            timeout_seconds: 10,
            retry_after_seconds: 15,
            queue_name: "notifications",
        }
    }

    async fn handle(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!(
            device_id = %self.device_id,
            command = %self.command,
            "notified owner of accepted command"
        );
        Ok(())
    }

    async fn failed(&self, exception: &str) {
        tracing::warn!(device_id = %self.device_id, "giving up on owner notification: {exception}");
    }
}

fn job_registry() -> Arc<JobRegistry> {
    let mut registry = JobRegistry::new();
    registry.register("notify_owner", |fields| {
        serde_json::from_value::<NotifyOwnerJob>(fields).map_err(Into::into)
    });
    Arc::new(registry)
}

// device_control handles `devices/{id}/control`, echoing the accepted
// command and enqueueing an owner notification (spec.md §8, scenario
// 1 and scenario 5).
async fn device_control(
    ctx: Context,
    queue: Arc<QueueManager>,
) -> routemq::Result<serde_json::Value> {
    let device_id = ctx.params.get("id").unwrap_or("unknown").to_string();
    let command = ctx
        .payload
        .as_json()
        .and_then(|value| value.get("command"))
        .and_then(|value| value.as_str())
        .unwrap_or("unknown")
        .to_string();

    let job = NotifyOwnerJob {
        device_id: device_id.clone(),
        command: command.clone(),
    };
    let envelope = QueueManager::envelope_for(&job, serde_json::to_value(&job)?)?;
    queue.push(envelope, Some("notifications")).await?;

    Ok(serde_json::json!({"received": device_id, "command": command}))
}

// device_telemetry handles the high-volume `devices/+/telemetry`
// stream as a shared route, fanning work out across a worker pool
// (spec.md §8, scenario 2).
async fn device_telemetry(ctx: Context) -> routemq::Result<serde_json::Value> {
    tracing::debug!(topic = %ctx.topic, "telemetry received");
    Ok(serde_json::json!({"ack": true}))
}

async fn build_app(config: &routemq::Config) -> routemq::Result<RouteMqBuilder> {
    let queue_driver = routemq_cli::build_queue_driver(config).await?;
    let queue = Arc::new(QueueManager::new(
        queue_driver,
        config.queue.default_queue.clone(),
    ));

    let counter_store = Arc::new(RedisCounterStore::connect(&config.counter_store.url).await?);
    let rate_limit = RateLimitMiddleware::new(
        RateLimitConfig {
            key_prefix: config.counter_store.key_prefix.clone(),
            ..RateLimitConfig::default()
        },
        counter_store,
    );

    let builder = RouteMqBuilder::new(config.broker_config())
        .use_middleware(rate_limit)
        .route(
            "devices/{id}/control",
            handler_fn(move |ctx| {
                let queue = queue.clone();
                async move { device_control(ctx, queue).await }
            }),
            RouteOptions {
                qos: rumqttc::QoS::AtLeastOnce,
                ..RouteOptions::default()
            },
            Vec::new(),
        )?
        .route(
            "devices/+/telemetry",
            handler_fn(device_telemetry),
            RouteOptions {
                qos: rumqttc::QoS::AtMostOnce,
                shared: true,
                worker_count: 4,
            },
            Vec::new(),
        )?;

    Ok(builder)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    routemq_cli::init_tracing();

    let cli = Cli::parse();
    let config = routemq::Config::load(cli.command.config_path())?;

    match &cli.command {
        Command::Run { .. } => {
            let builder = build_app(&config).await?;
            routemq_cli::run_dispatcher(builder).await?;
        }
        Command::QueueWork { .. } => {
            let driver = routemq_cli::build_queue_driver(&config).await?;
            let registry = job_registry();
            routemq_cli::run_worker_command(&config, driver, registry, &cli.command).await?;
        }
    }

    Ok(())
}
