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

//! RouteMQ turns an MQTT broker into an application backend: it
//! subscribes to topics on an application's behalf, routes incoming
//! messages through a middleware pipeline to handler functions, and
//! offloads long-running work to a background job queue with retry
//! semantics.
//!
//! This crate is the hard core described by the framework's design
//! document: the topic router, the subscription dispatcher, the
//! middleware pipeline (including rate limiting), the job model, and
//! the queue worker loop. Queue storage backends live in their own
//! crates (`routemq-queue-redis`, `routemq-queue-sql`) behind the
//! [`queue::QueueDriver`] trait so this crate never links against a
//! particular store.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod job;
pub mod middleware;
pub mod queue;
pub mod router;
pub mod worker;

pub use client::{BrokerClient, BrokerConfig, NoopBrokerClient, RumqttcBrokerClient};
pub use config::Config;
pub use dispatcher::{RouteMq, RouteMqBuilder};
pub use errors::{Result, RouteMqError};
pub use job::{Job, JobDefaults, JobEnvelope, JobRegistry};
pub use middleware::{Context, Middleware, Next, Payload, Pipeline};
pub use queue::{FailedJobRecord, JobRecord, QueueDriver, QueueManager};
pub use router::{Group, Params, Route, RouteOptions, RouteTree};
pub use worker::{WorkerConfig, run_worker};
