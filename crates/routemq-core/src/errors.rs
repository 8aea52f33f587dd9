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

// src/errors.rs
// Error types shared across the router, dispatcher, middleware pipeline,
// and queue manager. Queue drivers define their own error types and
// report them to the queue manager as a boxed std::error::Error, since
// the core crate has no knowledge of any particular backend.

use thiserror::Error;

// RouteMqError covers the abstract error kinds from the framework's
// error taxonomy: config errors are fatal at startup, transport errors
// are retried or surfaced to the caller, handler errors are logged and
// otherwise swallowed, and rate limiting is not actually a failure.
#[derive(Error, Debug)]
pub enum RouteMqError {
    // ConfigError: invalid pattern, invalid option, or missing required
    // configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    // InvalidPattern occurs when register() is given a topic pattern
    // that violates the pattern grammar (see router::pattern).
    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // TransportError occurs when the broker connection fails. The
    // client adapter retries with backoff before this ever surfaces.
    #[error("MQTT transport error: {0}")]
    Transport(#[from] rumqttc::ClientError),

    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    // HandlerError wraps any error raised by a middleware or a route
    // handler. It is logged at the dispatch site with route and
    // request-id context; the broker message is not nacked.
    #[error("handler error: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),

    // RateLimitExceeded is not a failure in the usual sense: it causes
    // the pipeline to short-circuit and return a structured payload.
    #[error("rate limit exceeded: {remaining} of budget remaining, retry after {retry_after_seconds}s")]
    RateLimitExceeded {
        remaining: u64,
        retry_after_seconds: u64,
    },

    // Timeout occurs when handler or job execution exceeds its
    // configured deadline. Treated as a HandlerError in the worker.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl RouteMqError {
    pub fn handler(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Handler(Box::new(err))
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}

impl From<figment::Error> for RouteMqError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RouteMqError>;
