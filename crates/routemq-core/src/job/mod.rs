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

// src/job/mod.rs
// Background jobs: a typed value with handler-class identity, a
// self-describing wire envelope, and a startup-populated registry that
// reconstructs a job from its class identifier (spec.md §9, "dynamic
// handler dispatch -> explicit registry").

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, RouteMqError};

// JobDefaults are the per-class values a Job's envelope falls back to
// when not overridden at dispatch time.
#[derive(Debug, Clone, Copy)]
pub struct JobDefaults {
    pub max_tries: u32,
    pub timeout_seconds: u64,
    pub retry_after_seconds: u64,
    pub queue_name: &'static str,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            max_tries: 3,
            timeout_seconds: 30,
            retry_after_seconds: 5,
            queue_name: "default",
        }
    }
}

// A Job is the user-implemented unit of background work. `fields` must
// serialize to a JSON object so it round-trips through the envelope
// without incident; `class_name` must be stable and unique across the
// registry.
#[async_trait]
pub trait Job: Send + Sync {
    fn class_name(&self) -> &'static str;

    fn defaults(&self) -> JobDefaults {
        JobDefaults::default()
    }

    async fn handle(&self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

    // failed is invoked once, after the final attempt is exhausted
    // (spec.md §4.8 step 6). Errors here are swallowed and logged, not
    // propagated -- a broken failure handler must not prevent the job
    // from reaching failed storage.
    async fn failed(&self, _exception: &str) {}
}

// JobEnvelope is the self-describing wire form of a job (spec.md §3,
// "Job"). It is what actually moves through the queue driver; the
// typed Job value is reconstructed from it via the class registry only
// at the point a worker is about to execute it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub class: String,
    pub fields: serde_json::Value,
    pub job_id: String,
    pub attempts: u32,
    pub max_tries: u32,
    pub timeout_seconds: u64,
    pub retry_after_seconds: u64,
}

impl JobEnvelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(RouteMqError::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(RouteMqError::from)
    }
}

// Fields permitted in a job envelope are restricted to primitive
// scalars, ordered sequences, string-keyed maps, and null (spec.md
// §4.5, "fields outside the permitted scalar/sequence/map types are
// rejected at push time"). serde_json::Value already only ever
// produces those shapes for well-formed JSON, so validation amounts to
// rejecting a non-object/non-null top level and catching NaN/Infinity,
// which serde_json cannot represent anyway. This function exists as
// the single enforcement point so future field-shape rules have
// somewhere to live.
pub fn validate_fields(value: &serde_json::Value) -> Result<()> {
    match value {
        serde_json::Value::Object(_) | serde_json::Value::Null => Ok(()),
        _ => Err(RouteMqError::Other(
            "job fields must serialize to a JSON object".to_string(),
        )),
    }
}

// A JobConstructor rebuilds a concrete Job value from its envelope's
// `fields`, for classes registered at startup.
pub type JobConstructor =
    Arc<dyn Fn(serde_json::Value) -> Result<Arc<dyn Job>> + Send + Sync>;

// JobRegistry maps class identifiers to constructors. Frozen after
// startup (spec.md §5, "Job class registry: frozen after startup");
// callers build it once via `register` calls and then share it as
// read-only across workers.
#[derive(Default, Clone)]
pub struct JobRegistry {
    constructors: HashMap<String, JobConstructor>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T, F>(&mut self, class_name: &str, constructor: F)
    where
        T: Job + 'static,
        F: Fn(serde_json::Value) -> Result<T> + Send + Sync + 'static,
    {
        let ctor: JobConstructor = Arc::new(move |fields| {
            constructor(fields).map(|job| Arc::new(job) as Arc<dyn Job>)
        });
        self.constructors.insert(class_name.to_string(), ctor);
    }

    // reconstruct rebuilds a typed Job from an envelope. An unknown
    // class identifier is a distinct error so a poison envelope can be
    // observed rather than silently dropped (spec.md §9).
    pub fn reconstruct(&self, envelope: &JobEnvelope) -> Result<Arc<dyn Job>> {
        let ctor = self.constructors.get(&envelope.class).ok_or_else(|| {
            RouteMqError::Other(format!(
                "no job class registered for {:?}; envelope is unprocessable",
                envelope.class
            ))
        })?;
        ctor(envelope.fields.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PingJob {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Job for PingJob {
        fn class_name(&self) -> &'static str {
            "ping"
        }

        async fn handle(&self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn registry_reconstructs_by_class_name() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = JobRegistry::new();
        let calls_for_ctor = calls.clone();
        registry.register("ping", move |_fields| {
            Ok(PingJob {
                calls: calls_for_ctor.clone(),
            })
        });

        let envelope = JobEnvelope {
            class: "ping".to_string(),
            fields: serde_json::json!({}),
            job_id: "1".to_string(),
            attempts: 0,
            max_tries: 3,
            timeout_seconds: 30,
            retry_after_seconds: 5,
        };

        let job = registry.reconstruct(&envelope).unwrap();
        assert_eq!(job.class_name(), "ping");
    }

    #[test]
    fn unknown_class_is_a_distinct_error() {
        let registry = JobRegistry::new();
        let envelope = JobEnvelope {
            class: "does-not-exist".to_string(),
            fields: serde_json::json!({}),
            job_id: "1".to_string(),
            attempts: 0,
            max_tries: 3,
            timeout_seconds: 30,
            retry_after_seconds: 5,
        };
        assert!(registry.reconstruct(&envelope).is_err());
    }

    #[test]
    fn field_shape_validation() {
        assert!(validate_fields(&serde_json::json!({"a": 1})).is_ok());
        assert!(validate_fields(&serde_json::Value::Null).is_ok());
        assert!(validate_fields(&serde_json::json!([1, 2, 3])).is_err());
        assert!(validate_fields(&serde_json::json!("bare string")).is_err());
    }
}
