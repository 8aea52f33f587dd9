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

// tests/worker_retry.rs
// Drives run_worker against an in-memory QueueDriver double to cover
// the three terminal outcomes spec.md §4.8 and §8 describe: a job that
// succeeds, one that fails and is retried until it succeeds, and one
// that exhausts its retries and lands in failed storage.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use routemq::job::{Job, JobDefaults, JobEnvelope, JobRegistry};
use routemq::queue::{FailedJobRecord, JobRecord, QueueDriver};
use routemq::worker::{WorkerConfig, run_worker};
use routemq::Result;

#[derive(Default)]
struct MemoryDriverState {
    pending: Vec<JobRecord>,
    failed: Vec<FailedJobRecord>,
}

// A minimal QueueDriver double: single mutex-guarded Vec, no delayed
// scheduling. Good enough to drive run_worker's pop/complete/release/
// fail contract without a real store.
struct MemoryDriver {
    state: Mutex<MemoryDriverState>,
}

impl MemoryDriver {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MemoryDriverState::default()),
        })
    }

    fn seed(&self, envelope: JobEnvelope, queue: &str) {
        let now = Utc::now();
        self.state.lock().unwrap().pending.push(JobRecord {
            id: envelope.job_id.clone(),
            queue: queue.to_string(),
            envelope,
            reserved_at: None,
            available_at: now,
            created_at: now,
        });
    }

    fn failed_count(&self) -> usize {
        self.state.lock().unwrap().failed.len()
    }
}

#[async_trait]
impl QueueDriver for MemoryDriver {
    async fn push(&self, queue: &str, envelope: JobEnvelope, available_at: DateTime<Utc>) -> Result<String> {
        let id = envelope.job_id.clone();
        self.state.lock().unwrap().pending.push(JobRecord {
            id: id.clone(),
            queue: queue.to_string(),
            envelope,
            reserved_at: None,
            available_at,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn bulk_push(&self, queue: &str, envelopes: Vec<(JobEnvelope, DateTime<Utc>)>) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for (envelope, available_at) in envelopes {
            ids.push(self.push(queue, envelope, available_at).await?);
        }
        Ok(ids)
    }

    async fn pop(&self, queue: &str) -> Result<Option<JobRecord>> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let position = state
            .pending
            .iter()
            .position(|r| r.queue == queue && r.reserved_at.is_none() && r.available_at <= now);
        let Some(position) = position else {
            return Ok(None);
        };
        let mut record = state.pending.remove(position);
        record.envelope.attempts += 1;
        record.reserved_at = Some(now);
        state.pending.push(record.clone());
        Ok(Some(record))
    }

    async fn complete(&self, record: &JobRecord) -> Result<()> {
        self.state.lock().unwrap().pending.retain(|r| r.id != record.id);
        Ok(())
    }

    async fn release(&self, record: &JobRecord, _delay_seconds: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.pending.iter_mut().find(|r| r.id == record.id) {
            existing.reserved_at = None;
            existing.available_at = Utc::now();
            existing.envelope.attempts = record.envelope.attempts;
        }
        Ok(())
    }

    async fn fail(&self, record: &JobRecord, exception_text: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.pending.retain(|r| r.id != record.id);
        state.failed.push(FailedJobRecord {
            id: record.id.clone(),
            connection: "memory".to_string(),
            queue: record.queue.clone(),
            envelope: record.envelope.clone(),
            exception_text: exception_text.to_string(),
            failed_at: Utc::now(),
        });
        Ok(())
    }

    async fn size(&self, queue: &str) -> Result<u64> {
        let state = self.state.lock().unwrap();
        Ok(state.pending.iter().filter(|r| r.queue == queue).count() as u64)
    }
}

struct FlakyJob {
    attempts_before_success: usize,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Job for FlakyJob {
    fn class_name(&self) -> &'static str {
        "flaky"
    }

    fn defaults(&self) -> JobDefaults {
        JobDefaults {
            max_tries: 3,
            timeout_seconds: 5,
            retry_after_seconds: 0,
            queue_name: "default",
        }
    }

    async fn handle(&self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.attempts_before_success {
            return Err("not yet".into());
        }
        Ok(())
    }
}

struct AlwaysFailsJob {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Job for AlwaysFailsJob {
    fn class_name(&self) -> &'static str {
        "always_fails"
    }

    fn defaults(&self) -> JobDefaults {
        JobDefaults {
            max_tries: 2,
            timeout_seconds: 5,
            retry_after_seconds: 0,
            queue_name: "default",
        }
    }

    async fn handle(&self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err("always broken".into())
    }
}

fn envelope(class: &str, max_tries: u32, timeout_seconds: u64, retry_after_seconds: u64) -> JobEnvelope {
    JobEnvelope {
        class: class.to_string(),
        fields: serde_json::json!({}),
        job_id: uuid::Uuid::new_v4().to_string(),
        attempts: 0,
        max_tries,
        timeout_seconds,
        retry_after_seconds,
    }
}

async fn run_until_empty(driver: Arc<MemoryDriver>, registry: Arc<JobRegistry>) {
    let shutdown = CancellationToken::new();
    let driver_for_watch = driver.clone();
    let shutdown_for_watch = shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if driver_for_watch.state.lock().unwrap().pending.is_empty() {
                shutdown_for_watch.cancel();
                break;
            }
        }
    });

    let config = WorkerConfig {
        queue: "default".to_string(),
        sleep: Duration::from_millis(10),
        max_jobs: None,
        max_time: Some(Duration::from_secs(2)),
        max_tries: None,
        timeout: None,
    };
    run_worker(driver, registry, config, shutdown).await.unwrap();
}

#[tokio::test]
async fn job_retries_until_it_succeeds() {
    let driver = MemoryDriver::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut registry = JobRegistry::new();
    let calls_for_ctor = calls.clone();
    registry.register("flaky", move |_fields| {
        Ok(FlakyJob {
            attempts_before_success: 2,
            calls: calls_for_ctor.clone(),
        })
    });
    let registry = Arc::new(registry);

    driver.seed(envelope("flaky", 3, 5, 0), "default");
    run_until_empty(driver.clone(), registry).await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(driver.failed_count(), 0);
}

#[tokio::test]
async fn job_exhausting_retries_lands_in_failed_storage() {
    let driver = MemoryDriver::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut registry = JobRegistry::new();
    let calls_for_ctor = calls.clone();
    registry.register("always_fails", move |_fields| {
        Ok(AlwaysFailsJob {
            calls: calls_for_ctor.clone(),
        })
    });
    let registry = Arc::new(registry);

    driver.seed(envelope("always_fails", 2, 5, 0), "default");
    run_until_empty(driver.clone(), registry).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(driver.failed_count(), 1);
}

#[tokio::test]
async fn unknown_job_class_goes_straight_to_failed_storage() {
    let driver = MemoryDriver::new();
    let registry = Arc::new(JobRegistry::new());

    driver.seed(envelope("nonexistent", 3, 5, 0), "default");
    run_until_empty(driver.clone(), registry).await;

    assert_eq!(driver.failed_count(), 1);
}
