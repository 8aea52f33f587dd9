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

// src/worker.rs
// The queue-worker loop (spec.md §4.8): pop, reconstruct, execute
// under a timeout, then complete/release/fail depending on outcome.
// Jobs within one worker are processed strictly sequentially; ordering
// across workers sharing a queue is not guaranteed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::Result;
use crate::job::JobRegistry;
use crate::queue::QueueDriver;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queue: String,
    pub sleep: Duration,
    pub max_jobs: Option<u64>,
    pub max_time: Option<Duration>,
    // Worker-level overrides for `--max-tries`/`--timeout`. When set,
    // these win over the per-job values carried on the envelope, the
    // same override-the-producer escape hatch spec.md §6 describes for
    // `queue-work`'s CLI flags.
    pub max_tries: Option<u32>,
    pub timeout: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: "default".to_string(),
            sleep: Duration::from_secs(3),
            max_jobs: None,
            max_time: None,
            max_tries: None,
            timeout: None,
        }
    }
}

// run_worker drives one worker process's main loop until it hits
// `--max-jobs`/`--max-time`, or the shutdown token fires.
pub async fn run_worker(
    driver: Arc<dyn QueueDriver>,
    registry: Arc<JobRegistry>,
    config: WorkerConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let started_at = Instant::now();
    let mut jobs_processed: u64 = 0;

    loop {
        if shutdown.is_cancelled() {
            info!("worker received shutdown signal, exiting cleanly");
            break;
        }
        if let Some(max_time) = config.max_time {
            if started_at.elapsed() >= max_time {
                info!("worker reached --max-time, exiting cleanly");
                break;
            }
        }
        if let Some(max_jobs) = config.max_jobs {
            if jobs_processed >= max_jobs {
                info!("worker reached --max-jobs, exiting cleanly");
                break;
            }
        }

        let record = match driver.pop(&config.queue).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(config.sleep) => continue,
                    _ = shutdown.cancelled() => break,
                }
            }
            Err(err) => {
                error!("queue driver error while popping from {}: {err}", config.queue);
                tokio::time::sleep(config.sleep).await;
                continue;
            }
        };

        let job = match registry.reconstruct(&record.envelope) {
            Ok(job) => job,
            Err(err) => {
                // A poison envelope: unknown class. There is no typed
                // Job to call .failed() on, so it goes straight to
                // failed storage with the reconstruction error as its
                // exception text (spec.md §9).
                error!("failed to reconstruct job {}: {err}", record.id);
                if let Err(fail_err) = driver.fail(&record, &err.to_string()).await {
                    error!("failed to move unreconstructable job {} to failed storage: {fail_err}", record.id);
                }
                jobs_processed += 1;
                continue;
            }
        };

        let timeout = config
            .timeout
            .unwrap_or_else(|| Duration::from_secs(record.envelope.timeout_seconds));
        let outcome = tokio::time::timeout(timeout, job.handle()).await;

        match outcome {
            Ok(Ok(())) => {
                if let Err(err) = driver.complete(&record).await {
                    error!("failed to mark job {} complete: {err}", record.id);
                }
            }
            Ok(Err(handler_err)) => {
                handle_failure(&driver, &job, &record, config.max_tries, handler_err.to_string()).await;
            }
            Err(_elapsed) => {
                handle_failure(
                    &driver,
                    &job,
                    &record,
                    config.max_tries,
                    format!("job timed out after {}s", timeout.as_secs()),
                )
                .await;
            }
        }

        jobs_processed += 1;
    }

    Ok(())
}

async fn handle_failure(
    driver: &Arc<dyn QueueDriver>,
    job: &Arc<dyn crate::job::Job>,
    record: &crate::queue::JobRecord,
    max_tries_override: Option<u32>,
    exception_text: String,
) {
    let max_tries = max_tries_override.unwrap_or(record.envelope.max_tries);
    if record.envelope.attempts < max_tries {
        if let Err(err) = driver
            .release(record, record.envelope.retry_after_seconds)
            .await
        {
            error!("failed to release job {} for retry: {err}", record.id);
        }
        warn!(
            job_id = %record.id,
            attempts = record.envelope.attempts,
            max_tries = max_tries,
            "job failed, will retry: {exception_text}"
        );
        return;
    }

    job.failed(&exception_text).await;
    if let Err(err) = driver.fail(record, &exception_text).await {
        error!("failed to move exhausted job {} to failed storage: {err}", record.id);
    }
    warn!(job_id = %record.id, "job exhausted retries, moved to failed storage");
}
