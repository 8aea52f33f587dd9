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

//! Shared runner scaffolding for RouteMQ applications (spec.md §6,
//! "CLI"). An application binary (see `routemq-demo`) registers its
//! own routes and job classes, parses [`Cli`], and hands the result to
//! [`run_dispatcher`] or [`run_worker_command`] -- this crate owns the
//! command-line surface, tracing initialization, and queue-driver
//! selection that every RouteMQ process needs regardless of what the
//! application actually does.
//!
//! The two subcommands mirror `carbide_health`'s
//! `Config::load` + `run_service(config)` split: a thin `main` parses
//! arguments and initializes logging, then hands off to a library
//! function that owns the process's lifetime.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use routemq::config::QueueDriverKind;
use routemq::dispatcher::{RouteMq, RouteMqBuilder};
use routemq::errors::{Result, RouteMqError};
use routemq::job::JobRegistry;
use routemq::queue::QueueDriver;
use routemq::worker::{self, WorkerConfig};
use routemq::Config;
use routemq_queue_redis::RedisQueueDriver;
use routemq_queue_sql::SqlQueueDriver;

#[derive(Parser)]
#[command(name = "routemq")]
#[command(about = "Route MQTT topics to application handlers, backed by a middleware pipeline and background job queue.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the dispatcher: connect to the broker, subscribe every
    /// registered route, and run until shutdown.
    Run {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Start a queue worker: poll one queue, execute jobs, and apply
    /// retry/failure policy until shutdown or a `--max-*` bound.
    QueueWork {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        queue: Option<String>,
        #[arg(long)]
        connection: Option<String>,
        #[arg(long)]
        sleep: Option<u64>,
        #[arg(long)]
        max_jobs: Option<u64>,
        #[arg(long)]
        max_time: Option<u64>,
        #[arg(long)]
        max_tries: Option<u32>,
        #[arg(long)]
        timeout: Option<u64>,
    },
}

impl Command {
    pub fn config_path(&self) -> Option<&std::path::Path> {
        match self {
            Command::Run { config } => config.as_deref(),
            Command::QueueWork { config, .. } => config.as_deref(),
        }
    }
}

/// Installs a `tracing` subscriber matching the teacher's
/// `RUST_LOG`-driven `EnvFilter` setup, defaulting to `info`.
pub fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();
}

/// Connects the queue driver selected by `config.queue.driver`
/// (spec.md §6, "queue driver selection (`fast` or `durable`)"). Both
/// the dispatcher process (to publish jobs) and the worker process (to
/// pop them) call this so driver selection never drifts between the
/// two.
pub async fn build_queue_driver(config: &Config) -> Result<Arc<dyn QueueDriver>> {
    match config.queue.driver {
        QueueDriverKind::Fast => {
            let driver = RedisQueueDriver::connect(&config.queue.redis_url, "routemq:queue:").await?;
            Ok(Arc::new(driver))
        }
        QueueDriverKind::Durable => {
            let driver = SqlQueueDriver::connect(&config.queue.postgres_url).await?;
            Ok(Arc::new(driver))
        }
    }
}

/// Runs the dispatcher to completion: subscribes every route the
/// caller registered on `builder`, then blocks until Ctrl-C (or
/// another process-termination signal) arrives, at which point it
/// drains in-flight work and exits cleanly (spec.md §4.2, "stop()").
pub async fn run_dispatcher(builder: RouteMqBuilder) -> Result<()> {
    let app: RouteMq = builder.start().await?;
    tracing::info!("routemq dispatcher started");

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| RouteMqError::Other(err.to_string()))?;
    tracing::info!("shutdown signal received, draining in-flight work");

    app.stop().await?;
    tracing::info!("routemq dispatcher stopped");
    Ok(())
}

/// Runs a worker loop to completion, applying any `--queue`/`--sleep`/
/// `--max-*` overrides from the `queue-work` subcommand on top of the
/// process's [`Config`] defaults (spec.md §6, "queue-work").
pub async fn run_worker_command(
    config: &Config,
    driver: Arc<dyn QueueDriver>,
    registry: Arc<JobRegistry>,
    command: &Command,
) -> Result<()> {
    let Command::QueueWork {
        queue,
        sleep,
        max_jobs,
        max_time,
        max_tries,
        timeout,
        ..
    } = command
    else {
        return Err(RouteMqError::Other(
            "run_worker_command called with a non-queue-work command".to_string(),
        ));
    };

    let worker_config = WorkerConfig {
        queue: queue.clone().unwrap_or_else(|| config.queue.default_queue.clone()),
        sleep: sleep.map(Duration::from_secs).unwrap_or(config.worker.sleep),
        max_jobs: *max_jobs,
        max_time: max_time.map(Duration::from_secs),
        max_tries: *max_tries,
        timeout: timeout.map(Duration::from_secs),
    };

    let shutdown = tokio_util::sync::CancellationToken::new();
    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received, worker will exit after its current job");
            shutdown_for_signal.cancel();
        }
    });

    tracing::info!(queue = %worker_config.queue, "routemq worker started");
    worker::run_worker(driver, registry, worker_config, shutdown).await?;
    tracing::info!("routemq worker stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_queue_work_overrides() {
        let cli = Cli::parse_from([
            "routemq",
            "queue-work",
            "--queue",
            "emails",
            "--max-jobs",
            "10",
        ]);
        match cli.command {
            Command::QueueWork { queue, max_jobs, .. } => {
                assert_eq!(queue.as_deref(), Some("emails"));
                assert_eq!(max_jobs, Some(10));
            }
            _ => panic!("expected QueueWork"),
        }
    }

    #[test]
    fn cli_parses_run() {
        let cli = Cli::parse_from(["routemq", "run"]);
        assert!(matches!(cli.command, Command::Run { .. }));
    }
}
