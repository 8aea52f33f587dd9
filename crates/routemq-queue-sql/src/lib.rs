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

//! Durable queue driver backed by Postgres.
//!
//! Two tables hold all queue state:
//!
//! - `queue_jobs` -- one row per pending or reserved job. `reserved_at`
//!   is NULL while a job is claimable; `pop` sets it under
//!   `FOR UPDATE SKIP LOCKED` so concurrent workers never double-claim
//!   a row, and `release` clears it back to NULL for a retry.
//! - `queue_failed_jobs` -- append-only archive a job's envelope and
//!   its last exception move to once retries are exhausted.
//!
//! Both tables are created on first connect if they don't already
//! exist. Unlike the Redis driver, every multi-step operation here is
//! a real SQL transaction rather than a Lua script, trading the
//! Redis driver's speed for crash-safe durability (spec.md §4.7).

mod driver;
mod errors;

pub use driver::SqlQueueDriver;
pub use errors::SqlQueueError;
