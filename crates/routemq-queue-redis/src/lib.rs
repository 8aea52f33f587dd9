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

//! Queue Driver A (spec.md §4.6): a fast, volatile queue backend on
//! top of Redis lists, sorted sets, and small Lua scripts for the
//! operations that have to span more than one key atomically. Grounded
//! on `monokrome-foiacquire`'s `rate_limit::redis` module for the
//! `ConnectionManager` + `redis::Script` pattern routemq's own
//! rate-limit counter store already uses.
//!
//! Keys, under a configurable prefix (default `routemq:queue:`):
//! - `<queue>` -- FIFO list of claimable job ids.
//! - `<queue>:delayed` -- sorted set of job id -> `available_at` epoch.
//! - `<queue>:reserved` -- sorted set of job id -> `reserved_at` epoch,
//!   used for the optional visibility-timeout reaper.
//! - `<queue>:data:<id>` -- string holding the job record as JSON.
//! - `failed:<queue>` -- list of failed job ids.
//! - `failed:<queue>:data:<id>` -- string holding the failed record.

mod driver;
mod errors;

pub use driver::RedisQueueDriver;
pub use errors::RedisQueueError;
