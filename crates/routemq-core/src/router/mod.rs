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

// src/router/mod.rs
// Public surface of the router module: pattern parsing, the trie, and
// a small builder (Group) that lets callers register a batch of routes
// under a shared topic prefix and a shared slice of middleware.

mod pattern;
mod trie;

pub use pattern::{Segment, is_valid_topic, parse_pattern};
pub use trie::{Params, Route, RouteOptions, RouteTree, SubscriptionEntry};

use std::sync::Arc;

use crate::errors::Result;
use crate::middleware::{Handler, Middleware};

// Group accumulates routes under a common prefix and middleware set
// before they're registered into a RouteTree. Mirrors the route-group
// ergonomics of typical HTTP routers: `group.middleware(auth).route(...)`.
pub struct Group {
    prefix: Option<String>,
    middleware: Vec<Arc<dyn Middleware>>,
    pending: Vec<(String, Handler, RouteOptions, Vec<Arc<dyn Middleware>>)>,
}

impl Default for Group {
    fn default() -> Self {
        Self::new()
    }
}

impl Group {
    pub fn new() -> Self {
        Self {
            prefix: None,
            middleware: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    // route registers a pattern relative to the group's prefix (if
    // any), with per-route middleware appended after the group's own
    // middleware, preserving the outer-to-inner ordering the pipeline
    // expects: global -> group -> route.
    pub fn route(
        mut self,
        pattern: impl Into<String>,
        handler: Handler,
        options: RouteOptions,
        route_middleware: Vec<Arc<dyn Middleware>>,
    ) -> Self {
        let full_pattern = match &self.prefix {
            Some(prefix) => format!("{prefix}/{}", pattern.into()),
            None => pattern.into(),
        };
        let mut combined = self.middleware.clone();
        combined.extend(route_middleware);
        self.pending.push((full_pattern, handler, options, combined));
        self
    }

    // apply_global prepends routemq-wide middleware (installed via
    // RouteMq::use_middleware) ahead of every route this group holds,
    // then registers everything into the tree.
    pub fn register_into(
        self,
        tree: &mut RouteTree,
        global_middleware: &[Arc<dyn Middleware>],
    ) -> Result<()> {
        for (pattern, handler, options, group_middleware) in self.pending {
            let mut middleware = global_middleware.to_vec();
            middleware.extend(group_middleware);
            tree.register(&pattern, handler, options, middleware)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::handler_fn;

    fn noop_handler() -> Handler {
        handler_fn(|_ctx| async move { Ok(serde_json::json!({})) })
    }

    #[test]
    fn group_prefixes_and_orders_middleware() {
        let group = Group::new()
            .prefix("devices/{id}")
            .route(
                "sensors/{kind}",
                noop_handler(),
                RouteOptions::default(),
                vec![],
            );
        let mut tree = RouteTree::new("workers");
        group.register_into(&mut tree, &[]).unwrap();

        let matches = tree.resolve("devices/abc/sensors/temp");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].0.pattern, "devices/{id}/sensors/{kind}");
    }
}
