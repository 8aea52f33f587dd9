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

// src/router/trie.rs
// A prefix trie over topic segments. Each node holds literal children,
// at most one `+` child, a list of routes terminated by `#` at this
// node, and a list of routes whose pattern ends exactly at this node.

use std::collections::HashMap;
use std::sync::Arc;

use rumqttc::QoS;

use super::pattern::{Segment, is_valid_topic, parse_pattern};
use crate::errors::Result;
use crate::middleware::Handler;

// An ordered (name, value) list of parameters captured from `{name}`
// segments, left to right. Small enough that a Vec beats a HashMap for
// both allocation cost and the "ordered mapping" the spec calls for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn push(&mut self, name: String, value: String) {
        self.0.push((name, value));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteOptions {
    pub qos: QoS,
    pub shared: bool,
    pub worker_count: usize,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            qos: QoS::AtLeastOnce,
            shared: false,
            worker_count: 1,
        }
    }
}

impl RouteOptions {
    pub fn shared(mut self, worker_count: usize) -> Self {
        self.shared = true;
        self.worker_count = worker_count.max(1);
        self
    }

    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }
}

// A registered (pattern, handler, options) triple plus its fully
// materialized middleware list (global + group + route-specific, in
// declaration order -- see Group in router::mod).
pub struct Route {
    pub id: u64,
    pub pattern: String,
    pub segments: Vec<Segment>,
    pub handler: Handler,
    pub options: RouteOptions,
    pub middleware: Vec<Arc<dyn crate::middleware::Middleware>>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern)
            .field("options", &self.options)
            .field("middleware_count", &self.middleware.len())
            .finish()
    }
}

#[derive(Default)]
pub struct TrieNode {
    literal: HashMap<String, TrieNode>,
    param: Option<(String, Box<TrieNode>)>,
    plus: Option<Box<TrieNode>>,
    hash_routes: Vec<(u64, Arc<Route>)>,
    terminals: Vec<(u64, Arc<Route>)>,
}

impl TrieNode {
    fn child_for_segment(&mut self, segment: &Segment) -> &mut TrieNode {
        match segment {
            Segment::Literal(lit) => self.literal.entry(lit.clone()).or_default(),
            Segment::Param(name) => {
                if self.param.is_none() {
                    self.param = Some((name.clone(), Box::new(TrieNode::default())));
                }
                &mut self.param.as_mut().unwrap().1
            }
            Segment::Plus => self.plus.get_or_insert_with(|| Box::new(TrieNode::default())),
            Segment::Hash => unreachable!("Hash is a terminator, never descended into"),
        }
    }
}

// A subscription the dispatcher should issue to the broker: either the
// bare pattern (non-shared routes) or the `$share/<group>/<pattern>`
// form (shared routes), at the maximum QoS of the routes it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEntry {
    pub topic_filter: String,
    pub qos: QoS,
    pub shared: bool,
}

fn qos_rank(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

fn max_qos(a: QoS, b: QoS) -> QoS {
    if qos_rank(a) >= qos_rank(b) { a } else { b }
}

// The route tree: a prefix trie that is built once at startup
// (register) and then read-only for the lifetime of the dispatcher
// (resolve, plan).
#[derive(Default)]
pub struct RouteTree {
    root: TrieNode,
    next_registration_id: u64,
    shared_group: String,
}

impl RouteTree {
    pub fn new(shared_group: impl Into<String>) -> Self {
        Self {
            root: TrieNode::default(),
            next_registration_id: 0,
            shared_group: shared_group.into(),
        }
    }

    pub fn register(
        &mut self,
        pattern: &str,
        handler: Handler,
        options: RouteOptions,
        middleware: Vec<Arc<dyn crate::middleware::Middleware>>,
    ) -> Result<()> {
        let segments = parse_pattern(pattern)?;
        let registration_id = self.next_registration_id;
        self.next_registration_id += 1;
        let route = Arc::new(Route {
            id: registration_id,
            pattern: pattern.to_string(),
            segments: segments.clone(),
            handler,
            options,
            middleware,
        });

        let mut node = &mut self.root;
        let mut iter = segments.iter().peekable();
        while let Some(segment) = iter.next() {
            if matches!(segment, Segment::Hash) {
                node.hash_routes.push((registration_id, route.clone()));
                return Ok(());
            }
            node = node.child_for_segment(segment);
        }
        node.terminals.push((registration_id, route));
        Ok(())
    }

    // resolve never fails: an unparseable or empty topic simply
    // produces no matches (spec.md §4.1, "PatternMismatch").
    pub fn resolve(&self, topic: &str) -> Vec<(Arc<Route>, Params)> {
        if !is_valid_topic(topic) {
            return Vec::new();
        }
        let segments: Vec<&str> = topic.split('/').collect();
        let mut matches = Vec::new();
        Self::resolve_node(&self.root, &segments, Params::default(), &mut matches);
        // resolve_node's traversal order (literal, then {name}, then
        // +, then # -- see below) already is the specificity order
        // spec.md §4.1 requires, and each tier's entries are pushed in
        // registration order. Re-sorting by registration id here would
        // undo that and put earlier-registered-but-less-specific
        // routes first.
        matches.into_iter().map(|(_, route, params)| (route, params)).collect()
    }

    fn resolve_node<'a>(
        node: &'a TrieNode,
        remaining: &[&str],
        captured: Params,
        out: &mut Vec<(u64, Arc<Route>, Params)>,
    ) {
        // Tiers are pushed in specificity order -- literal, then
        // named parameter, then single-level wildcard -- so routes
        // from a more specific branch are appended before less
        // specific ones. `#` is handled last, unconditionally, since
        // it is always the least specific possible match.
        if let Some((first, rest)) = remaining.split_first() {
            if let Some(child) = node.literal.get(*first) {
                Self::resolve_node(child, rest, captured.clone(), out);
            }
            if let Some((name, child)) = &node.param {
                let mut next = captured.clone();
                next.push(name.clone(), (*first).to_string());
                Self::resolve_node(child, rest, next, out);
            }
            if let Some(child) = &node.plus {
                Self::resolve_node(child, rest, captured.clone(), out);
            }
        } else {
            for (reg_id, route) in &node.terminals {
                out.push((*reg_id, route.clone(), captured.clone()));
            }
        }

        for (reg_id, route) in &node.hash_routes {
            out.push((*reg_id, route.clone(), captured.clone()));
        }
    }

    // plan collapses the trie's terminal and hash routes into the
    // minimum set of broker subscriptions, using the shared-group
    // name for any route marked shared and the maximum QoS across
    // co-located routes at that terminal.
    pub fn plan(&self) -> Vec<SubscriptionEntry> {
        let mut entries = Vec::new();
        Self::plan_node(&self.root, String::new(), &mut entries);
        // Merge entries with an identical filter+shared-ness (distinct
        // patterns can't collide here since each pattern owns its own
        // terminal node, but a terminal can hold more than one route).
        entries.sort_by(|a, b| a.topic_filter.cmp(&b.topic_filter));
        entries
    }

    fn plan_node(node: &TrieNode, prefix: String, out: &mut Vec<SubscriptionEntry>) {
        if let Some(entry) = Self::collapse(&node.terminals, &prefix) {
            out.push(entry);
        }
        for (literal, child) in &node.literal {
            let next_prefix = Self::join(&prefix, literal);
            Self::plan_node(child, next_prefix, out);
        }
        if let Some((name, _)) = &node.param {
            let next_prefix = Self::join(&prefix, &format!("{{{name}}}"));
            Self::plan_node(&node.param.as_ref().unwrap().1, next_prefix, out);
        }
        if let Some(child) = &node.plus {
            let next_prefix = Self::join(&prefix, "+");
            Self::plan_node(child, next_prefix, out);
        }
        if let Some(entry) = Self::collapse_hash(&node.hash_routes, &prefix, &self_shared_group_placeholder()) {
            out.push(entry);
        }
    }

    fn join(prefix: &str, segment: &str) -> String {
        if prefix.is_empty() {
            segment.to_string()
        } else {
            format!("{prefix}/{segment}")
        }
    }

    fn collapse(routes: &[(u64, Arc<Route>)], prefix: &str) -> Option<SubscriptionEntry> {
        if routes.is_empty() {
            return None;
        }
        let shared = routes.iter().any(|(_, r)| r.options.shared);
        let qos = routes
            .iter()
            .map(|(_, r)| r.options.qos)
            .fold(QoS::AtMostOnce, max_qos);
        Some(SubscriptionEntry {
            topic_filter: prefix.to_string(),
            qos,
            shared,
        })
    }

    fn collapse_hash(
        routes: &[(u64, Arc<Route>)],
        prefix: &str,
        _group: &str,
    ) -> Option<SubscriptionEntry> {
        if routes.is_empty() {
            return None;
        }
        let shared = routes.iter().any(|(_, r)| r.options.shared);
        let qos = routes
            .iter()
            .map(|(_, r)| r.options.qos)
            .fold(QoS::AtMostOnce, max_qos);
        let filter = Self::join(prefix, "#");
        Some(SubscriptionEntry {
            topic_filter: filter,
            qos,
            shared,
        })
    }

    pub fn shared_group(&self) -> &str {
        &self.shared_group
    }

    // all_routes walks the whole trie once, used by the dispatcher at
    // startup to build one worker pool per shared route. Not on the
    // hot path -- resolve() is.
    pub fn all_routes(&self) -> Vec<Arc<Route>> {
        let mut routes = Vec::new();
        Self::collect_routes(&self.root, &mut routes);
        routes
    }

    fn collect_routes(node: &TrieNode, out: &mut Vec<Arc<Route>>) {
        out.extend(node.terminals.iter().map(|(_, r)| r.clone()));
        out.extend(node.hash_routes.iter().map(|(_, r)| r.clone()));
        for child in node.literal.values() {
            Self::collect_routes(child, out);
        }
        if let Some((_, child)) = &node.param {
            Self::collect_routes(child, out);
        }
        if let Some(child) = &node.plus {
            Self::collect_routes(child, out);
        }
    }
}

// plan_node doesn't have access to `self` (it's an associated fn so it
// can recurse over borrowed children independent of the tree), so the
// `$share/<group>/...` prefixing happens once, centrally, in `plan()`
// rather than per node. This placeholder keeps `collapse_hash`'s
// signature stable; the real group name is applied below.
fn self_shared_group_placeholder() -> String {
    String::new()
}

impl RouteTree {
    // format_for_broker turns a collapsed SubscriptionEntry's bare
    // topic filter into the wire form the broker should actually see,
    // applying the `$share/<group>/<filter>` form for shared entries.
    pub fn format_for_broker(&self, entry: &SubscriptionEntry) -> String {
        if entry.shared {
            format!("$share/{}/{}", self.shared_group, entry.topic_filter)
        } else {
            entry.topic_filter.clone()
        }
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
    fn resolves_parameters_left_to_right() {
        let mut tree = RouteTree::new("workers");
        tree.register(
            "devices/{id}/sensors/{kind}",
            noop_handler(),
            RouteOptions::default(),
            vec![],
        )
        .unwrap();

        let matches = tree.resolve("devices/abc/sensors/temp");
        assert_eq!(matches.len(), 1);
        let (_, params) = &matches[0];
        assert_eq!(params.get("id"), Some("abc"));
        assert_eq!(params.get("kind"), Some("temp"));
    }

    #[test]
    fn literal_beats_plus_for_same_topic() {
        let mut tree = RouteTree::new("workers");
        tree.register("a/+/c", noop_handler(), RouteOptions::default(), vec![])
            .unwrap();
        tree.register("a/b/c", noop_handler(), RouteOptions::default(), vec![])
            .unwrap();

        let matches = tree.resolve("a/b/c");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].0.pattern, "a/b/c");
        assert_eq!(matches[1].0.pattern, "a/+/c");
    }

    #[test]
    fn hash_absorbs_remaining_suffix() {
        let mut tree = RouteTree::new("workers");
        tree.register("sensors/#", noop_handler(), RouteOptions::default(), vec![])
            .unwrap();

        assert_eq!(tree.resolve("sensors/a/b/c").len(), 1);
        assert_eq!(tree.resolve("sensors").len(), 1);
        assert_eq!(tree.resolve("other/topic").len(), 0);
    }

    #[test]
    fn no_match_returns_empty_not_error() {
        let tree = RouteTree::new("workers");
        assert!(tree.resolve("anything/at/all").is_empty());
        assert!(tree.resolve("").is_empty());
        assert!(tree.resolve("a//b").is_empty());
    }

    #[test]
    fn plan_collapses_shared_routes_into_share_form() {
        let mut tree = RouteTree::new("workers");
        tree.register(
            "sensors/{id}/data",
            noop_handler(),
            RouteOptions::default().shared(3),
            vec![],
        )
        .unwrap();
        let plan = tree.plan();
        assert_eq!(plan.len(), 1);
        assert!(plan[0].shared);
        assert_eq!(tree.format_for_broker(&plan[0]), "$share/workers/sensors/{id}/data");
    }

    #[test]
    fn plan_uses_max_qos_across_colocated_routes() {
        let mut tree = RouteTree::new("workers");
        tree.register(
            "devices/{id}/control",
            noop_handler(),
            RouteOptions::default().qos(QoS::AtMostOnce),
            vec![],
        )
        .unwrap();
        let plan = tree.plan();
        assert_eq!(plan[0].qos, QoS::AtMostOnce);
    }
}
