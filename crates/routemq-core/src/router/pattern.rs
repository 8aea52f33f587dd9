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

// src/router/pattern.rs
// Parsing and validation of the RouteMQ topic pattern grammar: slash
// delimited segments that are either a literal, a single-level
// wildcard `+`, a multi-level terminal wildcard `#`, or a named
// parameter `{name}`.

use crate::errors::{Result, RouteMqError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
    Plus,
    Hash,
}

// Parse a pattern string into its segments, enforcing:
// - `#` may only appear as the final segment.
// - `{name}` occupies exactly one segment.
// - parameter names are unique within the pattern.
// - `{name}#` (a param segment smuggling a trailing wildcard) is rejected.
pub fn parse_pattern(pattern: &str) -> Result<Vec<Segment>> {
    if pattern.is_empty() {
        return Err(RouteMqError::invalid_pattern(pattern, "pattern is empty"));
    }

    let mut segments = Vec::new();
    let mut seen_names = std::collections::HashSet::new();
    let raw_segments: Vec<&str> = pattern.split('/').collect();

    for (idx, raw) in raw_segments.iter().enumerate() {
        if raw.is_empty() {
            return Err(RouteMqError::invalid_pattern(
                pattern,
                "pattern segments must not be empty (no leading/trailing/double slashes)",
            ));
        }

        let is_last = idx == raw_segments.len() - 1;

        if *raw == "#" {
            if !is_last {
                return Err(RouteMqError::invalid_pattern(
                    pattern,
                    "'#' may only appear as the final segment",
                ));
            }
            segments.push(Segment::Hash);
        } else if *raw == "+" {
            segments.push(Segment::Plus);
        } else if raw.starts_with('{') {
            if !raw.ends_with('}') || raw.len() < 3 {
                return Err(RouteMqError::invalid_pattern(
                    pattern,
                    format!("malformed parameter segment {raw:?}"),
                ));
            }
            let name = &raw[1..raw.len() - 1];
            if name.is_empty() || name.contains(['+', '#', '{', '}']) {
                return Err(RouteMqError::invalid_pattern(
                    pattern,
                    format!("malformed parameter segment {raw:?}"),
                ));
            }
            if !seen_names.insert(name.to_string()) {
                return Err(RouteMqError::invalid_pattern(
                    pattern,
                    format!("duplicate parameter name {name:?}"),
                ));
            }
            segments.push(Segment::Param(name.to_string()));
        } else if raw.contains(['+', '#']) {
            // Catches things like `{name}#` or `foo+` which aren't a
            // recognized wildcard but also aren't safe to treat as a
            // literal segment.
            return Err(RouteMqError::invalid_pattern(
                pattern,
                format!("'+' and '#' must occupy a whole segment, found {raw:?}"),
            ));
        } else {
            segments.push(Segment::Literal(raw.to_string()));
        }
    }

    Ok(segments)
}

// A topic is valid per the MQTT spec if it is non-empty and contains
// no empty segments (no leading/trailing/double slashes).
pub fn is_valid_topic(topic: &str) -> bool {
    !topic.is_empty() && topic.split('/').all(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_literal_and_wildcards() {
        let segments = parse_pattern("devices/{id}/sensors/{kind}").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Literal("devices".into()),
                Segment::Param("id".into()),
                Segment::Literal("sensors".into()),
                Segment::Param("kind".into()),
            ]
        );
    }

    #[test]
    fn hash_must_be_last() {
        assert!(parse_pattern("a/#/b").is_err());
        assert!(parse_pattern("a/#").is_ok());
    }

    #[test]
    fn duplicate_param_names_rejected() {
        assert!(parse_pattern("devices/{id}/sensors/{id}").is_err());
    }

    #[test]
    fn param_hash_combination_rejected() {
        assert!(parse_pattern("devices/{id}#").is_err());
    }

    #[test]
    fn empty_segments_rejected() {
        assert!(parse_pattern("a//b").is_err());
        assert!(parse_pattern("").is_err());
    }

    #[test]
    fn topic_validity() {
        assert!(is_valid_topic("a/b/c"));
        assert!(!is_valid_topic(""));
        assert!(!is_valid_topic("a//b"));
        assert!(!is_valid_topic("/a/b"));
    }
}
