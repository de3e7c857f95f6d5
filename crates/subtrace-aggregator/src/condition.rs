// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Evaluator for the tiny condition expression language used by aggregation
//! rules.
//!
//! The grammar covers `attributes["key"]` compared against `nil`, a string
//! literal, or a boolean with `==`/`!=`, joined by `and`/`or`. Expressions
//! that match no known pattern evaluate permissively to `true`, so a typo in
//! a rule degrades to "apply everywhere" instead of silently filtering
//! everything out; the first time an unrecognized expression is seen it is
//! logged once.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock, PoisonError};

use opentelemetry_proto::tonic::common::v1::{any_value, KeyValue};
use regex::Regex;
use tracing::warn;

use crate::pdata::get_attr;

fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(source).expect("pattern is valid"))
}

fn nil_neq() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    pattern(&RE, r#"attributes\["([^"]+)"\]\s*!=\s*nil"#)
}

fn nil_eq() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    pattern(&RE, r#"attributes\["([^"]+)"\]\s*==\s*nil"#)
}

fn str_eq() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    pattern(&RE, r#"attributes\["([^"]+)"\]\s*==\s*"([^"]*)""#)
}

fn str_neq() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    pattern(&RE, r#"attributes\["([^"]+)"\]\s*!=\s*"([^"]*)""#)
}

fn bool_eq() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    pattern(&RE, r#"attributes\["([^"]+)"\]\s*==\s*(true|false)"#)
}

fn attr_path() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    pattern(&RE, r#"attributes\["([^"]+)"\]"#)
}

/// Extracts the attribute key from a `attributes["key"]` source path.
pub(crate) fn source_attribute_key(source: &str) -> Option<&str> {
    attr_path()
        .captures(source)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
}

/// Evaluates condition expressions against attribute maps, remembering which
/// unrecognized expressions have already been reported.
pub(crate) struct Conditions {
    warned: Mutex<HashSet<String>>,
}

impl Conditions {
    pub fn new() -> Self {
        Conditions {
            warned: Mutex::new(HashSet::new()),
        }
    }

    /// Evaluates `condition` against `attrs`. `and` binds before `or`, both
    /// short-circuit left to right.
    pub fn evaluate(&self, attrs: &[KeyValue], condition: &str) -> bool {
        if condition.contains(" and ") {
            return condition
                .split(" and ")
                .all(|part| self.atom(attrs, part.trim()));
        }
        if condition.contains(" or ") {
            return condition
                .split(" or ")
                .any(|part| self.atom(attrs, part.trim()));
        }
        self.atom(attrs, condition)
    }

    fn atom(&self, attrs: &[KeyValue], condition: &str) -> bool {
        if let Some(captures) = nil_neq().captures(condition) {
            return get_attr(attrs, &captures[1]).is_some();
        }
        if let Some(captures) = nil_eq().captures(condition) {
            return get_attr(attrs, &captures[1]).is_none();
        }
        if let Some(captures) = str_eq().captures(condition) {
            return match get_attr(attrs, &captures[1]).and_then(|v| v.value.as_ref()) {
                Some(any_value::Value::StringValue(s)) => s == &captures[2],
                _ => false,
            };
        }
        if let Some(captures) = str_neq().captures(condition) {
            return match get_attr(attrs, &captures[1]).and_then(|v| v.value.as_ref()) {
                Some(any_value::Value::StringValue(s)) => s != &captures[2],
                _ => true,
            };
        }
        if let Some(captures) = bool_eq().captures(condition) {
            let expected = &captures[2] == "true";
            return match get_attr(attrs, &captures[1]).and_then(|v| v.value.as_ref()) {
                Some(any_value::Value::BoolValue(b)) => *b == expected,
                _ => false,
            };
        }

        self.warn_unrecognized(condition);
        true
    }

    fn warn_unrecognized(&self, condition: &str) {
        let mut warned = self.warned.lock().unwrap_or_else(PoisonError::into_inner);
        if warned.insert(condition.to_string()) {
            warn!(condition, "unrecognized condition expression, treating as always true");
        }
    }
}
