// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Processor configuration: buffering limits, error handling mode, and the
//! aggregation rule lists.
//!
//! The structs deserialize from the usual declarative sources (the pipeline
//! loader hands us a parsed map); validation is fatal at load time so a
//! misconfigured processor never starts.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::Error;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_SPANS_PER_TRACE: usize = 1000;

/// How downstream forwarding errors are handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMode {
    /// Log the error and keep going.
    #[default]
    Ignore,
    /// Keep going without logging.
    Silent,
    /// Bubble the first forwarding error back to the caller of `consume`.
    Propagate,
}

/// Reductions available to attribute aggregation rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeAggregationKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Any,
    All,
    AllDistinct,
}

/// Reductions available to event aggregation rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAggregationKind {
    CopyEvent,
    Count,
}

/// Aggregates an attribute across the children of a subtrace onto its root.
#[derive(Clone, Debug, Deserialize)]
pub struct AttributeAggregation {
    pub aggregation: AttributeAggregationKind,
    /// Path to the source attribute, e.g. `attributes["db.system"]`.
    /// Optional for `count`.
    #[serde(default)]
    pub source: Option<String>,
    /// Condition expression filtering which children contribute.
    #[serde(default)]
    pub condition: Option<String>,
    /// Attribute written on the root span.
    #[serde(default)]
    pub target: String,
    /// Array size cap for `all`/`all_distinct` (default 100).
    #[serde(default)]
    pub max_values: Option<usize>,
}

/// Copies or counts matching events from the children of a subtrace onto its
/// root.
#[derive(Clone, Debug, Deserialize)]
pub struct EventAggregation {
    pub aggregation: EventAggregationKind,
    /// Event name to match.
    #[serde(default)]
    pub source: String,
    /// Condition expression evaluated against the event's attributes.
    #[serde(default)]
    pub condition: Option<String>,
    /// Attribute written on the root span; required for `count`.
    #[serde(default)]
    pub target: Option<String>,
    /// Cap on copied events for `copy_event` (default 10).
    #[serde(default)]
    pub max_events: Option<usize>,
}

/// Processor configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How long a trace may sit in the buffer after its first span arrives
    /// before it is flushed.
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    /// Span cap per buffered trace; reaching it flushes the trace early.
    pub max_spans_per_trace: usize,
    pub error_mode: ErrorMode,
    pub attribute_aggregations: Vec<AttributeAggregation>,
    pub event_aggregations: Vec<EventAggregation>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            timeout: DEFAULT_TIMEOUT,
            max_spans_per_trace: DEFAULT_MAX_SPANS_PER_TRACE,
            error_mode: ErrorMode::default(),
            attribute_aggregations: Vec::new(),
            event_aggregations: Vec::new(),
        }
    }
}

impl Config {
    /// Checks the configuration, returning the first problem found.
    pub fn validate(&self) -> Result<(), Error> {
        if self.timeout.is_zero() {
            return Err(Error::InvalidConfig("timeout must be positive".to_string()));
        }
        if self.max_spans_per_trace == 0 {
            return Err(Error::InvalidConfig(
                "max_spans_per_trace must be positive".to_string(),
            ));
        }

        for (i, rule) in self.attribute_aggregations.iter().enumerate() {
            if rule.target.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "attribute_aggregations[{i}]: target is required"
                )));
            }
            if rule.aggregation != AttributeAggregationKind::Count
                && rule.source.as_deref().unwrap_or("").is_empty()
            {
                return Err(Error::InvalidConfig(format!(
                    "attribute_aggregations[{i}]: source is required for non-count aggregations"
                )));
            }
        }

        for (i, rule) in self.event_aggregations.iter().enumerate() {
            if rule.source.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "event_aggregations[{i}]: source (event name) is required"
                )));
            }
            if rule.aggregation == EventAggregationKind::Count
                && rule.target.as_deref().unwrap_or("").is_empty()
            {
                return Err(Error::InvalidConfig(format!(
                    "event_aggregations[{i}]: target is required for count aggregation"
                )));
            }
        }

        Ok(())
    }
}

/// Accepts integer seconds, float seconds, or a suffixed string such as
/// `"30s"`, `"500ms"`, `"5m"`, `"1h"`.
fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    struct DurationVisitor;

    impl serde::de::Visitor<'_> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "a duration in seconds or a string like \"30s\"")
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
            u64::try_from(v)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("negative durations are not allowed"))
        }

        fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Self::Value, E> {
            if v < 0.0 {
                return Err(E::custom("negative durations are not allowed"));
            }
            Ok(Duration::from_secs_f64(v))
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
            parse_duration(v).ok_or_else(|| E::custom(format!("invalid duration: {v:?}")))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    // "ms" before "s": the longer suffix must win.
    if let Some(v) = s.strip_suffix("ms") {
        return v.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    for (suffix, scale) in [("s", 1.0), ("m", 60.0), ("h", 3600.0)] {
        if let Some(v) = s.strip_suffix(suffix) {
            let value = v.trim().parse::<f64>().ok()?;
            if value < 0.0 {
                return None;
            }
            return Some(Duration::from_secs_f64(value * scale));
        }
    }
    s.parse::<u64>().ok().map(Duration::from_secs)
}
