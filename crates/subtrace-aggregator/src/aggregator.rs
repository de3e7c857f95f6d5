// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Enrichment of a subtrace root with data aggregated from its children.
//!
//! Attribute rules reduce values collected from the non-root members onto a
//! target attribute of the root; event rules copy or count matching events.
//! The root never contributes to its own aggregation. Individual samples
//! that don't fit a rule (missing attribute, wrong type) are skipped, never
//! errors.

use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue};
use opentelemetry_proto::tonic::trace::v1::span::Event;

use crate::assigner::Subtrace;
use crate::condition::{source_attribute_key, Conditions};
use crate::config::{
    AttributeAggregation, AttributeAggregationKind, EventAggregation, EventAggregationKind,
};
use crate::pdata::{array_value, canonical_string, double_value, get_attr, int_value, numeric,
    put_attr, str_value};

/// Attribute added to every event copied onto a root span, holding the hex
/// span id the event came from.
pub const SOURCE_SPAN_ID_ATTRIBUTE: &str = "source_span_id";

const DEFAULT_MAX_VALUES: usize = 100;
const DEFAULT_MAX_EVENTS: usize = 10;

/// Applies configured attribute and event aggregations to flushed subtraces.
pub struct Aggregator {
    attribute_rules: Vec<AttributeAggregation>,
    event_rules: Vec<EventAggregation>,
    conditions: Conditions,
}

impl Aggregator {
    pub fn new(
        attribute_rules: Vec<AttributeAggregation>,
        event_rules: Vec<EventAggregation>,
    ) -> Self {
        Aggregator {
            attribute_rules,
            event_rules,
            conditions: Conditions::new(),
        }
    }

    /// Runs every rule against `subtrace`, writing results onto its root.
    /// A subtrace without a root is left untouched.
    pub fn apply(&self, subtrace: &mut Subtrace) {
        let Some(root) = subtrace.root else {
            return;
        };
        for rule in &self.attribute_rules {
            self.apply_attribute_rule(subtrace, root, rule);
        }
        for rule in &self.event_rules {
            self.apply_event_rule(subtrace, root, rule);
        }
    }

    fn apply_attribute_rule(
        &self,
        subtrace: &mut Subtrace,
        root: usize,
        rule: &AttributeAggregation,
    ) {
        let mut matched: i64 = 0;
        let mut values: Vec<AnyValue> = Vec::new();

        for (i, entry) in subtrace.spans.iter().enumerate() {
            if i == root {
                continue;
            }
            if let Some(condition) = &rule.condition {
                if !self.conditions.evaluate(&entry.span.attributes, condition) {
                    continue;
                }
            }
            matched += 1;

            if let Some(source) = &rule.source {
                let value = source_attribute_key(source)
                    .and_then(|key| get_attr(&entry.span.attributes, key));
                if let Some(value) = value {
                    if value.value.is_some() {
                        values.push(value.clone());
                    }
                }
            }
        }

        let max_values = rule.max_values.unwrap_or(DEFAULT_MAX_VALUES);
        if let Some(result) = reduce(rule.aggregation, values, matched, max_values) {
            put_attr(
                &mut subtrace.spans[root].span.attributes,
                &rule.target,
                result,
            );
        }
    }

    fn apply_event_rule(&self, subtrace: &mut Subtrace, root: usize, rule: &EventAggregation) {
        let mut matched: Vec<(Event, Vec<u8>)> = Vec::new();

        for (i, entry) in subtrace.spans.iter().enumerate() {
            if i == root {
                continue;
            }
            for event in &entry.span.events {
                if event.name != rule.source {
                    continue;
                }
                if let Some(condition) = &rule.condition {
                    if !self.conditions.evaluate(&event.attributes, condition) {
                        continue;
                    }
                }
                matched.push((event.clone(), entry.span.span_id.clone()));
            }
        }

        if matched.is_empty() {
            return;
        }

        match rule.aggregation {
            EventAggregationKind::CopyEvent => {
                let max_events = rule.max_events.unwrap_or(DEFAULT_MAX_EVENTS);
                let root_span = &mut subtrace.spans[root].span;
                for (mut event, source_span_id) in matched.into_iter().take(max_events) {
                    put_attr(
                        &mut event.attributes,
                        SOURCE_SPAN_ID_ATTRIBUTE,
                        str_value(hex::encode(source_span_id)),
                    );
                    root_span.events.push(event);
                }
            }
            EventAggregationKind::Count => {
                if let Some(target) = &rule.target {
                    put_attr(
                        &mut subtrace.spans[root].span.attributes,
                        target,
                        int_value(matched.len() as i64),
                    );
                }
            }
        }
    }
}

/// Reduces collected values into the aggregate written to the root, or
/// `None` when there is nothing to write. `count` always produces a value;
/// everything else needs at least one usable input.
fn reduce(
    kind: AttributeAggregationKind,
    values: Vec<AnyValue>,
    matched: i64,
    max_values: usize,
) -> Option<AnyValue> {
    match kind {
        AttributeAggregationKind::Count => Some(int_value(matched)),

        AttributeAggregationKind::Any => values.into_iter().next(),

        AttributeAggregationKind::Sum => {
            let mut sum = 0.0;
            let mut all_integral = true;
            let mut contributed = false;
            for value in &values {
                match value.value.as_ref() {
                    Some(any_value::Value::IntValue(i)) => {
                        sum += *i as f64;
                        contributed = true;
                    }
                    Some(any_value::Value::DoubleValue(d)) => {
                        sum += d;
                        all_integral = false;
                        contributed = true;
                    }
                    _ => {}
                }
            }
            if !contributed {
                return None;
            }
            if all_integral {
                Some(int_value(sum as i64))
            } else {
                Some(double_value(sum))
            }
        }

        AttributeAggregationKind::Avg => {
            let numbers: Vec<f64> = values.iter().filter_map(numeric).collect();
            if numbers.is_empty() {
                return None;
            }
            Some(double_value(numbers.iter().sum::<f64>() / numbers.len() as f64))
        }

        AttributeAggregationKind::Min => {
            let numbers: Vec<f64> = values.iter().filter_map(numeric).collect();
            numbers
                .into_iter()
                .reduce(f64::min)
                .map(double_value)
        }

        AttributeAggregationKind::Max => {
            let numbers: Vec<f64> = values.iter().filter_map(numeric).collect();
            numbers
                .into_iter()
                .reduce(f64::max)
                .map(double_value)
        }

        AttributeAggregationKind::All => {
            if values.is_empty() {
                return None;
            }
            let truncated: Vec<AnyValue> = values.into_iter().take(max_values).collect();
            Some(array_value(truncated))
        }

        AttributeAggregationKind::AllDistinct => {
            if values.is_empty() {
                return None;
            }
            let mut seen = std::collections::HashSet::new();
            let mut distinct: Vec<AnyValue> = Vec::new();
            for value in values {
                if seen.insert(canonical_string(&value)) {
                    if distinct.len() >= max_values {
                        break;
                    }
                    distinct.push(value);
                }
            }
            Some(array_value(distinct))
        }
    }
}
