// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Small helpers over the OTLP trace data model.
//!
//! Spans, resources and scopes flow through the processor as the prost
//! messages generated by `opentelemetry-proto`. Attribute maps are plain
//! `Vec<KeyValue>`, so lookup and overwrite semantics live here instead of
//! being re-implemented at every call site.

use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, KeyValue};
use opentelemetry_proto::tonic::trace::v1::span::SpanKind;

/// Returns the value stored under `key`, if any.
pub fn get_attr<'a>(attrs: &'a [KeyValue], key: &str) -> Option<&'a AnyValue> {
    attrs
        .iter()
        .find(|kv| kv.key == key)
        .and_then(|kv| kv.value.as_ref())
}

/// Sets `key` to `value`, overwriting an existing entry of the same key.
pub fn put_attr(attrs: &mut Vec<KeyValue>, key: &str, value: AnyValue) {
    if let Some(existing) = attrs.iter_mut().find(|kv| kv.key == key) {
        existing.value = Some(value);
        return;
    }
    attrs.push(KeyValue {
        key: key.to_string(),
        value: Some(value),
    });
}

pub fn str_value(s: impl Into<String>) -> AnyValue {
    AnyValue {
        value: Some(any_value::Value::StringValue(s.into())),
    }
}

pub fn int_value(i: i64) -> AnyValue {
    AnyValue {
        value: Some(any_value::Value::IntValue(i)),
    }
}

pub fn double_value(d: f64) -> AnyValue {
    AnyValue {
        value: Some(any_value::Value::DoubleValue(d)),
    }
}

pub fn bool_value(b: bool) -> AnyValue {
    AnyValue {
        value: Some(any_value::Value::BoolValue(b)),
    }
}

pub fn array_value(values: Vec<AnyValue>) -> AnyValue {
    AnyValue {
        value: Some(any_value::Value::ArrayValue(
            opentelemetry_proto::tonic::common::v1::ArrayValue { values },
        )),
    }
}

/// Canonical string rendering of a value, used for fingerprinting and for
/// `all_distinct` de-duplication. Bools render as `true`/`false`, numbers in
/// decimal, strings raw, arrays and kvlists recursively.
pub fn canonical_string(value: &AnyValue) -> String {
    match &value.value {
        None => String::new(),
        Some(any_value::Value::StringValue(s)) => s.clone(),
        Some(any_value::Value::BoolValue(b)) => b.to_string(),
        Some(any_value::Value::IntValue(i)) => i.to_string(),
        Some(any_value::Value::DoubleValue(d)) => d.to_string(),
        Some(any_value::Value::ArrayValue(array)) => {
            let rendered: Vec<String> = array.values.iter().map(canonical_string).collect();
            format!("[{}]", rendered.join(","))
        }
        Some(any_value::Value::KvlistValue(kvlist)) => {
            let rendered: Vec<String> = kvlist
                .values
                .iter()
                .map(|kv| {
                    let value = kv.value.as_ref().map(canonical_string).unwrap_or_default();
                    format!("{}={}", kv.key, value)
                })
                .collect();
            format!("{{{}}}", rendered.join(";"))
        }
        Some(any_value::Value::BytesValue(bytes)) => hex::encode(bytes),
    }
}

/// Numeric view of a value. Non-numeric values yield `None` and are skipped
/// by the numeric aggregations.
pub fn numeric(value: &AnyValue) -> Option<f64> {
    match value.value.as_ref()? {
        any_value::Value::IntValue(i) => Some(*i as f64),
        any_value::Value::DoubleValue(d) => Some(*d),
        _ => None,
    }
}

/// Decodes a raw wire span kind, normalizing `UNSPECIFIED` (and any unknown
/// enum value) to `INTERNAL`.
pub fn normalized_kind(raw: i32) -> SpanKind {
    match SpanKind::try_from(raw) {
        Ok(SpanKind::Unspecified) | Err(_) => SpanKind::Internal,
        Ok(kind) => kind,
    }
}

/// `SERVER` and `CONSUMER` spans represent an inbound request or message at
/// a service boundary.
pub fn is_entry_point(kind: SpanKind) -> bool {
    matches!(kind, SpanKind::Server | SpanKind::Consumer)
}

/// A span id (or parent id) is empty when it is missing or all zero.
pub fn is_empty_span_id(id: &[u8]) -> bool {
    id.iter().all(|&b| b == 0)
}
