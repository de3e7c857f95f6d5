// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Builders for test spans and trace batches.

use opentelemetry_proto::tonic::common::v1::{any_value, InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::span::SpanKind;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span, TracesData};

use subtrace_aggregator::pdata::{get_attr, str_value};

pub fn string_attr(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(str_value(value)),
    }
}

pub fn service_resource(service_name: &str) -> Resource {
    Resource {
        attributes: vec![string_attr("service.name", service_name)],
        ..Default::default()
    }
}

pub fn test_scope() -> InstrumentationScope {
    InstrumentationScope {
        name: "integration-test".to_string(),
        version: "1.0.0".to_string(),
        ..Default::default()
    }
}

pub fn span_id(n: u64) -> Vec<u8> {
    if n == 0 {
        Vec::new()
    } else {
        n.to_be_bytes().to_vec()
    }
}

pub fn make_span(trace_id: [u8; 16], id: u64, parent: u64, kind: SpanKind, name: &str) -> Span {
    Span {
        trace_id: trace_id.to_vec(),
        span_id: span_id(id),
        parent_span_id: span_id(parent),
        name: name.to_string(),
        kind: kind as i32,
        start_time_unix_nano: id * 1_000,
        ..Default::default()
    }
}

/// One batch with a single resource and a single scope.
pub fn make_batch(resource: Resource, spans: Vec<Span>) -> TracesData {
    TracesData {
        resource_spans: vec![resource_spans(resource, spans)],
    }
}

pub fn resource_spans(resource: Resource, spans: Vec<Span>) -> ResourceSpans {
    ResourceSpans {
        resource: Some(resource),
        scope_spans: vec![ScopeSpans {
            scope: Some(test_scope()),
            spans,
            schema_url: String::new(),
        }],
        schema_url: String::new(),
    }
}

/// All spans of a forwarded batch, flattened.
pub fn spans_of(batch: &TracesData) -> Vec<&Span> {
    batch
        .resource_spans
        .iter()
        .flat_map(|rs| rs.scope_spans.iter())
        .flat_map(|ss| ss.spans.iter())
        .collect()
}

pub fn span_names(batch: &TracesData) -> Vec<&str> {
    spans_of(batch).iter().map(|s| s.name.as_str()).collect()
}

pub fn attr_string(span: &Span, key: &str) -> Option<String> {
    match get_attr(&span.attributes, key).and_then(|v| v.value.as_ref()) {
        Some(any_value::Value::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

pub fn attr_int(span: &Span, key: &str) -> Option<i64> {
    match get_attr(&span.attributes, key).and_then(|v| v.value.as_ref()) {
        Some(any_value::Value::IntValue(i)) => Some(*i),
        _ => None,
    }
}

pub fn attr_bool(span: &Span, key: &str) -> Option<bool> {
    match get_attr(&span.attributes, key).and_then(|v| v.value.as_ref()) {
        Some(any_value::Value::BoolValue(b)) => Some(*b),
        _ => None,
    }
}
