// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory buffering of spans per trace until flush.
//!
//! The buffer owns every span it holds: insertion deep-copies the span
//! together with its resource and scope so no reference into the upstream
//! batch survives, leaving the upstream free to recycle its allocations.
//! A single reader-writer lock guards the trace map; nothing suspends while
//! holding it.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use opentelemetry_proto::tonic::common::v1::InstrumentationScope;
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::Span;

/// A buffered span together with copies of its owning resource, its scope
/// identity and the precomputed resource fingerprint. Immutable from insert
/// until flush.
#[derive(Clone, Debug)]
pub struct SpanEntry {
    pub span: Span,
    pub resource: Resource,
    pub scope: InstrumentationScope,
    pub resource_hash: String,
}

/// All spans buffered so far for a single trace, in arrival order.
#[derive(Debug)]
pub struct TraceState {
    pub spans: Vec<SpanEntry>,
    pub first_seen: Instant,
}

/// Concurrency-safe store mapping trace id to buffered trace state.
pub struct TraceBuffer {
    traces: RwLock<HashMap<Vec<u8>, TraceState>>,
    max_spans: usize,
}

impl TraceBuffer {
    pub fn new(max_spans: usize) -> Self {
        TraceBuffer {
            traces: RwLock::new(HashMap::new()),
            max_spans,
        }
    }

    /// Buffers a copy of `span` under its trace id. Returns `true` when the
    /// trace has reached the span cap and should be flushed now.
    pub fn add(
        &self,
        trace_id: &[u8],
        resource_hash: &str,
        span: &Span,
        resource: &Resource,
        scope: &InstrumentationScope,
    ) -> bool {
        // Copy outside the critical section so lock hold time stays bounded
        // by a map insert.
        let entry = SpanEntry {
            span: span.clone(),
            resource: resource.clone(),
            scope: scope.clone(),
            resource_hash: resource_hash.to_string(),
        };

        let mut traces = self.traces.write().unwrap_or_else(PoisonError::into_inner);
        let state = traces.entry(trace_id.to_vec()).or_insert_with(|| TraceState {
            spans: Vec::new(),
            first_seen: Instant::now(),
        });
        state.spans.push(entry);
        state.spans.len() >= self.max_spans
    }

    /// Atomically takes and deletes the state for a trace. A trace that is
    /// already gone (raced with another flush) yields `None`, which callers
    /// treat as success.
    pub fn remove_trace(&self, trace_id: &[u8]) -> Option<TraceState> {
        let mut traces = self.traces.write().unwrap_or_else(PoisonError::into_inner);
        traces.remove(trace_id)
    }

    /// Snapshot of the ids of traces whose first span arrived more than
    /// `timeout` ago.
    pub fn expired_trace_ids(&self, timeout: Duration) -> Vec<Vec<u8>> {
        let traces = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        traces
            .iter()
            .filter(|(_, state)| !state.spans.is_empty() && state.first_seen.elapsed() >= timeout)
            .map(|(trace_id, _)| trace_id.clone())
            .collect()
    }

    /// All buffered trace ids, for the shutdown drain.
    pub fn all_trace_ids(&self) -> Vec<Vec<u8>> {
        let traces = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        traces.keys().cloned().collect()
    }

    #[cfg(test)]
    fn span_count(&self, trace_id: &[u8]) -> usize {
        let traces = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        traces.get(trace_id).map_or(0, |state| state.spans.len())
    }
}
