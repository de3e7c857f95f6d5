// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The subtrace aggregator processor.
//!
//! Sits between an upstream receiver and a downstream consumer: `consume`
//! buffers incoming spans per trace, a background sweeper flushes traces
//! whose buffer residency exceeds the configured timeout, and hitting the
//! per-trace span cap flushes inline. Flushing cuts the trace into
//! subtraces, enriches each root, and forwards one batch per subtrace.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, TracesData};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::aggregator::Aggregator;
use crate::assigner::{assign_subtraces, Subtrace};
use crate::buffer::TraceBuffer;
use crate::config::{Config, ErrorMode};
use crate::error::{BoxError, Error};
use crate::hashing::resource_fingerprint;
use crate::pdata::{bool_value, put_attr, str_value};

/// Attribute carrying the subtrace identifier, set on every flushed span.
pub const SUBTRACE_ID_ATTRIBUTE: &str = "subtrace.id";
/// Attribute marking the one root span of each subtrace.
pub const ROOT_SPAN_ATTRIBUTE: &str = "subtrace.is_root_span";

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Downstream seam: anything that accepts trace batches.
///
/// The processor itself implements this, so instances can be chained the way
/// pipeline stages usually are.
#[async_trait]
pub trait TraceConsumer {
    async fn consume(&self, batch: TracesData) -> Result<(), BoxError>;
}

struct Inner {
    config: Config,
    buffer: TraceBuffer,
    aggregator: Aggregator,
    next: Arc<dyn TraceConsumer + Send + Sync>,
}

struct Sweeper {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Stateful trace-stream processor cutting traces into per-service
/// subtraces.
pub struct SubtraceProcessor {
    inner: Arc<Inner>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl SubtraceProcessor {
    /// Builds a processor forwarding to `next`. Fails fast on an invalid
    /// configuration.
    pub fn new(config: Config, next: Arc<dyn TraceConsumer + Send + Sync>) -> Result<Self, Error> {
        config.validate()?;
        let buffer = TraceBuffer::new(config.max_spans_per_trace);
        let aggregator = Aggregator::new(
            config.attribute_aggregations.clone(),
            config.event_aggregations.clone(),
        );
        Ok(SubtraceProcessor {
            inner: Arc::new(Inner {
                config,
                buffer,
                aggregator,
                next,
            }),
            sweeper: Mutex::new(None),
        })
    }

    /// Starts the background sweeper that flushes traces past the buffering
    /// timeout.
    pub fn start(&self) {
        let mut sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if sweeper.is_some() {
            warn!("sweeper already running, ignoring start");
            return;
        }
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_sweeper(Arc::clone(&self.inner), stop_rx));
        *sweeper = Some(Sweeper { stop_tx, task });
        info!(
            timeout = ?self.inner.config.timeout,
            max_spans_per_trace = self.inner.config.max_spans_per_trace,
            "subtrace aggregator started"
        );
    }

    /// Buffers every span of `batch` under its trace id. A trace reaching
    /// the span cap is flushed inline, so spans of the same trace arriving
    /// later start a fresh buffer entry.
    ///
    /// Nothing in `batch` is retained past this call; the buffer holds its
    /// own copies.
    pub async fn consume(&self, batch: TracesData) -> Result<(), Error> {
        for resource_spans in &batch.resource_spans {
            let resource = resource_spans.resource.clone().unwrap_or_default();
            let fingerprint = resource_fingerprint(&resource);
            for scope_spans in &resource_spans.scope_spans {
                let scope = scope_spans.scope.clone().unwrap_or_default();
                for span in &scope_spans.spans {
                    let at_cap =
                        self.inner
                            .buffer
                            .add(&span.trace_id, &fingerprint, span, &resource, &scope);
                    if at_cap {
                        self.inner.flush_trace(&span.trace_id).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Stops the sweeper, then drains every buffered trace through the
    /// normal flush path. Forwarding errors during the drain are logged and
    /// never delay termination.
    pub async fn shutdown(&self) {
        let sweeper = {
            let mut guard = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
            guard.take()
        };
        if let Some(sweeper) = sweeper {
            let _ = sweeper.stop_tx.send(());
            if let Err(join_error) = sweeper.task.await {
                error!(error = %join_error, "sweeper task did not shut down cleanly");
            }
        }

        for trace_id in self.inner.buffer.all_trace_ids() {
            if let Err(err) = self.inner.flush_trace(&trace_id).await {
                error!(
                    trace_id = %hex::encode(&trace_id),
                    error = %err,
                    "failed to flush trace on shutdown"
                );
            }
        }
        info!("subtrace aggregator shutdown complete");
    }
}

#[async_trait]
impl TraceConsumer for SubtraceProcessor {
    async fn consume(&self, batch: TracesData) -> Result<(), BoxError> {
        SubtraceProcessor::consume(self, batch).await.map_err(Into::into)
    }
}

async fn run_sweeper(inner: Arc<Inner>, mut stop_rx: oneshot::Receiver<()>) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = &mut stop_rx => return,
            _ = ticker.tick() => {
                for trace_id in inner.buffer.expired_trace_ids(inner.config.timeout) {
                    if let Err(err) = inner.flush_trace(&trace_id).await {
                        error!(
                            trace_id = %hex::encode(&trace_id),
                            error = %err,
                            "failed to flush expired trace"
                        );
                    }
                }
            }
        }
    }
}

impl Inner {
    /// Takes a trace out of the buffer and pushes its subtraces downstream.
    /// A trace that is already gone is a no-op.
    async fn flush_trace(&self, trace_id: &[u8]) -> Result<(), Error> {
        let Some(state) = self.buffer.remove_trace(trace_id) else {
            return Ok(());
        };

        for mut subtrace in assign_subtraces(trace_id, state.spans) {
            label_subtrace(&mut subtrace);
            if subtrace.root.is_some() {
                self.aggregator.apply(&mut subtrace);
                debug!(
                    subtrace_id = %subtrace.id,
                    span_count = subtrace.spans.len(),
                    "applied aggregations to subtrace"
                );
            } else {
                warn!(
                    subtrace_id = %subtrace.id,
                    span_count = subtrace.spans.len(),
                    "subtrace has no root span, passing through unchanged"
                );
            }

            let batch = build_batch(subtrace);
            if let Err(err) = self.next.consume(batch).await {
                match self.config.error_mode {
                    ErrorMode::Propagate => return Err(Error::Downstream(err)),
                    ErrorMode::Ignore => error!(
                        trace_id = %hex::encode(trace_id),
                        error = %err,
                        "failed to forward subtrace"
                    ),
                    ErrorMode::Silent => {}
                }
            }
        }
        Ok(())
    }
}

/// Stamps `subtrace.id` on every member and marks the root. Upstream values
/// of these attributes are overwritten.
fn label_subtrace(subtrace: &mut Subtrace) {
    let id = subtrace.id.clone();
    for entry in &mut subtrace.spans {
        put_attr(
            &mut entry.span.attributes,
            SUBTRACE_ID_ATTRIBUTE,
            str_value(id.clone()),
        );
    }
    if let Some(root) = subtrace.root {
        put_attr(
            &mut subtrace.spans[root].span.attributes,
            ROOT_SPAN_ATTRIBUTE,
            bool_value(true),
        );
    }
}

/// Rebuilds an outgoing batch: one resource entry and one scope entry,
/// cloned from the subtrace's first member, spans in insertion order.
fn build_batch(subtrace: Subtrace) -> TracesData {
    let resource = subtrace.spans.first().map(|entry| entry.resource.clone());
    let scope = subtrace.spans.first().map(|entry| entry.scope.clone());
    let spans = subtrace.spans.into_iter().map(|entry| entry.span).collect();
    TracesData {
        resource_spans: vec![ResourceSpans {
            resource,
            scope_spans: vec![ScopeSpans {
                scope,
                spans,
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }],
    }
}
