// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Subtrace aggregator: a trace-stream processor that partitions each
//! distributed trace into per-service subtraces, elects a root span per
//! subtrace, and enriches that root with data aggregated from its children.
//!
//! Spans are buffered per trace as they arrive from any number of concurrent
//! producers. A trace is flushed when its buffer residency exceeds the
//! configured timeout or when it hits the per-trace span cap; flushing cuts
//! the span forest at service boundaries, labels every span with
//! `subtrace.id` (and the root with `subtrace.is_root_span`), runs the
//! configured aggregation rules, and forwards one batch per subtrace to the
//! downstream [`TraceConsumer`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use subtrace_aggregator::{Config, SubtraceProcessor, TraceConsumer};
//!
//! # async fn example(downstream: Arc<dyn TraceConsumer + Send + Sync>) {
//! let processor = SubtraceProcessor::new(Config::default(), downstream).unwrap();
//! processor.start();
//! // feed batches with processor.consume(...), then:
//! processor.shutdown().await;
//! # }
//! ```

pub mod aggregator;
pub mod assigner;
pub mod buffer;
mod condition;
pub mod config;
pub mod error;
pub mod hashing;
pub mod pdata;
pub mod processor;

pub use aggregator::SOURCE_SPAN_ID_ATTRIBUTE;
pub use config::{
    AttributeAggregation, AttributeAggregationKind, Config, ErrorMode, EventAggregation,
    EventAggregationKind,
};
pub use error::{BoxError, Error};
pub use processor::{
    SubtraceProcessor, TraceConsumer, ROOT_SPAN_ATTRIBUTE, SUBTRACE_ID_ATTRIBUTE,
};
