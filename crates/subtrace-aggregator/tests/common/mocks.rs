// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock downstream consumers for integration testing.

use std::sync::{Arc, Mutex};

use opentelemetry_proto::tonic::trace::v1::TracesData;

use subtrace_aggregator::{BoxError, TraceConsumer};

/// Captures every forwarded batch for later assertions.
pub struct RecordingConsumer {
    batches: Mutex<Vec<TracesData>>,
}

impl RecordingConsumer {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingConsumer {
            batches: Mutex::new(Vec::new()),
        })
    }

    pub fn batches(&self) -> Vec<TracesData> {
        self.batches.lock().unwrap().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl TraceConsumer for RecordingConsumer {
    async fn consume(&self, batch: TracesData) -> Result<(), BoxError> {
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }
}

/// Rejects every batch.
pub struct FailingConsumer;

#[async_trait::async_trait]
impl TraceConsumer for FailingConsumer {
    async fn consume(&self, _batch: TracesData) -> Result<(), BoxError> {
        Err("downstream unavailable".into())
    }
}
