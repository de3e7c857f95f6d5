// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Boxed error type used at the downstream consumer seam.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the subtrace aggregator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("downstream consumer rejected batch: {0}")]
    Downstream(#[source] BoxError),
}
