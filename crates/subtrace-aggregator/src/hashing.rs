// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Deterministic identifiers for services and subtraces.
//!
//! Both identifiers are the first 8 bytes of a SHA-256 digest, hex-encoded
//! to 16 characters. They are only ever compared for equality, so 64 bits is
//! plenty for the handful of services a single trace touches, and the
//! determinism lets operators correlate services by fingerprint across
//! processes.

use opentelemetry_proto::tonic::resource::v1::Resource;
use sha2::{Digest, Sha256};

use crate::pdata::canonical_string;

/// Length of the hex-encoded identifiers (first 8 bytes of SHA-256).
const ID_HEX_LENGTH: usize = 16;

fn truncated_sha256(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..ID_HEX_LENGTH].to_string()
}

/// Fingerprints a resource attribute map.
///
/// Keys are sorted ascending by byte order and concatenated as `k=v;` using
/// each value's canonical string form, then hashed. Two resources fingerprint
/// equal iff their sorted key/value renderings match exactly.
pub fn resource_fingerprint(resource: &Resource) -> String {
    let mut pairs: Vec<(&str, String)> = resource
        .attributes
        .iter()
        .map(|kv| {
            let value = kv.value.as_ref().map(canonical_string).unwrap_or_default();
            (kv.key.as_str(), value)
        })
        .collect();
    pairs.sort();

    let mut canonical = String::new();
    for (key, value) in pairs {
        canonical.push_str(key);
        canonical.push('=');
        canonical.push_str(&value);
        canonical.push(';');
    }

    truncated_sha256(&canonical)
}

/// Derives the identifier for the `counter`-th subtrace opened within a
/// trace. Deterministic within a flush; a trace is flushed at most once, so
/// cross-flush stability is moot.
pub fn subtrace_id(trace_id: &[u8], counter: u64) -> String {
    truncated_sha256(&format!("{}:{}", hex::encode(trace_id), counter))
}
