// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Partitioning of a trace's spans into per-service subtraces.
//!
//! A subtrace is a maximal group of spans that share a service and are not
//! separated from their parent by an entry-point boundary. Assignment walks
//! the parent-child forest, which may have arrived out of order, incomplete,
//! or (with corrupt input) cyclic; every span ends up in exactly one
//! subtrace.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::buffer::SpanEntry;
use crate::hashing::subtrace_id;
use crate::pdata::{is_empty_span_id, is_entry_point, normalized_kind};

/// One service-local cut of a trace, produced at flush time.
#[derive(Debug)]
pub struct Subtrace {
    /// Derived identifier, 16 hex chars.
    pub id: String,
    /// The trace every member belongs to.
    pub trace_id: Vec<u8>,
    /// Members in original insertion order.
    pub spans: Vec<SpanEntry>,
    /// Index of the elected root within `spans`.
    pub root: Option<usize>,
}

/// A child starts a new subtrace when it crosses a service boundary: either
/// the resource fingerprint changes, or the child is an entry-point span
/// (`SERVER`/`CONSUMER`) under a non-entry-point parent.
fn opens_new_subtrace(parent: &SpanEntry, child: &SpanEntry) -> bool {
    if parent.resource_hash != child.resource_hash {
        return true;
    }
    is_entry_point(normalized_kind(child.span.kind))
        && !is_entry_point(normalized_kind(parent.span.kind))
}

fn parent_index(
    spans: &[SpanEntry],
    index: &HashMap<&[u8], usize>,
    i: usize,
) -> Option<usize> {
    let parent_id = spans[i].span.parent_span_id.as_slice();
    if is_empty_span_id(parent_id) {
        return None;
    }
    index.get(parent_id).copied()
}

fn open_subtrace(trace_id: &[u8], ids: &mut Vec<String>) -> usize {
    let ordinal = ids.len();
    ids.push(subtrace_id(trace_id, ordinal as u64));
    ordinal
}

/// Cuts a flushed trace into subtraces and elects a root for each.
///
/// Membership preserves insertion order, and the returned groups are ordered
/// by the insertion index of their first member, so output is deterministic
/// within a flush.
pub fn assign_subtraces(trace_id: &[u8], spans: Vec<SpanEntry>) -> Vec<Subtrace> {
    if spans.is_empty() {
        return Vec::new();
    }

    let mut index: HashMap<&[u8], usize> = HashMap::with_capacity(spans.len());
    for (i, entry) in spans.iter().enumerate() {
        if !is_empty_span_id(&entry.span.span_id) {
            // First occurrence wins for duplicate span ids.
            index.entry(entry.span.span_id.as_slice()).or_insert(i);
        }
    }

    let mut assigned: Vec<Option<usize>> = vec![None; spans.len()];
    let mut ids: Vec<String> = Vec::new();

    for i in 0..spans.len() {
        if assigned[i].is_some() {
            continue;
        }

        // Walk up the parent chain until hitting a span that can be decided
        // directly: an orphan, an already-assigned ancestor, or a revisit
        // (cycle).
        let mut chain = vec![i];
        while let Some(&top) = chain.last() {
            match parent_index(&spans, &index, top) {
                Some(p) if assigned[p].is_none() && !chain.contains(&p) => chain.push(p),
                _ => break,
            }
        }

        // Resolve top-down so each span sees its parent's assignment.
        while let Some(s) = chain.pop() {
            let resolved_parent =
                parent_index(&spans, &index, s).and_then(|p| assigned[p].map(|g| (p, g)));
            let ordinal = match resolved_parent {
                Some((p, parent_ordinal)) => {
                    if opens_new_subtrace(&spans[p], &spans[s]) {
                        open_subtrace(trace_id, &mut ids)
                    } else {
                        parent_ordinal
                    }
                }
                // Orphan, or an unresolved parent on a cycle: the span
                // anchors a subtrace of its own.
                None => open_subtrace(trace_id, &mut ids),
            };
            assigned[s] = Some(ordinal);
        }
    }

    let mut members: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
    for (i, ordinal) in assigned.iter().enumerate() {
        if let Some(g) = *ordinal {
            members[g].push(i);
        }
    }

    // Emit groups ordered by the insertion index of their first member.
    let mut order: Vec<usize> = (0..members.len()).collect();
    order.sort_by_key(|&g| members[g].first().copied().unwrap_or(usize::MAX));

    let mut slots: Vec<Option<SpanEntry>> = spans.into_iter().map(Some).collect();
    let mut subtraces = Vec::with_capacity(order.len());
    for g in order {
        let group_spans: Vec<SpanEntry> = members[g]
            .iter()
            .filter_map(|&i| slots[i].take())
            .collect();
        if group_spans.is_empty() {
            continue;
        }
        let root = select_root(trace_id, &group_spans);
        subtraces.push(Subtrace {
            id: std::mem::take(&mut ids[g]),
            trace_id: trace_id.to_vec(),
            spans: group_spans,
            root,
        });
    }
    subtraces
}

/// Elects the root span of a subtrace: the unique member whose parent lies
/// outside the group, with earliest start time breaking ties. When parent
/// pointers form a cycle no candidate exists and the earliest-starting
/// member stands in.
fn select_root(trace_id: &[u8], spans: &[SpanEntry]) -> Option<usize> {
    if spans.is_empty() {
        return None;
    }

    let member_ids: HashSet<&[u8]> = spans
        .iter()
        .filter(|e| !is_empty_span_id(&e.span.span_id))
        .map(|e| e.span.span_id.as_slice())
        .collect();

    let candidates: Vec<usize> = spans
        .iter()
        .enumerate()
        .filter(|(_, e)| {
            let parent_id = e.span.parent_span_id.as_slice();
            is_empty_span_id(parent_id) || !member_ids.contains(parent_id)
        })
        .map(|(i, _)| i)
        .collect();

    let earliest = |indexes: &[usize]| {
        indexes
            .iter()
            .copied()
            .min_by_key(|&i| (spans[i].span.start_time_unix_nano, i))
    };

    match candidates.len() {
        0 => {
            // Only possible when parent ids form a cycle, which points at
            // corrupt input.
            warn!(
                trace_id = %hex::encode(trace_id),
                span_count = spans.len(),
                "no root candidate in subtrace, falling back to earliest span"
            );
            let all: Vec<usize> = (0..spans.len()).collect();
            earliest(&all)
        }
        1 => Some(candidates[0]),
        _ => earliest(&candidates),
    }
}
