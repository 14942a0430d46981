//! Stable, first-seen-wins deduplication.

use std::collections::HashSet;
use std::hash::Hash;

use tracekeep_core::annotation::Annotation;
use tracekeep_core::span::Span;

pub fn uniq_by<T, K, F>(items: Vec<T>, mut key: F) -> Vec<T>
where
    K: Hash + Eq,
    F: FnMut(&T) -> K,
{
    let mut seen = HashSet::with_capacity(items.len());
    items.into_iter().filter(|item| seen.insert(key(item))).collect()
}

/// Drops repeated `(trace_id, span_id)` rows, keeping the first.
pub fn uniq_spans(spans: Vec<Span>) -> Vec<Span> {
    uniq_by(spans, |s| {
        let (trace_id, span_id) = s.identity();
        (trace_id.to_owned(), span_id.to_owned())
    })
}

/// Drops repeated annotation ids, keeping the first.
pub fn uniq_annotations(annotations: Vec<Annotation>) -> Vec<Annotation> {
    uniq_by(annotations, |a| a.id.clone())
}
