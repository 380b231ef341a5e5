//! Span helpers for partition store operations.

use tracing::Span;

/// Start a span for a store operation on one partition.
///
/// `store.records` is declared empty and filled in via [`record_affected`]
/// once the operation knows how many records it touched.
pub fn start_op_span(operation: &'static str, partition: &str) -> Span {
    tracing::debug_span!(
        "store.op",
        "store.operation" = operation,
        "store.partition" = partition,
        "store.records" = tracing::field::Empty,
    )
}

/// Record how many records an operation touched.
pub fn record_affected(span: &Span, count: usize) {
    span.record("store.records", count as u64);
}

/// Start the span wrapping one reclamation sweep.
pub fn start_sweep_span(policies: usize) -> Span {
    tracing::info_span!(
        "reclaim.sweep",
        "reclaim.policies" = policies as u64,
        "reclaim.total" = tracing::field::Empty,
    )
}
