//! Metric instrument factories for workpool.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an OTLP endpoint the global provider is a no-op, so recording is
//! always safe.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("workpool")
}

/// Counter: records written by `put`.
/// Labels: `partition`, `result` ("created" | "updated").
pub fn records_written() -> Counter<u64> {
    meter()
        .u64_counter("workpool.records.written")
        .with_description("Number of records written")
        .build()
}

/// Counter: records removed from a partition.
/// Labels: `partition`, `reason` ("delete" | "shift" | "cleanup").
pub fn records_removed() -> Counter<u64> {
    meter()
        .u64_counter("workpool.records.removed")
        .with_description("Number of records removed")
        .build()
}

/// Counter: records relocated between partitions.
/// Labels: `from`, `to`.
pub fn records_moved() -> Counter<u64> {
    meter()
        .u64_counter("workpool.records.moved")
        .with_description("Number of records moved between partitions")
        .build()
}

/// Counter: stale records found by a reclamation sweep.
/// Labels: `partition`, `action` ("delete" | "move").
pub fn records_reclaimed() -> Counter<u64> {
    meter()
        .u64_counter("workpool.records.reclaimed")
        .with_description("Number of stale records reclaimed")
        .build()
}

/// Histogram: time spent waiting for a lock, in milliseconds.
/// Labels: `kind` ("queue" | "record" | "counter" | "set").
pub fn lock_wait_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("workpool.lock.wait_ms")
        .with_description("Time spent waiting to acquire a lock")
        .with_unit("ms")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("workpool.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
