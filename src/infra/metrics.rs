//! Lock-free metrics collection
//!
//! Uses atomics so concurrent batches never contend on a lock. Counters are
//! monotonic (Prometheus semantics); `snapshot()` only loads them.
//!
//! NOTE: All atomics use Relaxed ordering intentionally; these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Batch latency bucket boundaries (milliseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
pub const METRICS_BUCKET_BOUNDS: [u64; 10] =
    [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
pub const METRICS_NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; METRICS_NUM_BUCKETS]) -> [u64; METRICS_NUM_BUCKETS] {
    let mut result = [0u64; METRICS_NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Lock-free metrics collector
#[derive(Default)]
pub struct Metrics {
    /// Batches that reached the attendance service
    batches_total: AtomicU64,
    /// Batches rejected before any network call (empty / too large)
    batches_rejected: AtomicU64,
    /// Batches aborted because the attendance service was unreachable
    batches_transport_failed: AtomicU64,
    /// Members the service confirmed as checked in
    members_checked_in: AtomicU64,
    /// Members whose check-in failed
    members_failed: AtomicU64,
    /// Labels reported printed
    labels_printed: AtomicU64,
    /// Print jobs that failed
    print_failures: AtomicU64,
    /// Codes decoded successfully via the API
    codes_decoded: AtomicU64,
    /// Codes rejected (length, alphabet, checksum or expected-id mismatch)
    codes_invalid: AtomicU64,
    /// Batch latency histogram (check-in fan-out through print)
    batch_latency_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    batch_latency_sum_ms: AtomicU64,
    batch_latency_max_ms: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_batch_rejected(&self) {
        self.batches_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_transport_failure(&self) {
        self.batches_transport_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the per-member outcome counts of a batch that reached the service
    #[inline]
    pub fn record_batch(&self, checked_in: u64, failed: u64) {
        self.batches_total.fetch_add(1, Ordering::Relaxed);
        self.members_checked_in.fetch_add(checked_in, Ordering::Relaxed);
        self.members_failed.fetch_add(failed, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_labels_printed(&self, count: u64) {
        self.labels_printed.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_print_failure(&self) {
        self.print_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_code_lookup(&self, valid: bool) {
        if valid {
            self.codes_decoded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.codes_invalid.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_batch_latency(&self, latency_ms: u64) {
        self.batch_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.batch_latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.batch_latency_max_ms, latency_ms);
    }

    /// Load a consistent-enough view of all counters
    pub fn snapshot(&self) -> MetricsSummary {
        let batch_latency_buckets = load_buckets(&self.batch_latency_buckets);
        let samples: u64 = batch_latency_buckets.iter().sum();
        let sum = self.batch_latency_sum_ms.load(Ordering::Relaxed);

        MetricsSummary {
            batches_total: self.batches_total.load(Ordering::Relaxed),
            batches_rejected: self.batches_rejected.load(Ordering::Relaxed),
            batches_transport_failed: self.batches_transport_failed.load(Ordering::Relaxed),
            members_checked_in: self.members_checked_in.load(Ordering::Relaxed),
            members_failed: self.members_failed.load(Ordering::Relaxed),
            labels_printed: self.labels_printed.load(Ordering::Relaxed),
            print_failures: self.print_failures.load(Ordering::Relaxed),
            codes_decoded: self.codes_decoded.load(Ordering::Relaxed),
            codes_invalid: self.codes_invalid.load(Ordering::Relaxed),
            batch_latency_buckets,
            batch_latency_sum_ms: sum,
            batch_latency_avg_ms: if samples > 0 { sum / samples } else { 0 },
            batch_latency_max_ms: self.batch_latency_max_ms.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub batches_total: u64,
    pub batches_rejected: u64,
    pub batches_transport_failed: u64,
    pub members_checked_in: u64,
    pub members_failed: u64,
    pub labels_printed: u64,
    pub print_failures: u64,
    pub codes_decoded: u64,
    pub codes_invalid: u64,
    pub batch_latency_buckets: [u64; METRICS_NUM_BUCKETS],
    pub batch_latency_sum_ms: u64,
    pub batch_latency_avg_ms: u64,
    pub batch_latency_max_ms: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            batches = %self.batches_total,
            rejected = %self.batches_rejected,
            transport_failed = %self.batches_transport_failed,
            checked_in = %self.members_checked_in,
            member_failures = %self.members_failed,
            labels_printed = %self.labels_printed,
            print_failures = %self.print_failures,
            batch_avg_ms = %self.batch_latency_avg_ms,
            batch_max_ms = %self.batch_latency_max_ms,
            "metrics"
        );
    }
}
