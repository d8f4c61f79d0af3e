//! Prometheus text exposition
//!
//! Formats kiosk metrics for the `/metrics` route of the HTTP API.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use std::fmt::Write;

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with kiosk label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    kiosk: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{kiosk=\"{kiosk}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    kiosk: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{kiosk=\"{kiosk}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{kiosk=\"{kiosk}\",le=\"+Inf\"}} {cumulative}");

    let _ = writeln!(output, "{name}_sum{{kiosk=\"{kiosk}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{kiosk=\"{kiosk}\"}} {cumulative}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics, kiosk: &str) -> String {
    let summary = metrics.snapshot();
    let mut output = String::with_capacity(4096);

    write_batch_metrics(&mut output, kiosk, &summary);
    write_print_metrics(&mut output, kiosk, &summary);
    write_code_metrics(&mut output, kiosk, &summary);

    output
}

fn write_batch_metrics(output: &mut String, kiosk: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "checkin_batches_total",
        "Batches that reached the attendance service",
        MetricType::Counter,
        kiosk,
        summary.batches_total,
    );
    write_metric(
        output,
        "checkin_batches_rejected_total",
        "Batches rejected before any network call",
        MetricType::Counter,
        kiosk,
        summary.batches_rejected,
    );
    write_metric(
        output,
        "checkin_batches_unreachable_total",
        "Batches aborted because the attendance service was unreachable",
        MetricType::Counter,
        kiosk,
        summary.batches_transport_failed,
    );
    write_metric(
        output,
        "checkin_members_checked_in_total",
        "Members confirmed checked in",
        MetricType::Counter,
        kiosk,
        summary.members_checked_in,
    );
    write_metric(
        output,
        "checkin_members_failed_total",
        "Members whose check-in failed",
        MetricType::Counter,
        kiosk,
        summary.members_failed,
    );

    write_histogram(
        output,
        "checkin_batch_latency_ms",
        "Batch latency from admission through printing in milliseconds",
        kiosk,
        &summary.batch_latency_buckets,
        summary.batch_latency_sum_ms,
    );
    write_metric(
        output,
        "checkin_batch_latency_max_ms",
        "Maximum batch latency",
        MetricType::Gauge,
        kiosk,
        summary.batch_latency_max_ms,
    );
}

fn write_print_metrics(output: &mut String, kiosk: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "checkin_labels_printed_total",
        "Labels submitted to the printer",
        MetricType::Counter,
        kiosk,
        summary.labels_printed,
    );
    write_metric(
        output,
        "checkin_print_failures_total",
        "Print jobs that failed",
        MetricType::Counter,
        kiosk,
        summary.print_failures,
    );
}

fn write_code_metrics(output: &mut String, kiosk: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "checkin_codes_decoded_total",
        "Codes decoded or validated successfully",
        MetricType::Counter,
        kiosk,
        summary.codes_decoded,
    );
    write_metric(
        output,
        "checkin_codes_invalid_total",
        "Codes rejected as invalid",
        MetricType::Counter,
        kiosk,
        summary.codes_invalid,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_batch(2, 1);
        metrics.record_labels_printed(3);
        metrics.record_batch_latency(150);
        metrics.record_batch_latency(250);

        let output = format_prometheus_metrics(&metrics, "lobby");

        assert!(output.contains("# TYPE checkin_batches_total counter"));
        assert!(output.contains("checkin_batches_total{kiosk=\"lobby\"} 1"));
        assert!(output.contains("checkin_members_checked_in_total{kiosk=\"lobby\"} 2"));
        assert!(output.contains("checkin_members_failed_total{kiosk=\"lobby\"} 1"));
        assert!(output.contains("checkin_labels_printed_total{kiosk=\"lobby\"} 3"));
        assert!(output.contains("checkin_batch_latency_ms_bucket{kiosk=\"lobby\",le=\"100\"} 0"));
        assert!(output.contains("checkin_batch_latency_ms_bucket{kiosk=\"lobby\",le=\"200\"} 1"));
        assert!(output.contains("checkin_batch_latency_ms_bucket{kiosk=\"lobby\",le=\"+Inf\"} 2"));
        assert!(output.contains("checkin_batch_latency_ms_sum{kiosk=\"lobby\"} 400"));
        assert!(output.contains("checkin_batch_latency_ms_count{kiosk=\"lobby\"} 2"));
    }
}
