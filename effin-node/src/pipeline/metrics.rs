//! Pipeline counters
//!
//! Every update goes to the `metrics` facade (for whatever recorder the host
//! installs) and to a local atomic snapshot that `/metrics` renders in
//! Prometheus text format.

use metrics::{counter, histogram};
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Upper bounds (seconds) of the query latency histogram
const LATENCY_BUCKETS: [f64; 10] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

#[derive(Default)]
struct LatencyHistogram {
    buckets: [AtomicU64; LATENCY_BUCKETS.len()],
    count: AtomicU64,
    /// Sum in microseconds
    sum_micros: AtomicU64,
}

impl LatencyHistogram {
    fn observe(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        for (bound, bucket) in LATENCY_BUCKETS.iter().zip(&self.buckets) {
            if secs <= *bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queries: u64,
    pub upserts: u64,
    pub alerts: u64,
    pub processed: u64,
    pub failed: u64,
    pub batches_failed: u64,
    pub audit_failures: u64,
    pub train_calls: u64,
    pub train_failures: u64,
}

#[derive(Default)]
pub struct PipelineMetrics {
    queries: AtomicU64,
    upserts: AtomicU64,
    alerts: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    batches_failed: AtomicU64,
    audit_failures: AtomicU64,
    train_calls: AtomicU64,
    train_failures: AtomicU64,
    query_latency: LatencyHistogram,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// One batch query call covering `vectors` query vectors
    pub fn record_query(&self, vectors: usize, elapsed: Duration) {
        self.queries.fetch_add(vectors as u64, Ordering::Relaxed);
        self.query_latency.observe(elapsed);
        counter!("effin_queries_total").increment(vectors as u64);
        histogram!("effin_query_latency_seconds").record(elapsed.as_secs_f64());
    }

    pub fn record_upserts(&self, n: usize) {
        self.upserts.fetch_add(n as u64, Ordering::Relaxed);
        counter!("effin_upserts_total").increment(n as u64);
    }

    pub fn record_alert(&self) {
        self.alerts.fetch_add(1, Ordering::Relaxed);
        counter!("effin_alerts_total").increment(1);
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        counter!("effin_transactions_processed_total").increment(1);
    }

    /// Transaction skipped before reaching a batch
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        counter!("effin_transactions_failed_total").increment(1);
    }

    pub fn record_batch_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        counter!("effin_batches_failed_total").increment(1);
    }

    /// Ledger write that failed or timed out; the batch itself went through
    pub fn record_audit_failed(&self) {
        self.audit_failures.fetch_add(1, Ordering::Relaxed);
        counter!("effin_audit_failures_total").increment(1);
    }

    pub fn record_train(&self, succeeded: bool) {
        self.train_calls.fetch_add(1, Ordering::Relaxed);
        counter!("effin_train_calls_total").increment(1);
        if !succeeded {
            self.train_failures.fetch_add(1, Ordering::Relaxed);
            counter!("effin_train_failures_total").increment(1);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            upserts: self.upserts.load(Ordering::Relaxed),
            alerts: self.alerts.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            audit_failures: self.audit_failures.load(Ordering::Relaxed),
            train_calls: self.train_calls.load(Ordering::Relaxed),
            train_failures: self.train_failures.load(Ordering::Relaxed),
        }
    }

    /// Prometheus text exposition of the local counters
    pub fn render_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut out = String::new();

        for (name, help, value) in [
            ("effin_queries_total", "Query vectors sent to the index", s.queries),
            ("effin_upserts_total", "Records upserted to the index", s.upserts),
            ("effin_alerts_total", "Cross-bank alerts raised", s.alerts),
            ("effin_transactions_processed_total", "Transactions embedded and batched", s.processed),
            ("effin_transactions_failed_total", "Transactions skipped before batching", s.failed),
            ("effin_batches_failed_total", "Batches dropped after an index failure", s.batches_failed),
            ("effin_audit_failures_total", "Audit ledger writes that failed", s.audit_failures),
            ("effin_train_calls_total", "Train calls issued", s.train_calls),
            ("effin_train_failures_total", "Train calls that failed", s.train_failures),
        ] {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, value);
        }

        let h = &self.query_latency;
        let name = "effin_query_latency_seconds";
        let _ = writeln!(out, "# HELP {} Batch query latency", name);
        let _ = writeln!(out, "# TYPE {} histogram", name);
        for (bound, bucket) in LATENCY_BUCKETS.iter().zip(&h.buckets) {
            let _ = writeln!(
                out,
                "{}_bucket{{le=\"{}\"}} {}",
                name,
                bound,
                bucket.load(Ordering::Relaxed)
            );
        }
        let count = h.count.load(Ordering::Relaxed);
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, count);
        let _ = writeln!(
            out,
            "{}_sum {}",
            name,
            h.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
        );
        let _ = writeln!(out, "{}_count {}", name, count);
        out
    }
}
