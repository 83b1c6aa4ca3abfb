//! Prometheus-style metrics for sync runs
//!
//! Counters for uploaded files, parts, and bytes plus a PUT latency histogram.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counter metric (monotonically increasing)
pub struct Counter {
    value: AtomicU64,
    name: String,
    help: String,
}

impl Counter {
    /// Create a new counter
    pub fn new(name: &str, help: &str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name: name.into(),
            help: help.into(),
        }
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by delta
    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
            self.name, self.help, self.name, self.name, self.get()
        )
    }
}

/// Histogram for latency measurements
pub struct Histogram {
    buckets: Vec<(f64, AtomicU64)>,
    sum_micros: AtomicU64,
    count: AtomicU64,
    name: String,
    help: String,
}

impl Histogram {
    /// Buckets sized for object PUTs, from 100ms to one hour
    pub fn new(name: &str, help: &str) -> Self {
        Self::with_buckets(
            name,
            help,
            vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0],
        )
    }

    /// Create with custom buckets
    pub fn with_buckets(name: &str, help: &str, bounds: Vec<f64>) -> Self {
        let buckets = bounds
            .into_iter()
            .map(|b| (b, AtomicU64::new(0)))
            .collect();

        Self {
            buckets,
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
            name: name.into(),
            help: help.into(),
        }
    }

    /// Observe a value in seconds
    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((value * 1_000_000.0) as u64, Ordering::Relaxed);

        for (bound, count) in &self.buckets {
            if value <= *bound {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Observe the time elapsed since `start`
    pub fn observe_since(&self, start: Instant) {
        self.observe(start.elapsed().as_secs_f64());
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        let mut output = format!(
            "# HELP {} {}\n# TYPE {} histogram\n",
            self.name, self.help, self.name
        );

        for (bound, count) in &self.buckets {
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                self.name,
                bound,
                count.load(Ordering::Relaxed)
            ));
        }

        let sum_secs = self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        output.push_str(&format!("{}_sum {}\n", self.name, sum_secs));
        output.push_str(&format!("{}_count {}\n", self.name, self.count()));

        output
    }
}

/// Metrics of one sync process
pub struct SyncMetrics {
    pub files_uploaded: Counter,
    pub parts_uploaded: Counter,
    pub bytes_uploaded: Counter,
    pub files_split: Counter,
    pub put_duration: Histogram,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self {
            files_uploaded: Counter::new("s3sync_files_uploaded_total", "Whole files uploaded"),
            parts_uploaded: Counter::new("s3sync_parts_uploaded_total", "Split parts uploaded"),
            bytes_uploaded: Counter::new("s3sync_bytes_uploaded_total", "Bytes sent to the object store"),
            files_split: Counter::new("s3sync_files_split_total", "Files split before upload"),
            put_duration: Histogram::new("s3sync_put_duration_seconds", "Object PUT latency"),
        }
    }

    /// Export all metrics in Prometheus format
    pub fn export(&self) -> String {
        let mut output = String::new();
        output.push_str(&self.files_uploaded.to_prometheus());
        output.push_str(&self.parts_uploaded.to_prometheus());
        output.push_str(&self.bytes_uploaded.to_prometheus());
        output.push_str(&self.files_split.to_prometheus());
        output.push_str(&self.put_duration.to_prometheus());
        output
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}
