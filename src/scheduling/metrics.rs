// Performance Metrics for the scheduling core
//
// Tracks execution times, settings cache hit rates, and slow operations
// for the four scheduling engines.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Performance threshold for slow operations (100ms)
const SLOW_OPERATION_THRESHOLD_MS: u64 = 100;

/// Type of operation being timed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Availability,
    Conflict,
    Pricing,
    Assignment,
}

impl OperationType {
    fn label(&self) -> &'static str {
        match self {
            OperationType::Availability => "availability computation",
            OperationType::Conflict => "conflict check",
            OperationType::Pricing => "pricing calculation",
            OperationType::Assignment => "auto-assignment",
        }
    }
}

#[derive(Debug, Default)]
struct OperationStats {
    count: AtomicU64,
    total_time_us: AtomicU64,
    slow: AtomicU64,
}

impl OperationStats {
    fn record(&self, duration: Duration) -> bool {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);

        let is_slow = duration.as_millis() as u64 > SLOW_OPERATION_THRESHOLD_MS;
        if is_slow {
            self.slow.fetch_add(1, Ordering::Relaxed);
        }
        is_slow
    }

    fn avg_ms(&self) -> f64 {
        let count = self.count.load(Ordering::Relaxed);
        let total_us = self.total_time_us.load(Ordering::Relaxed);

        if count == 0 {
            0.0
        } else {
            (total_us as f64 / count as f64) / 1000.0
        }
    }

    fn snapshot(&self) -> OperationSummary {
        OperationSummary {
            count: self.count.load(Ordering::Relaxed),
            avg_time_ms: self.avg_ms(),
            slow: self.slow.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
struct MetricsInner {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    availability: OperationStats,
    conflict: OperationStats,
    pricing: OperationStats,
    assignment: OperationStats,
}

/// Performance metrics for the scheduling core
#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    inner: Arc<MetricsInner>,
}

impl PerformanceMetrics {
    /// Create a new metrics tracker
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Get settings cache hit rate (0.0 to 1.0)
    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.inner.cache_hits.load(Ordering::Relaxed);
        let misses = self.inner.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;

        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Start timing an operation; the duration is recorded when the timer drops
    pub fn start(&self, operation: OperationType) -> OperationTimer {
        OperationTimer {
            start: Instant::now(),
            operation,
            metrics: self.clone(),
        }
    }

    fn stats(&self, operation: OperationType) -> &OperationStats {
        match operation {
            OperationType::Availability => &self.inner.availability,
            OperationType::Conflict => &self.inner.conflict,
            OperationType::Pricing => &self.inner.pricing,
            OperationType::Assignment => &self.inner.assignment,
        }
    }

    fn record(&self, operation: OperationType, duration: Duration) {
        if self.stats(operation).record(duration) {
            tracing::warn!("Slow {}: {}ms", operation.label(), duration.as_millis());
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            cache_hit_rate: self.cache_hit_rate(),
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.inner.cache_misses.load(Ordering::Relaxed),
            availability: self.inner.availability.snapshot(),
            conflict: self.inner.conflict.snapshot(),
            pricing: self.inner.pricing.snapshot(),
            assignment: self.inner.assignment.snapshot(),
        }
    }

    pub fn log_summary(&self) {
        let summary = self.summary();
        tracing::info!(
            "Scheduling Performance Metrics:\n\
             Settings cache: {:.1}% hit rate ({} hits, {} misses)\n\
             Availability: {} runs, avg {:.2}ms, {} slow\n\
             Conflicts: {} checks, avg {:.2}ms, {} slow\n\
             Pricing: {} quotes, avg {:.2}ms, {} slow\n\
             Assignment: {} runs, avg {:.2}ms, {} slow",
            summary.cache_hit_rate * 100.0,
            summary.cache_hits,
            summary.cache_misses,
            summary.availability.count,
            summary.availability.avg_time_ms,
            summary.availability.slow,
            summary.conflict.count,
            summary.conflict.avg_time_ms,
            summary.conflict.slow,
            summary.pricing.count,
            summary.pricing.avg_time_ms,
            summary.pricing.slow,
            summary.assignment.count,
            summary.assignment.avg_time_ms,
            summary.assignment.slow,
        );
    }
}

/// Timer for tracking operation duration
pub struct OperationTimer {
    start: Instant,
    operation: OperationType,
    metrics: PerformanceMetrics,
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        self.metrics.record(self.operation, self.start.elapsed());
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationSummary {
    pub count: u64,
    pub avg_time_ms: f64,
    pub slow: u64,
}

/// Summary of performance metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub cache_hit_rate: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub availability: OperationSummary,
    pub conflict: OperationSummary,
    pub pricing: OperationSummary,
    pub assignment: OperationSummary,
}
