//! Prometheus metrics for match execution.
//!
//! Defines the metric instruments and update helpers; scraping and
//! shipping them is the embedding service's concern. All helpers are
//! no-ops until [`init_metrics`] has run, so library consumers and tests
//! do not need metrics wired up.

use std::sync::OnceLock;

use prometheus::{Counter, CounterVec, Encoder, Gauge, Histogram, Opts, Registry, TextEncoder};

/// Global Prometheus registry for all arena-executor metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total matches completed, labeled by terminal status.
pub static MATCHES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// End-to-end match duration in seconds (submit through cleanup).
pub static MATCH_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Matches currently between submission and cleanup completion.
pub static ACTIVE_MATCHES: OnceLock<Gauge> = OnceLock::new();

/// Cleanups that exhausted their deletion retries.
pub static CLEANUP_FAILURES: OnceLock<Counter> = OnceLock::new();

/// Initializes all metrics and registers them with the registry.
///
/// Call once at application startup. Calling again is a registration
/// error.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let matches_total = CounterVec::new(
        Opts::new("arena_matches_total", "Total matches completed"),
        &["status"],
    )?;

    let match_duration = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "arena_match_duration_seconds",
            "End-to-end match duration in seconds",
        )
        .buckets(vec![1.0, 5.0, 15.0, 60.0, 120.0, 300.0, 600.0]),
    )?;

    let active_matches = Gauge::new(
        "arena_active_matches",
        "Matches currently between submission and cleanup",
    )?;

    let cleanup_failures = Counter::new(
        "arena_cleanup_failures_total",
        "Cleanups that exhausted their deletion retries",
    )?;

    registry.register(Box::new(matches_total.clone()))?;
    registry.register(Box::new(match_duration.clone()))?;
    registry.register(Box::new(active_matches.clone()))?;
    registry.register(Box::new(cleanup_failures.clone()))?;

    let _ = MATCHES_TOTAL.set(matches_total);
    let _ = MATCH_DURATION.set(match_duration);
    let _ = ACTIVE_MATCHES.set(active_matches);
    let _ = CLEANUP_FAILURES.set(cleanup_failures);
    let _ = REGISTRY.set(registry);

    Ok(())
}

/// Exports all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return String::new();
    };
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&registry.gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Records a completed match with its terminal status and duration.
pub fn record_match(status: &str, duration_sec: f64) {
    if let Some(counter) = MATCHES_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
    if let Some(histogram) = MATCH_DURATION.get() {
        histogram.observe(duration_sec);
    }
}

/// Mirrors the active-match counter into the gauge.
pub fn set_active_matches(count: u64) {
    if let Some(gauge) = ACTIVE_MATCHES.get() {
        gauge.set(count as f64);
    }
}

/// Records a cleanup that exhausted its retries.
pub fn record_cleanup_failure() {
    if let Some(counter) = CLEANUP_FAILURES.get() {
        counter.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_are_noops_before_init() {
        // Must not panic without init_metrics().
        record_match("success", 1.0);
        set_active_matches(3);
        record_cleanup_failure();
    }

    #[test]
    fn export_is_empty_before_init() {
        assert!(export_metrics().is_empty() || export_metrics().contains("arena_"));
    }
}
