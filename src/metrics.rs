//! Prometheus metrics for the visit guard.
//!
//! Metrics live in process-wide `OnceLock` statics and are registered by
//! [`init`]. Every recording helper is a no-op until `init` has run, so the
//! guard can be used (and tested) without a registry.
//!
//! - `visitguard_requests_total{outcome}` - visits by classification
//! - `visitguard_bans_issued_total{kind}` - automatic, temporary and permanent bans
//! - `visitguard_sweeps_total` - decay passes
//! - `visitguard_sweep_duration_seconds` - decay pass latency
//! - `visitguard_arrays_reclaimed_total` - trie arrays freed by sweeps
//! - `visitguard_trie_bytes` - trie footprint after the last sweep

use crate::security::guard::VisitOutcome;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters
// ========================================================================

/// Visits by outcome label.
pub static REQUESTS: OnceLock<IntCounterVec> = OnceLock::new();

/// Bans issued by kind.
pub static BANS_ISSUED: OnceLock<IntCounterVec> = OnceLock::new();

/// Completed sweep passes.
pub static SWEEPS: OnceLock<IntCounter> = OnceLock::new();

/// Trie arrays unlinked by sweeps.
pub static ARRAYS_RECLAIMED: OnceLock<IntCounter> = OnceLock::new();

// ========================================================================
// Gauges and histograms
// ========================================================================

/// Estimated trie footprint in bytes.
pub static TRIE_BYTES: OnceLock<IntGauge> = OnceLock::new();

pub static SWEEP_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Call once at startup. Repeat calls keep the first set of metrics.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            if $metric.get().is_none() {
                match $init {
                    Ok(m) => {
                        if let Err(e) = r.register(Box::new(m.clone())) {
                            tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
                        }
                        let _ = $metric.set(m);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, concat!("Failed to create metric ", stringify!($metric)));
                    }
                }
            }
        };
    }

    register!(REQUESTS, IntCounterVec::new(Opts::new("visitguard_requests_total", "Visits by classification"), &["outcome"]));
    register!(BANS_ISSUED, IntCounterVec::new(Opts::new("visitguard_bans_issued_total", "Bans issued by kind"), &["kind"]));
    register!(SWEEPS, IntCounter::new("visitguard_sweeps_total", "Completed sweep passes"));
    register!(ARRAYS_RECLAIMED, IntCounter::new("visitguard_arrays_reclaimed_total", "Trie arrays reclaimed by sweeps"));
    register!(TRIE_BYTES, IntGauge::new("visitguard_trie_bytes", "Estimated bytes held by the address trie"));
    register!(SWEEP_DURATION, Histogram::with_opts(
        HistogramOpts::new("visitguard_sweep_duration_seconds", "Sweep pass latency")
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0])));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Count one classified visit.
#[inline]
pub fn record_visit(outcome: VisitOutcome) {
    if let Some(c) = REQUESTS.get() {
        c.with_label_values(&[outcome.label()]).inc();
    }
}

/// Count one ban. `kind` is `automatic`, `temporary` or `permanent`.
#[inline]
pub fn record_ban(kind: &str) {
    if let Some(c) = BANS_ISSUED.get() {
        c.with_label_values(&[kind]).inc();
    }
}

/// Record a completed sweep pass.
#[inline]
pub fn record_sweep(duration_secs: f64, arrays_reclaimed: usize, trie_bytes: usize) {
    if let Some(c) = SWEEPS.get() {
        c.inc();
    }
    if let Some(h) = SWEEP_DURATION.get() {
        h.observe(duration_secs);
    }
    if let Some(c) = ARRAYS_RECLAIMED.get() {
        c.inc_by(arrays_reclaimed as u64);
    }
    if let Some(g) = TRIE_BYTES.get() {
        g.set(i64::try_from(trie_bytes).unwrap_or(i64::MAX));
    }
}
