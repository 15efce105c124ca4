//! Prometheus metrics endpoint

use axum::response::IntoResponse;
use std::sync::atomic::{AtomicU64, Ordering};

/// Application metrics for Prometheus
#[derive(Default)]
pub struct Metrics {
    /// Total reports submitted
    pub reports_submitted_total: AtomicU64,
    /// Submissions served from the report cache
    pub cache_hits_total: AtomicU64,
    /// Submissions that queued real work
    pub cache_misses_total: AtomicU64,
    /// Successful worker claims
    pub claims_total: AtomicU64,
    /// Reports completed ready
    pub completions_total: AtomicU64,
    /// Reports completed with an error
    pub failures_total: AtomicU64,
    /// Submissions rejected by the rate limiter
    pub rate_limited_total: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_reports_submitted(&self) {
        self.reports_submitted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_hits(&self) {
        self.cache_hits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_misses(&self) {
        self.cache_misses_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_claims(&self) {
        self.claims_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_completions(&self) {
        self.completions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failures(&self) {
        self.failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rate_limited(&self) {
        self.rate_limited_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reports_submitted_total: self.reports_submitted_total.load(Ordering::Relaxed),
            cache_hits_total: self.cache_hits_total.load(Ordering::Relaxed),
            cache_misses_total: self.cache_misses_total.load(Ordering::Relaxed),
            claims_total: self.claims_total.load(Ordering::Relaxed),
            completions_total: self.completions_total.load(Ordering::Relaxed),
            failures_total: self.failures_total.load(Ordering::Relaxed),
            rate_limited_total: self.rate_limited_total.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub struct MetricsSnapshot {
    pub reports_submitted_total: u64,
    pub cache_hits_total: u64,
    pub cache_misses_total: u64,
    pub claims_total: u64,
    pub completions_total: u64,
    pub failures_total: u64,
    pub rate_limited_total: u64,
}

/// GET /metrics
///
/// Returns Prometheus-format metrics
pub async fn prometheus_metrics(
    axum::extract::State(state): axum::extract::State<crate::state::AppState>,
) -> impl IntoResponse {
    let snapshot = state.metrics.get_metrics();
    let queued = state.db.queued_report_count().await.unwrap_or(0);

    let output = format!(
        r#"# HELP ratevault_reports_submitted_total Total number of reports submitted
# TYPE ratevault_reports_submitted_total counter
ratevault_reports_submitted_total {}

# HELP ratevault_cache_hits_total Submissions served directly from the report cache
# TYPE ratevault_cache_hits_total counter
ratevault_cache_hits_total {}

# HELP ratevault_cache_misses_total Submissions that queued scraping work
# TYPE ratevault_cache_misses_total counter
ratevault_cache_misses_total {}

# HELP ratevault_claims_total Successful worker claims
# TYPE ratevault_claims_total counter
ratevault_claims_total {}

# HELP ratevault_completions_total Reports completed ready
# TYPE ratevault_completions_total counter
ratevault_completions_total {}

# HELP ratevault_failures_total Reports completed with an error
# TYPE ratevault_failures_total counter
ratevault_failures_total {}

# HELP ratevault_rate_limited_total Submissions rejected by the rate limiter
# TYPE ratevault_rate_limited_total counter
ratevault_rate_limited_total {}

# HELP ratevault_queued_reports Reports currently waiting for a worker
# TYPE ratevault_queued_reports gauge
ratevault_queued_reports {}

# HELP ratevault_info Build information
# TYPE ratevault_info gauge
ratevault_info{{version="{}"}} 1
"#,
        snapshot.reports_submitted_total,
        snapshot.cache_hits_total,
        snapshot.cache_misses_total,
        snapshot.claims_total,
        snapshot.completions_total,
        snapshot.failures_total,
        snapshot.rate_limited_total,
        queued,
        env!("CARGO_PKG_VERSION"),
    );

    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        output,
    )
}
