//! Application state shared across handlers

use crate::cache::ReportCache;
use crate::db::Database;
use crate::rate_limit::RateLimiter;
use crate::routes::metrics::Metrics;
use std::sync::Arc;

/// Worker-coordination and cache tunables, read from the environment at
/// startup. Configuration constants, not contracts.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// A `running` claim with a heartbeat older than this is reclaimable
    pub stale_claim_minutes: i32,
    /// A stale claim that already burned this many attempts is failed
    pub max_worker_attempts: i32,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: Arc<Database>,
    /// Cache consulted before queueing report work
    pub cache: ReportCache,
    /// Worker claim tunables
    pub worker: WorkerSettings,
    /// Submission-path rate limiter
    pub rate_limiter: Arc<dyn RateLimiter>,
    /// Application metrics for Prometheus
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Create new application state
    ///
    /// # Arguments
    /// * `db` - Database connection
    /// * `cache_ttl_secs` - Report cache entry lifetime
    /// * `worker` - Claim staleness/attempt tunables
    /// * `rate_limiter` - Limiter applied to submissions
    pub fn new(
        db: Database,
        cache_ttl_secs: i64,
        worker: WorkerSettings,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        let db = Arc::new(db);
        Self {
            cache: ReportCache::new(Arc::clone(&db), cache_ttl_secs),
            db,
            worker,
            rate_limiter,
            metrics: Arc::new(Metrics::new()),
        }
    }
}
