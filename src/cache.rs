//! Report cache over the durable store.
//!
//! Caching is a performance optimization, never a correctness dependency: a
//! lookup that fails for any storage reason degrades to a miss, and a store
//! that fails is logged and dropped. Expiry is advisory and enforced only
//! at read time.

use crate::db::Database;
use crate::models::ReportOutcome;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Key→outcome cache consulted before any work is enqueued
#[derive(Clone)]
pub struct ReportCache {
    db: Arc<Database>,
    ttl_secs: i64,
}

impl ReportCache {
    pub fn new(db: Arc<Database>, ttl_secs: i64) -> Self {
        Self { db, ttl_secs }
    }

    /// Freshest non-expired outcome for a cache key, or none.
    ///
    /// A storage error is swallowed and reported as a miss; the caller
    /// falls through to queueing real work.
    pub async fn lookup(&self, cache_key: &str) -> Option<ReportOutcome> {
        match self.db.cache_lookup(cache_key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(error = %e, cache_key = cache_key, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    /// Insert an outcome valid for the configured TTL. Best-effort: a
    /// failed write is logged and the (already durable) report result is
    /// unaffected.
    pub async fn store(&self, cache_key: &str, report_id: Uuid, outcome: &ReportOutcome) {
        if let Err(e) = self.db.cache_store(cache_key, outcome, self.ttl_secs).await {
            warn!(
                error = %e,
                cache_key = cache_key,
                report_id = %report_id,
                "Cache store failed, result remains uncached"
            );
        }
    }
}
