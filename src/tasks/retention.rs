//! Retention task - prunes expired report cache rows.
//!
//! Reads already filter on `expires_at`, so this is housekeeping, not
//! correctness: without it expired rows accumulate until something removes
//! them.

use crate::db::Database;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Background task that periodically deletes expired cache entries.
///
/// Runs every hour.
pub async fn retention_task(db: Arc<Database>) {
    // Wait 1 minute before starting to allow system to stabilize
    tokio::time::sleep(Duration::from_secs(60)).await;

    let mut interval = tokio::time::interval(Duration::from_secs(60 * 60));

    info!("Cache retention task started (1h interval)");

    loop {
        interval.tick().await;

        match db.purge_expired_cache().await {
            Ok(deleted) => {
                if deleted > 0 {
                    info!(deleted = deleted, "Purged expired cache entries");
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to purge expired cache entries");
            }
        }
    }
}
