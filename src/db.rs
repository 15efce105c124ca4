//! Database access layer with SQLx and PostgreSQL.
//!
//! The report row is the queue: claiming work is a `FOR UPDATE SKIP LOCKED`
//! selection inside a transaction, and heartbeat/completion are conditional
//! updates guarded by the claim token. All worker-coordination mutation
//! goes through `claim_next_report` / `heartbeat_report` /
//! `complete_report`; nothing else touches those columns.

use crate::error::{AppError, Result};
use crate::models::{
    CompletionOutcome, EffectiveInput, LinkTrigger, ListingReportLink, Report, ReportOutcome,
    ReportStatus, SavedListing,
};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Database connection pool and operations
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

/// Raw `reports` row. Stays inside this module; everything downstream sees
/// the canonical [`Report`] produced by `into_report`.
#[derive(Debug, FromRow)]
struct ReportRow {
    id: Uuid,
    share_token: String,
    owner_id: Option<Uuid>,
    address: String,
    attributes: serde_json::Value,
    mode: String,
    listing_url: Option<String>,
    start_date: NaiveDate,
    end_date: NaiveDate,
    discount_policy: serde_json::Value,
    cache_key: String,
    status: String,
    claimed_at: Option<DateTime<Utc>>,
    heartbeat_at: Option<DateTime<Utc>>,
    worker_claim_token: Option<String>,
    worker_attempts: i32,
    summary: Option<serde_json::Value>,
    calendar: Option<serde_json::Value>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ReportRow {
    fn into_report(self) -> Result<Report> {
        Ok(Report {
            id: self.id,
            share_token: self.share_token,
            owner_id: self.owner_id,
            address: self.address,
            attributes: serde_json::from_value(self.attributes)
                .map_err(|e| AppError::InternalError(format!("Corrupt attributes: {}", e)))?,
            mode: string_to_mode(&self.mode),
            listing_url: self.listing_url,
            start_date: self.start_date,
            end_date: self.end_date,
            discount_policy: serde_json::from_value(self.discount_policy)
                .map_err(|e| AppError::InternalError(format!("Corrupt discount policy: {}", e)))?,
            cache_key: self.cache_key,
            status: string_to_status(&self.status),
            claimed_at: self.claimed_at,
            heartbeat_at: self.heartbeat_at,
            worker_claim_token: self.worker_claim_token,
            worker_attempts: self.worker_attempts,
            summary: self
                .summary
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| AppError::InternalError(format!("Corrupt summary: {}", e)))?,
            calendar: self
                .calendar
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| AppError::InternalError(format!("Corrupt calendar: {}", e)))?,
            error_message: self.error_message,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Raw `saved_listings` row
#[derive(Debug, FromRow)]
struct ListingRow {
    id: Uuid,
    owner_id: Uuid,
    name: String,
    address: String,
    attributes: serde_json::Value,
    mode: String,
    listing_url: Option<String>,
    discount_policy: serde_json::Value,
    latest_report_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ListingRow {
    fn into_listing(self) -> Result<SavedListing> {
        Ok(SavedListing {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name,
            address: self.address,
            attributes: serde_json::from_value(self.attributes)
                .map_err(|e| AppError::InternalError(format!("Corrupt attributes: {}", e)))?,
            mode: string_to_mode(&self.mode),
            listing_url: self.listing_url,
            discount_policy: serde_json::from_value(self.discount_policy)
                .map_err(|e| AppError::InternalError(format!("Corrupt discount policy: {}", e)))?,
            latest_report_id: self.latest_report_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const REPORT_COLUMNS: &str = "id, share_token, owner_id, address, attributes, mode, listing_url, \
     start_date, end_date, discount_policy, cache_key, status, claimed_at, heartbeat_at, \
     worker_claim_token, worker_attempts, summary, calendar, error_message, created_at, updated_at";

const LISTING_COLUMNS: &str = "id, owner_id, name, address, attributes, mode, listing_url, \
     discount_policy, latest_report_id, created_at, updated_at";

impl Database {
    /// Create a new database connection pool
    pub async fn new(connection_string: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(50)
            .min_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .connect(connection_string)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {}", e)))?;

        info!("Database connection pool established");
        Ok(Self { pool })
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the idempotent schema script
    pub async fn apply_schema(&self, schema_sql: &str) -> Result<()> {
        sqlx::raw_sql(schema_sql)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Schema apply failed: {}", e)))?;
        Ok(())
    }

    /// Resolve a bearer token to the user it authenticates.
    ///
    /// Token issuance belongs to the external identity service; this is
    /// only the lookup side.
    pub async fn verify_session(&self, token: &str) -> Result<Uuid> {
        let user_id: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT user_id FROM auth_tokens
            WHERE token = $1 AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        user_id
            .map(|(id,)| id)
            .ok_or_else(|| AppError::Unauthorized("Invalid session token".into()))
    }

    // ----- report store -----

    /// Insert a new report.
    ///
    /// With `outcome` set (a resolved cache hit) the row is created directly
    /// in `ready` state and the worker-coordination columns are never
    /// populated. Otherwise it is created `queued`; the row itself is the
    /// queue entry, nothing else is enqueued.
    pub async fn create_report(
        &self,
        owner_id: Option<Uuid>,
        input: &EffectiveInput,
        cache_key: &str,
        outcome: Option<&ReportOutcome>,
    ) -> Result<Report> {
        let share_token = new_share_token();
        let status = if outcome.is_some() {
            ReportStatus::Ready
        } else {
            ReportStatus::Queued
        };
        let summary = outcome
            .map(|o| serde_json::to_value(&o.summary))
            .transpose()?;
        let calendar = outcome
            .map(|o| serde_json::to_value(&o.calendar))
            .transpose()?;

        let sql = format!(
            r#"
            INSERT INTO reports (
                id, share_token, owner_id, address, attributes, mode, listing_url,
                start_date, end_date, discount_policy, cache_key, status,
                summary, calendar
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {}
            "#,
            REPORT_COLUMNS
        );

        let row: ReportRow = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(&share_token)
            .bind(owner_id)
            .bind(&input.address)
            .bind(serde_json::to_value(&input.attributes)?)
            .bind(input.mode.as_str())
            .bind(&input.listing_url)
            .bind(input.start_date)
            .bind(input.end_date)
            .bind(serde_json::to_value(&input.discount_policy)?)
            .bind(cache_key)
            .bind(status_to_string(status))
            .bind(summary)
            .bind(calendar)
            .fetch_one(&self.pool)
            .await?;

        row.into_report()
    }

    /// Fetch a report by its public share token
    pub async fn get_report_by_share_token(&self, share_token: &str) -> Result<Option<Report>> {
        let sql = format!(
            "SELECT {} FROM reports WHERE share_token = $1",
            REPORT_COLUMNS
        );
        let row: Option<ReportRow> = sqlx::query_as(&sql)
            .bind(share_token)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ReportRow::into_report).transpose()
    }

    /// Fetch a report by internal id
    pub async fn get_report(&self, id: Uuid) -> Result<Option<Report>> {
        let sql = format!("SELECT {} FROM reports WHERE id = $1", REPORT_COLUMNS);
        let row: Option<ReportRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ReportRow::into_report).transpose()
    }

    /// Delete a report owned by `owner_id`. Returns whether a row was
    /// removed. Link rows cascade; listings keep their template.
    pub async fn delete_report(&self, id: Uuid, owner_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM reports WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Number of reports currently waiting for a worker
    pub async fn queued_report_count(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM reports WHERE status = 'queued'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    // ----- job claim protocol -----

    /// Atomically claim the next eligible report for `worker_token`.
    ///
    /// Eligible rows are `queued`, plus `running` rows whose heartbeat is
    /// older than `stale_minutes` (a crashed worker is only ever detected
    /// here, lazily). Oldest submission wins. `FOR UPDATE SKIP LOCKED`
    /// makes concurrent claimants skip a row another transaction holds
    /// instead of blocking on it, so exactly one caller wins any given row
    /// and the rest immediately move on.
    ///
    /// A stale `running` row that has already burned `max_attempts` claims
    /// is failed to `error` instead of being handed out again.
    ///
    /// Returns `None` when the queue is empty; that is the normal idle
    /// outcome, not an error.
    pub async fn claim_next_report(
        &self,
        worker_token: &str,
        stale_minutes: i32,
        max_attempts: i32,
    ) -> Result<Option<Report>> {
        let mut tx = self.pool.begin().await?;

        // Dead-letter pass: stale rows out of attempts become terminal
        // errors before candidate selection sees them.
        sqlx::query(
            r#"
            UPDATE reports
            SET status = 'error',
                error_message = 'abandoned after ' || worker_attempts || ' failed attempts',
                summary = NULL,
                calendar = NULL,
                updated_at = now()
            WHERE status = 'running'
              AND heartbeat_at < now() - make_interval(mins => $1)
              AND worker_attempts >= $2
            "#,
        )
        .bind(stale_minutes)
        .bind(max_attempts)
        .execute(&mut *tx)
        .await?;

        let sql = format!(
            r#"
            WITH candidate AS (
                SELECT id FROM reports
                WHERE status = 'queued'
                   OR (status = 'running' AND heartbeat_at < now() - make_interval(mins => $2))
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE reports r
            SET status = 'running',
                claimed_at = now(),
                heartbeat_at = now(),
                worker_claim_token = $1,
                worker_attempts = r.worker_attempts + 1,
                updated_at = now()
            FROM candidate c
            WHERE r.id = c.id
            RETURNING {}
            "#,
            REPORT_COLUMNS
        );

        let row: Option<ReportRow> = sqlx::query_as(&sql)
            .bind(worker_token)
            .bind(stale_minutes)
            .fetch_optional(&mut *tx)
            .await?;

        tx.commit().await?;

        row.map(ReportRow::into_report).transpose()
    }

    /// Renew a claim's heartbeat.
    ///
    /// Returns false when the claim token no longer matches (the claim was
    /// reclaimed as stale) or the report left `running`; the caller must
    /// abandon its work on a false return.
    pub async fn heartbeat_report(&self, id: Uuid, worker_token: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reports
            SET heartbeat_at = now(), updated_at = now()
            WHERE id = $1 AND worker_claim_token = $2 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(worker_token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a claimed report's outcome under the same ownership guard as
    /// `heartbeat_report`, so a superseded worker cannot clobber the result
    /// written by the current claimant. A `Failed` outcome is still a
    /// structurally-successful completion; it records `error` status.
    pub async fn complete_report(
        &self,
        id: Uuid,
        worker_token: &str,
        outcome: &CompletionOutcome,
    ) -> Result<bool> {
        let result = match outcome {
            CompletionOutcome::Ready(outcome) => {
                sqlx::query(
                    r#"
                    UPDATE reports
                    SET status = 'ready',
                        summary = $3,
                        calendar = $4,
                        error_message = NULL,
                        updated_at = now()
                    WHERE id = $1 AND worker_claim_token = $2 AND status = 'running'
                    "#,
                )
                .bind(id)
                .bind(worker_token)
                .bind(serde_json::to_value(&outcome.summary)?)
                .bind(serde_json::to_value(&outcome.calendar)?)
                .execute(&self.pool)
                .await?
            }
            CompletionOutcome::Failed(message) => {
                sqlx::query(
                    r#"
                    UPDATE reports
                    SET status = 'error',
                        error_message = $3,
                        summary = NULL,
                        calendar = NULL,
                        updated_at = now()
                    WHERE id = $1 AND worker_claim_token = $2 AND status = 'running'
                    "#,
                )
                .bind(id)
                .bind(worker_token)
                .bind(message)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected() == 1)
    }

    // ----- report cache rows -----

    /// Freshest non-expired cache entry for a key, if any
    pub async fn cache_lookup(&self, cache_key: &str) -> Result<Option<ReportOutcome>> {
        let row: Option<(serde_json::Value, serde_json::Value)> = sqlx::query_as(
            r#"
            SELECT summary, calendar FROM report_cache
            WHERE cache_key = $1 AND expires_at > now()
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(cache_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(summary, calendar)| {
            Ok(ReportOutcome {
                summary: serde_json::from_value(summary)
                    .map_err(|e| AppError::InternalError(format!("Corrupt cached summary: {}", e)))?,
                calendar: serde_json::from_value(calendar).map_err(|e| {
                    AppError::InternalError(format!("Corrupt cached calendar: {}", e))
                })?,
            })
        })
        .transpose()
    }

    /// Insert a cache entry valid until `now + ttl_secs`. Duplicate keys
    /// are fine; readers pick the freshest row.
    pub async fn cache_store(
        &self,
        cache_key: &str,
        outcome: &ReportOutcome,
        ttl_secs: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO report_cache (id, cache_key, summary, calendar, expires_at)
            VALUES ($1, $2, $3, $4, now() + make_interval(secs => $5))
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(cache_key)
        .bind(serde_json::to_value(&outcome.summary)?)
        .bind(serde_json::to_value(&outcome.calendar)?)
        .bind(ttl_secs as f64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Remove expired cache rows. Read paths already ignore them; this
    /// keeps the table from accumulating forever.
    pub async fn purge_expired_cache(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM report_cache WHERE expires_at < now()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    // ----- saved listings and links -----

    /// Fetch a listing by id
    pub async fn get_listing(&self, id: Uuid) -> Result<Option<SavedListing>> {
        let sql = format!("SELECT {} FROM saved_listings WHERE id = $1", LISTING_COLUMNS);
        let row: Option<ListingRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ListingRow::into_listing).transpose()
    }

    /// Fetch a listing by its owner-scoped name
    pub async fn get_listing_by_name(
        &self,
        owner_id: Uuid,
        name: &str,
    ) -> Result<Option<SavedListing>> {
        let sql = format!(
            "SELECT {} FROM saved_listings WHERE owner_id = $1 AND name = $2",
            LISTING_COLUMNS
        );
        let row: Option<ListingRow> = sqlx::query_as(&sql)
            .bind(owner_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ListingRow::into_listing).transpose()
    }

    /// All listings owned by a user, newest first
    pub async fn get_listings_for_owner(&self, owner_id: Uuid) -> Result<Vec<SavedListing>> {
        let sql = format!(
            "SELECT {} FROM saved_listings WHERE owner_id = $1 ORDER BY created_at DESC",
            LISTING_COLUMNS
        );
        let rows: Vec<ListingRow> = sqlx::query_as(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ListingRow::into_listing).collect()
    }

    /// Insert a new listing template
    pub async fn create_listing(
        &self,
        owner_id: Uuid,
        name: &str,
        input: &EffectiveInput,
    ) -> Result<SavedListing> {
        let sql = format!(
            r#"
            INSERT INTO saved_listings (
                id, owner_id, name, address, attributes, mode, listing_url, discount_policy
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            LISTING_COLUMNS
        );

        let row: ListingRow = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(owner_id)
            .bind(name)
            .bind(&input.address)
            .bind(serde_json::to_value(&input.attributes)?)
            .bind(input.mode.as_str())
            .bind(&input.listing_url)
            .bind(serde_json::to_value(&input.discount_policy)?)
            .fetch_one(&self.pool)
            .await?;

        row.into_listing()
    }

    /// Refresh a listing's template fields from a newer submission
    pub async fn update_listing_template(&self, id: Uuid, input: &EffectiveInput) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE saved_listings
            SET address = $2, attributes = $3, mode = $4, listing_url = $5,
                discount_policy = $6, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&input.address)
        .bind(serde_json::to_value(&input.attributes)?)
        .bind(input.mode.as_str())
        .bind(&input.listing_url)
        .bind(serde_json::to_value(&input.discount_policy)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Rename a listing owned by `owner_id`
    pub async fn rename_listing(&self, id: Uuid, owner_id: Uuid, name: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE saved_listings SET name = $3, updated_at = now() WHERE id = $1 AND owner_id = $2",
        )
        .bind(id)
        .bind(owner_id)
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete a listing owned by `owner_id`. Link rows cascade; linked
    /// reports persist as independently-shareable orphans.
    pub async fn delete_listing(&self, id: Uuid, owner_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM saved_listings WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Point a listing at its most recent report
    pub async fn set_latest_report(&self, listing_id: Uuid, report_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE saved_listings SET latest_report_id = $2, updated_at = now() WHERE id = $1",
        )
        .bind(listing_id)
        .bind(report_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record which listing triggered which report. At most one link per
    /// (listing, report) pair; a duplicate insert is a no-op.
    pub async fn insert_listing_link(
        &self,
        listing_id: Uuid,
        report_id: Uuid,
        trigger: LinkTrigger,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO listing_report_links (listing_id, report_id, triggered_by)
            VALUES ($1, $2, $3)
            ON CONFLICT (listing_id, report_id) DO NOTHING
            "#,
        )
        .bind(listing_id)
        .bind(report_id)
        .bind(trigger.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Link history for a listing, newest first
    pub async fn get_links_for_listing(&self, listing_id: Uuid) -> Result<Vec<ListingReportLink>> {
        let rows: Vec<(Uuid, Uuid, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT listing_id, report_id, triggered_by, created_at
            FROM listing_report_links
            WHERE listing_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(listing_id, report_id, triggered_by, created_at)| ListingReportLink {
                listing_id,
                report_id,
                trigger: string_to_trigger(&triggered_by),
                created_at,
            })
            .collect())
    }
}

/// Short public token for share URLs: 12 hex chars from a v4 UUID
fn new_share_token() -> String {
    let mut token = Uuid::new_v4().simple().to_string();
    token.truncate(12);
    token
}

/// Convert ReportStatus to database string
fn status_to_string(status: ReportStatus) -> &'static str {
    match status {
        ReportStatus::Queued => "queued",
        ReportStatus::Running => "running",
        ReportStatus::Ready => "ready",
        ReportStatus::Error => "error",
    }
}

/// Convert database string to ReportStatus
fn string_to_status(s: &str) -> ReportStatus {
    match s {
        "queued" => ReportStatus::Queued,
        "running" => ReportStatus::Running,
        "ready" => ReportStatus::Ready,
        _ => ReportStatus::Error,
    }
}

fn string_to_mode(s: &str) -> crate::models::InputMode {
    match s {
        "url" => crate::models::InputMode::Url,
        _ => crate::models::InputMode::Criteria,
    }
}

fn string_to_trigger(s: &str) -> LinkTrigger {
    match s {
        "rerun" => LinkTrigger::Rerun,
        "scheduled" => LinkTrigger::Scheduled,
        _ => LinkTrigger::Manual,
    }
}
