//! Database-backed tests for the report store, claim protocol and cache.
//!
//! These need a disposable Postgres database. Set TEST_DATABASE_URL to run
//! them; without it every test skips with a note. Tests share one database,
//! so they serialize on a global lock and start from clean tables.

use std::sync::{Arc, OnceLock};

use rate_vault::cache_key::derive_cache_key;
use rate_vault::db::Database;
use rate_vault::models::{
    AttributesPatch, CalendarDay, CompletionOutcome, DiscountPolicy, EffectiveInput, InputMode,
    ListingAttributes, ReportOutcome, ReportStatus, ReportSummary, SubmitReportRequest,
};
use rate_vault::rate_limit::UnlimitedLimiter;
use rate_vault::services::submission::submit_report;
use rate_vault::state::{AppState, WorkerSettings};
use chrono::NaiveDate;
use tokio::sync::Mutex;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("../sql/schema.sql");

fn db_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

async fn test_db() -> Option<Database> {
    let url = match std::env::var("TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("TEST_DATABASE_URL not set, skipping database test");
            return None;
        }
    };
    let db = Database::new(&url).await.expect("failed to connect to test database");
    db.apply_schema(SCHEMA_SQL).await.expect("failed to apply schema");

    for table in [
        "listing_report_links",
        "saved_listings",
        "reports",
        "report_cache",
        "auth_tokens",
    ] {
        sqlx::query(&format!("DELETE FROM {}", table))
            .execute(db.pool())
            .await
            .expect("failed to clean table");
    }

    Some(db)
}

fn sample_input(address: &str) -> EffectiveInput {
    EffectiveInput {
        address: address.to_string(),
        attributes: ListingAttributes {
            property_type: "house".to_string(),
            bedrooms: 2,
            bathrooms: 2,
            max_guests: 4,
            amenities: Vec::new(),
            square_feet: None,
            display_name: None,
        },
        mode: InputMode::Criteria,
        listing_url: None,
        start_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2026, 3, 8).unwrap(),
        discount_policy: DiscountPolicy {
            weekly_discount_percent: 10,
            ..Default::default()
        },
    }
}

fn sample_outcome() -> ReportOutcome {
    ReportOutcome {
        summary: ReportSummary {
            nightly_rate_avg: 142.0,
            nightly_rate_min: 98.0,
            nightly_rate_max: 210.0,
            projected_occupancy: 0.71,
            projected_monthly_revenue: 3030.0,
            recommendation: "Price weekends at the high band".to_string(),
            comparable_count: 18,
            data_source: "market-scrape".to_string(),
        },
        calendar: vec![
            CalendarDay {
                date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
                nightly_rate: 130.0,
                demand_score: 0.5,
            },
            CalendarDay {
                date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
                nightly_rate: 126.0,
                demand_score: 0.4,
            },
        ],
    }
}

#[tokio::test]
async fn test_at_most_one_claim_under_concurrency() {
    let _guard = db_lock().lock().await;
    let Some(db) = test_db().await else { return };

    let input = sample_input("1 contention way");
    let key = derive_cache_key(&input);
    let report = db.create_report(None, &input, &key, None).await.unwrap();
    assert_eq!(report.status, ReportStatus::Queued);

    let mut handles = Vec::new();
    for n in 0..8 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            db.claim_next_report(&format!("worker-{}", n), 10, 5).await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one concurrent claim may win the row");

    let claimed = db.get_report(report.id).await.unwrap().unwrap();
    assert_eq!(claimed.status, ReportStatus::Running);
    assert_eq!(claimed.worker_attempts, 1);
    assert!(claimed.worker_claim_token.is_some());
    assert!(claimed.claimed_at.is_some());
    assert!(claimed.heartbeat_at.is_some());
}

#[tokio::test]
async fn test_claim_on_empty_queue_is_none() {
    let _guard = db_lock().lock().await;
    let Some(db) = test_db().await else { return };

    let claimed = db.claim_next_report("worker-a", 10, 5).await.unwrap();
    assert!(claimed.is_none());
}

#[tokio::test]
async fn test_claim_order_is_oldest_first() {
    let _guard = db_lock().lock().await;
    let Some(db) = test_db().await else { return };

    let first = {
        let input = sample_input("2 early bird ln");
        db.create_report(None, &input, &derive_cache_key(&input), None)
            .await
            .unwrap()
    };
    {
        let input = sample_input("3 late riser rd");
        db.create_report(None, &input, &derive_cache_key(&input), None)
            .await
            .unwrap();
    }

    let claimed = db.claim_next_report("worker-a", 10, 5).await.unwrap().unwrap();
    assert_eq!(claimed.id, first.id);
}

#[tokio::test]
async fn test_stale_reclaim_and_ownership_guard() {
    let _guard = db_lock().lock().await;
    let Some(db) = test_db().await else { return };

    let input = sample_input("4 flaky worker ct");
    let report = db
        .create_report(None, &input, &derive_cache_key(&input), None)
        .await
        .unwrap();

    let claimed_a = db.claim_next_report("worker-a", 10, 5).await.unwrap().unwrap();
    assert_eq!(claimed_a.worker_attempts, 1);

    // A live heartbeat renews the claim.
    assert!(db.heartbeat_report(report.id, "worker-a").await.unwrap());

    // With a zero staleness threshold the heartbeat is already stale, so a
    // second worker reclaims the same row and bumps the attempt counter.
    let claimed_b = db.claim_next_report("worker-b", 0, 5).await.unwrap().unwrap();
    assert_eq!(claimed_b.id, report.id);
    assert_eq!(claimed_b.worker_attempts, 2);
    assert_eq!(claimed_b.worker_claim_token.as_deref(), Some("worker-b"));

    // The superseded claimant can neither heartbeat nor complete.
    assert!(!db.heartbeat_report(report.id, "worker-a").await.unwrap());
    assert!(!db
        .complete_report(
            report.id,
            "worker-a",
            &CompletionOutcome::Ready(sample_outcome()),
        )
        .await
        .unwrap());

    // The row is untouched by the rejected writes.
    let current = db.get_report(report.id).await.unwrap().unwrap();
    assert_eq!(current.status, ReportStatus::Running);
    assert!(current.summary.is_none());

    // The current claimant finishes normally.
    assert!(db
        .complete_report(
            report.id,
            "worker-b",
            &CompletionOutcome::Ready(sample_outcome()),
        )
        .await
        .unwrap());

    let done = db.get_report(report.id).await.unwrap().unwrap();
    assert_eq!(done.status, ReportStatus::Ready);
    assert!(done.summary.is_some());
    assert!(done.calendar.is_some());
    assert!(done.error_message.is_none());
}

#[tokio::test]
async fn test_attempt_cap_dead_letters_stale_rows() {
    let _guard = db_lock().lock().await;
    let Some(db) = test_db().await else { return };

    let input = sample_input("5 poison pill pl");
    let report = db
        .create_report(None, &input, &derive_cache_key(&input), None)
        .await
        .unwrap();

    // Burn the only allowed attempt.
    let claimed = db.claim_next_report("worker-a", 0, 1).await.unwrap().unwrap();
    assert_eq!(claimed.id, report.id);

    // The next claim sees a stale row out of attempts: it is failed, not
    // handed out again.
    let reclaimed = db.claim_next_report("worker-b", 0, 1).await.unwrap();
    assert!(reclaimed.is_none());

    let dead = db.get_report(report.id).await.unwrap().unwrap();
    assert_eq!(dead.status, ReportStatus::Error);
    assert!(dead.error_message.unwrap().contains("abandoned"));
    assert!(dead.summary.is_none());
    assert!(dead.calendar.is_none());
}

#[tokio::test]
async fn test_failed_completion_records_error() {
    let _guard = db_lock().lock().await;
    let Some(db) = test_db().await else { return };

    let input = sample_input("6 no comps blvd");
    let report = db
        .create_report(None, &input, &derive_cache_key(&input), None)
        .await
        .unwrap();

    db.claim_next_report("worker-a", 10, 5).await.unwrap().unwrap();
    assert!(db
        .complete_report(
            report.id,
            "worker-a",
            &CompletionOutcome::Failed("no comparable listings found".to_string()),
        )
        .await
        .unwrap());

    let failed = db.get_report(report.id).await.unwrap().unwrap();
    assert_eq!(failed.status, ReportStatus::Error);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("no comparable listings found")
    );
    assert!(failed.summary.is_none());
    assert!(failed.calendar.is_none());
}

#[tokio::test]
async fn test_cache_round_trip_and_expiry() {
    let _guard = db_lock().lock().await;
    let Some(db) = test_db().await else { return };

    let outcome = sample_outcome();

    db.cache_store("fresh-key-00000000000000000000", &outcome, 3600)
        .await
        .unwrap();
    let hit = db
        .cache_lookup("fresh-key-00000000000000000000")
        .await
        .unwrap()
        .expect("fresh entry should hit");
    assert_eq!(hit, outcome);

    // A zero TTL expires at insert time; the read-side filter drops it.
    db.cache_store("expired-key-00000000000000000000", &outcome, 0)
        .await
        .unwrap();
    let miss = db.cache_lookup("expired-key-00000000000000000000").await.unwrap();
    assert!(miss.is_none());
}

#[tokio::test]
async fn test_cache_hit_creates_ready_report_without_worker_fields() {
    let _guard = db_lock().lock().await;
    let Some(db) = test_db().await else { return };

    let input = sample_input("7 instant answer ave");
    let key = derive_cache_key(&input);
    let outcome = sample_outcome();

    let report = db
        .create_report(None, &input, &key, Some(&outcome))
        .await
        .unwrap();

    assert_eq!(report.status, ReportStatus::Ready);
    assert_eq!(report.summary, Some(outcome.summary));
    assert_eq!(report.worker_attempts, 0);
    assert!(report.worker_claim_token.is_none());
    assert!(report.claimed_at.is_none());
    assert!(report.heartbeat_at.is_none());

    // A ready row is never claimable.
    let claimed = db.claim_next_report("worker-a", 10, 5).await.unwrap();
    assert!(claimed.is_none());
}

fn test_state(db: Database) -> AppState {
    AppState::new(
        db,
        3600,
        WorkerSettings {
            stale_claim_minutes: 10,
            max_worker_attempts: 5,
        },
        Arc::new(UnlimitedLimiter),
    )
}

fn direct_request(address: &str) -> SubmitReportRequest {
    SubmitReportRequest {
        listing_id: None,
        address: Some(address.to_string()),
        mode: None,
        listing_url: None,
        attributes: Some(AttributesPatch {
            property_type: Some("house".to_string()),
            bedrooms: Some(2),
            bathrooms: Some(2),
            max_guests: Some(4),
            ..Default::default()
        }),
        start_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2026, 3, 8).unwrap(),
        discount_policy: None,
        save_as: None,
    }
}

#[tokio::test]
async fn test_submission_queues_then_serves_from_cache() {
    let _guard = db_lock().lock().await;
    let Some(db) = test_db().await else { return };
    let state = test_state(db.clone());

    // No cache entry yet: both submissions queue.
    let first = submit_report(&state, None, direct_request("8 repeat customer st"))
        .await
        .unwrap();
    assert_eq!(first.status, ReportStatus::Queued);

    let second = submit_report(&state, None, direct_request("8 repeat customer st"))
        .await
        .unwrap();
    assert_eq!(second.status, ReportStatus::Queued);
    assert_ne!(first.id, second.id);

    // Seed the cache under the derived key, then submit the same input a
    // third time: it comes back ready with the seeded outcome attached.
    let queued = db.get_report(first.id).await.unwrap().unwrap();
    let outcome = sample_outcome();
    db.cache_store(&queued.cache_key, &outcome, 3600).await.unwrap();

    let third = submit_report(&state, None, direct_request("8 repeat customer st"))
        .await
        .unwrap();
    assert_eq!(third.status, ReportStatus::Ready);

    let ready = db.get_report(third.id).await.unwrap().unwrap();
    assert_eq!(ready.cache_key, queued.cache_key);
    assert_eq!(ready.summary, Some(outcome.summary));
    assert!(ready.worker_claim_token.is_none());
}

#[tokio::test]
async fn test_polling_read_by_share_token() {
    let _guard = db_lock().lock().await;
    let Some(db) = test_db().await else { return };

    let input = sample_input("9 watched pot way");
    let report = db
        .create_report(None, &input, &derive_cache_key(&input), None)
        .await
        .unwrap();

    let fetched = db
        .get_report_by_share_token(&report.share_token)
        .await
        .unwrap()
        .expect("share token should resolve");
    assert_eq!(fetched.id, report.id);
    assert_eq!(fetched.status, ReportStatus::Queued);

    let missing = db.get_report_by_share_token("ffffffffffff").await.unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_anonymous_save_rejected_and_saved_listing_links() {
    let _guard = db_lock().lock().await;
    let Some(db) = test_db().await else { return };
    let state = test_state(db.clone());

    // Anonymous callers cannot accumulate saved state.
    let mut request = direct_request("10 settler st");
    request.save_as = Some("My cabin".to_string());
    let err = submit_report(&state, None, request).await.unwrap_err();
    assert!(matches!(err, rate_vault::error::AppError::Unauthorized(_)));

    // An authenticated save creates the listing and a manual link.
    let owner = Uuid::new_v4();
    let mut request = direct_request("10 settler st");
    request.save_as = Some("My cabin".to_string());
    let response = submit_report(&state, Some(owner), request).await.unwrap();

    let listing = db
        .get_listing_by_name(owner, "My cabin")
        .await
        .unwrap()
        .expect("listing should have been created");
    assert_eq!(listing.latest_report_id, Some(response.id));

    let links = db.get_links_for_listing(listing.id).await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].report_id, response.id);
    assert_eq!(
        links[0].trigger,
        rate_vault::models::LinkTrigger::Manual
    );

    // Saving again under the same name reruns the existing listing.
    let mut request = direct_request("10 settler st");
    request.save_as = Some("My cabin".to_string());
    let rerun = submit_report(&state, Some(owner), request).await.unwrap();

    let links = db.get_links_for_listing(listing.id).await.unwrap();
    assert_eq!(links.len(), 2);
    assert_eq!(links[0].report_id, rerun.id);
    assert_eq!(links[0].trigger, rate_vault::models::LinkTrigger::Rerun);

    // Deleting the listing cascades links but orphans the reports.
    assert!(db.delete_listing(listing.id, owner).await.unwrap());
    assert!(db.get_report(response.id).await.unwrap().is_some());
    assert!(db.get_report(rerun.id).await.unwrap().is_some());
}
