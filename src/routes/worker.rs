//! Worker coordination endpoints.
//!
//! The only surface the external scraping workers speak to: claim the next
//! eligible report, renew the claim while working, hand back the outcome.
//! A false `acknowledged` on heartbeat or complete means the claim was
//! superseded and the worker must abandon its in-flight work immediately.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{CalendarDay, CompletionOutcome, Report, ReportOutcome, ReportSummary};
use crate::state::AppState;

/// Request body for claiming work
#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    /// Opaque value identifying the claimant
    pub worker_token: String,
    /// Staleness threshold override; defaults to the configured value
    pub stale_minutes: Option<i32>,
}

/// Response for a claim attempt. `report` is null when the queue is empty,
/// which is the normal idle outcome.
#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub report: Option<Report>,
}

/// Request body for a heartbeat
#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_token: String,
}

/// Request body for completion: either a summary+calendar pair or an error
/// message, never both
#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub worker_token: String,
    pub summary: Option<ReportSummary>,
    pub calendar: Option<Vec<CalendarDay>>,
    pub error: Option<String>,
}

/// Whether a guarded update applied
#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub acknowledged: bool,
}

/// POST /api/v1/worker/claim
pub async fn claim(
    State(state): State<AppState>,
    Json(payload): Json<ClaimRequest>,
) -> Result<Json<ClaimResponse>> {
    if payload.worker_token.is_empty() {
        return Err(AppError::InvalidRequest("worker_token is required".into()));
    }

    let stale_minutes = payload
        .stale_minutes
        .unwrap_or(state.worker.stale_claim_minutes);

    let report = state
        .db
        .claim_next_report(
            &payload.worker_token,
            stale_minutes,
            state.worker.max_worker_attempts,
        )
        .await?;

    if let Some(report) = &report {
        state.metrics.inc_claims();
        info!(
            report_id = %report.id,
            attempt = report.worker_attempts,
            "Report claimed"
        );
    }

    Ok(Json(ClaimResponse { report }))
}

/// POST /api/v1/worker/reports/{id}/heartbeat
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<HeartbeatRequest>,
) -> Result<Json<AckResponse>> {
    let acknowledged = state.db.heartbeat_report(id, &payload.worker_token).await?;

    if !acknowledged {
        warn!(report_id = %id, "Heartbeat rejected, claim superseded");
    }

    Ok(Json(AckResponse { acknowledged }))
}

/// POST /api/v1/worker/reports/{id}/complete
///
/// Records the outcome under the claim-token guard. A successful outcome is
/// also written to the report cache so identical future submissions
/// short-circuit to `ready`; that write is best-effort.
pub async fn complete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CompleteRequest>,
) -> Result<Json<AckResponse>> {
    let outcome = match (payload.summary, payload.calendar, payload.error) {
        (Some(summary), Some(calendar), None) => {
            CompletionOutcome::Ready(ReportOutcome { summary, calendar })
        }
        (None, None, Some(message)) => CompletionOutcome::Failed(message),
        _ => {
            return Err(AppError::InvalidRequest(
                "Provide either summary and calendar, or error".into(),
            ))
        }
    };

    let acknowledged = state
        .db
        .complete_report(id, &payload.worker_token, &outcome)
        .await?;

    if !acknowledged {
        warn!(report_id = %id, "Completion rejected, claim superseded");
        return Ok(Json(AckResponse { acknowledged }));
    }

    match &outcome {
        CompletionOutcome::Ready(outcome) => {
            state.metrics.inc_completions();
            if let Some(report) = state.db.get_report(id).await? {
                state.cache.store(&report.cache_key, id, outcome).await;
            }
            info!(report_id = %id, "Report completed");
        }
        CompletionOutcome::Failed(message) => {
            state.metrics.inc_failures();
            info!(report_id = %id, error = %message, "Report failed");
        }
    }

    Ok(Json(AckResponse { acknowledged }))
}
