//! Report submission and polling endpoints

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::net::SocketAddr;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Report, ReportStatus, SubmitReportRequest, SubmitReportResponse};
use crate::routes::{authenticate_optional, authenticate_required};
use crate::services::submission::submit_report;
use crate::state::AppState;

/// POST /api/v1/reports
///
/// Submits a pricing request. Returns the new report's id, share token and
/// status; `queued` means the caller should poll, `ready` means a cached
/// outcome was attached immediately.
///
/// Anonymous submission is allowed; saving a listing (`save_as`) is not.
pub async fn submit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<SubmitReportRequest>,
) -> Result<(StatusCode, Json<SubmitReportResponse>)> {
    if !state.rate_limiter.check(&addr.ip().to_string()) {
        state.metrics.inc_rate_limited();
        return Err(AppError::RateLimited(
            "Too many submissions, try again shortly".into(),
        ));
    }

    let caller = authenticate_optional(&state, &headers).await?;
    let response = submit_report(&state, caller, payload).await?;

    let status_code = if response.status == ReportStatus::Ready {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status_code, Json(response)))
}

/// GET /api/v1/reports/{share_token}
///
/// The polling read path: consumers fetch this at a fixed interval until
/// `status` is terminal. The server never pushes.
pub async fn get_by_share_token(
    State(state): State<AppState>,
    Path(share_token): Path<String>,
) -> Result<Json<Report>> {
    let report = state
        .db
        .get_report_by_share_token(&share_token)
        .await?
        .ok_or_else(|| AppError::NotFound("Report not found".into()))?;

    Ok(Json(report))
}

/// DELETE /api/v1/reports/{id}
///
/// Destroys a report row entirely. This is deletion, not cancellation; a
/// queued or running report simply stops existing. Owner-only.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    let caller = authenticate_required(&state, &headers).await?;

    if !state.db.delete_report(id, caller).await? {
        return Err(AppError::NotFound("Report not found".into()));
    }

    info!(report_id = %id, "Report deleted");
    Ok(StatusCode::NO_CONTENT)
}
