//! Saved-listing management endpoints. All owner-authenticated.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    AttributesPatch, DiscountPolicyPatch, InputMode, ListingReportLink, SavedListing,
    SubmitReportRequest, SubmitReportResponse,
};
use crate::routes::authenticate_required;
use crate::services::submission::submit_report;
use crate::state::AppState;

/// Response for the listing index
#[derive(Debug, Serialize)]
pub struct ListingsResponse {
    pub count: usize,
    pub listings: Vec<SavedListing>,
}

/// GET /api/v1/listings
///
/// Returns the caller's saved listings, newest first.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ListingsResponse>> {
    let caller = authenticate_required(&state, &headers).await?;
    let listings = state.db.get_listings_for_owner(caller).await?;

    Ok(Json(ListingsResponse {
        count: listings.len(),
        listings,
    }))
}

/// Request body for renaming a listing
#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

/// PATCH /api/v1/listings/{id}
pub async fn rename(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<RenameRequest>,
) -> Result<StatusCode> {
    let caller = authenticate_required(&state, &headers).await?;

    if payload.name.trim().is_empty() {
        return Err(AppError::InvalidRequest("Listing name is empty".into()));
    }
    if !state.db.rename_listing(id, caller, &payload.name).await? {
        return Err(AppError::NotFound("Listing not found".into()));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/listings/{id}
///
/// Deletes the template. Link rows cascade; already-generated reports
/// persist and stay shareable.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    let caller = authenticate_required(&state, &headers).await?;

    if !state.db.delete_listing(id, caller).await? {
        return Err(AppError::NotFound("Listing not found".into()));
    }

    info!(listing_id = %id, "Listing deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Request body for rerunning a listing: new dates plus optional overrides
#[derive(Debug, Deserialize)]
pub struct RerunRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub address: Option<String>,
    pub mode: Option<InputMode>,
    pub listing_url: Option<String>,
    pub attributes: Option<AttributesPatch>,
    pub discount_policy: Option<DiscountPolicyPatch>,
}

/// POST /api/v1/listings/{id}/rerun
///
/// Re-submits the stored template through the same submission path as a
/// direct POST; the resulting link row carries the `rerun` trigger.
pub async fn rerun(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<RerunRequest>,
) -> Result<(StatusCode, Json<SubmitReportResponse>)> {
    let caller = authenticate_required(&state, &headers).await?;

    let request = SubmitReportRequest {
        listing_id: Some(id),
        address: payload.address,
        mode: payload.mode,
        listing_url: payload.listing_url,
        attributes: payload.attributes,
        start_date: payload.start_date,
        end_date: payload.end_date,
        discount_policy: payload.discount_policy,
        save_as: None,
    };

    let response = submit_report(&state, Some(caller), request).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Response for a listing's report history
#[derive(Debug, Serialize)]
pub struct ListingReportsResponse {
    pub listing_id: Uuid,
    pub count: usize,
    pub links: Vec<ListingReportLink>,
}

/// GET /api/v1/listings/{id}/reports
///
/// The listing's link history, newest first.
pub async fn report_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<ListingReportsResponse>> {
    let caller = authenticate_required(&state, &headers).await?;

    let listing = state
        .db
        .get_listing(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Listing not found".into()))?;
    if listing.owner_id != caller {
        return Err(AppError::NotFound("Listing not found".into()));
    }

    let links = state.db.get_links_for_listing(id).await?;
    Ok(Json(ListingReportsResponse {
        listing_id: id,
        count: links.len(),
        links,
    }))
}
