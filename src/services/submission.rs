//! Report submission orchestration.
//!
//! Every submission entry point (direct POST, saved-listing rerun) funnels
//! through [`submit_report`], which resolves one [`EffectiveInput`] and
//! derives the cache key from it in exactly one place. The defaulting of
//! optional fields therefore cannot drift between call sites.

use crate::cache_key::derive_cache_key;
use crate::error::{AppError, FieldViolation, Result};
use crate::models::{
    DiscountPolicy, EffectiveInput, InputMode, LinkTrigger, ListingAttributes, SavedListing,
    SubmitReportRequest, SubmitReportResponse,
};
use crate::state::AppState;
use crate::validate::{normalize_address, validate_effective_input};
use tracing::{info, warn};
use uuid::Uuid;

/// Validate, resolve, cache-check and create a report.
///
/// The report row is the primary resource; listing persistence and link
/// rows are best-effort secondary effects that never fail a submission
/// whose report was already durably created.
pub async fn submit_report(
    state: &AppState,
    caller: Option<Uuid>,
    request: SubmitReportRequest,
) -> Result<SubmitReportResponse> {
    // Anonymous callers may generate ephemeral reports but may not
    // accumulate saved state.
    if request.save_as.is_some() && caller.is_none() {
        return Err(AppError::Unauthorized(
            "Authentication required to save a listing".into(),
        ));
    }

    // Resolve the referenced listing, when submitting by reference.
    let listing = match request.listing_id {
        Some(listing_id) => {
            let listing = state
                .db
                .get_listing(listing_id)
                .await?
                .ok_or_else(|| AppError::NotFound("Listing not found".into()))?;
            if caller != Some(listing.owner_id) {
                return Err(AppError::Unauthorized(
                    "Listing belongs to another user".into(),
                ));
            }
            Some(listing)
        }
        None => None,
    };

    let input = resolve_effective_input(&request, listing.as_ref())
        .map_err(AppError::Validation)?;

    let violations = validate_effective_input(&input);
    if !violations.is_empty() {
        return Err(AppError::Validation(violations));
    }

    // One cache key per report, computed once here and never recomputed.
    let cache_key = derive_cache_key(&input);

    let cached = state.cache.lookup(&cache_key).await;
    let cache_hit = cached.is_some();
    if cache_hit {
        state.metrics.inc_cache_hits();
    } else {
        state.metrics.inc_cache_misses();
    }

    let report = state
        .db
        .create_report(caller, &input, &cache_key, cached.as_ref())
        .await?;
    state.metrics.inc_reports_submitted();

    info!(
        report_id = %report.id,
        share_token = %report.share_token,
        cache_hit = cache_hit,
        "Report submitted"
    );

    // Secondary effects: listing upsert and link row. Logged, never fatal.
    let trigger = if listing.is_some() {
        LinkTrigger::Rerun
    } else {
        LinkTrigger::Manual
    };
    let linked_listing = match (listing, request.save_as.as_deref(), caller) {
        (Some(listing), _, _) => Some((listing.id, trigger)),
        (None, Some(name), Some(owner)) => {
            match upsert_listing(state, owner, name, &input).await {
                Ok((listing_id, trigger)) => Some((listing_id, trigger)),
                Err(e) => {
                    warn!(error = %e, report_id = %report.id, "Failed to save listing");
                    None
                }
            }
        }
        _ => None,
    };

    if let Some((listing_id, trigger)) = linked_listing {
        if let Err(e) = state
            .db
            .insert_listing_link(listing_id, report.id, trigger)
            .await
        {
            warn!(error = %e, report_id = %report.id, listing_id = %listing_id, "Failed to link report to listing");
        }
        if let Err(e) = state.db.set_latest_report(listing_id, report.id).await {
            warn!(error = %e, listing_id = %listing_id, "Failed to update latest report pointer");
        }
    }

    Ok(SubmitReportResponse {
        id: report.id,
        share_token: report.share_token,
        status: report.status,
    })
}

/// Create the named listing, or refresh its template when the caller
/// already has one under that name. Returns the listing id and the link
/// trigger (`manual` for first-time creation, `rerun` for re-submission).
async fn upsert_listing(
    state: &AppState,
    owner: Uuid,
    name: &str,
    input: &EffectiveInput,
) -> Result<(Uuid, LinkTrigger)> {
    if name.trim().is_empty() {
        return Err(AppError::InvalidRequest("Listing name is empty".into()));
    }

    match state.db.get_listing_by_name(owner, name).await? {
        Some(existing) => {
            state.db.update_listing_template(existing.id, input).await?;
            Ok((existing.id, LinkTrigger::Rerun))
        }
        None => {
            let listing = state.db.create_listing(owner, name, input).await?;
            Ok((listing.id, LinkTrigger::Manual))
        }
    }
}

/// Merge a request with an optional saved-listing template into one
/// resolved input. Request-level overrides win field-by-field. Pure; all
/// missing-field problems come back as violations.
pub fn resolve_effective_input(
    request: &SubmitReportRequest,
    listing: Option<&SavedListing>,
) -> std::result::Result<EffectiveInput, Vec<FieldViolation>> {
    let mut violations = Vec::new();
    let patch = request.attributes.clone().unwrap_or_default();
    let policy_patch = request.discount_policy.clone().unwrap_or_default();

    let (address, attributes, mode, listing_url, base_policy) = match listing {
        Some(listing) => {
            let attrs = &listing.attributes;
            (
                request.address.clone().unwrap_or_else(|| listing.address.clone()),
                ListingAttributes {
                    property_type: patch
                        .property_type
                        .clone()
                        .unwrap_or_else(|| attrs.property_type.clone()),
                    bedrooms: patch.bedrooms.unwrap_or(attrs.bedrooms),
                    bathrooms: patch.bathrooms.unwrap_or(attrs.bathrooms),
                    max_guests: patch.max_guests.unwrap_or(attrs.max_guests),
                    amenities: patch.amenities.clone().unwrap_or_else(|| attrs.amenities.clone()),
                    square_feet: patch.square_feet.or(attrs.square_feet),
                    display_name: patch.display_name.clone().or_else(|| attrs.display_name.clone()),
                },
                request.mode.unwrap_or(listing.mode),
                request.listing_url.clone().or_else(|| listing.listing_url.clone()),
                listing.discount_policy.clone(),
            )
        }
        None => {
            fn require_count(
                violations: &mut Vec<FieldViolation>,
                field: &str,
                value: Option<i32>,
                fallback: i32,
            ) -> i32 {
                value.unwrap_or_else(|| {
                    violations.push(FieldViolation::new(field, "field is required"));
                    fallback
                })
            }

            let address = match &request.address {
                Some(address) => address.clone(),
                None => {
                    violations.push(FieldViolation::new("address", "address is required"));
                    String::new()
                }
            };
            let attributes = ListingAttributes {
                property_type: match &patch.property_type {
                    Some(t) => t.clone(),
                    None => {
                        violations.push(FieldViolation::new(
                            "attributes.property_type",
                            "property type is required",
                        ));
                        String::new()
                    }
                },
                bedrooms: require_count(&mut violations, "attributes.bedrooms", patch.bedrooms, 0),
                bathrooms: require_count(
                    &mut violations,
                    "attributes.bathrooms",
                    patch.bathrooms,
                    0,
                ),
                max_guests: require_count(
                    &mut violations,
                    "attributes.max_guests",
                    patch.max_guests,
                    1,
                ),
                amenities: patch.amenities.clone().unwrap_or_default(),
                square_feet: patch.square_feet,
                display_name: patch.display_name.clone(),
            };
            (
                address,
                attributes,
                request.mode.unwrap_or(InputMode::Criteria),
                request.listing_url.clone(),
                DiscountPolicy::default(),
            )
        }
    };

    let discount_policy = DiscountPolicy {
        weekly_discount_percent: policy_patch
            .weekly_discount_percent
            .unwrap_or(base_policy.weekly_discount_percent),
        monthly_discount_percent: policy_patch
            .monthly_discount_percent
            .unwrap_or(base_policy.monthly_discount_percent),
        refundable: policy_patch.refundable.unwrap_or(base_policy.refundable),
        non_refundable_discount_percent: policy_patch
            .non_refundable_discount_percent
            .unwrap_or(base_policy.non_refundable_discount_percent),
        stacking: policy_patch.stacking.unwrap_or(base_policy.stacking),
        max_total_discount_percent: policy_patch
            .max_total_discount_percent
            .or(base_policy.max_total_discount_percent),
    };

    if !violations.is_empty() {
        return Err(violations);
    }

    Ok(EffectiveInput {
        address: normalize_address(&address),
        attributes,
        mode,
        listing_url,
        start_date: request.start_date,
        end_date: request.end_date,
        discount_policy,
    })
}
