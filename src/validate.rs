//! Submission input validation.
//!
//! Validation reports every violated field in one pass rather than stopping
//! at the first problem, so a client can fix a form in one round trip.

use crate::error::FieldViolation;
use crate::models::{EffectiveInput, InputMode};

/// Longest accepted address, after normalization
const MAX_ADDRESS_LEN: usize = 500;
/// Longest accepted stay, in nights
pub const MAX_NIGHTS: i64 = 180;

/// Normalize an address for pricing: trim, collapse runs of whitespace,
/// lowercase. Runs before the cache key is derived so equivalent spellings
/// of the same address hash identically.
pub fn normalize_address(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Check a resolved input against the declared shape.
///
/// Returns an empty vec when the input is acceptable.
pub fn validate_effective_input(input: &EffectiveInput) -> Vec<FieldViolation> {
    let mut violations = Vec::new();

    if input.address.is_empty() {
        violations.push(FieldViolation::new("address", "address is required"));
    } else if input.address.len() > MAX_ADDRESS_LEN {
        violations.push(FieldViolation::new(
            "address",
            format!("address must be at most {} characters", MAX_ADDRESS_LEN),
        ));
    }

    let attrs = &input.attributes;
    if attrs.property_type.trim().is_empty() {
        violations.push(FieldViolation::new(
            "attributes.property_type",
            "property type is required",
        ));
    }
    if !(0..=20).contains(&attrs.bedrooms) {
        violations.push(FieldViolation::new(
            "attributes.bedrooms",
            "bedrooms must be between 0 and 20",
        ));
    }
    if !(0..=20).contains(&attrs.bathrooms) {
        violations.push(FieldViolation::new(
            "attributes.bathrooms",
            "bathrooms must be between 0 and 20",
        ));
    }
    if !(1..=50).contains(&attrs.max_guests) {
        violations.push(FieldViolation::new(
            "attributes.max_guests",
            "max guests must be between 1 and 50",
        ));
    }

    if input.mode == InputMode::Url {
        match input.listing_url.as_deref() {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
            Some(_) => violations.push(FieldViolation::new(
                "listing_url",
                "listing URL must start with http:// or https://",
            )),
            None => violations.push(FieldViolation::new(
                "listing_url",
                "listing URL is required when mode is \"url\"",
            )),
        }
    }

    let nights = input.nights();
    if nights < 1 {
        violations.push(FieldViolation::new(
            "end_date",
            "end date must be after start date",
        ));
    } else if nights > MAX_NIGHTS {
        violations.push(FieldViolation::new(
            "end_date",
            format!("date range must cover at most {} nights", MAX_NIGHTS),
        ));
    }

    let policy = &input.discount_policy;
    for (field, value) in [
        ("discount_policy.weekly_discount_percent", policy.weekly_discount_percent),
        ("discount_policy.monthly_discount_percent", policy.monthly_discount_percent),
        (
            "discount_policy.non_refundable_discount_percent",
            policy.non_refundable_discount_percent,
        ),
    ] {
        if !(0..=100).contains(&value) {
            violations.push(FieldViolation::new(
                field,
                "discount percent must be between 0 and 100",
            ));
        }
    }
    if let Some(cap) = policy.max_total_discount_percent {
        if !(0..=100).contains(&cap) {
            violations.push(FieldViolation::new(
                "discount_policy.max_total_discount_percent",
                "discount cap must be between 0 and 100",
            ));
        }
    }

    violations
}
