//! Core domain models for RateVault

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a pricing report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Waiting for a worker to claim it
    Queued,
    /// Claimed by a worker and being processed
    Running,
    /// Finished with a summary and calendar attached
    Ready,
    /// Finished with an error message attached
    Error,
}

impl ReportStatus {
    /// Whether this status is terminal (no further transitions)
    #[allow(dead_code)]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReportStatus::Ready | ReportStatus::Error)
    }
}

/// How the listing input was provided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// Scrape an existing listing URL
    Url,
    /// Describe the property by its attributes
    Criteria,
}

impl InputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputMode::Url => "url",
            InputMode::Criteria => "criteria",
        }
    }
}

/// How weekly/monthly/non-refundable discounts combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountStacking {
    /// Applicable discounts add up (subject to the total cap)
    Additive,
    /// Only the single largest applicable discount applies
    Highest,
}

impl DiscountStacking {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountStacking::Additive => "additive",
            DiscountStacking::Highest => "highest",
        }
    }
}

/// Discount policy attached to a pricing request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountPolicy {
    /// Percent off for stays of 7+ nights
    #[serde(default)]
    pub weekly_discount_percent: i32,
    /// Percent off for stays of 28+ nights
    #[serde(default)]
    pub monthly_discount_percent: i32,
    /// Whether the refundable rate plan is offered
    #[serde(default = "default_refundable")]
    pub refundable: bool,
    /// Percent off for the non-refundable rate plan
    #[serde(default)]
    pub non_refundable_discount_percent: i32,
    #[serde(default = "default_stacking")]
    pub stacking: DiscountStacking,
    /// Cap on the combined discount; absent means the default cap
    pub max_total_discount_percent: Option<i32>,
}

fn default_refundable() -> bool {
    true
}

fn default_stacking() -> DiscountStacking {
    DiscountStacking::Additive
}

impl Default for DiscountPolicy {
    fn default() -> Self {
        Self {
            weekly_discount_percent: 0,
            monthly_discount_percent: 0,
            refundable: true,
            non_refundable_discount_percent: 0,
            stacking: DiscountStacking::Additive,
            max_total_discount_percent: None,
        }
    }
}

/// Structured attribute bag describing the property.
///
/// Only a subset of these feed the cache key; `amenities`, `square_feet`
/// and `display_name` are cosmetic and never affect pricing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingAttributes {
    pub property_type: String,
    pub bedrooms: i32,
    pub bathrooms: i32,
    pub max_guests: i32,
    #[serde(default)]
    pub amenities: Vec<String>,
    pub square_feet: Option<i32>,
    pub display_name: Option<String>,
}

/// The fully-resolved input a report is generated from.
///
/// Every submission path (direct or by saved-listing reference) resolves to
/// one of these before the cache key is derived, so the key is computed from
/// identical material regardless of entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveInput {
    pub address: String,
    pub attributes: ListingAttributes,
    pub mode: InputMode,
    pub listing_url: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub discount_policy: DiscountPolicy,
}

impl EffectiveInput {
    /// Number of priced nights in the half-open range `[start_date, end_date)`
    pub fn nights(&self) -> i64 {
        (self.end_date - self.start_date).num_days()
    }
}

/// Pricing statistics and recommendation produced by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub nightly_rate_avg: f64,
    pub nightly_rate_min: f64,
    pub nightly_rate_max: f64,
    pub projected_occupancy: f64,
    pub projected_monthly_revenue: f64,
    pub recommendation: String,
    /// Number of comparable listings the estimate is based on
    pub comparable_count: i64,
    /// Where the comparables were sourced from
    pub data_source: String,
}

/// One priced day in a report's calendar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub nightly_rate: f64,
    /// Relative demand in 0.0..=1.0
    pub demand_score: f64,
}

/// A completed report's result payload. This is also the value shape stored
/// in the report cache, so a cached outcome round-trips identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportOutcome {
    pub summary: ReportSummary,
    pub calendar: Vec<CalendarDay>,
}

/// What a worker hands back when finishing a claimed report
#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    /// Processing succeeded; the report becomes `ready`
    Ready(ReportOutcome),
    /// Processing failed; the report becomes `error` with this message
    Failed(String),
}

/// A pricing-analysis job and its eventual result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    /// Short public token used in share URLs
    pub share_token: String,
    /// Owning user, when the submitter was authenticated
    pub owner_id: Option<Uuid>,
    pub address: String,
    pub attributes: ListingAttributes,
    pub mode: InputMode,
    pub listing_url: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub discount_policy: DiscountPolicy,
    /// Derived once at creation, never recomputed
    pub cache_key: String,
    pub status: ReportStatus,
    pub claimed_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub worker_claim_token: Option<String>,
    pub worker_attempts: i32,
    pub summary: Option<ReportSummary>,
    pub calendar: Option<Vec<CalendarDay>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user's reusable input template, independent of any single report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedListing {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub address: String,
    pub attributes: ListingAttributes,
    pub mode: InputMode,
    pub listing_url: Option<String>,
    pub discount_policy: DiscountPolicy,
    /// Most recent report generated from this listing
    pub latest_report_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What caused a listing→report link to be recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkTrigger {
    /// First submission that created the listing
    Manual,
    /// Re-submission against an existing listing
    Rerun,
    /// Generated by a schedule (reserved, never produced interactively)
    Scheduled,
}

impl LinkTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkTrigger::Manual => "manual",
            LinkTrigger::Rerun => "rerun",
            LinkTrigger::Scheduled => "scheduled",
        }
    }
}

/// Join row recording which listing triggered which report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingReportLink {
    pub listing_id: Uuid,
    pub report_id: Uuid,
    pub trigger: LinkTrigger,
    pub created_at: DateTime<Utc>,
}

/// Per-field override of [`ListingAttributes`] for by-reference submissions
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttributesPatch {
    pub property_type: Option<String>,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub max_guests: Option<i32>,
    pub amenities: Option<Vec<String>>,
    pub square_feet: Option<i32>,
    pub display_name: Option<String>,
}

/// Per-field override of [`DiscountPolicy`] for by-reference submissions
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscountPolicyPatch {
    pub weekly_discount_percent: Option<i32>,
    pub monthly_discount_percent: Option<i32>,
    pub refundable: Option<bool>,
    pub non_refundable_discount_percent: Option<i32>,
    pub stacking: Option<DiscountStacking>,
    pub max_total_discount_percent: Option<i32>,
}

/// Request payload for submitting a report
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitReportRequest {
    /// Submit by reference to a saved listing owned by the caller
    pub listing_id: Option<Uuid>,
    pub address: Option<String>,
    pub mode: Option<InputMode>,
    pub listing_url: Option<String>,
    pub attributes: Option<AttributesPatch>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub discount_policy: Option<DiscountPolicyPatch>,
    /// Persist the effective input as a saved listing under this name
    pub save_as: Option<String>,
}

/// Response payload for a submitted report
#[derive(Debug, Clone, Serialize)]
pub struct SubmitReportResponse {
    pub id: Uuid,
    pub share_token: String,
    pub status: ReportStatus,
}
