//! Deterministic cache key derivation for pricing requests.
//!
//! Two independent call sites submit logically-identical input (direct
//! submission and saved-listing rerun); both must land on the same cache
//! key or caching silently stops working and external scraping runs twice.
//! The guarantee comes from canonicalization, not from the hash: the key is
//! derived from an explicit, fully-enumerated field map serialized with
//! sorted keys, so caller-side field order and absent optionals cannot leak
//! into the digest.

use serde_json::{Map, Value};

use crate::models::EffectiveInput;

/// Length of a derived cache key in hex characters
pub const CACHE_KEY_LEN: usize = 32;

/// Cap applied when the policy does not set `max_total_discount_percent`
pub const DEFAULT_MAX_DISCOUNT_CAP: i32 = 40;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;
const HASH_ROUNDS: u32 = 8;

/// Derive the cache key for a resolved pricing request.
///
/// Pure and total over [`EffectiveInput`]; malformed input is rejected by
/// validation before this runs. Returns a fixed 32-char lowercase hex
/// string.
pub fn derive_cache_key(input: &EffectiveInput) -> String {
    let payload = canonical_payload(input);

    let mut digest = String::with_capacity((HASH_ROUNDS as usize) * 8);
    for round in 0..HASH_ROUNDS {
        let hash = fnv1a_round(payload.as_bytes(), round);
        digest.push_str(&format!("{:08x}", hash));
    }
    digest.truncate(CACHE_KEY_LEN);
    digest
}

/// Serialize exactly the pricing-relevant fields, keys sorted.
///
/// serde_json's default `Map` is a BTreeMap, so `to_string` emits keys in
/// lexicographic order without any extra sorting step. Absent optionals get
/// their documented defaults here so the two call sites cannot diverge on
/// them.
fn canonical_payload(input: &EffectiveInput) -> String {
    let attrs = &input.attributes;
    let policy = &input.discount_policy;

    let mut map = Map::new();
    map.insert("address".into(), Value::from(input.address.as_str()));
    map.insert("bathrooms".into(), Value::from(attrs.bathrooms));
    map.insert("bedrooms".into(), Value::from(attrs.bedrooms));
    map.insert(
        "end_date".into(),
        Value::from(input.end_date.format("%Y-%m-%d").to_string()),
    );
    map.insert("input_mode".into(), Value::from(input.mode.as_str()));
    map.insert(
        "listing_url".into(),
        Value::from(input.listing_url.as_deref().unwrap_or("")),
    );
    map.insert(
        "max_discount_cap".into(),
        Value::from(
            policy
                .max_total_discount_percent
                .unwrap_or(DEFAULT_MAX_DISCOUNT_CAP),
        ),
    );
    map.insert("max_guests".into(), Value::from(attrs.max_guests));
    map.insert(
        "monthly_discount".into(),
        Value::from(policy.monthly_discount_percent),
    );
    map.insert(
        "non_refundable_discount".into(),
        Value::from(policy.non_refundable_discount_percent),
    );
    map.insert(
        "property_type".into(),
        Value::from(attrs.property_type.as_str()),
    );
    map.insert("refundable".into(), Value::from(policy.refundable));
    map.insert("stacking_mode".into(), Value::from(policy.stacking.as_str()));
    map.insert(
        "start_date".into(),
        Value::from(input.start_date.format("%Y-%m-%d").to_string()),
    );
    map.insert(
        "weekly_discount".into(),
        Value::from(policy.weekly_discount_percent),
    );

    Value::Object(map).to_string()
}

/// One FNV-1a pass over the payload, seeded by the round index
fn fnv1a_round(bytes: &[u8], round: u32) -> u32 {
    let mut hash = FNV_OFFSET_BASIS ^ round.wrapping_mul(FNV_PRIME);
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiscountPolicy, DiscountStacking, InputMode, ListingAttributes};
    use chrono::NaiveDate;

    fn base_input() -> EffectiveInput {
        EffectiveInput {
            address: "123 main st, portland, or".to_string(),
            attributes: ListingAttributes {
                property_type: "house".to_string(),
                bedrooms: 2,
                bathrooms: 2,
                max_guests: 4,
                amenities: vec!["wifi".to_string(), "parking".to_string()],
                square_feet: Some(1200),
                display_name: Some("Cozy Craftsman".to_string()),
            },
            mode: InputMode::Criteria,
            listing_url: None,
            start_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 3, 8).unwrap(),
            discount_policy: DiscountPolicy {
                weekly_discount_percent: 10,
                monthly_discount_percent: 0,
                refundable: true,
                non_refundable_discount_percent: 5,
                stacking: DiscountStacking::Additive,
                max_total_discount_percent: None,
            },
        }
    }

    #[test]
    fn test_key_shape() {
        let key = derive_cache_key(&base_input());
        assert_eq!(key.len(), CACHE_KEY_LEN);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, key.to_lowercase());
    }

    #[test]
    fn test_deterministic_across_calls() {
        let a = derive_cache_key(&base_input());
        let b = derive_cache_key(&base_input());
        assert_eq!(a, b);
    }

    #[test]
    fn test_cosmetic_fields_do_not_affect_key() {
        let base = derive_cache_key(&base_input());

        let mut input = base_input();
        input.attributes.amenities = vec!["hot tub".to_string()];
        input.attributes.square_feet = Some(2400);
        input.attributes.display_name = None;
        assert_eq!(derive_cache_key(&input), base);
    }

    #[test]
    fn test_absent_optionals_use_documented_defaults() {
        // listing_url None vs Some("") are the same canonical value
        let mut with_empty = base_input();
        with_empty.listing_url = Some("".to_string());
        assert_eq!(derive_cache_key(&base_input()), derive_cache_key(&with_empty));

        // cap None vs Some(40) are the same canonical value
        let mut with_cap = base_input();
        with_cap.discount_policy.max_total_discount_percent = Some(DEFAULT_MAX_DISCOUNT_CAP);
        assert_eq!(derive_cache_key(&base_input()), derive_cache_key(&with_cap));
    }

    #[test]
    fn test_each_pricing_field_changes_key() {
        let base = derive_cache_key(&base_input());

        let mut input = base_input();
        input.address = "456 oak ave, portland, or".to_string();
        assert_ne!(derive_cache_key(&input), base, "address");

        let mut input = base_input();
        input.attributes.bedrooms = 3;
        assert_ne!(derive_cache_key(&input), base, "bedrooms");

        let mut input = base_input();
        input.attributes.bathrooms = 1;
        assert_ne!(derive_cache_key(&input), base, "bathrooms");

        let mut input = base_input();
        input.attributes.max_guests = 6;
        assert_ne!(derive_cache_key(&input), base, "max_guests");

        let mut input = base_input();
        input.attributes.property_type = "condo".to_string();
        assert_ne!(derive_cache_key(&input), base, "property_type");

        let mut input = base_input();
        input.start_date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert_ne!(derive_cache_key(&input), base, "start_date");

        let mut input = base_input();
        input.end_date = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        assert_ne!(derive_cache_key(&input), base, "end_date");

        let mut input = base_input();
        input.mode = InputMode::Url;
        assert_ne!(derive_cache_key(&input), base, "input_mode");

        let mut input = base_input();
        input.listing_url = Some("https://example.com/rooms/42".to_string());
        assert_ne!(derive_cache_key(&input), base, "listing_url");

        let mut input = base_input();
        input.discount_policy.weekly_discount_percent = 15;
        assert_ne!(derive_cache_key(&input), base, "weekly_discount");

        let mut input = base_input();
        input.discount_policy.monthly_discount_percent = 20;
        assert_ne!(derive_cache_key(&input), base, "monthly_discount");

        let mut input = base_input();
        input.discount_policy.refundable = false;
        assert_ne!(derive_cache_key(&input), base, "refundable");

        let mut input = base_input();
        input.discount_policy.non_refundable_discount_percent = 12;
        assert_ne!(derive_cache_key(&input), base, "non_refundable_discount");

        let mut input = base_input();
        input.discount_policy.stacking = DiscountStacking::Highest;
        assert_ne!(derive_cache_key(&input), base, "stacking_mode");

        let mut input = base_input();
        input.discount_policy.max_total_discount_percent = Some(25);
        assert_ne!(derive_cache_key(&input), base, "max_discount_cap");
    }

    #[test]
    fn test_canonical_payload_keys_sorted() {
        let payload = canonical_payload(&base_input());
        let positions: Vec<usize> = [
            "\"address\"",
            "\"bathrooms\"",
            "\"bedrooms\"",
            "\"end_date\"",
            "\"input_mode\"",
            "\"listing_url\"",
            "\"max_discount_cap\"",
            "\"max_guests\"",
            "\"monthly_discount\"",
            "\"non_refundable_discount\"",
            "\"property_type\"",
            "\"refundable\"",
            "\"stacking_mode\"",
            "\"start_date\"",
            "\"weekly_discount\"",
        ]
        .iter()
        .map(|k| payload.find(k).expect(k))
        .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_round_seeds_differ() {
        // the concatenated digest must not be one 8-char block repeated
        let key = derive_cache_key(&base_input());
        assert_ne!(key[0..8], key[8..16]);
    }
}
