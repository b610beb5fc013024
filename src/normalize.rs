//! Mapping of raw Overpass elements onto canonical [`Entity`] records.
//!
//! Classification is table driven. [`CATEGORY_RULES`] is evaluated top to
//! bottom and the first tag key present on an element decides its category;
//! the same table, in the same order, decides which tag value becomes the
//! sub-type. Adding a category means adding a row.
//!
//! Normalization never drops, merges or reorders elements. An element with
//! nothing usable still becomes one entity with every optional field absent.

use crate::models::{Address, Category, Entity, RawRecord};
use chrono::NaiveDate;

/// One row of the classification table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryRule {
    /// OSM tag key, e.g. `shop`.
    pub key: &'static str,
    pub category: Category,
}

/// Classification table, highest priority first.
pub const CATEGORY_RULES: &[CategoryRule] = &[
    CategoryRule {
        key: "shop",
        category: Category::Retail,
    },
    CategoryRule {
        key: "amenity",
        category: Category::FoodService,
    },
    CategoryRule {
        key: "leisure",
        category: Category::Leisure,
    },
    CategoryRule {
        key: "tourism",
        category: Category::Tourism,
    },
];

const NAME_KEYS: &[&str] = &["name"];
const STREET_KEYS: &[&str] = &["addr:street"];
const HOUSE_NUMBER_KEYS: &[&str] = &["addr:housenumber"];
const POSTAL_CODE_KEYS: &[&str] = &["addr:postcode"];
const LOCALITY_KEYS: &[&str] = &["addr:city"];
const HOURS_KEYS: &[&str] = &["opening_hours"];
const WEBSITE_KEYS: &[&str] = &["website", "contact:website"];

/// Tag keys the upstream query must select, in priority order.
pub fn tag_keys(rules: &[CategoryRule]) -> Vec<&'static str> {
    rules.iter().map(|r| r.key).collect()
}

/// Category of the first rule whose key is present, else [`Category::Other`].
pub fn classify(record: &RawRecord, rules: &[CategoryRule]) -> Category {
    rules
        .iter()
        .find(|r| record.has_tag(r.key))
        .map(|r| r.category)
        .unwrap_or(Category::Other)
}

/// Sub-type: the first non-blank value among the rule keys, in rule order.
pub fn resolve_type(record: &RawRecord, rules: &[CategoryRule]) -> Option<String> {
    rules
        .iter()
        .find_map(|r| record.tag(r.key))
        .map(str::to_string)
}

/// Direct position first, upstream representative point second, per coordinate.
pub fn resolve_position(record: &RawRecord) -> (Option<f64>, Option<f64>) {
    (
        record.position.lat.or(record.center.lat),
        record.position.lon.or(record.center.lon),
    )
}

fn first_tag(record: &RawRecord, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .find_map(|k| record.tag(k))
        .map(|v| v.trim().to_string())
}

/// Normalize one element observed on `observed_on`.
///
/// # Arguments
///
/// * `record` - The raw upstream element
/// * `observed_on` - Snapshot date stamped on the entity
/// * `rules` - Classification table, highest priority first
///
/// # Returns
///
/// Exactly one [`Entity`]. Missing or blank tags leave the matching field
/// absent; nothing about the element can make this fail.
pub fn normalize_record(
    record: &RawRecord,
    observed_on: NaiveDate,
    rules: &[CategoryRule],
) -> Entity {
    let (lat, lon) = resolve_position(record);
    Entity {
        id: record.id.clone(),
        kind: record.kind.clone(),
        category: classify(record, rules),
        name: first_tag(record, NAME_KEYS),
        typ: resolve_type(record, rules),
        address: Address {
            street: first_tag(record, STREET_KEYS),
            house_number: first_tag(record, HOUSE_NUMBER_KEYS),
            postal_code: first_tag(record, POSTAL_CODE_KEYS),
            locality: first_tag(record, LOCALITY_KEYS),
        },
        lat,
        lon,
        hours: first_tag(record, HOURS_KEYS),
        website: first_tag(record, WEBSITE_KEYS),
        observed_on,
    }
}

/// Normalize every element with the default [`CATEGORY_RULES`], preserving input order.
pub fn normalize(records: &[RawRecord], observed_on: NaiveDate) -> Vec<Entity> {
    records
        .iter()
        .map(|r| normalize_record(r, observed_on, CATEGORY_RULES))
        .collect()
}
