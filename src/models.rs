//! Data models for raw upstream records and their normalized representations.
//!
//! This module defines the core data structures used throughout the application:
//! - [`RawRecord`]: An unprocessed tagged element as returned by the Overpass API
//! - [`Entity`]: The canonical facility record stored in a dated snapshot
//! - [`Category`]: The closed, ordered set of facility categories
//! - [`EventRecord`]: A single listing scraped from an event page
//!
//! Optional attributes are modelled as `Option`. An absent name or type is never
//! stored as a placeholder string; the `"unknown"` marker only exists at display time.

use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Placeholder shown wherever a name is absent.
pub const UNKNOWN: &str = "unknown";

/// Externally assigned identifier of an OpenStreetMap element.
///
/// Overpass hands out numeric ids, but snapshot files round-trip them as text,
/// so the identifier is kept in its textual form to make ids read back from
/// disk compare equal to freshly fetched ones.
///
/// Nodes, ways and relations are numbered independently upstream, so an id on
/// its own does not name a facility. Use [`Entity::key`] for identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(String);

impl EntityId {
    /// Build an id from arbitrary text. Blank text is not an id.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for EntityId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A geographic position where either coordinate may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Position {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl Position {
    fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(v) => Self {
                lat: number_field(v, "lat"),
                lon: number_field(v, "lon"),
            },
            None => Self::default(),
        }
    }
}

/// An unprocessed element as returned by the Overpass API.
///
/// Construction never fails: whatever part of an element is unreadable is
/// simply left empty, so that the normalizer can still turn it into an entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    /// Element kind: `node`, `way` or `relation`.
    pub kind: Option<String>,
    /// Upstream element id.
    pub id: Option<EntityId>,
    /// Position attached directly to the element (nodes).
    pub position: Position,
    /// Representative point computed upstream for ways and relations.
    pub center: Position,
    /// OSM tags of the element.
    pub tags: BTreeMap<String, String>,
}

impl RawRecord {
    /// Leniently read one element of an Overpass `elements` array.
    pub fn from_value(value: &Value) -> Self {
        let tags = value
            .get("tags")
            .and_then(Value::as_object)
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| scalar_to_string(v).map(|s| (k.clone(), s)))
                    .collect()
            })
            .unwrap_or_default();

        let id = match value.get("id") {
            Some(Value::Number(n)) => n
                .as_u64()
                .map(EntityId::from)
                .or_else(|| n.as_i64().map(EntityId::from)),
            Some(Value::String(s)) => EntityId::parse(s),
            _ => None,
        };

        Self {
            kind: value.get("type").and_then(Value::as_str).map(str::to_string),
            id,
            position: Position::from_value(Some(value)),
            center: Position::from_value(value.get("center")),
            tags,
        }
    }

    /// Whether the element carries `key` at all, whatever its value.
    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.contains_key(key)
    }

    /// Non-blank value of `key`.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

fn number_field(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Facility category. Variant order is the display order used in summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Retail,
    FoodService,
    Leisure,
    Tourism,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Retail,
        Category::FoodService,
        Category::Leisure,
        Category::Tourism,
        Category::Other,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::Retail => "retail",
            Category::FoodService => "food/service",
            Category::Leisure => "leisure",
            Category::Tourism => "tourism",
            Category::Other => "other",
        }
    }

    /// Inverse of [`Category::label`]; unrecognised labels read as `Other`.
    pub fn from_label(label: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|c| c.label() == label.trim())
            .unwrap_or(Category::Other)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Postal address of a facility.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Address {
    pub street: Option<String>,
    pub house_number: Option<String>,
    pub postal_code: Option<String>,
    pub locality: Option<String>,
}

/// The canonical unit tracked from snapshot to snapshot.
///
/// Two entities with equal [`Entity::key`] are considered the same real-world
/// facility. Entities are created once per run and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: Option<EntityId>,
    /// Upstream element kind (`node`, `way`, `relation`).
    pub kind: Option<String>,
    pub category: Category,
    pub name: Option<String>,
    /// Sub-type, e.g. `bakery` for `shop=bakery`.
    pub typ: Option<String>,
    pub address: Address,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub hours: Option<String>,
    pub website: Option<String>,
    /// Date of the snapshot that produced this entity.
    pub observed_on: NaiveDate,
}

/// Identity of a facility across snapshots: element kind plus element id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey<'a> {
    pub kind: Option<&'a str>,
    pub id: &'a EntityId,
}

impl Entity {
    /// Identity key, or `None` when the entity has no id.
    ///
    /// # Returns
    ///
    /// `Some` with the element kind and id. Two entities with equal keys are
    /// the same real-world facility; entities without an id have no identity
    /// and never take part in change detection.
    pub fn key(&self) -> Option<EntityKey<'_>> {
        self.id.as_ref().map(|id| EntityKey {
            kind: self.kind.as_deref(),
            id,
        })
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN)
    }
}

/// A single listing scraped from an event page.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub retrieved_on: NaiveDate,
    pub title: Option<String>,
    pub event_date: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    /// URL of the page the listing was scraped from.
    pub source: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_record_from_node() {
        let value = json!({
            "type": "node",
            "id": 20962297,
            "lat": 47.0598329,
            "lon": 15.4701174,
            "tags": {
                "addr:city": "Graz",
                "name": "denn's Biomarkt",
                "shop": "supermarket",
                "level": 0
            }
        });

        let record = RawRecord::from_value(&value);
        assert_eq!(record.kind.as_deref(), Some("node"));
        assert_eq!(record.id, Some(EntityId::from(20962297u64)));
        assert_eq!(record.position.lat, Some(47.0598329));
        assert_eq!(record.center, Position::default());
        assert_eq!(record.tag("addr:city"), Some("Graz"));
        assert_eq!(record.tag("level"), Some("0"));
    }

    #[test]
    fn test_raw_record_from_way_with_center() {
        let value = json!({
            "type": "way",
            "id": 42,
            "center": { "lat": 51.55, "lon": 7.31 },
            "tags": { "leisure": "park" }
        });

        let record = RawRecord::from_value(&value);
        assert_eq!(record.position, Position::default());
        assert_eq!(record.center.lat, Some(51.55));
        assert_eq!(record.center.lon, Some(7.31));
    }

    #[test]
    fn test_raw_record_from_garbage_degrades() {
        let record = RawRecord::from_value(&json!("not an element"));
        assert_eq!(record, RawRecord::default());

        let record = RawRecord::from_value(&json!({ "id": null, "tags": [1, 2] }));
        assert_eq!(record.id, None);
        assert!(record.tags.is_empty());
    }

    #[test]
    fn test_tag_presence_vs_value() {
        let record = RawRecord::from_value(&json!({ "tags": { "shop": "  " } }));
        assert!(record.has_tag("shop"));
        assert_eq!(record.tag("shop"), None);
    }

    #[test]
    fn test_entity_id_parse() {
        assert_eq!(EntityId::parse(" 17 "), Some(EntityId::from(17u64)));
        assert_eq!(EntityId::parse(""), None);
        assert_eq!(EntityId::parse("   "), None);
    }

    #[test]
    fn test_category_labels() {
        for category in Category::ALL {
            assert_eq!(Category::from_label(category.label()), category);
        }
        assert_eq!(Category::from_label("Laden/Geschäft"), Category::Other);
        assert_eq!(Category::FoodService.to_string(), "food/service");
    }

    #[test]
    fn test_entity_display_fallbacks() {
        let entity = Entity {
            id: None,
            kind: None,
            category: Category::Other,
            name: None,
            typ: None,
            address: Address::default(),
            lat: None,
            lon: None,
            hours: None,
            website: None,
            observed_on: NaiveDate::from_ymd_opt(2025, 5, 6).unwrap(),
        };
        assert_eq!(entity.display_name(), UNKNOWN);
        assert_eq!(entity.key(), None);
    }

    #[test]
    fn test_key_separates_element_kinds() {
        let node = Entity {
            id: Some(EntityId::from(5u64)),
            kind: Some("node".into()),
            category: Category::Retail,
            name: Some("Kiosk".into()),
            typ: None,
            address: Address::default(),
            lat: None,
            lon: None,
            hours: None,
            website: None,
            observed_on: NaiveDate::from_ymd_opt(2025, 5, 6).unwrap(),
        };
        let way = Entity {
            kind: Some("way".into()),
            name: Some("Stadtgarten".into()),
            ..node.clone()
        };

        assert_eq!(node.id, way.id);
        assert_ne!(node.key(), way.key());
        assert_eq!(node.key().map(|k| k.kind), Some(Some("node")));
    }
}
