//! Dated CSV snapshots of the normalized facility set.
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! ├── osm_2025-05-05.csv
//! └── osm_2025-05-06.csv
//! ```
//!
//! Each file carries the fixed header in [`SNAPSHOT_COLUMNS`]; readers match
//! columns by name. A write for a date that already has a snapshot replaces
//! the file atomically, so reruns never append duplicate rows.

use crate::models::{Address, Category, Entity, EntityId};
use crate::utils::replace_file;
use chrono::NaiveDate;
use csv::{ReaderBuilder, WriterBuilder};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Snapshot header, in file order.
pub const SNAPSHOT_COLUMNS: [&str; 14] = [
    "date",
    "category",
    "name",
    "type",
    "street",
    "houseNumber",
    "postalCode",
    "locality",
    "lat",
    "lon",
    "hours",
    "website",
    "externalId",
    "externalKind",
];

const SNAPSHOT_PATTERN: &str = r"^osm_(\d{4}-\d{2}-\d{2})\.csv$";

static SNAPSHOT_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(SNAPSHOT_PATTERN).expect("static pattern"));

/// One CSV line. Field order must match [`SNAPSHOT_COLUMNS`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRow {
    date: String,
    category: String,
    name: Option<String>,
    #[serde(rename = "type")]
    typ: Option<String>,
    street: Option<String>,
    house_number: Option<String>,
    postal_code: Option<String>,
    locality: Option<String>,
    lat: Option<String>,
    lon: Option<String>,
    hours: Option<String>,
    website: Option<String>,
    external_id: Option<String>,
    external_kind: Option<String>,
}

impl SnapshotRow {
    fn from_entity(date: NaiveDate, e: &Entity) -> Self {
        Self {
            date: date.to_string(),
            category: e.category.label().to_string(),
            name: e.name.clone(),
            typ: e.typ.clone(),
            street: e.address.street.clone(),
            house_number: e.address.house_number.clone(),
            postal_code: e.address.postal_code.clone(),
            locality: e.address.locality.clone(),
            lat: e.lat.map(|v| v.to_string()),
            lon: e.lon.map(|v| v.to_string()),
            hours: e.hours.clone(),
            website: e.website.clone(),
            external_id: e.id.as_ref().map(|id| id.to_string()),
            external_kind: e.kind.clone(),
        }
    }

    /// Rows never fail to convert; unreadable cells become absent values.
    fn into_entity(self, file_date: NaiveDate) -> Entity {
        let observed_on = self.date.trim().parse().unwrap_or(file_date);
        Entity {
            id: self.external_id.as_deref().and_then(EntityId::parse),
            kind: non_blank(self.external_kind),
            category: Category::from_label(&self.category),
            name: non_blank(self.name),
            typ: non_blank(self.typ),
            address: Address {
                street: non_blank(self.street),
                house_number: non_blank(self.house_number),
                postal_code: non_blank(self.postal_code),
                locality: non_blank(self.locality),
            },
            lat: self.lat.and_then(|v| v.trim().parse().ok()),
            lon: self.lon.and_then(|v| v.trim().parse().ok()),
            hours: non_blank(self.hours),
            website: non_blank(self.website),
            observed_on,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Flat-file store holding at most one snapshot per calendar date.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Open a store rooted at `dir`. Nothing is touched on disk until the
    /// first write, and a directory that does not exist yet reads as empty.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the snapshot for `date`, whether or not it exists yet.
    ///
    /// # Returns
    ///
    /// `<dir>/osm_<YYYY-MM-DD>.csv`
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("osm_{date}.csv"))
    }

    /// Persist `entities` as the snapshot for `date`, replacing any earlier one.
    #[instrument(level = "info", skip_all, fields(%date, count = entities.len()))]
    pub fn write(&self, date: NaiveDate, entities: &[Entity]) -> Result<PathBuf, Box<dyn Error>> {
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer.write_record(SNAPSHOT_COLUMNS)?;
        for entity in entities {
            writer.serialize(SnapshotRow::from_entity(date, entity))?;
        }
        let bytes = writer.into_inner().map_err(|e| e.into_error())?;

        let path = self.path_for(date);
        replace_file(&path, &bytes)?;
        info!(path = %path.display(), "Snapshot saved");
        Ok(path)
    }

    /// Dates of all stored snapshots, oldest first. A missing directory means none.
    pub fn list_dates(&self) -> Result<Vec<NaiveDate>, Box<dyn Error>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut dates = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(caps) = SNAPSHOT_FILE.captures(name) else {
                continue;
            };
            match caps[1].parse::<NaiveDate>() {
                Ok(date) => dates.push(date),
                Err(e) => warn!(file = %name, error = %e, "Ignoring snapshot with impossible date"),
            }
        }
        dates.sort_unstable();
        dates.dedup();
        debug!(count = dates.len(), "Listed snapshot dates");
        Ok(dates)
    }

    /// Load the snapshot stored for `date`.
    pub fn read(&self, date: NaiveDate) -> Result<Vec<Entity>, Box<dyn Error>> {
        let path = self.path_for(date);
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&path)?;

        let mut entities = Vec::new();
        for row in reader.deserialize::<SnapshotRow>() {
            entities.push(row?.into_entity(date));
        }
        debug!(path = %path.display(), count = entities.len(), "Read snapshot");
        Ok(entities)
    }
}
