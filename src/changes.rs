//! Appeared/disappeared detection between the two most recent snapshots.
//!
//! Identity is the [`EntityKey`] (element kind plus upstream id) and nothing
//! else. Entities without an id are removed from both key sets before any set
//! arithmetic, so they can never be reported as new or as closed. Attribute
//! changes on a key present in both snapshots are not reported.

use crate::models::{Entity, EntityKey};
use crate::outputs::report;
use crate::outputs::snapshots::SnapshotStore;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::error::Error;
use std::path::Path;
use tracing::{info, instrument};

/// Facilities that appeared or disappeared between two snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeReport {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    /// Entities of the `to_date` snapshot whose key is absent from `from_date`.
    pub appeared: Vec<Entity>,
    /// Entities of the `from_date` snapshot whose key is absent from `to_date`.
    pub disappeared: Vec<Entity>,
}

/// Result of change detection. Too little history is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeOutcome {
    NotEnoughData { snapshots: usize },
    Report(ChangeReport),
}

/// Keys of `entities`, with id-less entities left out.
fn key_set(entities: &[Entity]) -> BTreeSet<EntityKey<'_>> {
    entities.iter().filter_map(Entity::key).collect()
}

fn restrict(entities: &[Entity], keys: &BTreeSet<EntityKey<'_>>) -> Vec<Entity> {
    entities
        .iter()
        .filter(|e| e.key().is_some_and(|key| keys.contains(&key)))
        .cloned()
        .collect()
}

/// Compare snapshot `prev` (taken on `from_date`) with `curr` (taken on `to_date`).
///
/// # Arguments
///
/// * `from_date` - Date of the older snapshot
/// * `prev` - Entities of the older snapshot
/// * `to_date` - Date of the newer snapshot
/// * `curr` - Entities of the newer snapshot
///
/// # Returns
///
/// A [`ChangeReport`] whose `appeared` rows come from `curr` and whose
/// `disappeared` rows come from `prev`, each in snapshot order. Every row
/// carrying a changed key is included, duplicates too.
pub fn compare(
    from_date: NaiveDate,
    prev: &[Entity],
    to_date: NaiveDate,
    curr: &[Entity],
) -> ChangeReport {
    let prev_keys = key_set(prev);
    let curr_keys = key_set(curr);

    let appeared_keys: BTreeSet<EntityKey<'_>> =
        curr_keys.difference(&prev_keys).copied().collect();
    let disappeared_keys: BTreeSet<EntityKey<'_>> =
        prev_keys.difference(&curr_keys).copied().collect();

    ChangeReport {
        from_date,
        to_date,
        appeared: restrict(curr, &appeared_keys),
        disappeared: restrict(prev, &disappeared_keys),
    }
}

/// Compare the two chronologically latest snapshots in `store`.
#[instrument(level = "info", skip_all, fields(dir = %store.dir().display()))]
pub fn detect_changes(store: &SnapshotStore) -> Result<ChangeOutcome, Box<dyn Error>> {
    let dates = store.list_dates()?;
    let [.., from_date, to_date] = dates.as_slice() else {
        info!(
            snapshots = dates.len(),
            "Not enough snapshots for change detection"
        );
        return Ok(ChangeOutcome::NotEnoughData {
            snapshots: dates.len(),
        });
    };

    let prev = store.read(*from_date)?;
    let curr = store.read(*to_date)?;
    let report = compare(*from_date, &prev, *to_date, &curr);
    info!(
        %from_date,
        %to_date,
        appeared = report.appeared.len(),
        disappeared = report.disappeared.len(),
        "Detected changes"
    );
    Ok(ChangeOutcome::Report(report))
}

/// Detect changes and, when there is a report, persist it to `reports_dir`.
///
/// # Errors
///
/// Fails when a snapshot cannot be listed or read, or when the report cannot
/// be written. Too little history is not an error.
pub fn detect_and_record(
    store: &SnapshotStore,
    reports_dir: &Path,
) -> Result<ChangeOutcome, Box<dyn Error>> {
    let outcome = detect_changes(store)?;
    if let ChangeOutcome::Report(ref change_report) = outcome {
        report::write_report(change_report, reports_dir)?;
    }
    Ok(outcome)
}
