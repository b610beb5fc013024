//! YAML change report written next to each detection run.
//!
//! # Output Structure
//!
//! ```text
//! reports_dir/
//! └── changes_2025-05-06.yaml   # named after the newer snapshot date
//! ```
//!
//! ```yaml
//! periodFrom: 2025-05-05
//! periodTo: 2025-05-06
//! appearedCount: 1
//! disappearedCount: 0
//! appeared:
//! - name: Bäckerei Malzer
//!   category: retail
//!   street: Münsterstraße
//!   houseNumber: '5'
//! disappeared: []
//! ```

use crate::changes::ChangeReport;
use crate::models::Entity;
use crate::utils::replace_file;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Serialized form of a [`ChangeReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDocument {
    pub period_from: NaiveDate,
    pub period_to: NaiveDate,
    pub appeared_count: usize,
    pub disappeared_count: usize,
    pub appeared: Vec<ReportEntry>,
    pub disappeared: Vec<ReportEntry>,
}

/// The subset of entity fields shown in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEntry {
    pub name: String,
    pub category: String,
    pub street: Option<String>,
    pub house_number: Option<String>,
}

impl From<&Entity> for ReportEntry {
    fn from(e: &Entity) -> Self {
        Self {
            name: e.display_name().to_string(),
            category: e.category.label().to_string(),
            street: e.address.street.clone(),
            house_number: e.address.house_number.clone(),
        }
    }
}

impl From<&ChangeReport> for ReportDocument {
    fn from(report: &ChangeReport) -> Self {
        Self {
            period_from: report.from_date,
            period_to: report.to_date,
            appeared_count: report.appeared.len(),
            disappeared_count: report.disappeared.len(),
            appeared: report.appeared.iter().map(ReportEntry::from).collect(),
            disappeared: report.disappeared.iter().map(ReportEntry::from).collect(),
        }
    }
}

/// Location of the report whose newer snapshot is `to_date`.
///
/// Reports are named after the period end only, so re-running detection for
/// the same day replaces the earlier report.
pub fn report_path(reports_dir: &Path, to_date: NaiveDate) -> PathBuf {
    reports_dir.join(format!("changes_{to_date}.yaml"))
}

/// Write `report` to `reports_dir`, replacing a report for the same period end.
#[instrument(level = "info", skip_all, fields(reports_dir = %reports_dir.display()))]
pub fn write_report(report: &ChangeReport, reports_dir: &Path) -> Result<PathBuf, Box<dyn Error>> {
    let document = ReportDocument::from(report);
    let yaml = serde_yaml::to_string(&document)?;

    let path = report_path(reports_dir, report.to_date);
    replace_file(&path, yaml.as_bytes())?;
    info!(
        path = %path.display(),
        period = %format!("{} → {}", document.period_from, document.period_to),
        appeared = document.appeared_count,
        disappeared = document.disappeared_count,
        "Change report saved"
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::compare;
    use crate::models::Category;
    use crate::outputs::snapshots::tests::{day, entity};
    use tempfile::tempdir;

    #[test]
    fn test_report_document_fields() {
        let prev = vec![entity(Some(1), "A", Category::Retail, day(5))];
        let mut unnamed = entity(Some(3), "C", Category::Tourism, day(6));
        unnamed.name = None;
        let curr = vec![unnamed];

        let document = ReportDocument::from(&compare(day(5), &prev, day(6), &curr));
        assert_eq!(document.appeared_count, 1);
        assert_eq!(document.disappeared_count, 1);
        assert_eq!(document.appeared[0].name, "unknown");
        assert_eq!(document.appeared[0].category, "tourism");
        let gone = &document.disappeared[0];
        assert_eq!(gone.street.as_deref(), Some("Marktplatz"));
        assert_eq!(gone.house_number.as_deref(), Some("1"));
    }

    #[test]
    fn test_write_report_yaml_keys() {
        let dir = tempdir().unwrap();
        let report = compare(
            day(5),
            &[],
            day(6),
            &[entity(Some(3), "C", Category::Retail, day(6))],
        );

        let path = write_report(&report, dir.path()).unwrap();
        assert_eq!(path, dir.path().join("changes_2025-05-06.yaml"));

        let text = std::fs::read_to_string(&path).unwrap();
        let keys = [
            "periodFrom:",
            "periodTo:",
            "appearedCount: 1",
            "disappearedCount: 0",
            "houseNumber:",
        ];
        for key in keys {
            assert!(text.contains(key), "missing {key} in\n{text}");
        }

        let parsed: ReportDocument = serde_yaml::from_str(&text).unwrap();
        assert_eq!(parsed, ReportDocument::from(&report));
    }
}
