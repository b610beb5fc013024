//! Per-run summary, written as JSON and echoed to the log.

use crate::changes::ChangeOutcome;
use crate::models::{Category, Entity};
use crate::utils::replace_file;
use chrono::NaiveDate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCount {
    pub category: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeCounts {
    pub period_from: NaiveDate,
    pub period_to: NaiveDate,
    pub appeared_count: usize,
    pub disappeared_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub date: NaiveDate,
    pub entity_total: usize,
    /// One entry per category in display order, zero counts included.
    pub categories: Vec<CategoryCount>,
    pub event_total: usize,
    pub fetch_attempts: usize,
    pub fetch_degraded: bool,
    /// `None` when there was not enough history to compare.
    pub changes: Option<ChangeCounts>,
}

impl RunSummary {
    /// Assemble the summary of one run.
    ///
    /// # Arguments
    ///
    /// * `date` - Run date
    /// * `entities` - Entities written to today's snapshot
    /// * `event_total` - Number of scraped event listings
    /// * `fetch_attempts` - Attempts the Overpass fetch needed
    /// * `fetch_degraded` - Whether the fetch gave up and produced no data
    /// * `outcome` - Change detection result, `None` when it was skipped
    pub fn new(
        date: NaiveDate,
        entities: &[Entity],
        event_total: usize,
        fetch_attempts: usize,
        fetch_degraded: bool,
        outcome: Option<&ChangeOutcome>,
    ) -> Self {
        let counts = entities.iter().counts_by(|e| e.category);
        let categories = Category::ALL
            .into_iter()
            .map(|c| CategoryCount {
                category: c.label().to_string(),
                count: counts.get(&c).copied().unwrap_or(0),
            })
            .collect();

        let changes = match outcome {
            Some(ChangeOutcome::Report(report)) => Some(ChangeCounts {
                period_from: report.from_date,
                period_to: report.to_date,
                appeared_count: report.appeared.len(),
                disappeared_count: report.disappeared.len(),
            }),
            _ => None,
        };

        Self {
            date,
            entity_total: entities.len(),
            categories,
            event_total,
            fetch_attempts,
            fetch_degraded,
            changes,
        }
    }

    /// Human-readable key/value lines.
    pub fn lines(&self) -> Vec<String> {
        let mut fields: Vec<(String, String)> = vec![
            ("date".into(), self.date.to_string()),
            ("entities".into(), self.entity_total.to_string()),
        ];
        fields.extend(
            self.categories
                .iter()
                .map(|c| (format!("  {}", c.category), c.count.to_string())),
        );
        fields.push(("events".into(), self.event_total.to_string()));

        let attempts = if self.fetch_degraded {
            format!("{} (degraded)", self.fetch_attempts)
        } else {
            self.fetch_attempts.to_string()
        };
        fields.push(("fetch attempts".into(), attempts));

        match &self.changes {
            Some(c) => {
                let period = format!("{} → {}", c.period_from, c.period_to);
                fields.push(("period".into(), period));
                fields.push(("appeared".into(), c.appeared_count.to_string()));
                fields.push(("disappeared".into(), c.disappeared_count.to_string()));
            }
            None => fields.push(("changes".into(), "not enough data".into())),
        }

        fields
            .into_iter()
            .map(|(k, v)| format!("{k:<30} {v}"))
            .collect()
    }
}

/// Location of the summary for `date` inside `output_dir`.
pub fn summary_path(output_dir: &Path, date: NaiveDate) -> PathBuf {
    output_dir.join(format!("summary_{date}.json"))
}

/// Write the summary JSON and echo it to the log.
pub fn write_summary(output_dir: &Path, summary: &RunSummary) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(summary)?;
    let path = summary_path(output_dir, summary.date);
    replace_file(&path, json.as_bytes())?;

    let rule = "=".repeat(50);
    info!("{rule}");
    info!("SUMMARY {}", summary.date);
    info!("{rule}");
    for line in summary.lines() {
        info!("  {line}");
    }
    info!("{rule}");
    info!(path = %path.display(), "Summary saved");
    Ok(path)
}
