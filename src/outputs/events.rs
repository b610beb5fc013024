//! Dated CSV file of scraped event listings.

use crate::models::EventRecord;
use crate::utils::replace_file;
use chrono::NaiveDate;
use csv::WriterBuilder;
use serde::Serialize;
use std::error::Error;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

pub const EVENT_COLUMNS: [&str; 7] = [
    "retrievedOn",
    "title",
    "eventDate",
    "location",
    "description",
    "link",
    "source",
];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventRow<'a> {
    retrieved_on: NaiveDate,
    title: Option<&'a str>,
    event_date: Option<&'a str>,
    location: Option<&'a str>,
    description: Option<&'a str>,
    link: Option<&'a str>,
    source: &'a str,
}

impl<'a> From<&'a EventRecord> for EventRow<'a> {
    fn from(e: &'a EventRecord) -> Self {
        Self {
            retrieved_on: e.retrieved_on,
            title: e.title.as_deref(),
            event_date: e.event_date.as_deref(),
            location: e.location.as_deref(),
            description: e.description.as_deref(),
            link: e.link.as_deref(),
            source: &e.source,
        }
    }
}

/// Location of the events file for `date` inside `output_dir`.
pub fn events_path(output_dir: &Path, date: NaiveDate) -> PathBuf {
    output_dir.join(format!("events_{date}.csv"))
}

/// Write the events of `date`, replacing an earlier file for the same date.
///
/// # Arguments
///
/// * `output_dir` - Directory receiving `events_<date>.csv`
/// * `date` - Run date
/// * `events` - Listings in scrape order; an empty slice still writes the header
///
/// # Returns
///
/// The path of the written file.
#[instrument(level = "info", skip_all, fields(%date, count = events.len()))]
pub fn write_events(
    output_dir: &Path,
    date: NaiveDate,
    events: &[EventRecord],
) -> Result<PathBuf, Box<dyn Error>> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(EVENT_COLUMNS)?;
    for event in events {
        writer.serialize(EventRow::from(event))?;
    }
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;

    let path = events_path(output_dir, date);
    replace_file(&path, &bytes)?;
    info!(path = %path.display(), "Events saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_events() {
        let dir = tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 5, 6).unwrap();
        let events = vec![EventRecord {
            retrieved_on: date,
            title: Some("Altstadtfest, mit Feuerwerk".into()),
            event_date: Some("2025-06-14".into()),
            location: None,
            description: None,
            link: Some("https://www.castrop-rauxel.de/altstadtfest".into()),
            source: "https://www.castrop-rauxel.de/veranstaltungen".into(),
        }];

        let path = write_events(dir.path(), date, &events).unwrap();
        assert_eq!(path, dir.path().join("events_2025-05-06.csv"));

        let text = std::fs::read_to_string(path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(EVENT_COLUMNS.join(",").as_str()));
        let expected = concat!(
            "2025-05-06,\"Altstadtfest, mit Feuerwerk\",2025-06-14,,,",
            "https://www.castrop-rauxel.de/altstadtfest,",
            "https://www.castrop-rauxel.de/veranstaltungen"
        );
        assert_eq!(lines.next(), Some(expected));
        assert_eq!(lines.next(), None);
    }
}
