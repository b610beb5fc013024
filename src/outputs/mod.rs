//! Dated artifacts written by a collection run.
//!
//! # Submodules
//!
//! - [`snapshots`]: The snapshot store: one CSV of normalized entities per date
//! - [`report`]: YAML appeared/disappeared report for the latest snapshot pair
//! - [`events`]: CSV of scraped event listings
//! - [`summary`]: JSON run summary
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! ├── osm_2025-05-06.csv
//! ├── events_2025-05-06.csv
//! └── summary_2025-05-06.json
//!
//! reports_dir/
//! └── changes_2025-05-06.yaml
//! ```
//!
//! Every file is replaced atomically; rerunning a date overwrites its files.

pub mod events;
pub mod report;
pub mod snapshots;
pub mod summary;
