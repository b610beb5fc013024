//! Command-line interface definitions for poi_watch.
//!
//! Every argument is optional: the scheduled daily run is a bare `poi_watch`.
//! Paths can also come from environment variables.

use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the daily collection run.
///
/// # Examples
///
/// ```sh
/// # Daily run with defaults (or values from config.yaml)
/// poi_watch
///
/// # Explicit config and output locations
/// poi_watch -c ./config.yaml -o ./output -r ./reports
///
/// # Re-run a past date without scraping events
/// poi_watch --date 2025-05-06 --skip-events
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a config.yaml file
    #[arg(short, long, env = "POI_WATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding dated snapshot, event and summary files
    #[arg(short, long, env = "POI_WATCH_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Directory receiving change reports
    #[arg(short, long, env = "POI_WATCH_REPORTS_DIR")]
    pub reports_dir: Option<PathBuf>,

    /// Administrative area to query (overrides the config file)
    #[arg(short, long)]
    pub area: Option<String>,

    /// Run date in YYYY-MM-DD format (defaults to today, local time)
    #[arg(short, long)]
    pub date: Option<NaiveDate>,

    /// Skip scraping event listings
    #[arg(long)]
    pub skip_events: bool,

    /// Skip change detection against the previous snapshot
    #[arg(long)]
    pub skip_changes: bool,
}
