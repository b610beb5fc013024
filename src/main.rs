//! # poi_watch
//!
//! A daily collector that snapshots the points of interest of one
//! administrative area from OpenStreetMap and reports which facilities
//! appeared or disappeared since the previous snapshot.
//!
//! ## Features
//!
//! - One combined Overpass query per run with bounded retries and backoff
//! - Table-driven classification of shops, gastronomy, leisure and tourism
//! - Dated, atomically written CSV snapshots (one per calendar date)
//! - Appeared/disappeared detection between the two latest snapshots
//! - Event listings scraped from municipal event pages
//!
//! ## Usage
//!
//! ```sh
//! poi_watch                       # daily run, defaults or ./config.yaml
//! poi_watch -o ./output -r ./reports --date 2025-05-06
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Fetching**: Query the Overpass API, degrading to no data on failure
//! 2. **Normalizing**: Turn raw elements into canonical entities
//! 3. **Snapshotting**: Persist today's entities as `osm_<date>.csv`
//! 4. **Events**: Scrape event listings into `events_<date>.csv`
//! 5. **Change detection**: Compare the two latest snapshots, write a YAML report
//! 6. **Summary**: Write `summary_<date>.json` and print it
//!
//! Upstream trouble never fails a run. Only local write failures exit non-zero.

use chrono::Local;
use clap::Parser;
use reqwest::Client;
use std::error::Error;
use std::path::Path;
use std::time::Duration as StdDuration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod changes;
mod cli;
mod config;
mod models;
mod normalize;
mod outputs;
mod scrapers;
mod utils;

use changes::{ChangeOutcome, detect_and_record};
use cli::Cli;
use config::load_config;
use normalize::{CATEGORY_RULES, normalize, tag_keys};
use outputs::events::write_events;
use outputs::snapshots::SnapshotStore;
use outputs::summary::{RunSummary, write_summary};
use scrapers::overpass::{OverpassClient, build_query, fetch_records};
use utils::ensure_writable_dir;

const EVENT_PAGE_TIMEOUT: StdDuration = StdDuration::from_secs(15);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("poi_watch starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let config_path = args.config.as_deref().unwrap_or(Path::new("config.yaml"));
    let config = load_config(Some(config_path))?.with_overrides(&args);
    let run_date = args.date.unwrap_or_else(|| Local::now().date_naive());
    info!(area = %config.area_name, %run_date, "Starting collection");

    // Early check: every directory we write to must be writable
    if let Err(e) = ensure_writable_dir(&config.output_dir).await {
        error!(
            path = %config.output_dir.display(),
            error = %e,
            "Output directory is not writable"
        );
        return Err(e);
    }
    if !args.skip_changes {
        if let Err(e) = ensure_writable_dir(&config.reports_dir).await {
            error!(
                path = %config.reports_dir.display(),
                error = %e,
                "Reports directory is not writable"
            );
            return Err(e);
        }
    }

    // ---- Fetch & normalize ----
    let query = build_query(
        &config.area_name,
        &tag_keys(CATEGORY_RULES),
        config.query_timeout_secs,
    );
    let overpass = OverpassClient::new(
        &config.overpass_url,
        &config.user_agent,
        query,
        config.query_timeout_secs,
    )?;
    let fetched = fetch_records(overpass, config.retry.policy()).await;

    let entities = normalize(&fetched.value, run_date);
    info!(count = entities.len(), "Normalized entities");

    // ---- Snapshot ----
    let store = SnapshotStore::new(&config.output_dir);
    if let Err(e) = store.write(run_date, &entities) {
        error!(error = %e, "Failed to write snapshot");
        return Err(e);
    }

    // ---- Events ----
    let event_total = if args.skip_events {
        info!("Skipping event scraping");
        0
    } else {
        sleep(config.politeness_delay()).await;
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(EVENT_PAGE_TIMEOUT)
            .build()?;
        let collected = scrapers::events::collect_events(
            &client,
            &config.event_sources,
            config.retry.policy(),
            config.politeness_delay(),
            run_date,
        )
        .await;
        if collected.failed_sources > 0 {
            warn!(
                failed_sources = collected.failed_sources,
                "Some event sources yielded nothing"
            );
        }
        if let Err(e) = write_events(&config.output_dir, run_date, &collected.events) {
            error!(error = %e, "Failed to write events");
            return Err(e);
        }
        collected.events.len()
    };

    // ---- Change detection ----
    let outcome = if args.skip_changes {
        info!("Skipping change detection");
        None
    } else {
        match detect_and_record(&store, &config.reports_dir) {
            Ok(outcome) => {
                match &outcome {
                    ChangeOutcome::NotEnoughData { snapshots } => {
                        info!(snapshots, "Change detection needs at least two snapshots");
                    }
                    ChangeOutcome::Report(report) => info!(
                        from = %report.from_date,
                        to = %report.to_date,
                        appeared = report.appeared.len(),
                        disappeared = report.disappeared.len(),
                        "Changes recorded"
                    ),
                }
                Some(outcome)
            }
            Err(e) => {
                error!(error = %e, "Change detection failed");
                return Err(e);
            }
        }
    };

    // ---- Summary ----
    let summary = RunSummary::new(
        run_date,
        &entities,
        event_total,
        fetched.attempts,
        fetched.degraded,
        outcome.as_ref(),
    );
    if let Err(e) = write_summary(&config.output_dir, &summary) {
        error!(error = %e, "Failed to write summary");
        return Err(e);
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        degraded = fetched.degraded,
        "Execution complete"
    );

    Ok(())
}
