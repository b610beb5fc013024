//! Run configuration loaded from an optional YAML file.
//!
//! Every field has a default, so the binary runs with no file at all. Values
//! given on the command line win over the file (see [`Config::with_overrides`]).
//!
//! ```yaml
//! area_name: Castrop-Rauxel
//! overpass_url: https://overpass-api.de/api/interpreter
//! query_timeout_secs: 60
//! retry:
//!   max_attempts: 3
//!   retry_step_secs: 30
//!   warmup_step_secs: 5
//! politeness_delay_secs: 2
//! event_sources:
//!   - https://www.castrop-rauxel.de/veranstaltungen
//! output_dir: output
//! reports_dir: reports
//! ```

use crate::api::BackoffPolicy;
use crate::cli::Cli;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Administrative area the Overpass query is restricted to.
    pub area_name: String,
    pub overpass_url: String,
    /// Server-side time budget of the Overpass query.
    pub query_timeout_secs: u64,
    pub retry: RetrySettings,
    /// Pause between consecutive requests to the same kind of upstream.
    pub politeness_delay_secs: u64,
    /// Event listing pages, scraped in order.
    pub event_sources: Vec<String>,
    pub user_agent: String,
    pub output_dir: PathBuf,
    pub reports_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            area_name: "Castrop-Rauxel".to_string(),
            overpass_url: "https://overpass-api.de/api/interpreter".to_string(),
            query_timeout_secs: 60,
            retry: RetrySettings::default(),
            politeness_delay_secs: 2,
            event_sources: vec!["https://www.castrop-rauxel.de/veranstaltungen".to_string()],
            user_agent: concat!("poi_watch/", env!("CARGO_PKG_VERSION")).to_string(),
            output_dir: PathBuf::from("output"),
            reports_dir: PathBuf::from("reports"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: usize,
    pub retry_step_secs: u64,
    pub warmup_step_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = BackoffPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            retry_step_secs: policy.retry_step.as_secs(),
            warmup_step_secs: policy.warmup_step.as_secs(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_attempts.max(1),
            retry_step: StdDuration::from_secs(self.retry_step_secs),
            warmup_step: StdDuration::from_secs(self.warmup_step_secs),
        }
    }
}

impl Config {
    pub fn politeness_delay(&self) -> StdDuration {
        StdDuration::from_secs(self.politeness_delay_secs)
    }

    /// Apply command-line values on top of the file/default values.
    pub fn with_overrides(mut self, cli: &Cli) -> Self {
        if let Some(ref area) = cli.area {
            self.area_name = area.clone();
        }
        if let Some(ref dir) = cli.output_dir {
            self.output_dir = dir.clone();
        }
        if let Some(ref dir) = cli.reports_dir {
            self.reports_dir = dir.clone();
        }
        self
    }
}

/// Load the configuration at `path`.
///
/// No path, or a path that does not exist, yields the defaults. A file that
/// exists but does not parse is an error.
pub fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn Error>> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    if !path.exists() {
        info!(path = %path.display(), "Config file not found; using defaults");
        return Ok(Config::default());
    }

    let raw = std::fs::read_to_string(path)?;
    let config: Config = serde_yaml::from_str(&raw)?;
    info!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_file() {
        assert_eq!(load_config(None).unwrap(), Config::default());

        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        let config = load_config(Some(missing.as_path())).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "area_name: Dortmund\nretry:\n  max_attempts: 5\n").unwrap();

        let config = load_config(Some(path.as_path())).unwrap();
        assert_eq!(config.area_name, "Dortmund");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.retry_step_secs, 30);
        assert_eq!(config.query_timeout_secs, 60);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "query_timeout_secs: soon\n").unwrap();
        assert!(load_config(Some(path.as_path())).is_err());
    }

    #[test]
    fn test_policy_never_zero_attempts() {
        let settings = RetrySettings {
            max_attempts: 0,
            retry_step_secs: 1,
            warmup_step_secs: 0,
        };
        assert_eq!(settings.policy().max_attempts, 1);
        assert_eq!(RetrySettings::default().policy(), BackoffPolicy::default());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "poi_watch",
            "--area",
            "Herne",
            "--output-dir",
            "/tmp/snap",
        ]);
        let config = Config::default().with_overrides(&cli);
        assert_eq!(config.area_name, "Herne");
        assert_eq!(config.output_dir, PathBuf::from("/tmp/snap"));
        assert_eq!(config.reports_dir, PathBuf::from("reports"));
    }
}
