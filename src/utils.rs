//! Utility functions for string shortening and file system operations.
//!
//! This module provides helper functions used throughout the application:
//! - String truncation for logging and for bounded output fields
//! - File system validation for output directories
//! - Atomic file replacement so a dated artifact is either old or new, never partial

use std::error::Error;
use std::fs as stdfs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{debug, info, instrument};

/// Truncate a string for logging purposes.
///
/// Long strings are cut after `max` bytes (backing off to the nearest
/// character boundary) and get an ellipsis plus a count of the dropped bytes.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Keep at most `max` characters of `s`.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn squash_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if it doesn't exist, then performs a write test by
/// creating and immediately deleting a probe file.
///
/// # Errors
///
/// Returns an error if:
/// - The directory cannot be created
/// - The directory is not writable (permission denied, read-only filesystem, etc.)
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let probe_path = path.join("..__probe_write__");
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

/// Replace `path` with `contents` atomically.
///
/// The bytes go to a temporary file in the same directory which is then
/// renamed over the target, so readers never observe a half-written file.
pub fn replace_file(path: &Path, contents: &[u8]) -> Result<(), Box<dyn Error>> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    stdfs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    debug!(path = %path.display(), bytes = contents.len(), "Replaced file");
    Ok(())
}
