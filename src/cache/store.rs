//! Persistent store for the aggregated metrics record
//!
//! Provides a `MetricsStore` that keeps a single `CachedMetrics` document in a
//! JSON file and answers staleness questions about it.

use chrono::{DateTime, Duration, Utc};
use directories::ProjectDirs;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::data::CachedMetrics;

/// File name of the cache document inside the cache directory
pub const CACHE_FILE_NAME: &str = "metrics-cache.json";

/// Default age after which the cached record should be rebuilt
pub const DEFAULT_REFRESH_AFTER_HOURS: i64 = 6;

/// Errors that can occur when writing the cache file
#[derive(Debug, Error)]
pub enum StoreError {
    /// Directory creation, temp file write or rename failed
    #[error("Failed to write cache file: {0}")]
    Io(#[from] io::Error),

    /// The record could not be serialized
    #[error("Failed to serialize cached metrics: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// What was found at the cache path
#[derive(Debug)]
pub enum CacheState {
    /// No file at the cache path
    Missing,
    /// A file exists but could not be read or parsed
    Corrupt(String),
    Present(CachedMetrics),
}

/// Reads and writes the cached metrics document
///
/// The document lives at a fixed path (`~/.cache/dashcache/metrics-cache.json`
/// on Linux by default). Reads treat a missing and an unparsable file the same
/// way; use [`inspect`](Self::inspect) to tell them apart.
#[derive(Debug, Clone)]
pub struct MetricsStore {
    path: PathBuf,
    refresh_after: Duration,
}

impl MetricsStore {
    /// Creates a store in the XDG-compliant cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "dashcache")?;
        Some(Self::with_path(project_dirs.cache_dir().join(CACHE_FILE_NAME)))
    }

    /// Creates a store backed by a specific file
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            refresh_after: Duration::hours(DEFAULT_REFRESH_AFTER_HOURS),
        }
    }

    /// Overrides the age at which [`should_refresh`](Self::should_refresh) turns true
    pub fn with_refresh_after(mut self, refresh_after: Duration) -> Self {
        self.refresh_after = refresh_after;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn refresh_after(&self) -> Duration {
        self.refresh_after
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| CACHE_FILE_NAME.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Looks at the cache file and reports what is there
    pub fn inspect(&self) -> CacheState {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return CacheState::Missing,
            Err(e) => return CacheState::Corrupt(e.to_string()),
        };

        match serde_json::from_str(&content) {
            Ok(metrics) => CacheState::Present(metrics),
            Err(e) => CacheState::Corrupt(e.to_string()),
        }
    }

    /// Reads the cached record
    ///
    /// Returns `None` if the file doesn't exist or cannot be parsed.
    pub fn read(&self) -> Option<CachedMetrics> {
        match self.inspect() {
            CacheState::Present(metrics) => Some(metrics),
            CacheState::Missing => {
                debug!(path = %self.path.display(), "No cached metrics");
                None
            }
            CacheState::Corrupt(reason) => {
                warn!(path = %self.path.display(), %reason, "Ignoring unreadable metrics cache");
                None
            }
        }
    }

    /// Replaces the cached record
    ///
    /// The document is written to a sibling temp file and renamed into place,
    /// so a concurrent reader sees either the old or the new record.
    ///
    /// # Returns
    /// * `Ok(())` on success
    /// * `Err` if directory creation, serialization or file writing fails
    pub fn write(&self, metrics: &CachedMetrics) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(metrics)?;
        let temp = self.temp_path();
        if let Err(e) = fs::write(&temp, json).and_then(|()| fs::rename(&temp, &self.path)) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        debug!(path = %self.path.display(), "Wrote metrics cache");
        Ok(())
    }

    /// Time elapsed between the last write and `now`
    pub fn age_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.read().map(|metrics| now - metrics.last_updated)
    }

    /// Human-readable age of the cached record, e.g. "3 hours ago"
    pub fn time_since_last_update(&self) -> Option<String> {
        self.time_since_last_update_at(Utc::now())
    }

    pub fn time_since_last_update_at(&self, now: DateTime<Utc>) -> Option<String> {
        self.age_at(now).map(format_elapsed)
    }

    /// True if nothing is cached or the record is at least `refresh_after` old
    pub fn should_refresh(&self) -> bool {
        self.should_refresh_at(Utc::now())
    }

    pub fn should_refresh_at(&self, now: DateTime<Utc>) -> bool {
        match self.age_at(now) {
            Some(age) => age >= self.refresh_after,
            None => true,
        }
    }
}

/// Buckets an elapsed duration into minutes, hours or days
///
/// Counts are floored. Negative durations (clock skew) read as "just now".
pub fn format_elapsed(elapsed: Duration) -> String {
    let minutes = elapsed.num_minutes();
    if minutes < 1 {
        return "just now".to_string();
    }
    if minutes < 60 {
        return plural(minutes, "minute");
    }

    let hours = elapsed.num_hours();
    if hours < 24 {
        return plural(hours, "hour");
    }

    plural(elapsed.num_days(), "day")
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", count, unit)
    }
}
