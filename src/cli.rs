//! Command-line interface parsing for dashcache
//!
//! This module handles parsing of CLI arguments using clap. Every option can
//! also be supplied through a `DASHCACHE_*` environment variable.

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::cache::{MetricsStore, TtlCache, DEFAULT_REFRESH_AFTER_HOURS, DEFAULT_TTL_MINUTES};
use crate::data::{MetricSource, SourceEndpoints};
use crate::refresh::RefreshConfig;

/// Error types for CLI argument validation
#[derive(Debug, Error)]
pub enum CliError {
    /// A duration option was zero
    #[error("Invalid value for --{0}: must be greater than zero")]
    ZeroDuration(&'static str),

    /// A duration option does not fit the supported range
    #[error("Invalid value for --{0}: too large")]
    OutOfRange(&'static str),

    /// No cache file given and no home directory to derive one from
    #[error("Cannot determine a cache directory; pass --cache-file")]
    NoCacheDir,
}

/// dashcache - cached marketing dashboard metrics
#[derive(Parser, Debug)]
#[command(name = "dashcache")]
#[command(about = "Cached marketing dashboard metrics with scheduled refresh")]
#[command(version)]
pub struct Cli {
    /// Path of the metrics cache file
    #[arg(long, global = true, env = "DASHCACHE_CACHE_FILE", value_name = "PATH")]
    pub cache_file: Option<PathBuf>,

    /// Age in hours after which the cached record is rebuilt
    #[arg(
        long,
        global = true,
        env = "DASHCACHE_REFRESH_AFTER_HOURS",
        default_value_t = DEFAULT_REFRESH_AFTER_HOURS as u64
    )]
    pub refresh_after_hours: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP API with background refresh
    Serve(ServeArgs),
    /// Rebuild the cache once and exit
    Refresh(RefreshArgs),
    /// Print the cached metrics as JSON
    Status,
    /// Poll a running server and print a summary line per poll
    Watch(WatchArgs),
    /// Ask a running server to rebuild its cache
    Trigger(TriggerArgs),
}

/// Where to fetch each source from
#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
    #[arg(long, env = "DASHCACHE_GOOGLE_ADS_URL", value_name = "URL")]
    pub google_ads_url: Option<String>,

    #[arg(long, env = "DASHCACHE_META_ADS_URL", value_name = "URL")]
    pub meta_ads_url: Option<String>,

    #[arg(long, env = "DASHCACHE_CALENDLY_URL", value_name = "URL")]
    pub calendly_url: Option<String>,

    #[arg(long, env = "DASHCACHE_STRIPE_URL", value_name = "URL")]
    pub stripe_url: Option<String>,

    /// Bearer token sent to every source endpoint
    #[arg(long, env = "DASHCACHE_SOURCE_TOKEN", hide_env_values = true)]
    pub source_token: Option<String>,

    /// Minutes a source response is reused between refreshes
    #[arg(long, env = "DASHCACHE_SOURCE_TTL_MINS", default_value_t = DEFAULT_TTL_MINUTES as u64)]
    pub source_ttl_mins: u64,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "DASHCACHE_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// Shared secret required by the refresh endpoint; refresh over HTTP is off without it
    #[arg(long, env = "DASHCACHE_REFRESH_SECRET", hide_env_values = true)]
    pub refresh_secret: Option<String>,

    /// Minutes between staleness checks of the background refresher
    #[arg(long, env = "DASHCACHE_CHECK_INTERVAL_MINS", default_value_t = 15)]
    pub check_interval_mins: u64,

    /// Only refresh on request
    #[arg(long)]
    pub no_auto_refresh: bool,

    #[command(flatten)]
    pub sources: SourceArgs,
}

#[derive(Args, Debug)]
pub struct RefreshArgs {
    /// Ignore source responses cached in memory
    #[arg(long)]
    pub force: bool,

    #[command(flatten)]
    pub sources: SourceArgs,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Base URL of a running dashcache server
    #[arg(long, env = "DASHCACHE_URL", default_value = "http://127.0.0.1:8080")]
    pub url: String,

    /// Seconds between polls
    #[arg(long, default_value_t = 300)]
    pub interval_secs: u64,
}

#[derive(Args, Debug)]
pub struct TriggerArgs {
    /// Base URL of a running dashcache server
    #[arg(long, env = "DASHCACHE_URL", default_value = "http://127.0.0.1:8080")]
    pub url: String,

    /// Shared secret expected by the server's refresh endpoint
    #[arg(long, env = "DASHCACHE_REFRESH_SECRET", hide_env_values = true)]
    pub refresh_secret: String,

    /// Ignore source responses the server has cached in memory
    #[arg(long)]
    pub force: bool,
}

/// Converts a positive count of `unit`s into a chrono duration
///
/// chrono caps durations at i64::MAX milliseconds, so large counts are
/// rejected here instead of panicking further down.
fn checked(
    value: u64,
    flag: &'static str,
    unit: fn(i64) -> Option<chrono::Duration>,
) -> Result<chrono::Duration, CliError> {
    if value == 0 {
        return Err(CliError::ZeroDuration(flag));
    }
    i64::try_from(value)
        .ok()
        .and_then(unit)
        .ok_or(CliError::OutOfRange(flag))
}

fn std_duration(value: chrono::Duration, flag: &'static str) -> Result<Duration, CliError> {
    value.to_std().map_err(|_| CliError::OutOfRange(flag))
}

impl SourceArgs {
    pub fn endpoints(&self) -> SourceEndpoints {
        SourceEndpoints::new()
            .with(MetricSource::GoogleAds, self.google_ads_url.clone())
            .with(MetricSource::MetaAds, self.meta_ads_url.clone())
            .with(MetricSource::Calendly, self.calendly_url.clone())
            .with(MetricSource::Stripe, self.stripe_url.clone())
    }

    /// Builds the in-memory response cache with the configured TTL
    pub fn response_cache<V: Clone>(&self) -> Result<TtlCache<MetricSource, V>, CliError> {
        let ttl = checked(
            self.source_ttl_mins,
            "source-ttl-mins",
            chrono::Duration::try_minutes,
        )?;
        Ok(TtlCache::new(ttl))
    }
}

/// Validated settings shared by every command
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub store: MetricsStore,
}

impl ServiceConfig {
    /// Creates a ServiceConfig from parsed CLI arguments.
    ///
    /// # Returns
    /// * `Ok(ServiceConfig)` with the store located and configured
    /// * `Err(CliError)` if a duration is zero or too large, or no cache path can be found
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let refresh_after = checked(
            cli.refresh_after_hours,
            "refresh-after-hours",
            chrono::Duration::try_hours,
        )?;
        let store = match &cli.cache_file {
            Some(path) => MetricsStore::with_path(path.clone()),
            None => MetricsStore::new().ok_or(CliError::NoCacheDir)?,
        };

        Ok(Self {
            store: store.with_refresh_after(refresh_after),
        })
    }
}

impl ServeArgs {
    pub fn refresh_config(&self) -> Result<RefreshConfig, CliError> {
        let flag = "check-interval-mins";
        let interval = checked(self.check_interval_mins, flag, chrono::Duration::try_minutes)?;
        Ok(RefreshConfig {
            check_interval: std_duration(interval, flag)?,
            enabled: !self.no_auto_refresh,
        })
    }
}

impl WatchArgs {
    pub fn interval(&self) -> Result<Duration, CliError> {
        let flag = "interval-secs";
        std_duration(checked(self.interval_secs, flag, chrono::Duration::try_seconds)?, flag)
    }
}
