//! Metrics refresh
//!
//! `Refresher` pulls every source, assembles a `CachedMetrics` record and
//! writes it through the store. `RefreshHandle` runs it on a timer in the
//! background, using tokio channels to report progress and accept manual
//! refresh requests.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cache::{MetricsStore, TtlCache};
use crate::data::{CachedMetrics, MetricSource, MetricsFetcher, SourceError};

/// Errors that prevent a refresh from running
#[derive(Debug, Error)]
pub enum RefreshError {
    /// Another refresh holds the lock
    #[error("A refresh is already in progress")]
    InProgress,
}

/// What happened to the assembled record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status", content = "reason")]
pub enum Persisted {
    Written,
    /// No source produced data, the previous record was left in place
    Skipped,
    /// The store rejected the write
    Failed(String),
}

/// Result of one refresh pass
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub metrics: CachedMetrics,
    pub persisted: Persisted,
    /// Sources whose response was served from the in-memory cache
    pub reused: Vec<MetricSource>,
}

impl RefreshOutcome {
    pub fn written(&self) -> bool {
        self.persisted == Persisted::Written
    }
}

/// Fetches source metrics and rewrites the cached record
pub struct Refresher {
    store: MetricsStore,
    fetcher: Arc<dyn MetricsFetcher>,
    responses: Mutex<TtlCache<MetricSource, serde_json::Value>>,
    in_flight: tokio::sync::Mutex<()>,
}

impl Refresher {
    /// Creates a refresher with the default 15 minute response cache
    pub fn new(store: MetricsStore, fetcher: Arc<dyn MetricsFetcher>) -> Self {
        Self::with_response_cache(store, fetcher, TtlCache::default())
    }

    /// Creates a refresher around an existing response cache
    pub fn with_response_cache(
        store: MetricsStore,
        fetcher: Arc<dyn MetricsFetcher>,
        responses: TtlCache<MetricSource, serde_json::Value>,
    ) -> Self {
        Self {
            store,
            fetcher,
            responses: Mutex::new(responses),
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> &MetricsStore {
        &self.store
    }

    /// Runs one refresh pass
    ///
    /// Fails fast with [`RefreshError::InProgress`] if another pass is running.
    /// With `force`, responses held in the in-memory cache are ignored.
    pub async fn refresh(&self, force: bool) -> Result<RefreshOutcome, RefreshError> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| RefreshError::InProgress)?;

        let now = Utc::now();
        info!(force, "Refreshing dashboard metrics");

        let fetches = MetricSource::ALL
            .into_iter()
            .map(|source| self.fetch_source(source, force, now));
        let results = join_all(fetches).await;

        let mut metrics = CachedMetrics::empty(now);
        let mut reused = Vec::new();
        let mut failed = false;
        let mut produced = false;

        for (source, result) in MetricSource::ALL.into_iter().zip(results) {
            let (value, from_cache) = match result {
                Ok(fetched) => fetched,
                Err(SourceError::NotConfigured(_)) => {
                    debug!(%source, "Source not configured, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(%source, error = %e, "Source fetch failed");
                    metrics.record_error(source, e.to_string());
                    failed = true;
                    continue;
                }
            };

            match apply_block(&mut metrics, source, value.clone()) {
                Ok(()) => {
                    produced = true;
                    if from_cache {
                        reused.push(source);
                    } else {
                        self.remember(source, value, now);
                    }
                }
                Err(e) => {
                    warn!(%source, error = %e, "Source returned malformed metrics");
                    metrics.record_error(source, e.to_string());
                    failed = true;
                }
            }
        }

        metrics.success = produced && !failed;

        let persisted = if !produced {
            warn!("No source produced metrics, keeping previous cache");
            Persisted::Skipped
        } else {
            match self.store.write(&metrics) {
                Ok(()) => Persisted::Written,
                Err(e) => {
                    error!(
                        error = %e,
                        path = %self.store.path().display(),
                        "Failed to write metrics cache"
                    );
                    Persisted::Failed(e.to_string())
                }
            }
        };

        info!(
            success = metrics.success,
            errors = metrics.errors.as_ref().map_or(0, |e| e.len()),
            reused = reused.len(),
            ?persisted,
            "Refresh finished"
        );

        Ok(RefreshOutcome {
            metrics,
            persisted,
            reused,
        })
    }

    async fn fetch_source(
        &self,
        source: MetricSource,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<(serde_json::Value, bool), SourceError> {
        if !force {
            if let Some(value) = self.cached_response(source, now) {
                debug!(%source, "Using cached source response");
                return Ok((value, true));
            }
        }

        let value = self.fetcher.fetch(source).await?;
        Ok((value, false))
    }

    fn cached_response(
        &self,
        source: MetricSource,
        now: DateTime<Utc>,
    ) -> Option<serde_json::Value> {
        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        responses.get_at(&source, now)
    }

    fn remember(&self, source: MetricSource, value: serde_json::Value, now: DateTime<Utc>) {
        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        responses.set_at(source, value, now);
    }
}

/// Decodes a raw response into the block for `source`
fn apply_block(
    metrics: &mut CachedMetrics,
    source: MetricSource,
    value: serde_json::Value,
) -> Result<(), serde_json::Error> {
    match source {
        MetricSource::GoogleAds => metrics.google_ads = Some(serde_json::from_value(value)?),
        MetricSource::MetaAds => metrics.meta_ads = Some(serde_json::from_value(value)?),
        MetricSource::Calendly => metrics.calendly = Some(serde_json::from_value(value)?),
        MetricSource::Stripe => metrics.stripe = Some(serde_json::from_value(value)?),
    }
    Ok(())
}

/// Messages sent from background refresh to observers
#[derive(Debug, Clone)]
pub enum RefreshMessage {
    /// Refresh started
    RefreshStarted,
    /// Refresh completed; `success` mirrors the record's flag
    RefreshCompleted { success: bool, written: bool },
    /// The refresh could not run
    RefreshError(String),
}

/// Configuration for the background refresh loop
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// How often the loop checks whether the cache is due
    pub check_interval: Duration,
    /// Whether auto-refresh is enabled
    pub enabled: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(900), // 15 minutes
            enabled: true,
        }
    }
}

/// Handle for controlling the background refresh system
pub struct RefreshHandle {
    /// Channel for receiving refresh messages
    pub receiver: mpsc::Receiver<RefreshMessage>,
    /// Manual refresh requests, carrying the `force` flag
    trigger_tx: mpsc::Sender<bool>,
    /// Flag to signal shutdown
    shutdown_tx: mpsc::Sender<()>,
}

impl RefreshHandle {
    /// Spawns the background loop
    ///
    /// The first check happens immediately so a cold cache is filled at
    /// startup. Afterwards the loop wakes every `check_interval` and refreshes
    /// only when the store reports the record as stale.
    pub fn spawn(refresher: Arc<Refresher>, config: RefreshConfig) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (trigger_tx, mut trigger_rx) = mpsc::channel::<bool>(4);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick(), if config.enabled => {
                        if refresher.store().should_refresh() {
                            run_refresh(&refresher, false, &msg_tx).await;
                        } else {
                            debug!("Metrics cache is fresh, skipping scheduled refresh");
                        }
                    }
                    Some(force) = trigger_rx.recv() => {
                        run_refresh(&refresher, force, &msg_tx).await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Background refresh stopped");
                        break;
                    }
                }
            }
        });

        Self {
            receiver: msg_rx,
            trigger_tx,
            shutdown_tx,
        }
    }

    /// Requests an immediate refresh
    pub async fn request_refresh(&self, force: bool) {
        let _ = self.trigger_tx.send(force).await;
    }

    /// Shuts down the background refresh task
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn run_refresh(refresher: &Refresher, force: bool, tx: &mpsc::Sender<RefreshMessage>) {
    let _ = tx.send(RefreshMessage::RefreshStarted).await;
    let message = match refresher.refresh(force).await {
        Ok(outcome) => RefreshMessage::RefreshCompleted {
            success: outcome.metrics.success,
            written: outcome.written(),
        },
        Err(e) => RefreshMessage::RefreshError(e.to_string()),
    };
    let _ = tx.send(message).await;
}

/// Checks for pending refresh messages without blocking
pub fn try_recv(handle: &mut RefreshHandle) -> Option<RefreshMessage> {
    handle.receiver.try_recv().ok()
}
