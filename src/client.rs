//! Dashboard client for the metrics read endpoint
//!
//! Polls `GET /api/metrics` and collapses requests that arrive within a short
//! dedupe window into the previous response.

use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use crate::server::{MetricsResponse, RefreshResponse, REFRESH_SECRET_HEADER};

/// Default window in which a repeated fetch reuses the last response
pub const DEFAULT_DEDUPE_WINDOW: Duration = Duration::from_secs(2);

/// Errors that can occur when talking to the metrics API
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The server answered with an unexpected status
    #[error("Unexpected response status: {0}")]
    Status(StatusCode),
}

/// Client for the dashboard metrics API
#[derive(Debug)]
pub struct DashboardClient {
    client: Client,
    base_url: String,
    dedupe_window: Duration,
    last: Option<(Instant, Option<MetricsResponse>)>,
}

impl DashboardClient {
    /// Creates a client for the API rooted at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            dedupe_window: DEFAULT_DEDUPE_WINDOW,
            last: None,
        }
    }

    pub fn with_dedupe_window(mut self, window: Duration) -> Self {
        self.dedupe_window = window;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetches the cached metrics
    ///
    /// # Returns
    /// * `Ok(Some(_))` with the read view
    /// * `Ok(None)` when the server has no cached data
    /// * `Err` if the request fails or returns an unexpected status
    pub async fn fetch(&mut self) -> Result<Option<MetricsResponse>, ClientError> {
        if let Some(recent) = self.recent(Instant::now()) {
            debug!("Reusing response inside dedupe window");
            return Ok(recent);
        }

        let url = format!("{}/api/metrics", self.base_url);
        let response = self.client.get(&url).send().await?;

        let result = match response.status() {
            StatusCode::OK => Some(response.json::<MetricsResponse>().await?),
            StatusCode::NOT_FOUND => None,
            status => return Err(ClientError::Status(status)),
        };

        self.last = Some((Instant::now(), result.clone()));
        Ok(result)
    }

    /// Asks the server to rebuild the cache
    pub async fn trigger_refresh(
        &mut self,
        secret: &str,
        force: bool,
    ) -> Result<RefreshResponse, ClientError> {
        let url = format!("{}/api/metrics/refresh", self.base_url);
        let response = self
            .client
            .post(&url)
            .query(&[("force", force)])
            .header(REFRESH_SECRET_HEADER, secret)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::INTERNAL_SERVER_ERROR {
            return Err(ClientError::Status(status));
        }

        // The next read should see the new record
        self.last = None;
        Ok(response.json::<RefreshResponse>().await?)
    }

    /// Last response if it was received less than the dedupe window before `now`
    fn recent(&self, now: Instant) -> Option<Option<MetricsResponse>> {
        let (at, response) = self.last.as_ref()?;
        if now.saturating_duration_since(*at) < self.dedupe_window {
            Some(response.clone())
        } else {
            None
        }
    }
}

/// One-line summary of a read, as printed by `watch`
pub fn summarize(response: Option<&MetricsResponse>) -> String {
    let Some(response) = response else {
        return "no cached data".to_string();
    };

    let mut parts = vec![format!("updated {}", response.time_since_update)];
    if response.google_ads.is_some() || response.meta_ads.is_some() {
        parts.push(format!("ad spend {:.2}", response.total_ad_spend()));
    }
    if let Some(stripe) = &response.stripe {
        parts.push(format!(
            "net revenue {:.2} {}",
            stripe.net_revenue(),
            stripe.currency.to_uppercase()
        ));
    }
    if let Some(calendly) = &response.calendly {
        parts.push(format!("{} upcoming meetings", calendly.upcoming_events));
    }
    if let Some(errors) = &response.errors {
        let failed: Vec<_> = errors.keys().map(|s| s.as_str()).collect();
        parts.push(format!("errors: {}", failed.join(", ")));
    }

    parts.join(" | ")
}
