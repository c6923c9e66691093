//! Upstream metric source clients
//!
//! Each source is reached through an HTTP endpoint that returns the metric
//! block for that source as JSON. Endpoints that are not configured are
//! reported as such so the refresh can skip them.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

use super::MetricSource;

/// Errors that can occur when fetching metrics from a source
#[derive(Debug, Error)]
pub enum SourceError {
    /// No endpoint was configured for the source
    #[error("No endpoint configured for {0}")]
    NotConfigured(MetricSource),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The source answered with a non-success status
    #[error("{platform} returned HTTP {status}")]
    Status {
        platform: MetricSource,
        status: StatusCode,
    },

    /// Failed to parse JSON response
    #[error("Failed to parse JSON response: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Something that can produce the raw metric block for a source
#[async_trait]
pub trait MetricsFetcher: Send + Sync {
    async fn fetch(&self, source: MetricSource) -> Result<serde_json::Value, SourceError>;
}

/// Endpoint URL per source
#[derive(Debug, Clone, Default)]
pub struct SourceEndpoints {
    urls: BTreeMap<MetricSource, String>,
}

impl SourceEndpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the endpoint for `source`; `None` leaves it unconfigured
    pub fn with(mut self, source: MetricSource, url: Option<String>) -> Self {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.urls.insert(source, url);
        }
        self
    }

    pub fn get(&self, source: MetricSource) -> Option<&str> {
        self.urls.get(&source).map(String::as_str)
    }

    pub fn is_configured(&self, source: MetricSource) -> bool {
        self.urls.contains_key(&source)
    }

    pub fn configured(&self) -> impl Iterator<Item = MetricSource> + '_ {
        self.urls.keys().copied()
    }
}

/// Fetches metric blocks over HTTP
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    endpoints: SourceEndpoints,
    token: Option<String>,
}

impl HttpFetcher {
    pub fn new(endpoints: SourceEndpoints) -> Self {
        Self {
            client: Client::new(),
            endpoints,
            token: None,
        }
    }

    /// Create a fetcher with a custom HTTP client
    pub fn with_client(client: Client, endpoints: SourceEndpoints) -> Self {
        Self {
            client,
            endpoints,
            token: None,
        }
    }

    /// Sends `token` as a bearer token on every request
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn endpoints(&self) -> &SourceEndpoints {
        &self.endpoints
    }
}

#[async_trait]
impl MetricsFetcher for HttpFetcher {
    async fn fetch(&self, source: MetricSource) -> Result<serde_json::Value, SourceError> {
        let url = self
            .endpoints
            .get(source)
            .ok_or(SourceError::NotConfigured(source))?;

        debug!(%source, url, "Fetching source metrics");
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                platform: source,
                status,
            });
        }

        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_ignore_blank_urls() {
        let endpoints = SourceEndpoints::new()
            .with(MetricSource::GoogleAds, Some("http://ads.local/google".to_string()))
            .with(MetricSource::MetaAds, Some("   ".to_string()))
            .with(MetricSource::Stripe, None);

        assert!(endpoints.is_configured(MetricSource::GoogleAds));
        assert!(!endpoints.is_configured(MetricSource::MetaAds));
        assert!(!endpoints.is_configured(MetricSource::Stripe));
        assert_eq!(
            endpoints.configured().collect::<Vec<_>>(),
            vec![MetricSource::GoogleAds]
        );
    }

    #[tokio::test]
    async fn test_fetch_unconfigured_source_fails_without_request() {
        let fetcher = HttpFetcher::new(SourceEndpoints::new());
        let result = fetcher.fetch(MetricSource::Calendly).await;

        assert!(matches!(
            result,
            Err(SourceError::NotConfigured(MetricSource::Calendly))
        ));
    }

    #[test]
    fn test_status_error_message_names_source() {
        let err = SourceError::Status {
            platform: MetricSource::Stripe,
            status: StatusCode::UNAUTHORIZED,
        };
        let message = err.to_string();
        assert!(message.contains("stripe"));
        assert!(message.contains("401"));
    }
}
