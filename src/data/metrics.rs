//! Metric blocks for each upstream source and the aggregated cache record

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upstream systems the dashboard aggregates metrics from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricSource {
    GoogleAds,
    MetaAds,
    Calendly,
    Stripe,
}

impl MetricSource {
    /// Every source, in the order they appear in the cached record
    pub const ALL: [MetricSource; 4] = [
        MetricSource::GoogleAds,
        MetricSource::MetaAds,
        MetricSource::Calendly,
        MetricSource::Stripe,
    ];

    /// Wire name used in JSON keys and error maps
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricSource::GoogleAds => "googleAds",
            MetricSource::MetaAds => "metaAds",
            MetricSource::Calendly => "calendly",
            MetricSource::Stripe => "stripe",
        }
    }
}

impl fmt::Display for MetricSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advertising performance for a reporting window (Google Ads, Meta Ads)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdMetrics {
    /// Total spend in account currency
    pub spend: f64,
    pub impressions: u64,
    pub clicks: u64,
    /// Conversions can be fractional under data-driven attribution
    pub conversions: f64,
}

impl AdMetrics {
    /// Click-through rate as a percentage, 0 when there were no impressions
    pub fn ctr(&self) -> f64 {
        if self.impressions == 0 {
            return 0.0;
        }
        self.clicks as f64 / self.impressions as f64 * 100.0
    }

    /// Cost per click, 0 when there were no clicks
    pub fn cpc(&self) -> f64 {
        if self.clicks == 0 {
            return 0.0;
        }
        self.spend / self.clicks as f64
    }

    /// Cost per conversion, 0 when nothing converted
    pub fn cost_per_conversion(&self) -> f64 {
        if self.conversions <= 0.0 {
            return 0.0;
        }
        self.spend / self.conversions
    }

    /// Sum of spend across the platforms that reported
    pub fn combined_spend<'a>(
        platforms: impl IntoIterator<Item = &'a Option<AdMetrics>>,
    ) -> f64 {
        platforms.into_iter().flatten().map(|m| m.spend).sum()
    }
}

/// Booking activity from the scheduling source (Calendly)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingMetrics {
    pub total_events: u64,
    pub upcoming_events: u64,
    pub completed_events: u64,
    pub canceled_events: u64,
}

impl SchedulingMetrics {
    /// Share of booked events that were canceled, as a percentage
    pub fn cancellation_rate(&self) -> f64 {
        if self.total_events == 0 {
            return 0.0;
        }
        self.canceled_events as f64 / self.total_events as f64 * 100.0
    }
}

/// Revenue from the payments source (Stripe), in major currency units
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueMetrics {
    pub gross_revenue: f64,
    pub refunded: f64,
    pub charge_count: u64,
    /// ISO 4217 code, e.g. "usd"
    pub currency: String,
}

impl RevenueMetrics {
    pub fn net_revenue(&self) -> f64 {
        self.gross_revenue - self.refunded
    }

    /// Mean gross amount per charge, 0 when there were no charges
    pub fn average_charge(&self) -> f64 {
        if self.charge_count == 0 {
            return 0.0;
        }
        self.gross_revenue / self.charge_count as f64
    }
}

/// The aggregated record persisted by the cache store
///
/// There is exactly one of these per deployment. Each refresh replaces it
/// wholesale; blocks from a previous refresh are never merged in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_ads: Option<AdMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_ads: Option<AdMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendly: Option<SchedulingMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stripe: Option<RevenueMetrics>,
    /// When the record was assembled by a successful refresh
    pub last_updated: DateTime<Utc>,
    /// True when no configured source failed
    pub success: bool,
    /// Error messages keyed by source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<MetricSource, String>>,
}

impl CachedMetrics {
    /// Creates an empty record stamped with the given time
    pub fn empty(last_updated: DateTime<Utc>) -> Self {
        Self {
            google_ads: None,
            meta_ads: None,
            calendly: None,
            stripe: None,
            last_updated,
            success: true,
            errors: None,
        }
    }

    /// Whether the record carries a block for `source`
    pub fn has(&self, source: MetricSource) -> bool {
        match source {
            MetricSource::GoogleAds => self.google_ads.is_some(),
            MetricSource::MetaAds => self.meta_ads.is_some(),
            MetricSource::Calendly => self.calendly.is_some(),
            MetricSource::Stripe => self.stripe.is_some(),
        }
    }

    /// Combined spend across both ad platforms
    pub fn total_ad_spend(&self) -> f64 {
        AdMetrics::combined_spend([&self.google_ads, &self.meta_ads])
    }

    /// Records an error for `source`, creating the map on first use
    pub fn record_error(&mut self, source: MetricSource, message: impl Into<String>) {
        self.errors
            .get_or_insert_with(BTreeMap::new)
            .insert(source, message.into());
    }
}
