//! Core data models for the metrics cache
//!
//! This module contains the per-source metric blocks and the aggregated
//! `CachedMetrics` record that is persisted to disk after each refresh.

pub mod metrics;
pub mod sources;

pub use metrics::{AdMetrics, CachedMetrics, MetricSource, RevenueMetrics, SchedulingMetrics};
pub use sources::{HttpFetcher, MetricsFetcher, SourceEndpoints, SourceError};
