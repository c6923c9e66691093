//! Cache layer for dashboard metrics
//!
//! Two caches live here. `MetricsStore` persists the aggregated record to a
//! single JSON file and decides when it is stale. `TtlCache` is a small
//! in-memory map with lazy expiry used to hold per-source responses between
//! refreshes.

mod store;
mod ttl;

pub use store::{
    format_elapsed, CacheState, MetricsStore, StoreError, CACHE_FILE_NAME,
    DEFAULT_REFRESH_AFTER_HOURS,
};
pub use ttl::{TtlCache, DEFAULT_TTL_MINUTES};
