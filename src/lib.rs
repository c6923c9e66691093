//! dashcache library
//!
//! Exposes the cache, refresh, HTTP and client modules for the binary and
//! for integration tests.

pub mod cache;
pub mod cli;
pub mod client;
pub mod data;
pub mod refresh;
pub mod server;
