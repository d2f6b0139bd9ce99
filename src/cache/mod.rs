//! Versioned asset cache for offline operation.
//!
//! This module provides a request-interception cache that:
//! - Pre-populates a named generation with every manifest asset on install
//! - Retires every other generation on activation (no per-entry expiry)
//! - Serves intercepted GET requests cache-first, writing misses through
//! - Propagates network failures when nothing cached covers a request

mod layer;
mod manifest;
mod network;
mod storage;
#[cfg(test)]
mod testing;
mod traits;

pub use layer::{AssetCache, Lifecycle};
pub use manifest::Manifest;
pub use network::{HttpNetwork, NetworkOnly};
pub use storage::{CacheStorage, EntrySummary, GenerationInfo, SqliteStorage};
pub use traits::{
  AssetRequest, CachedResponse, CapturedResponse, Dispatch, Network, ResponseSource, Served,
};
