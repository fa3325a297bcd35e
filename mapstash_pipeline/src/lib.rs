//! Tile resolution for mapstash.
//!
//! [`ProviderPipeline`] turns tile requests into tiles: memory cache first, then the persistent
//! store, offline archives, bundled assets and the network. Requests for the same tile are
//! coalesced, results are delivered on a single callback thread, and every tile a provider
//! produces is written back into both caches.
//!
//! [`BulkAreaJob`](bulk::BulkAreaJob) pre-fetches a whole area through the same pipeline.

pub mod bulk;
pub use bulk::{BulkAreaJob, BulkJobHandle, BulkSummary, estimate_download_bytes, estimate_tile_count};

mod pipeline;
pub use pipeline::*;

pub mod provider;
pub use provider::{ArchiveProvider, AssetsProvider, CancelToken, LoadedTile, NetworkFetcher, TileProvider};

#[cfg(test)]
mod test_utils;
