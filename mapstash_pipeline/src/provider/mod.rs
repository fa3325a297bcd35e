//! Tile sources consulted by the pipeline after the memory cache and the persistent store.
//!
//! Every source implements [`TileProvider`]. `load` is a blocking call and only ever runs on a
//! pipeline worker thread. Returning `Ok(None)` means "not here, ask the next provider"; an error
//! is logged by the pipeline and treated the same way.

mod archive;
pub use archive::ArchiveProvider;

mod assets;
pub use assets::AssetsProvider;

mod network;
pub use network::NetworkFetcher;

use anyhow::Result;
use mapstash_core::{Blob, ProviderId, TileIndex};
use std::{
	fmt::Debug,
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
	time::SystemTime,
};

/// Bytes returned by a provider, with the expiry the origin asked for.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadedTile {
	pub bytes: Blob,
	pub expires: Option<SystemTime>,
}

impl LoadedTile {
	pub fn new(bytes: Blob) -> LoadedTile {
		LoadedTile { bytes, expires: None }
	}

	pub fn with_expires(mut self, expires: Option<SystemTime>) -> LoadedTile {
		self.expires = expires;
		self
	}
}

pub trait TileProvider: Send + Sync + Debug {
	fn id(&self) -> ProviderId;

	/// Loads the tile stored for the tile source `source`.
	fn load(&self, source: &str, index: &TileIndex) -> Result<Option<LoadedTile>>;
}

/// Cooperative cancellation flag shared between a request and the worker resolving it.
///
/// Workers check the flag between providers; a provider call that is already running is not
/// interrupted.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
	pub fn new() -> CancelToken {
		CancelToken::default()
	}

	pub fn cancel(&self) {
		self.0.store(true, Ordering::Release);
	}

	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::Acquire)
	}
}
