use anyhow::{Result, ensure};
use serde::Deserialize;
use std::path::PathBuf;

/// The SQLite disk cache.
///
/// `capacity_bytes` and `trim_target_bytes` have no defaults: a write that pushes usage above
/// the capacity trims the cache down to the target, so the pair sets both the size bound and
/// how often trimming runs.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
	/// Path of the cache database
	pub path: PathBuf,

	/// Usage above which the cache is trimmed
	pub capacity_bytes: u64,

	/// Usage a trim pass reduces the cache to
	pub trim_target_bytes: u64,

	/// Largest tile accepted by the store
	#[serde(default = "default_max_tile_bytes")]
	pub max_tile_bytes: u64,
}

fn default_max_tile_bytes() -> u64 {
	1024 * 1024
}

impl StoreConfig {
	pub fn new(path: impl Into<PathBuf>, capacity_bytes: u64, trim_target_bytes: u64) -> Self {
		StoreConfig {
			path: path.into(),
			capacity_bytes,
			trim_target_bytes,
			max_tile_bytes: default_max_tile_bytes(),
		}
	}

	pub fn validate(&self) -> Result<()> {
		ensure!(
			self.trim_target_bytes < self.capacity_bytes,
			"store.trim_target_bytes ({}) must be smaller than store.capacity_bytes ({})",
			self.trim_target_bytes,
			self.capacity_bytes
		);
		ensure!(self.max_tile_bytes > 0, "store.max_tile_bytes must be positive");
		Ok(())
	}
}
