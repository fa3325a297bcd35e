pub mod estimate;
pub mod export;
pub mod import;
pub mod prefetch;
pub mod probe;
pub mod store;

use anyhow::{Context, Result, ensure};
use mapstash_container::PersistentStore;
use mapstash_core::{PipelineConfig, TileIndex};
use std::path::Path;

/// Human readable byte count, e.g. `1.5 MB`.
pub fn format_bytes(bytes: u64) -> String {
	const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];
	let mut value = bytes as f64;
	let mut unit = 0;
	while value >= 1000.0 && unit < UNITS.len() - 1 {
		value /= 1000.0;
		unit += 1;
	}
	if unit == 0 {
		format!("{bytes} B")
	} else {
		format!("{value:.1} {}", UNITS[unit])
	}
}

/// Parses `z/x/y`.
pub fn parse_tile(text: &str) -> Result<TileIndex> {
	let parts: Vec<&str> = text.split('/').collect();
	ensure!(parts.len() == 3, "tile must be given as z/x/y, got '{text}'");
	TileIndex::new(parts[0].parse()?, parts[1].parse()?, parts[2].parse()?)
}

/// Opens the store configured in `config`.
pub fn open_store(config: &PipelineConfig, config_path: &Path) -> Result<PersistentStore> {
	let store = config
		.store
		.as_ref()
		.with_context(|| format!("{config_path:?} does not configure a store"))?;
	PersistentStore::open_with_config(store)
}
