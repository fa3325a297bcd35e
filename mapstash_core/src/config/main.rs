use super::{BulkConfig, MemoryConfig, NetworkConfig, StoreConfig};
use crate::ConcurrencyLimits;
use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::{
	fs::File,
	io::{BufReader, Read},
	path::{Path, PathBuf},
};

/// Complete configuration of one tile pipeline.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
	/// Name of the tile source; used as provider key in the store and to pick tiles from archives
	pub tile_source: String,

	/// In-memory cache limits
	#[serde(default)]
	pub memory: MemoryConfig,

	/// Disk cache; without it nothing is persisted
	#[serde(default)]
	pub store: Option<StoreConfig>,

	/// Offline archives, consulted in the order given
	#[serde(default)]
	pub archives: Vec<PathBuf>,

	/// Serve tiles from archives regardless of the tile source they were stored for
	#[serde(default)]
	pub ignore_tile_source: bool,

	/// Tiles bundled as plain files
	#[serde(default)]
	pub assets: Option<AssetsConfig>,

	/// Tile server; without it the pipeline works offline
	#[serde(default)]
	pub network: Option<NetworkConfig>,

	/// Worker threads; defaults to the value of [`ConcurrencyLimits::default`]
	#[serde(default)]
	pub workers: Option<usize>,

	/// Bulk download pacing
	#[serde(default)]
	pub bulk: BulkConfig,
}

/// A directory laid out as `<tile_source>/<z>/<x>/<y>.<ext>`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AssetsConfig {
	pub path: PathBuf,

	/// File extensions tried in order
	#[serde(default = "default_asset_extensions")]
	pub extensions: Vec<String>,
}

fn default_asset_extensions() -> Vec<String> {
	vec!["png".to_string(), "jpg".to_string(), "jpeg".to_string()]
}

impl AssetsConfig {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		AssetsConfig {
			path: path.into(),
			extensions: default_asset_extensions(),
		}
	}
}

impl PipelineConfig {
	/// A configuration with only a memory cache and no tile sources.
	pub fn new(tile_source: &str) -> Self {
		PipelineConfig {
			tile_source: tile_source.to_string(),
			memory: MemoryConfig::default(),
			store: None,
			archives: Vec::new(),
			ignore_tile_source: false,
			assets: None,
			network: None,
			workers: None,
			bulk: BulkConfig::default(),
		}
	}

	pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
		let config: PipelineConfig = serde_yaml_ng::from_reader(reader)?;
		config.validate()?;
		Ok(config)
	}

	pub fn from_string(text: &str) -> Result<Self> {
		let config: PipelineConfig = serde_yaml_ng::from_str(text)?;
		config.validate()?;
		Ok(config)
	}

	/// Parse from a file path and resolve relative paths against the directory of that file.
	pub fn from_path(path: &Path) -> Result<Self> {
		let file = File::open(path).with_context(|| format!("opening config file {path:?}"))?;
		let mut config = PipelineConfig::from_reader(BufReader::new(file))
			.with_context(|| format!("parsing config file {path:?}"))?;
		if let Some(base) = path.parent() {
			config.resolve_paths(base);
		}
		Ok(config)
	}

	pub fn resolve_paths(&mut self, base: &Path) {
		let resolve = |path: &mut PathBuf| {
			if path.is_relative() {
				*path = base.join(&*path);
			}
		};

		if let Some(store) = &mut self.store {
			resolve(&mut store.path);
		}
		self.archives.iter_mut().for_each(resolve);
		if let Some(assets) = &mut self.assets {
			resolve(&mut assets.path);
		}
	}

	pub fn validate(&self) -> Result<()> {
		ensure!(!self.tile_source.is_empty(), "tile_source must not be empty");
		if let Some(store) = &self.store {
			store.validate()?;
		}
		if let Some(network) = &self.network {
			network.validate()?;
		}
		if let Some(workers) = self.workers {
			ensure!(workers > 0, "workers must be positive");
		}
		ensure!(self.bulk.max_in_flight > 0, "bulk.max_in_flight must be positive");
		Ok(())
	}

	/// Worker count and bulk backpressure after applying defaults.
	pub fn concurrency(&self) -> ConcurrencyLimits {
		let defaults = ConcurrencyLimits::default();
		ConcurrencyLimits::new(self.workers.unwrap_or(defaults.workers), self.bulk.max_in_flight)
	}
}
