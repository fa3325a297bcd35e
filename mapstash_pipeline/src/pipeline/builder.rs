use super::ProviderPipeline;
use crate::provider::TileProvider;
use anyhow::{Result, ensure};
use mapstash_container::PersistentStore;
use mapstash_core::{ConcurrencyLimits, MemoryConfig};
use std::sync::Arc;

/// Assembles a [`ProviderPipeline`] from parts.
///
/// Providers are consulted in the order they are added, after the memory cache and the store.
///
/// ```no_run
/// use mapstash_core::{AssetsConfig, MemoryConfig};
/// use mapstash_pipeline::{AssetsProvider, PipelineBuilder};
///
/// let pipeline = PipelineBuilder::new("Mapnik")
///     .memory(MemoryConfig { capacity: 64, overshoot: 16 })
///     .provider(AssetsProvider::new(&AssetsConfig::new("/opt/tiles")).unwrap())
///     .workers(4)
///     .build()
///     .unwrap();
/// ```
pub struct PipelineBuilder {
	pub(crate) tile_source: String,
	pub(crate) memory: MemoryConfig,
	pub(crate) store: Option<PersistentStore>,
	pub(crate) providers: Vec<Arc<dyn TileProvider>>,
	pub(crate) workers: usize,
}

impl PipelineBuilder {
	pub fn new(tile_source: &str) -> PipelineBuilder {
		PipelineBuilder {
			tile_source: tile_source.to_string(),
			memory: MemoryConfig::default(),
			store: None,
			providers: Vec::new(),
			workers: ConcurrencyLimits::default().workers,
		}
	}

	pub fn memory(mut self, memory: MemoryConfig) -> Self {
		self.memory = memory;
		self
	}

	pub fn store(mut self, store: PersistentStore) -> Self {
		self.store = Some(store);
		self
	}

	pub fn provider<P: TileProvider + 'static>(self, provider: P) -> Self {
		self.shared_provider(Arc::new(provider))
	}

	/// Adds a provider the caller keeps a reference to.
	pub fn shared_provider(mut self, provider: Arc<dyn TileProvider>) -> Self {
		self.providers.push(provider);
		self
	}

	pub fn workers(mut self, workers: usize) -> Self {
		self.workers = workers;
		self
	}

	/// Spawns the worker pool and the callback thread.
	pub fn build(self) -> Result<ProviderPipeline> {
		ensure!(!self.tile_source.is_empty(), "tile source must not be empty");
		ensure!(self.workers > 0, "a pipeline needs at least one worker");
		ProviderPipeline::start(self)
	}
}
