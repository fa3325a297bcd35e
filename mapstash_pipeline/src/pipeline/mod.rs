//! The tile resolution pipeline.
//!
//! A [`ProviderPipeline`] resolves a [`TileIndex`] by asking, in order, the memory cache, the
//! persistent store, every archive in registration order, the assets directory and finally the
//! network. The first source that has the tile wins. Whatever a provider produces is written
//! back into the memory cache and the store.
//!
//! # Threads
//!
//! - A fixed pool of worker threads walks the provider chain. Store, archive and network I/O only
//!   ever happen there.
//! - One callback thread runs every request callback and everything passed to
//!   [`ProviderPipeline::post`]. Consumers may treat it as their event loop.
//!
//! Concurrent requests for the same tile share one in-flight fetch; their callbacks are invoked
//! in registration order once it resolves.

mod builder;
mod request;
mod shared;
mod stats;

pub use builder::PipelineBuilder;
pub use request::{RequestHandle, RequestOptions, TileCallback};
pub use stats::PipelineStats;

use crate::provider::{ArchiveProvider, AssetsProvider, CancelToken, NetworkFetcher, TileProvider};
use anyhow::{Result, anyhow, bail};
use mapstash_container::{ArchiveRegistry, OpenOptions, PersistentStore};
use mapstash_core::{MemoryTileCache, PipelineConfig, TileBlob, TileIndex, TileResult};
use parking_lot::{Mutex, RwLock};
use request::InFlightRequest;
use shared::{CallbackMessage, Job, Shared};
use stats::bump;
use std::{
	fmt::Debug,
	panic::{self, AssertUnwindSafe},
	sync::Arc,
	thread::{self, JoinHandle},
};

pub struct ProviderPipeline {
	shared: Arc<Shared>,
	jobs: RwLock<Option<crossbeam_channel::Sender<Job>>>,
	workers: Mutex<Vec<JoinHandle<()>>>,
	callback_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ProviderPipeline {
	/// Builds the pipeline described by `config`.
	///
	/// A store that cannot be opened is logged and left out; the pipeline then runs without disk
	/// cache. Archives are opened on first use.
	pub fn new(config: &PipelineConfig, registry: Arc<ArchiveRegistry>) -> Result<ProviderPipeline> {
		config.validate()?;

		let mut builder = PipelineBuilder::new(&config.tile_source)
			.memory(config.memory.clone())
			.workers(config.concurrency().workers);

		if let Some(store_config) = &config.store {
			match PersistentStore::open_with_config(store_config) {
				Ok(store) => builder = builder.store(store),
				Err(e) => log::error!("continuing without tile store: {e:#}"),
			}
		}

		let options = OpenOptions {
			ignore_tile_source: config.ignore_tile_source,
		};
		for path in &config.archives {
			builder = builder.provider(ArchiveProvider::new(path, registry.clone(), options)?);
		}

		if let Some(assets) = &config.assets {
			builder = builder.provider(AssetsProvider::new(assets)?);
		}

		if let Some(network) = &config.network {
			builder = builder.provider(NetworkFetcher::new(network)?);
		}

		builder.build()
	}

	fn start(builder: PipelineBuilder) -> Result<ProviderPipeline> {
		let PipelineBuilder {
			tile_source,
			memory,
			store,
			providers,
			workers,
		} = builder;

		let (callback_tx, callback_rx) = crossbeam_channel::unbounded::<CallbackMessage>();
		let callback_thread = thread::Builder::new()
			.name("mapstash-callbacks".to_string())
			.spawn(move || {
				for message in callback_rx {
					match message {
						CallbackMessage::Run(f) => {
							if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
								log::error!("a tile callback panicked");
							}
						}
						CallbackMessage::Stop => break,
					}
				}
			})?;

		log::debug!(
			"starting pipeline for '{tile_source}' with {workers} workers and providers [{}]",
			providers.iter().map(|p| p.id().to_string()).collect::<Vec<_>>().join(", ")
		);

		let shared = Arc::new(Shared::new(
			tile_source,
			MemoryTileCache::new(memory.capacity, memory.overshoot),
			store,
			providers,
			callback_tx,
		));

		let pipeline = ProviderPipeline {
			shared: shared.clone(),
			jobs: RwLock::new(None),
			workers: Mutex::new(Vec::with_capacity(workers)),
			callback_thread: Mutex::new(Some(callback_thread)),
		};

		let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
		for i in 0..workers {
			let job_rx = job_rx.clone();
			let shared = shared.clone();
			let handle = thread::Builder::new()
				.name(format!("mapstash-worker-{i}"))
				.spawn(move || {
					for job in job_rx {
						shared.resolve(job);
					}
				})?;
			pipeline.workers.lock().push(handle);
		}
		*pipeline.jobs.write() = Some(job_tx);

		Ok(pipeline)
	}

	/// Requests a tile; `callback` runs on the callback thread exactly once unless the request is
	/// cancelled first.
	pub fn request<F>(&self, index: TileIndex, callback: F) -> Result<RequestHandle>
	where
		F: FnOnce(TileResult<Arc<TileBlob>>) + Send + 'static,
	{
		self.request_with(index, RequestOptions::default(), callback)
	}

	pub fn request_with<F>(&self, index: TileIndex, options: RequestOptions, callback: F) -> Result<RequestHandle>
	where
		F: FnOnce(TileResult<Arc<TileBlob>>) + Send + 'static,
	{
		let jobs = self.jobs.read();
		let Some(jobs) = jobs.as_ref() else {
			bail!("the tile pipeline has been shut down");
		};
		let shared = &self.shared;
		bump(&shared.stats.requests);

		if !options.skip_memory
			&& let Some(blob) = shared.memory.get(&index)
		{
			bump(&shared.stats.memory_hits);
			shared
				.try_post(Box::new(move || callback(Ok(blob))))
				.map_err(|_| anyhow!("the callback thread has stopped"))?;
			return Ok(RequestHandle::memory_hit(index));
		}

		let waiter_id = shared.next_id();
		let mut in_flight = shared.in_flight.lock();
		if let Some(request) = in_flight.get_mut(&index) {
			request.waiters.push((waiter_id, Box::new(callback)));
			bump(&shared.stats.coalesced);
			log::trace!("tile {index} is in flight, {} waiters", request.waiters.len());
			return Ok(RequestHandle {
				index,
				request_id: request.request_id,
				waiter_id,
			});
		}

		let request_id = shared.next_id();
		let token = CancelToken::new();
		in_flight.insert(
			index,
			InFlightRequest {
				request_id,
				token: token.clone(),
				waiters: vec![(waiter_id, Box::new(callback))],
			},
		);
		drop(in_flight);

		let job = Job {
			index,
			request_id,
			token,
			skip_memory: options.skip_memory,
		};
		if jobs.send(job).is_err() {
			shared.in_flight.lock().remove(&index);
			bail!("the worker pool has stopped");
		}

		Ok(RequestHandle {
			index,
			request_id,
			waiter_id,
		})
	}

	/// Withdraws one waiter. Returns `false` if the request already resolved.
	///
	/// When the last waiter leaves, the fetch is cancelled at the next provider boundary. A
	/// provider call that is already running finishes and its tile is still cached.
	pub fn cancel(&self, handle: &RequestHandle) -> bool {
		let callback = {
			let mut in_flight = self.shared.in_flight.lock();
			let Some(request) = in_flight.get_mut(&handle.index) else {
				return false;
			};
			if request.request_id != handle.request_id {
				return false;
			}
			let Some(position) = request.waiters.iter().position(|(id, _)| *id == handle.waiter_id) else {
				return false;
			};
			let (_, callback) = request.waiters.remove(position);
			if request.waiters.is_empty() {
				request.token.cancel();
				in_flight.remove(&handle.index);
				log::trace!("cancelled the fetch of tile {}", handle.index);
			}
			callback
		};
		drop(callback);
		bump(&self.shared.stats.cancellations);
		true
	}

	/// Protects the tiles on screen from eviction and trims the memory cache to its new limit.
	pub fn set_viewport<I>(&self, indices: I)
	where
		I: IntoIterator<Item = TileIndex>,
	{
		self.shared.memory.set_viewport(indices);
		let evicted = self.shared.memory.evict_excess();
		log::trace!("viewport changed, evicted {evicted} tiles");
	}

	/// Runs `f` on the callback thread.
	pub fn post<F>(&self, f: F) -> Result<()>
	where
		F: FnOnce() + Send + 'static,
	{
		self
			.shared
			.try_post(Box::new(f))
			.map_err(|_| anyhow!("the callback thread has stopped"))
	}

	pub(crate) fn try_post(&self, f: shared::Callback) -> std::result::Result<(), shared::Callback> {
		self.shared.try_post(f)
	}

	pub fn stats(&self) -> PipelineStats {
		self.shared.stats.snapshot()
	}

	pub fn in_flight_count(&self) -> usize {
		self.shared.in_flight.lock().len()
	}

	pub fn tile_source(&self) -> &str {
		&self.shared.tile_source
	}

	pub fn memory(&self) -> &MemoryTileCache {
		&self.shared.memory
	}

	pub fn store(&self) -> Option<&PersistentStore> {
		self.shared.store.as_ref()
	}

	pub fn providers(&self) -> &[Arc<dyn TileProvider>] {
		&self.shared.providers
	}

	/// Stops accepting requests, lets the workers finish the queued jobs, delivers the pending
	/// callbacks and joins all threads. Calling it again does nothing.
	pub fn shutdown(&self) {
		let Some(jobs) = self.jobs.write().take() else {
			return;
		};
		drop(jobs);

		for worker in self.workers.lock().drain(..) {
			if worker.join().is_err() {
				log::error!("a pipeline worker panicked");
			}
		}

		let _ = self.shared.callbacks.send(CallbackMessage::Stop);
		if let Some(handle) = self.callback_thread.lock().take() {
			if handle.thread().id() == thread::current().id() {
				log::warn!("pipeline shut down from its own callback thread, not joining it");
			} else if handle.join().is_err() {
				log::error!("the callback thread panicked");
			}
		}
		log::debug!("pipeline for '{}' shut down", self.shared.tile_source);
	}
}

impl Drop for ProviderPipeline {
	fn drop(&mut self) {
		self.shutdown();
	}
}

impl Debug for ProviderPipeline {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ProviderPipeline")
			.field("tile_source", &self.shared.tile_source)
			.field("memory", &self.shared.memory)
			.field("store", &self.shared.store.as_ref().map(PersistentStore::path))
			.field("providers", &self.shared.providers)
			.finish()
	}
}
