use super::{
	request::InFlightRequest,
	stats::{StatsCounters, bump},
};
use crate::provider::{CancelToken, TileProvider};
use anyhow::anyhow;
use mapstash_container::PersistentStore;
use mapstash_core::{MemoryTileCache, ProviderId, TileBlob, TileError, TileIndex, TileResult};
use parking_lot::Mutex;
use std::{
	collections::HashMap,
	panic::{self, AssertUnwindSafe},
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
	time::SystemTime,
};

pub(crate) type Callback = Box<dyn FnOnce() + Send + 'static>;

pub(crate) enum CallbackMessage {
	Run(Callback),
	Stop,
}

/// Work item for the worker pool.
pub(crate) struct Job {
	pub index: TileIndex,
	pub request_id: u64,
	pub token: CancelToken,
	pub skip_memory: bool,
}

enum Outcome {
	Resolved(Arc<TileBlob>),
	Unavailable,
	Cancelled,
}

/// State shared by the pipeline handle, the workers and bulk jobs.
pub(crate) struct Shared {
	pub tile_source: String,
	pub memory: MemoryTileCache,
	pub store: Option<PersistentStore>,
	pub providers: Vec<Arc<dyn TileProvider>>,
	pub in_flight: Mutex<HashMap<TileIndex, InFlightRequest>>,
	pub callbacks: crossbeam_channel::Sender<CallbackMessage>,
	pub stats: StatsCounters,
	next_id: AtomicU64,
}

impl Shared {
	pub fn new(
		tile_source: String,
		memory: MemoryTileCache,
		store: Option<PersistentStore>,
		providers: Vec<Arc<dyn TileProvider>>,
		callbacks: crossbeam_channel::Sender<CallbackMessage>,
	) -> Shared {
		Shared {
			tile_source,
			memory,
			store,
			providers,
			in_flight: Mutex::new(HashMap::new()),
			callbacks,
			stats: StatsCounters::default(),
			next_id: AtomicU64::new(1),
		}
	}

	/// Ids start at 1; 0 marks memory hits.
	pub fn next_id(&self) -> u64 {
		self.next_id.fetch_add(1, Ordering::Relaxed)
	}

	/// Queues `f` on the callback thread; hands it back if that thread is gone.
	pub fn try_post(&self, f: Callback) -> Result<(), Callback> {
		match self.callbacks.send(CallbackMessage::Run(f)) {
			Ok(()) => Ok(()),
			Err(crossbeam_channel::SendError(CallbackMessage::Run(f))) => Err(f),
			Err(_) => Ok(()),
		}
	}

	/// Runs on a worker thread.
	pub fn resolve(&self, job: Job) {
		let Job {
			index,
			request_id,
			token,
			skip_memory,
		} = job;

		let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.walk(&index, &token, skip_memory)))
			.unwrap_or_else(|_| {
				log::error!("provider chain for tile {index} panicked");
				Outcome::Unavailable
			});

		let result = match outcome {
			Outcome::Resolved(blob) => Ok(blob),
			Outcome::Unavailable => {
				bump(&self.stats.failures);
				Err(TileError::TileUnavailable(index))
			}
			Outcome::Cancelled => {
				log::trace!("resolution of tile {index} stopped after cancellation");
				Err(TileError::Cancelled(index))
			}
		};
		self.finish(index, request_id, result);
	}

	/// Walks store and providers in priority order; the first hit wins.
	fn walk(&self, index: &TileIndex, token: &CancelToken, skip_memory: bool) -> Outcome {
		if !skip_memory && let Some(blob) = self.memory.peek(index) {
			bump(&self.stats.memory_hits);
			return Outcome::Resolved(blob);
		}

		let mut expired = None;
		if let Some(store) = &self.store {
			if token.is_cancelled() {
				return Outcome::Cancelled;
			}
			match store.read_record(&self.tile_source, index) {
				Ok(Some(record)) if !record.is_expired(SystemTime::now()) => {
					bump(&self.stats.store_hits);
					let blob = Arc::new(TileBlob::new(*index, record.bytes, ProviderId::Store).with_expires(record.expires));
					self.memory.put(blob.clone());
					return Outcome::Resolved(blob);
				}
				Ok(Some(record)) => {
					log::trace!("stored tile {index} has expired, asking the providers");
					expired = Some(record);
				}
				Ok(None) => {}
				Err(e) => log::warn!("store lookup of tile {index} failed: {e:#}"),
			}
		}

		for provider in &self.providers {
			if token.is_cancelled() {
				return Outcome::Cancelled;
			}
			let loaded = panic::catch_unwind(AssertUnwindSafe(|| provider.load(&self.tile_source, index)))
				.unwrap_or_else(|_| Err(anyhow!("provider panicked")));
			match loaded {
				Ok(Some(loaded)) => {
					bump(&self.stats.provider_hits);
					let blob = Arc::new(TileBlob::new(*index, loaded.bytes, provider.id()).with_expires(loaded.expires));
					self.write_through(&blob);
					return Outcome::Resolved(blob);
				}
				Ok(None) => log::trace!("{} has no tile {index}", provider.id()),
				Err(e) => log::warn!("{} failed to load tile {index}: {e:#}", provider.id()),
			}
		}

		// better stale than nothing
		if let Some(record) = expired {
			bump(&self.stats.store_hits);
			let blob = Arc::new(TileBlob::new(*index, record.bytes, ProviderId::Store).with_expires(record.expires));
			self.memory.put(blob.clone());
			return Outcome::Resolved(blob);
		}

		Outcome::Unavailable
	}

	fn write_through(&self, blob: &Arc<TileBlob>) {
		self.memory.put(blob.clone());
		if let Some(store) = &self.store
			&& let Err(e) = store.write(&self.tile_source, &blob.index, &blob.bytes, blob.expires)
		{
			log::warn!("cannot write tile {} to the store: {e:#}", blob.index);
		}
	}

	/// Removes the in-flight entry and notifies its waiters in registration order.
	///
	/// Does nothing if the entry belongs to a newer request or was cancelled.
	fn finish(&self, index: TileIndex, request_id: u64, result: TileResult<Arc<TileBlob>>) {
		let waiters = {
			let mut in_flight = self.in_flight.lock();
			match in_flight.get(&index) {
				Some(request) if request.request_id == request_id => {
					in_flight.remove(&index).map(|request| request.waiters).unwrap_or_default()
				}
				_ => {
					log::trace!("tile {index} resolved without waiters");
					return;
				}
			}
		};

		log::trace!("delivering tile {index} to {} waiters", waiters.len());
		let deliver: Callback = Box::new(move || {
			for (_, callback) in waiters {
				let result = result.clone();
				if panic::catch_unwind(AssertUnwindSafe(move || callback(result))).is_err() {
					log::error!("a callback for tile {index} panicked");
				}
			}
		});
		if self.try_post(deliver).is_err() {
			log::warn!("callback thread stopped, dropping the result for tile {index}");
		}
	}
}
