use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of a running pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
	/// Calls to `request` and `request_with`
	pub requests: u64,
	/// Requests attached to an in-flight request for the same tile
	pub coalesced: u64,
	/// Requests served from the memory cache
	pub memory_hits: u64,
	pub store_hits: u64,
	/// Tiles produced by an archive, the assets or the network
	pub provider_hits: u64,
	/// Resolutions where no provider had the tile
	pub failures: u64,
	pub cancellations: u64,
}

#[derive(Default)]
pub(crate) struct StatsCounters {
	pub requests: AtomicU64,
	pub coalesced: AtomicU64,
	pub memory_hits: AtomicU64,
	pub store_hits: AtomicU64,
	pub provider_hits: AtomicU64,
	pub failures: AtomicU64,
	pub cancellations: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64) {
	counter.fetch_add(1, Ordering::Relaxed);
}

impl StatsCounters {
	pub fn snapshot(&self) -> PipelineStats {
		let read = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
		PipelineStats {
			requests: read(&self.requests),
			coalesced: read(&self.coalesced),
			memory_hits: read(&self.memory_hits),
			store_hits: read(&self.store_hits),
			provider_hits: read(&self.provider_hits),
			failures: read(&self.failures),
			cancellations: read(&self.cancellations),
		}
	}
}
