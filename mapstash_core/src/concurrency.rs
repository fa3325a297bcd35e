//! Thread and in-flight limits for the tile pipeline
//!
//! Provider-chain walks are dominated by disk and network waits, so the worker pool is sized
//! above the CPU count; bulk jobs keep only a handful of requests outstanding so they do not
//! starve interactive requests.
//!
//! # Usage
//!
//! ```
//! use mapstash_core::ConcurrencyLimits;
//!
//! let limits = ConcurrencyLimits::default();
//! assert!(limits.workers >= ConcurrencyLimits::MIN_WORKERS);
//! assert!(limits.bulk_in_flight >= 1);
//! ```

/// Worker pool size and bulk backpressure limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyLimits {
	/// Number of worker threads walking provider chains
	pub workers: usize,

	/// Requests a bulk job keeps outstanding before waiting for one to resolve
	pub bulk_in_flight: usize,
}

impl ConcurrencyLimits {
	pub const MIN_WORKERS: usize = 2;
	pub const MAX_WORKERS: usize = 16;

	/// Create limits with custom values; each is at least 1.
	pub fn new(workers: usize, bulk_in_flight: usize) -> Self {
		Self {
			workers: workers.max(1),
			bulk_in_flight: bulk_in_flight.max(1),
		}
	}

	/// Get the number of logical CPUs available
	pub fn cpu_count() -> usize {
		num_cpus::get()
	}
}

impl Default for ConcurrencyLimits {
	/// Two workers per CPU, clamped to `MIN_WORKERS..=MAX_WORKERS`; four bulk requests in flight.
	fn default() -> Self {
		Self {
			workers: (Self::cpu_count() * 2).clamp(Self::MIN_WORKERS, Self::MAX_WORKERS),
			bulk_in_flight: 4,
		}
	}
}
