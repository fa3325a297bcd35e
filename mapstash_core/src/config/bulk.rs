use serde::Deserialize;
use std::time::Duration;

/// Pacing of bulk area downloads.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BulkConfig {
	/// Requests kept outstanding at once
	#[serde(default = "default_max_in_flight")]
	pub max_in_flight: usize,

	/// Minimum time between two progress callbacks, in milliseconds
	#[serde(default = "default_progress_interval_ms")]
	pub progress_interval_ms: u64,
}

fn default_max_in_flight() -> usize {
	4
}

fn default_progress_interval_ms() -> u64 {
	250
}

impl BulkConfig {
	pub fn progress_interval(&self) -> Duration {
		Duration::from_millis(self.progress_interval_ms)
	}
}

impl Default for BulkConfig {
	fn default() -> Self {
		BulkConfig {
			max_in_flight: default_max_in_flight(),
			progress_interval_ms: default_progress_interval_ms(),
		}
	}
}
