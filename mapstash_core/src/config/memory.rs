use serde::Deserialize;

/// Limits of the in-process tile cache.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
	/// Minimum number of tiles kept in memory
	#[serde(default = "default_capacity")]
	pub capacity: usize,

	/// Extra tiles kept beyond the current viewport
	#[serde(default)]
	pub overshoot: usize,
}

fn default_capacity() -> usize {
	9
}

impl Default for MemoryConfig {
	fn default() -> Self {
		MemoryConfig {
			capacity: default_capacity(),
			overshoot: 0,
		}
	}
}
