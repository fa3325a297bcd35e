use crate::{Blob, TileIndex};
use std::{
	fmt::{self, Display},
	time::SystemTime,
};

/// The layer that produced a [`TileBlob`].
///
/// Memory hits hand out the cached blob itself, so they report the layer that originally
/// produced it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProviderId {
	Store,
	/// An offline archive, named by its file name
	Archive(String),
	Assets,
	Network,
}

impl Display for ProviderId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ProviderId::Store => f.write_str("store"),
			ProviderId::Archive(name) => write!(f, "archive '{name}'"),
			ProviderId::Assets => f.write_str("assets"),
			ProviderId::Network => f.write_str("network"),
		}
	}
}

/// Tile bytes together with where and when they were obtained.
///
/// Produced by exactly one provider call, then shared between cache layers and waiters as
/// `Arc<TileBlob>`; never mutated afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct TileBlob {
	pub index: TileIndex,
	pub bytes: Blob,
	pub source: ProviderId,
	pub fetched_at: SystemTime,
	/// When the origin wants the tile refreshed, if known
	pub expires: Option<SystemTime>,
}

impl TileBlob {
	pub fn new(index: TileIndex, bytes: Blob, source: ProviderId) -> TileBlob {
		TileBlob {
			index,
			bytes,
			source,
			fetched_at: SystemTime::now(),
			expires: None,
		}
	}

	pub fn with_expires(mut self, expires: Option<SystemTime>) -> TileBlob {
		self.expires = expires;
		self
	}

	/// A tile without expiry never expires.
	pub fn is_expired(&self, now: SystemTime) -> bool {
		self.expires.is_some_and(|expires| expires <= now)
	}
}
