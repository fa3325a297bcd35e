//! This module provides the in-process tile cache that sits in front of every other tile source.
//!
//! The `MemoryTileCache` is not a strict LRU: its size limit is "the larger of the configured
//! capacity and the current viewport plus an overshoot margin", so panning near the edge of the
//! visible area does not thrash. Tiles of the current viewport are protected and never evicted.
//!
//! # Examples
//!
//! ```rust
//! use mapstash_core::{Blob, MemoryTileCache, ProviderId, TileBlob, TileIndex};
//! use std::sync::Arc;
//!
//! let cache = MemoryTileCache::new(2, 0);
//! for x in 0..3 {
//!     let index = TileIndex::new(2, x, 0).unwrap();
//!     cache.put(Arc::new(TileBlob::new(index, Blob::from("png"), ProviderId::Network)));
//! }
//! assert_eq!(cache.len(), 2);
//! assert!(cache.get(&TileIndex::new(2, 0, 0).unwrap()).is_none());
//! ```

use crate::{TileBlob, TileIndex};
use lru::LruCache;
use parking_lot::Mutex;
use std::{collections::HashSet, fmt::Debug, sync::Arc};

/// Bounded, thread-safe cache of tiles keyed by [`TileIndex`].
///
/// Every operation takes the single internal lock for a short, I/O-free critical section.
pub struct MemoryTileCache {
	inner: Mutex<Inner>,
}

struct Inner {
	/// Tiles outside the viewport, the only eviction candidates
	entries: LruCache<TileIndex, Arc<TileBlob>>,
	/// Cached tiles of the viewport
	pinned: LruCache<TileIndex, Arc<TileBlob>>,
	protected: HashSet<TileIndex>,
	capacity: usize,
	overshoot: usize,
}

impl Inner {
	fn len(&self) -> usize {
		self.entries.len() + self.pinned.len()
	}

	fn effective_capacity(&self) -> usize {
		self.capacity.max(self.protected.len() + self.overshoot)
	}

	fn evict_excess(&mut self) -> usize {
		// pinned.len() <= protected.len() <= effective capacity, so the excess always fits in `entries`
		let excess = self.len().saturating_sub(self.effective_capacity());
		let mut evicted = 0;
		while evicted < excess && self.entries.pop_lru().is_some() {
			evicted += 1;
		}
		if evicted > 0 {
			log::trace!("evicted {evicted} tiles, {} remain", self.len());
		}
		evicted
	}

	fn set_viewport(&mut self, protected: HashSet<TileIndex>) {
		// tiles leaving the viewport become the most recently used, oldest first
		let released: Vec<TileIndex> = self
			.pinned
			.iter()
			.rev()
			.map(|(index, _)| *index)
			.filter(|index| !protected.contains(index))
			.collect();
		for index in released {
			if let Some(blob) = self.pinned.pop(&index) {
				self.entries.put(index, blob);
			}
		}
		for index in &protected {
			if let Some(blob) = self.entries.pop(index) {
				self.pinned.put(*index, blob);
			}
		}
		self.protected = protected;
	}
}

impl MemoryTileCache {
	/// Creates a cache holding at least `capacity` tiles, plus `overshoot` tiles beyond the
	/// viewport once a viewport is set.
	pub fn new(capacity: usize, overshoot: usize) -> Self {
		Self {
			inner: Mutex::new(Inner {
				entries: LruCache::unbounded(),
				pinned: LruCache::unbounded(),
				protected: HashSet::new(),
				capacity,
				overshoot,
			}),
		}
	}

	/// Looks up a tile and marks it as most recently used.
	pub fn get(&self, index: &TileIndex) -> Option<Arc<TileBlob>> {
		let mut inner = self.inner.lock();
		if let Some(blob) = inner.pinned.get(index) {
			return Some(blob.clone());
		}
		inner.entries.get(index).cloned()
	}

	/// Looks up a tile without touching its recency.
	pub fn peek(&self, index: &TileIndex) -> Option<Arc<TileBlob>> {
		let inner = self.inner.lock();
		inner.pinned.peek(index).or_else(|| inner.entries.peek(index)).cloned()
	}

	#[must_use]
	pub fn contains(&self, index: &TileIndex) -> bool {
		let inner = self.inner.lock();
		inner.pinned.contains(index) || inner.entries.contains(index)
	}

	/// Inserts or replaces a tile, then evicts if the cache grew beyond its limit.
	pub fn put(&self, blob: Arc<TileBlob>) {
		let mut inner = self.inner.lock();
		let index = blob.index;
		if inner.protected.contains(&index) {
			inner.pinned.put(index, blob);
		} else {
			inner.entries.put(index, blob);
		}
		inner.evict_excess();
	}

	pub fn remove(&self, index: &TileIndex) -> Option<Arc<TileBlob>> {
		let mut inner = self.inner.lock();
		inner.pinned.pop(index).or_else(|| inner.entries.pop(index))
	}

	pub fn clear(&self) {
		let mut inner = self.inner.lock();
		inner.entries.clear();
		inner.pinned.clear();
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.inner.lock().len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Sets the base capacity in tiles and evicts whatever no longer fits.
	pub fn set_capacity(&self, capacity: usize) {
		let mut inner = self.inner.lock();
		inner.capacity = capacity;
		inner.evict_excess();
	}

	/// The base capacity set by [`new`](Self::new) or [`set_capacity`](Self::set_capacity).
	#[must_use]
	pub fn capacity(&self) -> usize {
		self.inner.lock().capacity
	}

	/// The current size limit: `max(capacity, viewport + overshoot)`.
	#[must_use]
	pub fn effective_capacity(&self) -> usize {
		self.inner.lock().effective_capacity()
	}

	/// Replaces the set of protected tiles with the tiles currently on screen.
	///
	/// Does not evict by itself; call [`evict_excess`](Self::evict_excess) afterwards.
	pub fn set_viewport<I>(&self, indices: I)
	where
		I: IntoIterator<Item = TileIndex>,
	{
		self.inner.lock().set_viewport(indices.into_iter().collect());
	}

	/// Removes least recently used, unprotected tiles until the cache fits its limit.
	///
	/// Returns the number of evicted tiles. Tiles of the viewport are kept apart from the
	/// eviction order, so each eviction is O(1) regardless of the viewport size.
	pub fn evict_excess(&self) -> usize {
		self.inner.lock().evict_excess()
	}
}

impl Debug for MemoryTileCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let inner = self.inner.lock();
		f.debug_struct("MemoryTileCache")
			.field("len", &inner.len())
			.field("capacity", &inner.capacity)
			.field("overshoot", &inner.overshoot)
			.field("protected", &inner.protected.len())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{Blob, ProviderId};
	use anyhow::Result;
	use rstest::rstest;

	fn tile(x: u32) -> Arc<TileBlob> {
		let index = TileIndex::new(10, x, 0).unwrap();
		Arc::new(TileBlob::new(index, Blob::from(vec![x as u8]), ProviderId::Network))
	}

	fn index(x: u32) -> TileIndex {
		TileIndex::new(10, x, 0).unwrap()
	}

	#[rstest]
	#[case(10, 3)]
	#[case(5, 5)]
	#[case(8, 1)]
	#[case(3, 0)]
	fn keeps_most_recently_used(#[case] n: u32, #[case] capacity: u32) {
		let cache = MemoryTileCache::new(capacity as usize, 0);
		for x in 0..n {
			cache.put(tile(x));
		}
		let evicted = n.saturating_sub(capacity);
		assert_eq!(cache.len() as u32, n.min(capacity));
		for x in 0..n {
			assert_eq!(cache.peek(&index(x)).is_some(), x >= evicted, "tile {x}");
		}
	}

	#[test]
	fn get_refreshes_recency() {
		let cache = MemoryTileCache::new(3, 0);
		cache.put(tile(0));
		cache.put(tile(1));
		cache.put(tile(2));
		assert!(cache.get(&index(0)).is_some());
		cache.put(tile(3));
		assert!(cache.contains(&index(0)));
		assert!(!cache.contains(&index(1)));
	}

	#[test]
	fn peek_does_not_refresh() {
		let cache = MemoryTileCache::new(2, 0);
		cache.put(tile(0));
		cache.put(tile(1));
		assert!(cache.peek(&index(0)).is_some());
		cache.put(tile(2));
		assert!(!cache.contains(&index(0)));
	}

	#[test]
	fn viewport_is_protected() {
		let cache = MemoryTileCache::new(2, 0);
		cache.set_viewport([index(0), index(1), index(2)]);
		for x in 0..6 {
			cache.put(tile(x));
		}
		// limit grows to the three viewport tiles
		assert_eq!(cache.effective_capacity(), 3);
		assert_eq!(cache.len(), 3);
		for x in 0..3 {
			assert!(cache.contains(&index(x)), "viewport tile {x}");
		}
	}

	#[test]
	fn overshoot_extends_limit() {
		let cache = MemoryTileCache::new(1, 2);
		cache.set_viewport([index(0), index(1)]);
		for x in 0..10 {
			cache.put(tile(x));
		}
		assert_eq!(cache.len(), 4);
		assert!(cache.contains(&index(0)));
		assert!(cache.contains(&index(1)));
		assert!(cache.contains(&index(8)));
		assert!(cache.contains(&index(9)));
	}

	#[test]
	fn shrinking_viewport_then_evict() {
		let cache = MemoryTileCache::new(2, 0);
		cache.set_viewport((0..5).map(index));
		for x in 0..5 {
			cache.put(tile(x));
		}
		assert_eq!(cache.len(), 5);
		cache.set_viewport([index(4)]);
		assert_eq!(cache.len(), 5);
		assert_eq!(cache.evict_excess(), 3);
		assert!(cache.contains(&index(4)));
		assert!(cache.contains(&index(3)));
	}

	#[test]
	fn large_viewport_evicts_only_outside_tiles() {
		let cache = MemoryTileCache::new(0, 2);
		cache.set_viewport((0..1000).map(index));
		for x in 0..1000 {
			cache.put(tile(x));
		}
		for x in 1000..1010 {
			cache.put(tile(x));
		}
		assert_eq!(cache.effective_capacity(), 1002);
		assert_eq!(cache.len(), 1002);
		assert!(cache.contains(&index(0)));
		assert!(cache.contains(&index(999)));
		assert!(!cache.contains(&index(1007)));
		assert!(cache.contains(&index(1008)));
		assert!(cache.contains(&index(1009)));
	}

	#[test]
	fn viewport_tiles_keep_their_order_when_released() {
		let cache = MemoryTileCache::new(2, 0);
		cache.set_viewport([index(0), index(1)]);
		cache.put(tile(0));
		cache.put(tile(1));
		assert!(cache.get(&index(0)).is_some());
		cache.set_viewport(Vec::new());
		cache.put(tile(2));
		// 1 was used before 0, so it goes first
		assert!(!cache.contains(&index(1)));
		assert!(cache.contains(&index(0)));
		assert!(cache.contains(&index(2)));
	}

	#[test]
	fn tiles_cached_before_the_viewport_are_protected() {
		let cache = MemoryTileCache::new(2, 0);
		cache.put(tile(0));
		cache.set_viewport([index(0)]);
		cache.put(tile(1));
		cache.put(tile(2));
		assert!(cache.contains(&index(0)));
		assert!(cache.contains(&index(2)));
		assert_eq!(cache.len(), 2);
		assert_eq!(cache.remove(&index(0)).map(|blob| blob.index), Some(index(0)));
	}

	#[test]
	fn all_protected_can_exceed_capacity() {
		let cache = MemoryTileCache::new(1, 0);
		cache.set_viewport([index(0), index(1)]);
		cache.put(tile(0));
		cache.put(tile(1));
		assert_eq!(cache.evict_excess(), 0);
		assert_eq!(cache.len(), 2);
	}

	#[test]
	fn set_capacity_evicts() {
		let cache = MemoryTileCache::new(5, 0);
		for x in 0..5 {
			cache.put(tile(x));
		}
		cache.set_capacity(2);
		assert_eq!(cache.capacity(), 2);
		assert_eq!(cache.len(), 2);
		assert!(cache.contains(&index(3)));
		assert!(cache.contains(&index(4)));
	}

	#[test]
	fn put_replaces() -> Result<()> {
		let cache = MemoryTileCache::new(5, 0);
		cache.put(tile(1));
		let replacement = Arc::new(TileBlob::new(index(1), Blob::from("new"), ProviderId::Store));
		cache.put(replacement.clone());
		assert_eq!(cache.len(), 1);
		assert!(Arc::ptr_eq(&cache.get(&index(1)).unwrap(), &replacement));
		assert!(cache.remove(&index(1)).is_some());
		assert!(cache.is_empty());
		Ok(())
	}

	#[test]
	fn debug_format() {
		let cache = MemoryTileCache::new(4, 1);
		cache.put(tile(0));
		assert_eq!(
			format!("{cache:?}"),
			"MemoryTileCache { len: 1, capacity: 4, overshoot: 1, protected: 0 }"
		);
	}
}
