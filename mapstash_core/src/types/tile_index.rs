//! Tile addresses in a Web Mercator tile pyramid
//!
//! This module provides the [`TileIndex`] type, the key every cache layer, archive reader and the
//! request coalescer use to identify a tile. It includes methods for:
//! - Creating and validating tile indices
//! - Packing into and unpacking from a single 64-bit key
//! - Wrapping x around the date line
//! - Moving between zoom levels and TMS/XYZ row orders
//!
//! # Examples
//!
//! ```
//! use mapstash_core::TileIndex;
//!
//! let index = TileIndex::new(3, 1, 2).unwrap();
//! assert_eq!(index.zoom, 3);
//! assert_eq!(index.x, 1);
//! assert_eq!(index.y, 2);
//!
//! // The packed key round-trips losslessly
//! let key = index.key();
//! assert_eq!(TileIndex::from_key(key).unwrap(), index);
//! ```

use crate::TileError;
use anyhow::{Result, ensure};
use std::{
	cmp::Ordering,
	fmt::{self, Debug, Display},
	hash::{Hash, Hasher},
};

/// Highest supported zoom level. x and y each get 29 bits of the packed key.
pub const MAX_ZOOM: u8 = 29;

const AXIS_BITS: u32 = 29;
const AXIS_MASK: u64 = (1 << AXIS_BITS) - 1;
const ZOOM_SHIFT: u32 = 2 * AXIS_BITS;

/// A tile address with zoom level, x and y indices.
///
/// Immutable value type. Equality, hashing and ordering all go through the packed key
/// `zoom << 58 | y << 29 | x`.
#[derive(Clone, Copy)]
pub struct TileIndex {
	/// The zoom level of the tile.
	pub zoom: u8,
	/// The x index (column), counted eastwards from the antimeridian.
	pub x: u32,
	/// The y index (row), counted southwards from the north edge.
	pub y: u32,
}

impl TileIndex {
	/// Create a new `TileIndex` at the given `zoom` and tile indices `x`, `y`.
	///
	/// # Errors
	/// Returns [`TileError::InvalidZoom`] if `zoom` > [`MAX_ZOOM`], or an error if `x` or `y`
	/// are outside `0..2^zoom`.
	pub fn new(zoom: u8, x: u32, y: u32) -> Result<TileIndex> {
		check_zoom(zoom)?;
		let max = tiles_per_axis(zoom);
		ensure!(u64::from(x) < max, "x ({x}) out of bounds for zoom {zoom}");
		ensure!(u64::from(y) < max, "y ({y}) out of bounds for zoom {zoom}");
		Ok(TileIndex { zoom, x, y })
	}

	/// Create a `TileIndex` whose x wraps around the date line.
	///
	/// Any integer `x` is taken modulo `2^zoom`, so `-1` becomes the easternmost column.
	/// The y axis does not wrap.
	///
	/// # Examples
	///
	/// ```
	/// use mapstash_core::TileIndex;
	///
	/// let index = TileIndex::new_wrapped(2, -1, 0).unwrap();
	/// assert_eq!(index.x, 3);
	/// let index = TileIndex::new_wrapped(2, 9, 1).unwrap();
	/// assert_eq!(index.x, 1);
	/// ```
	pub fn new_wrapped(zoom: u8, x: i64, y: u32) -> Result<TileIndex> {
		check_zoom(zoom)?;
		let size = tiles_per_axis(zoom) as i64;
		TileIndex::new(zoom, x.rem_euclid(size) as u32, y)
	}

	/// The packed 64-bit key `zoom << 58 | y << 29 | x`.
	#[must_use]
	pub fn key(&self) -> u64 {
		(u64::from(self.zoom) << ZOOM_SHIFT) | (u64::from(self.y) << AXIS_BITS) | u64::from(self.x)
	}

	/// Unpack a key produced by [`key`](Self::key).
	///
	/// # Errors
	/// Returns an error if the key encodes an unsupported zoom or coordinates outside the grid.
	pub fn from_key(key: u64) -> Result<TileIndex> {
		let zoom = key >> ZOOM_SHIFT;
		ensure!(zoom <= u64::from(MAX_ZOOM), TileError::InvalidZoom { zoom: zoom as u32 });
		TileIndex::new(
			zoom as u8,
			(key & AXIS_MASK) as u32,
			((key >> AXIS_BITS) & AXIS_MASK) as u32,
		)
	}

	/// Largest valid x or y at this zoom level, `2^zoom - 1`.
	#[must_use]
	pub fn max_coord(&self) -> u32 {
		(tiles_per_axis(self.zoom) - 1) as u32
	}

	/// The tile one zoom level up that contains this one.
	///
	/// # Errors
	/// Returns an error at zoom 0.
	pub fn parent(&self) -> Result<TileIndex> {
		ensure!(self.zoom > 0, "tile at zoom 0 has no parent");
		TileIndex::new(self.zoom - 1, self.x / 2, self.y / 2)
	}

	/// Mirror the row, converting between XYZ (y grows southwards) and TMS (y grows northwards).
	///
	/// # Examples
	///
	/// ```
	/// use mapstash_core::TileIndex;
	///
	/// let index = TileIndex::new(3, 1, 2).unwrap();
	/// assert_eq!(index.flip_y().y, 5);
	/// ```
	#[must_use]
	pub fn flip_y(&self) -> TileIndex {
		TileIndex {
			zoom: self.zoom,
			x: self.x,
			y: self.max_coord() - self.y,
		}
	}
}

/// Number of tiles along one axis at `zoom`, `2^zoom`.
#[must_use]
pub fn tiles_per_axis(zoom: u8) -> u64 {
	1u64 << zoom
}

/// Number of tiles covering the whole world at `zoom`, `4^zoom`.
#[must_use]
pub fn tile_count(zoom: u8) -> u64 {
	1u64 << (2 * u32::from(zoom))
}

/// Reject zoom levels the packed key cannot represent.
pub fn check_zoom(zoom: u8) -> Result<()> {
	ensure!(zoom <= MAX_ZOOM, TileError::InvalidZoom { zoom: u32::from(zoom) });
	Ok(())
}

impl PartialEq for TileIndex {
	fn eq(&self, other: &Self) -> bool {
		self.key() == other.key()
	}
}

impl Eq for TileIndex {}

impl Hash for TileIndex {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.key().hash(state);
	}
}

/// Orders by packed key: first zoom, then row, then column.
impl Ord for TileIndex {
	fn cmp(&self, other: &Self) -> Ordering {
		self.key().cmp(&other.key())
	}
}

impl PartialOrd for TileIndex {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

/// Custom `Debug` format as `TileIndex(z, [x, y])` for readability.
impl Debug for TileIndex {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "TileIndex({}, [{}, {}])", self.zoom, self.x, self.y)
	}
}

impl Display for TileIndex {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;
	use std::collections::HashSet;

	#[test]
	fn new_checks_bounds() {
		assert!(TileIndex::new(0, 0, 0).is_ok());
		assert!(TileIndex::new(3, 7, 7).is_ok());
		assert!(TileIndex::new(3, 8, 0).is_err());
		assert!(TileIndex::new(3, 0, 8).is_err());
	}

	#[test]
	fn new_rejects_zoom_above_max() {
		let err = TileIndex::new(MAX_ZOOM + 1, 0, 0).unwrap_err();
		assert_eq!(
			err.downcast_ref::<TileError>(),
			Some(&TileError::InvalidZoom { zoom: 30 })
		);
	}

	#[rstest]
	#[case(0, 0, 0)]
	#[case(1, 1, 0)]
	#[case(3, 1, 2)]
	#[case(12, 2200, 1343)]
	#[case(MAX_ZOOM, 0, (1 << 29) - 1)]
	#[case(MAX_ZOOM, (1 << 29) - 1, (1 << 29) - 1)]
	fn key_is_lossless(#[case] zoom: u8, #[case] x: u32, #[case] y: u32) -> Result<()> {
		let index = TileIndex::new(zoom, x, y)?;
		let back = TileIndex::from_key(index.key())?;
		assert_eq!((back.zoom, back.x, back.y), (zoom, x, y));
		Ok(())
	}

	#[test]
	fn key_layout() -> Result<()> {
		let index = TileIndex::new(3, 1, 2)?;
		assert_eq!(index.key(), (3u64 << 58) | (2u64 << 29) | 1);
		Ok(())
	}

	#[test]
	fn from_key_rejects_garbage() {
		// zoom 31
		assert!(TileIndex::from_key(31u64 << 58).is_err());
		// x = 8 at zoom 3
		assert!(TileIndex::from_key((3u64 << 58) | 8).is_err());
	}

	#[rstest]
	#[case(2, -1, 3)]
	#[case(2, -4, 0)]
	#[case(2, 4, 0)]
	#[case(2, 9, 1)]
	#[case(0, 5, 0)]
	fn wraps_x(#[case] zoom: u8, #[case] x: i64, #[case] expected: u32) -> Result<()> {
		assert_eq!(TileIndex::new_wrapped(zoom, x, 0)?.x, expected);
		Ok(())
	}

	#[test]
	fn wrapped_y_does_not_wrap() {
		assert!(TileIndex::new_wrapped(2, 0, 4).is_err());
	}

	#[test]
	fn counts() {
		assert_eq!(tiles_per_axis(0), 1);
		assert_eq!(tiles_per_axis(10), 1024);
		assert_eq!(tile_count(0), 1);
		assert_eq!(tile_count(3), 64);
		assert_eq!(tile_count(MAX_ZOOM), 1 << 58);
	}

	#[test]
	fn parent_and_flip() -> Result<()> {
		let index = TileIndex::new(5, 16, 20)?;
		assert_eq!(index.parent()?, TileIndex::new(4, 8, 10)?);
		assert!(TileIndex::new(0, 0, 0)?.parent().is_err());
		assert_eq!(index.flip_y().flip_y(), index);
		assert_eq!(index.flip_y().y, 11);
		Ok(())
	}

	#[test]
	fn equality_and_hash_follow_key() -> Result<()> {
		let mut set = HashSet::new();
		set.insert(TileIndex::new(3, 1, 2)?);
		set.insert(TileIndex::new(3, 1, 2)?);
		set.insert(TileIndex::new(3, 2, 1)?);
		assert_eq!(set.len(), 2);
		Ok(())
	}

	#[test]
	fn ordering() -> Result<()> {
		let mut list = vec![
			TileIndex::new(2, 3, 0)?,
			TileIndex::new(1, 0, 1)?,
			TileIndex::new(2, 0, 1)?,
		];
		list.sort();
		assert_eq!(format!("{list:?}"), "[TileIndex(1, [0, 1]), TileIndex(2, [3, 0]), TileIndex(2, [0, 1])]");
		Ok(())
	}

	#[test]
	fn display() -> Result<()> {
		assert_eq!(TileIndex::new(3, 1, 2)?.to_string(), "3/1/2");
		Ok(())
	}
}
