//! Inclusive rectangles of tiles at a single zoom level.

use crate::{TileIndex, check_zoom, tiles_per_axis};
use anyhow::{Result, ensure};
use itertools::Itertools;
use std::fmt::Debug;

/// An inclusive rectangle `[x_min, x_max] × [y_min, y_max]` of tiles at one zoom level.
///
/// Never empty and never wrapping: ranges crossing the date line are represented as two
/// `TileRange`s.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
	pub zoom: u8,
	pub x_min: u32,
	pub y_min: u32,
	pub x_max: u32,
	pub y_max: u32,
}

impl TileRange {
	/// # Errors
	/// Returns an error if zoom is unsupported, a bound lies outside the grid or min > max.
	pub fn new(zoom: u8, x_min: u32, y_min: u32, x_max: u32, y_max: u32) -> Result<TileRange> {
		check_zoom(zoom)?;
		let size = tiles_per_axis(zoom);
		ensure!(x_min <= x_max, "x_min ({x_min}) must be <= x_max ({x_max})");
		ensure!(y_min <= y_max, "y_min ({y_min}) must be <= y_max ({y_max})");
		ensure!(u64::from(x_max) < size, "x_max ({x_max}) out of bounds for zoom {zoom}");
		ensure!(u64::from(y_max) < size, "y_max ({y_max}) out of bounds for zoom {zoom}");
		Ok(TileRange {
			zoom,
			x_min,
			y_min,
			x_max,
			y_max,
		})
	}

	/// The full grid at `zoom`.
	pub fn world(zoom: u8) -> Result<TileRange> {
		check_zoom(zoom)?;
		let max = (tiles_per_axis(zoom) - 1) as u32;
		TileRange::new(zoom, 0, 0, max, max)
	}

	#[must_use]
	pub fn width(&self) -> u64 {
		u64::from(self.x_max - self.x_min) + 1
	}

	#[must_use]
	pub fn height(&self) -> u64 {
		u64::from(self.y_max - self.y_min) + 1
	}

	/// Number of tiles in the rectangle.
	#[must_use]
	pub fn count(&self) -> u64 {
		self.width() * self.height()
	}

	#[must_use]
	pub fn contains(&self, index: &TileIndex) -> bool {
		index.zoom == self.zoom
			&& (self.x_min..=self.x_max).contains(&index.x)
			&& (self.y_min..=self.y_max).contains(&index.y)
	}

	/// Returns an iterator over all tile indices within the range, in row-major order.
	pub fn iter(&self) -> impl Iterator<Item = TileIndex> + use<> {
		let zoom = self.zoom;
		(self.y_min..=self.y_max)
			.cartesian_product(self.x_min..=self.x_max)
			.map(move |(y, x)| TileIndex { zoom, x, y })
	}
}

impl Debug for TileRange {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"{}: [{},{},{},{}] ({}x{})",
			self.zoom,
			self.x_min,
			self.y_min,
			self.x_max,
			self.y_max,
			self.width(),
			self.height()
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn new_validates() {
		assert!(TileRange::new(2, 0, 0, 3, 3).is_ok());
		assert!(TileRange::new(2, 0, 0, 4, 3).is_err());
		assert!(TileRange::new(2, 2, 0, 1, 3).is_err());
		assert!(TileRange::new(30, 0, 0, 0, 0).is_err());
	}

	#[test]
	fn counts() -> Result<()> {
		let range = TileRange::new(4, 2, 3, 5, 4)?;
		assert_eq!(range.width(), 4);
		assert_eq!(range.height(), 2);
		assert_eq!(range.count(), 8);
		assert_eq!(TileRange::world(3)?.count(), 64);
		assert_eq!(format!("{range:?}"), "4: [2,3,5,4] (4x2)");
		Ok(())
	}

	#[test]
	fn iter_is_row_major() -> Result<()> {
		let range = TileRange::new(3, 1, 2, 2, 3)?;
		let list: Vec<String> = range.iter().map(|i| i.to_string()).collect();
		assert_eq!(list, vec!["3/1/2", "3/2/2", "3/1/3", "3/2/3"]);
		assert_eq!(range.iter().count() as u64, range.count());
		Ok(())
	}

	#[test]
	fn contains() -> Result<()> {
		let range = TileRange::new(3, 1, 2, 2, 3)?;
		assert!(range.contains(&TileIndex::new(3, 2, 3)?));
		assert!(!range.contains(&TileIndex::new(3, 3, 3)?));
		assert!(!range.contains(&TileIndex::new(4, 2, 3)?));
		Ok(())
	}
}
