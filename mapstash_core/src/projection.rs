//! Tile-index arithmetic on the Web Mercator pyramid.
//!
//! Converts between WGS84 coordinates, global pixel coordinates and tile indices, computes the
//! ground resolution at a latitude, and enumerates the tiles covering a bounding box.
//!
//! # Examples
//!
//! ```
//! use mapstash_core::{GeoBBox, projection};
//!
//! // Berlin at zoom 10
//! let index = projection::geo_to_tile(13.404954, 52.520008, 10).unwrap();
//! assert_eq!((index.x, index.y), (550, 335));
//!
//! let bbox = GeoBBox::new(13.08, 52.33, 13.76, 52.67).unwrap();
//! let tiles: Vec<_> = projection::tile_indices_for(&bbox, 10).unwrap().collect();
//! assert_eq!(tiles.len() as u64, projection::count_tiles(&bbox, 10).unwrap());
//! ```

use crate::{EARTH_RADIUS, GeoBBox, MAX_MERCATOR_LAT, TileIndex, TileRange, check_zoom, tiles_per_axis};
use anyhow::{Context, Result, ensure};
use std::f64::consts::PI;

/// Edge length of a tile in pixels.
pub const TILE_SIZE: u64 = 256;

/// Width and height of the whole map at `zoom`, in pixels.
pub fn map_size(zoom: u8) -> Result<u64> {
	check_zoom(zoom)?;
	Ok(TILE_SIZE << zoom)
}

/// Meters on the ground covered by one pixel at latitude `lat` (degrees) and `zoom`.
///
/// Latitudes beyond the Mercator limit are clamped.
///
/// # Examples
///
/// ```
/// use mapstash_core::projection::ground_resolution;
///
/// let meters = ground_resolution(0.0, 0).unwrap();
/// assert!((meters - 156_543.034).abs() < 0.001);
/// ```
pub fn ground_resolution(lat: f64, zoom: u8) -> Result<f64> {
	let size = map_size(zoom)? as f64;
	let lat = clamp_lat(lat);
	Ok((lat * PI / 180.0).cos() * 2.0 * PI * EARTH_RADIUS / size)
}

/// The tile containing the point (`lon`, `lat`) at `zoom`.
///
/// Latitudes are clamped to the Mercator limit; points on the east or south edge of the world
/// map to the last column or row.
///
/// # Errors
/// Returns `InvalidZoom` for unsupported zoom levels and an error for out-of-range coordinates.
pub fn geo_to_tile(lon: f64, lat: f64, zoom: u8) -> Result<TileIndex> {
	check_zoom(zoom)?;
	ensure!((-180.0..=180.0).contains(&lon), "longitude ({lon}) must be within [-180, 180]");
	ensure!((-90.0..=90.0).contains(&lat), "latitude ({lat}) must be within [-90, 90]");

	let size = tiles_per_axis(zoom) as f64;
	let (x, y) = unit_xy(lon, lat);
	let x = (x * size).floor().clamp(0.0, size - 1.0);
	let y = (y * size).floor().clamp(0.0, size - 1.0);
	TileIndex::new(zoom, x as u32, y as u32)
}

/// Global pixel coordinates of (`lon`, `lat`) at `zoom`.
pub fn geo_to_pixel(lon: f64, lat: f64, zoom: u8) -> Result<(u64, u64)> {
	ensure!((-180.0..=180.0).contains(&lon), "longitude ({lon}) must be within [-180, 180]");
	let size = map_size(zoom)? as f64;
	let (x, y) = unit_xy(lon, lat);
	let max = size - 1.0;
	Ok(((x * size).floor().clamp(0.0, max) as u64, (y * size).floor().clamp(0.0, max) as u64))
}

/// The tile containing global pixel (`px`, `py`) at `zoom`.
pub fn pixel_to_tile(px: u64, py: u64, zoom: u8) -> Result<TileIndex> {
	let x = u32::try_from(px / TILE_SIZE).context("pixel x out of range")?;
	let y = u32::try_from(py / TILE_SIZE).context("pixel y out of range")?;
	TileIndex::new(zoom, x, y)
}

/// `(lon, lat)` of the north-west corner of a tile.
pub fn tile_to_geo(index: &TileIndex) -> (f64, f64) {
	corner_to_geo(index.zoom, u64::from(index.x), u64::from(index.y))
}

/// Geographic extent of a tile.
pub fn tile_bounds(index: &TileIndex) -> GeoBBox {
	let (west, north) = corner_to_geo(index.zoom, u64::from(index.x), u64::from(index.y));
	let (east, south) = corner_to_geo(index.zoom, u64::from(index.x) + 1, u64::from(index.y) + 1);
	GeoBBox {
		west,
		south,
		east,
		north,
	}
}

/// Tile rectangles covering `bbox` at `zoom`.
///
/// Returns one range, or two when the box crosses the antimeridian and the halves do not touch
/// at this zoom level. y is clipped to the grid; there is no vertical wrap.
pub fn tile_ranges_for(bbox: &GeoBBox, zoom: u8) -> Result<Vec<TileRange>> {
	check_zoom(zoom)?;
	let mut bbox = *bbox;
	bbox.limit_to_mercator();

	let mut ranges = Vec::with_capacity(2);
	for part in bbox.split_at_antimeridian() {
		let north_west = geo_to_tile(part.west, part.north, zoom)?;
		let south_east = geo_to_tile(part.east, part.south, zoom)?;
		ranges.push(TileRange::new(
			zoom,
			north_west.x,
			north_west.y,
			south_east.x,
			south_east.y,
		)?);
	}

	if let [west_half, east_half] = ranges[..]
		&& east_half.x_max >= west_half.x_min
	{
		// At coarse zooms both halves can share columns; cover the full width once instead.
		let max = (tiles_per_axis(zoom) - 1) as u32;
		return Ok(vec![TileRange::new(zoom, 0, west_half.y_min, max, west_half.y_max)?]);
	}

	Ok(ranges)
}

/// Lazily enumerate every tile covering `bbox` at `zoom`.
///
/// The sequence is finite and consumed once; call again to restart.
pub fn tile_indices_for(bbox: &GeoBBox, zoom: u8) -> Result<TileIndices> {
	Ok(TileIndices::new(tile_ranges_for(bbox, zoom)?))
}

/// Number of tiles [`tile_indices_for`] yields, without enumerating them.
pub fn count_tiles(bbox: &GeoBBox, zoom: u8) -> Result<u64> {
	Ok(tile_ranges_for(bbox, zoom)?.iter().map(TileRange::count).sum())
}

/// Iterator over the tiles of one or more [`TileRange`]s.
pub struct TileIndices {
	current: Option<Box<dyn Iterator<Item = TileIndex> + Send>>,
	ranges: std::vec::IntoIter<TileRange>,
	remaining: u64,
}

impl TileIndices {
	fn new(ranges: Vec<TileRange>) -> TileIndices {
		let remaining = ranges.iter().map(TileRange::count).sum();
		TileIndices {
			current: None,
			ranges: ranges.into_iter(),
			remaining,
		}
	}

	/// Tiles not yet yielded.
	pub fn remaining(&self) -> u64 {
		self.remaining
	}
}

impl Iterator for TileIndices {
	type Item = TileIndex;

	fn next(&mut self) -> Option<TileIndex> {
		loop {
			if let Some(iter) = self.current.as_mut()
				&& let Some(index) = iter.next()
			{
				self.remaining -= 1;
				return Some(index);
			}
			let range = self.ranges.next()?;
			self.current = Some(Box::new(range.iter()));
		}
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		match usize::try_from(self.remaining) {
			Ok(n) => (n, Some(n)),
			Err(_) => (usize::MAX, None),
		}
	}
}

fn clamp_lat(lat: f64) -> f64 {
	lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT)
}

// Position on the unit square, x eastwards and y southwards.
fn unit_xy(lon: f64, lat: f64) -> (f64, f64) {
	let lat = clamp_lat(lat);
	let x = lon / 360.0 + 0.5;
	let y = 0.5 - 0.5 * (lat * PI / 360.0 + PI / 4.0).tan().ln() / PI;
	(x, y)
}

fn corner_to_geo(zoom: u8, x: u64, y: u64) -> (f64, f64) {
	let size = tiles_per_axis(zoom) as f64;
	(
		(x as f64 / size - 0.5) * 360.0,
		((PI * (1.0 - 2.0 * y as f64 / size)).exp().atan() / PI - 0.25) * 360.0,
	)
}
