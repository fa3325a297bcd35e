//! The GEMF header: tile sources and the range table.
//!
//! All integers are big-endian. Layout:
//!
//! ```text
//! i32 version (4) | i32 tile size (256) | i32 source count
//! per source: i32 index | i32 name length | name bytes
//! i32 range count
//! per range:  i32 zoom | i32 x_min | i32 x_max | i32 y_min | i32 y_max | i32 source index | i64 offset
//! ```
//!
//! Each range points at a block of 12-byte index records (`i64 data offset`, `i32 length`), one
//! per tile of the range, ordered by x, then y.

use anyhow::{Result, anyhow, bail, ensure};
use byteorder::{BigEndian, ReadBytesExt};
use mapstash_core::TileIndex;
use std::io::Read;

pub const GEMF_VERSION: i32 = 4;
pub const GEMF_TILE_SIZE: i32 = 256;
pub const INDEX_RECORD_SIZE: u64 = 12;

const MAX_SOURCES: i32 = 4096;
const MAX_RANGES: i32 = 1 << 20;
const MAX_NAME_LENGTH: i32 = 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GemfSource {
	pub index: i32,
	pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GemfRange {
	pub zoom: i32,
	pub x_min: i32,
	pub x_max: i32,
	pub y_min: i32,
	pub y_max: i32,
	pub source_index: i32,
	/// File offset of the first index record
	pub offset: u64,
}

impl GemfRange {
	pub fn contains(&self, index: &TileIndex) -> bool {
		let (x, y) = (i64::from(index.x), i64::from(index.y));
		self.zoom == i32::from(index.zoom)
			&& (i64::from(self.x_min)..=i64::from(self.x_max)).contains(&x)
			&& (i64::from(self.y_min)..=i64::from(self.y_max)).contains(&y)
	}

	/// Position of the index record of `index`, which must lie inside the range.
	pub fn record_offset(&self, index: &TileIndex) -> Result<u64> {
		ensure!(self.contains(index), "tile {index} lies outside of range {self:?}");
		let rows = u64::try_from(i64::from(self.y_max) - i64::from(self.y_min) + 1)?;
		let column = u64::from(index.x) - u64::try_from(self.x_min)?;
		let row = u64::from(index.y) - u64::try_from(self.y_min)?;
		column
			.checked_mul(rows)
			.and_then(|position| position.checked_add(row))
			.and_then(|position| position.checked_mul(INDEX_RECORD_SIZE))
			.and_then(|position| position.checked_add(self.offset))
			.ok_or_else(|| anyhow!("index record of tile {index} lies beyond any file size"))
	}

	pub fn tile_count(&self) -> u64 {
		let columns = (i64::from(self.x_max) - i64::from(self.x_min) + 1).max(0) as u64;
		let rows = (i64::from(self.y_max) - i64::from(self.y_min) + 1).max(0) as u64;
		columns.saturating_mul(rows)
	}

	fn validate(&self) -> Result<()> {
		ensure!(
			(0..=i32::from(mapstash_core::MAX_ZOOM)).contains(&self.zoom),
			"invalid zoom {} in range",
			self.zoom
		);
		ensure!(
			0 <= self.x_min && self.x_min <= self.x_max && 0 <= self.y_min && self.y_min <= self.y_max,
			"invalid range {self:?}"
		);
		let size = 1i64 << self.zoom;
		ensure!(
			i64::from(self.x_max) < size && i64::from(self.y_max) < size,
			"range {self:?} exceeds the {size}x{size} tile grid of zoom {}",
			self.zoom
		);
		Ok(())
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GemfHeader {
	pub sources: Vec<GemfSource>,
	pub ranges: Vec<GemfRange>,
}

impl GemfHeader {
	pub fn read<R: Read>(reader: &mut R) -> Result<GemfHeader> {
		let version = reader.read_i32::<BigEndian>()?;
		ensure!(version == GEMF_VERSION, "bad GEMF version {version}");
		let tile_size = reader.read_i32::<BigEndian>()?;
		ensure!(tile_size == GEMF_TILE_SIZE, "bad GEMF tile size {tile_size}");

		let source_count = reader.read_i32::<BigEndian>()?;
		ensure!(
			(0..=MAX_SOURCES).contains(&source_count),
			"bad GEMF source count {source_count}"
		);
		let mut sources = Vec::with_capacity(source_count as usize);
		for _ in 0..source_count {
			let index = reader.read_i32::<BigEndian>()?;
			let length = reader.read_i32::<BigEndian>()?;
			ensure!(
				(0..=MAX_NAME_LENGTH).contains(&length),
				"bad GEMF source name length {length}"
			);
			let mut name = vec![0u8; length as usize];
			reader.read_exact(&mut name)?;
			let name = match String::from_utf8(name) {
				Ok(name) => name,
				Err(e) => bail!("GEMF source name is not UTF-8: {e}"),
			};
			sources.push(GemfSource { index, name });
		}

		let range_count = reader.read_i32::<BigEndian>()?;
		ensure!(
			(0..=MAX_RANGES).contains(&range_count),
			"bad GEMF range count {range_count}"
		);
		let mut ranges = Vec::with_capacity(range_count as usize);
		for _ in 0..range_count {
			let range = GemfRange {
				zoom: reader.read_i32::<BigEndian>()?,
				x_min: reader.read_i32::<BigEndian>()?,
				x_max: reader.read_i32::<BigEndian>()?,
				y_min: reader.read_i32::<BigEndian>()?,
				y_max: reader.read_i32::<BigEndian>()?,
				source_index: reader.read_i32::<BigEndian>()?,
				offset: u64::try_from(reader.read_i64::<BigEndian>()?)?,
			};
			range.validate()?;
			ranges.push(range);
		}

		Ok(GemfHeader { sources, ranges })
	}

	/// Size of the serialized header, i.e. the offset of the first index record.
	pub fn byte_size(&self) -> u64 {
		let sources: u64 = self.sources.iter().map(|s| 8 + s.name.len() as u64).sum();
		12 + sources + 4 + self.ranges.len() as u64 * 32
	}

	pub fn source_index(&self, name: &str) -> Option<i32> {
		self.sources.iter().find(|s| s.name == name).map(|s| s.index)
	}

	/// The first range holding `index`, restricted to one source if given.
	pub fn find_range(&self, source_index: Option<i32>, index: &TileIndex) -> Option<&GemfRange> {
		self
			.ranges
			.iter()
			.find(|range| range.contains(index) && source_index.is_none_or(|source| range.source_index == source))
	}

	#[cfg(any(test, feature = "test"))]
	pub fn write_to<W: std::io::Write>(&self, writer: &mut W) -> Result<()> {
		use byteorder::WriteBytesExt;

		writer.write_i32::<BigEndian>(GEMF_VERSION)?;
		writer.write_i32::<BigEndian>(GEMF_TILE_SIZE)?;
		writer.write_i32::<BigEndian>(i32::try_from(self.sources.len())?)?;
		for source in &self.sources {
			writer.write_i32::<BigEndian>(source.index)?;
			writer.write_i32::<BigEndian>(i32::try_from(source.name.len())?)?;
			writer.write_all(source.name.as_bytes())?;
		}
		writer.write_i32::<BigEndian>(i32::try_from(self.ranges.len())?)?;
		for range in &self.ranges {
			for value in [
				range.zoom,
				range.x_min,
				range.x_max,
				range.y_min,
				range.y_max,
				range.source_index,
			] {
				writer.write_i32::<BigEndian>(value)?;
			}
			writer.write_i64::<BigEndian>(i64::try_from(range.offset)?)?;
		}
		Ok(())
	}
}
