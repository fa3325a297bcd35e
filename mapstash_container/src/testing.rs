//! Writers for small archive fixtures, used by tests in this and dependent crates.

use crate::archive::{ArchiveWriter, GemfHeader, GemfRange, GemfSource, INDEX_RECORD_SIZE, SqliteArchiveWriter};
use crate::archive::continuation_path;
use anyhow::Result;
use mapstash_core::{Blob, TileIndex};
use r2d2_sqlite::rusqlite::{Connection, params};
use std::{
	collections::BTreeMap,
	fs::File,
	io::{BufWriter, Write},
	path::Path,
};
use zip::{ZipWriter, write::SimpleFileOptions};

/// Creates an archive with the `tiles(key, provider, tile)` schema.
pub fn write_sqlite_archive(path: &Path, tiles: &[(&str, TileIndex, &[u8])]) -> Result<()> {
	let mut writer = Box::new(SqliteArchiveWriter::create_path(path)?);
	for (provider, index, bytes) in tiles {
		writer.write_tile(provider, index, &Blob::from(*bytes))?;
	}
	writer.finish()
}

/// Creates an MBTiles file, optionally with a `name` metadata entry.
pub fn write_mbtiles(path: &Path, name: Option<&str>, tiles: &[(TileIndex, &[u8])]) -> Result<()> {
	let mut conn = Connection::open(path)?;
	conn.execute_batch(
		"CREATE TABLE metadata (name TEXT, value TEXT, UNIQUE (name));
		CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB, UNIQUE (zoom_level, tile_column, tile_row));",
	)?;
	let transaction = conn.transaction()?;
	if let Some(name) = name {
		transaction.execute("INSERT INTO metadata (name, value) VALUES ('name', ?1)", params![name])?;
	}
	transaction.execute("INSERT INTO metadata (name, value) VALUES ('format', 'png')", [])?;
	for (index, bytes) in tiles {
		let tms = index.flip_y();
		transaction.execute(
			"INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (?1, ?2, ?3, ?4)",
			params![tms.zoom, tms.x, tms.y, bytes],
		)?;
	}
	transaction.commit()?;
	Ok(())
}

/// Creates a zip file with the given entries, stored uncompressed.
pub fn write_zip_archive(path: &Path, entries: &[(&str, &[u8])]) -> Result<()> {
	let mut zip = ZipWriter::new(BufWriter::new(File::create(path)?));
	let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
	for (name, bytes) in entries {
		zip.start_file(*name, options)?;
		zip.write_all(bytes)?;
	}
	zip.finish()?.flush()?;
	Ok(())
}

/// Creates a GEMF archive with one range per source and zoom level.
///
/// Each range is the bounding rectangle of its tiles; positions without a tile get an empty
/// index record. With `max_file_size`, tile data continues in `<path>-1`, `<path>-2`, ... once a
/// file would grow beyond that size.
pub fn write_gemf_archive(path: &Path, tiles: &[(&str, TileIndex, &[u8])], max_file_size: Option<u64>) -> Result<()> {
	let mut sources: Vec<GemfSource> = Vec::new();
	let mut groups: BTreeMap<(i32, u8), BTreeMap<(u32, u32), &[u8]>> = BTreeMap::new();
	for (name, index, bytes) in tiles {
		let source_index = match sources.iter().find(|s| s.name == *name) {
			Some(source) => source.index,
			None => {
				let source_index = i32::try_from(sources.len())?;
				sources.push(GemfSource {
					index: source_index,
					name: (*name).to_string(),
				});
				source_index
			}
		};
		groups
			.entry((source_index, index.zoom))
			.or_default()
			.insert((index.x, index.y), *bytes);
	}

	let mut header = GemfHeader {
		sources,
		ranges: Vec::new(),
	};
	for ((source_index, zoom), group) in &groups {
		let x_min = group.keys().map(|k| k.0).min().unwrap_or_default();
		let x_max = group.keys().map(|k| k.0).max().unwrap_or_default();
		let y_min = group.keys().map(|k| k.1).min().unwrap_or_default();
		let y_max = group.keys().map(|k| k.1).max().unwrap_or_default();
		header.ranges.push(GemfRange {
			zoom: i32::from(*zoom),
			x_min: i32::try_from(x_min)?,
			x_max: i32::try_from(x_max)?,
			y_min: i32::try_from(y_min)?,
			y_max: i32::try_from(y_max)?,
			source_index: *source_index,
			offset: 0,
		});
	}

	let mut offset = header.byte_size();
	for range in &mut header.ranges {
		range.offset = offset;
		offset += range.tile_count() * INDEX_RECORD_SIZE;
	}

	// sizes[0] starts after header and index; data offsets are logical over all files
	let mut sizes: Vec<u64> = vec![offset];
	let mut files: Vec<Vec<u8>> = vec![Vec::new()];
	let mut index_records: Vec<u8> = Vec::new();
	for (range, group) in header.ranges.iter().zip(groups.values()) {
		for x in range.x_min..=range.x_max {
			for y in range.y_min..=range.y_max {
				let bytes = group.get(&(x as u32, y as u32)).copied().unwrap_or_default();
				let length = bytes.len() as u64;
				let current = sizes.last().copied().unwrap_or_default();
				if max_file_size.is_some_and(|max| length > 0 && current > 0 && current + length > max) {
					sizes.push(0);
					files.push(Vec::new());
				}
				let logical: u64 = sizes.iter().sum();
				index_records.extend_from_slice(&logical.to_be_bytes());
				index_records.extend_from_slice(&(length as u32).to_be_bytes());
				if let (Some(size), Some(file)) = (sizes.last_mut(), files.last_mut()) {
					*size += length;
					file.extend_from_slice(bytes);
				}
			}
		}
	}

	let mut base = BufWriter::new(File::create(path)?);
	header.write_to(&mut base)?;
	base.write_all(&index_records)?;
	base.write_all(&files[0])?;
	base.flush()?;
	for (number, data) in files.iter().enumerate().skip(1) {
		std::fs::write(continuation_path(path, number), data)?;
	}
	Ok(())
}
