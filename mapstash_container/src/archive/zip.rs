//! Read and write zip files whose entries follow `<source>/<z>/<x>/<y>.<ext>`.
//!
//! The central directory is scanned once when the archive is opened; every entry that parses as
//! a tile path is indexed, everything else is ignored. Reads are serialized on one file handle.
//!
//! Written entries are stored uncompressed and get an extension guessed from the tile's bytes.

use super::{
	ArchiveFormat, ArchiveReader, ArchiveWriter,
	writer::{check_output_path, tile_extension},
};
use anyhow::{Context, Result, ensure};
use mapstash_core::{Blob, TileIndex};
use parking_lot::Mutex;
use regex::Regex;
use std::{
	collections::{BTreeSet, HashMap},
	fs::File,
	io::{BufReader, BufWriter, Read, Write},
	path::{Path, PathBuf},
};
use zip::{CompressionMethod, ZipArchive, ZipWriter, write::SimpleFileOptions};

const TILE_ENTRY: &str = r"^([^/]+)/(\d{1,2})/(\d{1,10})/(\d{1,10})\.[A-Za-z0-9]+$";

/// An indexed tile entry: tile source and entry name.
#[derive(Debug)]
struct TileEntry {
	source: String,
	name: String,
}

pub struct ZipArchiveReader {
	path: PathBuf,
	archive: Mutex<ZipArchive<BufReader<File>>>,
	entries: HashMap<TileIndex, Vec<TileEntry>>,
	sources: BTreeSet<String>,
}

impl ZipArchiveReader {
	pub fn open_path(path: &Path) -> Result<ZipArchiveReader> {
		log::debug!("open zip archive {path:?}");
		ensure!(path.is_file(), "file {path:?} does not exist");

		let file = File::open(path).with_context(|| format!("opening zip archive {path:?}"))?;
		let archive = ZipArchive::new(BufReader::new(file)).with_context(|| format!("reading zip directory of {path:?}"))?;

		let pattern = Regex::new(TILE_ENTRY)?;
		let mut entries: HashMap<TileIndex, Vec<TileEntry>> = HashMap::new();
		let mut sources = BTreeSet::new();
		for name in archive.file_names() {
			let Some((source, index)) = parse_entry_name(&pattern, name) else {
				log::trace!("skip zip entry '{name}'");
				continue;
			};
			sources.insert(source.clone());
			entries.entry(index).or_default().push(TileEntry {
				source,
				name: name.to_string(),
			});
		}

		// entry order in the central directory is not meaningful; keep lookups deterministic
		for list in entries.values_mut() {
			list.sort_by(|a, b| a.source.cmp(&b.source).then_with(|| a.name.cmp(&b.name)));
		}

		log::debug!("indexed {} tiles of {} sources in {path:?}", entries.len(), sources.len());

		Ok(ZipArchiveReader {
			path: path.to_path_buf(),
			archive: Mutex::new(archive),
			entries,
			sources,
		})
	}

	/// Number of distinct tile indices found in the archive.
	pub fn tile_count(&self) -> usize {
		self.entries.len()
	}
}

fn parse_entry_name(pattern: &Regex, name: &str) -> Option<(String, TileIndex)> {
	let captures = pattern.captures(name)?;
	let zoom = captures[2].parse::<u8>().ok()?;
	let x = captures[3].parse::<u32>().ok()?;
	let y = captures[4].parse::<u32>().ok()?;
	let index = TileIndex::new(zoom, x, y).ok()?;
	Some((captures[1].to_string(), index))
}

impl ArchiveReader for ZipArchiveReader {
	fn format(&self) -> ArchiveFormat {
		ArchiveFormat::Zip
	}

	fn path(&self) -> &Path {
		&self.path
	}

	fn tile_source_names(&self) -> Result<BTreeSet<String>> {
		Ok(self.sources.clone())
	}

	fn read_tile(&self, source: Option<&str>, index: &TileIndex) -> Result<Option<Blob>> {
		let Some(candidates) = self.entries.get(index) else {
			return Ok(None);
		};
		let Some(entry) = candidates
			.iter()
			.find(|entry| source.is_none_or(|source| entry.source == source))
		else {
			return Ok(None);
		};

		log::trace!("read zip entry '{}' from {:?}", entry.name, self.path);

		let mut archive = self.archive.lock();
		let mut file = archive
			.by_name(&entry.name)
			.with_context(|| format!("reading zip entry '{}'", entry.name))?;
		let mut buffer = Vec::with_capacity(file.size() as usize);
		file.read_to_end(&mut buffer)?;
		Ok(Some(Blob::from(buffer)))
	}
}

impl std::fmt::Debug for ZipArchiveReader {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ZipArchiveReader")
			.field("path", &self.path)
			.field("tiles", &self.entries.len())
			.field("sources", &self.sources)
			.finish()
	}
}

pub struct ZipArchiveWriter {
	path: PathBuf,
	zip: ZipWriter<BufWriter<File>>,
	written: u64,
}

impl ZipArchiveWriter {
	pub fn create_path(path: &Path) -> Result<ZipArchiveWriter> {
		log::debug!("create zip archive {path:?}");
		check_output_path(path)?;

		let file = File::create(path).with_context(|| format!("creating zip archive {path:?}"))?;
		Ok(ZipArchiveWriter {
			path: path.to_path_buf(),
			zip: ZipWriter::new(BufWriter::new(file)),
			written: 0,
		})
	}
}

impl ArchiveWriter for ZipArchiveWriter {
	fn format(&self) -> ArchiveFormat {
		ArchiveFormat::Zip
	}

	fn path(&self) -> &Path {
		&self.path
	}

	fn write_tile(&mut self, source: &str, index: &TileIndex, blob: &Blob) -> Result<()> {
		ensure!(
			!source.is_empty() && !source.contains('/'),
			"'{source}' cannot be used as a zip directory name"
		);
		let name = format!(
			"{source}/{}/{}/{}.{}",
			index.zoom,
			index.x,
			index.y,
			tile_extension(blob.as_slice())
		);
		let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
		self
			.zip
			.start_file(name.as_str(), options)
			.with_context(|| format!("adding zip entry '{name}'"))?;
		self.zip.write_all(blob.as_slice())?;
		self.written += 1;
		Ok(())
	}

	fn finish(self: Box<Self>) -> Result<()> {
		let ZipArchiveWriter { path, zip, written } = *self;
		zip.finish()?.flush()?;
		log::debug!("wrote {written} tiles to {path:?}");
		Ok(())
	}
}

impl std::fmt::Debug for ZipArchiveWriter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ZipArchiveWriter")
			.field("path", &self.path)
			.field("written", &self.written)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::write_zip_archive;
	use rstest::rstest;

	#[rstest]
	#[case("Mapnik/3/4/2.png", Some(("Mapnik", 3, 4, 2)))]
	#[case("OpenTopo/0/0/0.jpg", Some(("OpenTopo", 0, 0, 0)))]
	#[case("Mapnik/3/4/2.png.tile", None)]
	#[case("3/4/2.png", None)]
	#[case("Mapnik/3/8/2.png", None)]
	#[case("Mapnik/3/4/", None)]
	#[case("nested/Mapnik/3/4/2.png", None)]
	fn entry_names(#[case] name: &str, #[case] expected: Option<(&str, u8, u32, u32)>) -> Result<()> {
		let expected = match expected {
			Some((source, z, x, y)) => Some((source.to_string(), TileIndex::new(z, x, y)?)),
			None => None,
		};
		assert_eq!(parse_entry_name(&Regex::new(TILE_ENTRY)?, name), expected);
		Ok(())
	}

	#[test]
	fn index_sources_and_read() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("offline.zip");
		let tile = TileIndex::new(3, 4, 2)?;
		write_zip_archive(
			&path,
			&[
				("Mapnik/3/4/2.png", b"mapnik".as_slice()),
				("Cycle/3/4/2.png", b"cycle".as_slice()),
				("Cycle/3/4/3.png", b"cycle2".as_slice()),
				("README.txt", b"not a tile".as_slice()),
			],
		)?;

		let reader = ZipArchiveReader::open_path(&path)?;
		assert_eq!(reader.tile_count(), 2);
		assert_eq!(
			reader.tile_source_names()?,
			BTreeSet::from(["Cycle".to_string(), "Mapnik".to_string()])
		);
		assert_eq!(reader.read_tile(Some("Mapnik"), &tile)?, Some(Blob::from("mapnik")));
		assert_eq!(reader.read_tile(Some("Hiking"), &tile)?, None);
		// without a source filter the sources are tried in name order
		assert_eq!(reader.read_tile(None, &tile)?, Some(Blob::from("cycle")));
		assert_eq!(reader.read_tile(Some("Mapnik"), &TileIndex::new(3, 4, 3)?)?, None);
		Ok(())
	}

	#[test]
	fn write_then_read() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("export.zip");
		let tile = TileIndex::new(3, 4, 2)?;

		let mut writer = Box::new(ZipArchiveWriter::create_path(&path)?);
		writer.write_tile("Mapnik", &tile, &Blob::from(b"\x89PNG\r\n\x1a\nmapnik"))?;
		writer.write_tile("Cycle", &tile, &Blob::from("cycle"))?;
		assert!(writer.write_tile("a/b", &tile, &Blob::from("nested")).is_err());
		writer.finish()?;

		let reader = ZipArchiveReader::open_path(&path)?;
		let mut names: Vec<String> = reader.archive.lock().file_names().map(str::to_string).collect();
		names.sort();
		assert_eq!(names, ["Cycle/3/4/2.tile", "Mapnik/3/4/2.png"]);
		assert_eq!(reader.read_tile(Some("Cycle"), &tile)?, Some(Blob::from("cycle")));
		assert_eq!(
			reader.read_tile(Some("Mapnik"), &tile)?,
			Some(Blob::from(b"\x89PNG\r\n\x1a\nmapnik"))
		);
		Ok(())
	}

	#[test]
	fn reject_non_zip() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("broken.zip");
		std::fs::write(&path, b"definitely not a zip file")?;
		assert!(ZipArchiveReader::open_path(&path).is_err());
		Ok(())
	}
}
