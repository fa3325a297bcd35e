//! `ArchiveRegistry` maps file extensions to archive openers and writers.
//!
//! The default registry opens `sqlite`, `mbtiles`, `zip` and `gemf`, and writes all of them except
//! `gemf`. Further formats can be registered at runtime; extensions are compared
//! case-insensitively and without leading dots.
//!
//! # Example
//!
//! ```rust,no_run
//! use mapstash_container::{ArchiveRegistry, OpenOptions};
//! use mapstash_core::TileIndex;
//! use std::path::Path;
//!
//! let registry = ArchiveRegistry::default();
//! assert!(registry.is_extension_registered(".GEMF"));
//!
//! let archive = registry.open(Path::new("/maps/world.gemf"), OpenOptions::default()).unwrap();
//! let tile = archive.read_tile("Mapnik", &TileIndex::new(3, 4, 2).unwrap()).unwrap();
//! ```

use super::{
	ArchiveHandle, ArchiveReader, ArchiveWriter, GemfArchiveReader, MBTilesArchiveReader, MBTilesArchiveWriter,
	OpenOptions, SqliteArchiveReader, SqliteArchiveWriter, ZipArchiveReader, ZipArchiveWriter,
};
use anyhow::{Result, anyhow};
use mapstash_core::TileError;
use std::{collections::HashMap, path::Path, sync::Arc};

type OpenFile = Box<dyn Fn(&Path) -> Result<Box<dyn ArchiveReader>> + Send + Sync + 'static>;
type CreateFile = Box<dyn Fn(&Path) -> Result<Box<dyn ArchiveWriter>> + Send + Sync + 'static>;

#[derive(Clone)]
pub struct ArchiveRegistry {
	openers: HashMap<String, Arc<OpenFile>>,
	writers: HashMap<String, Arc<CreateFile>>,
}

impl ArchiveRegistry {
	pub fn new_empty() -> Self {
		Self {
			openers: HashMap::new(),
			writers: HashMap::new(),
		}
	}

	/// Register an opener for a file extension, replacing any earlier one.
	pub fn register<F>(&mut self, ext: &str, open: F)
	where
		F: Fn(&Path) -> Result<Box<dyn ArchiveReader>> + Send + Sync + 'static,
	{
		self.openers.insert(sanitize_extension(ext), Arc::new(Box::new(open)));
	}

	pub fn is_extension_registered(&self, ext: &str) -> bool {
		self.openers.contains_key(&sanitize_extension(ext))
	}

	/// Whether the extension of `path` has a registered opener.
	pub fn supports_path(&self, path: &Path) -> bool {
		path
			.extension()
			.is_some_and(|ext| self.is_extension_registered(&ext.to_string_lossy()))
	}

	/// Registered extensions, sorted.
	pub fn registered_extensions(&self) -> Vec<String> {
		let mut extensions: Vec<String> = self.openers.keys().cloned().collect();
		extensions.sort();
		extensions
	}

	/// Register a writer factory for a file extension, replacing any earlier one.
	pub fn register_writer<F>(&mut self, ext: &str, create: F)
	where
		F: Fn(&Path) -> Result<Box<dyn ArchiveWriter>> + Send + Sync + 'static,
	{
		self.writers.insert(sanitize_extension(ext), Arc::new(Box::new(create)));
	}

	/// Extensions that can be written, sorted.
	pub fn writable_extensions(&self) -> Vec<String> {
		let mut extensions: Vec<String> = self.writers.keys().cloned().collect();
		extensions.sort();
		extensions
	}

	/// Creates a new archive at `path`, in the format given by its extension.
	///
	/// Fails if the extension has no writer or if `path` already exists.
	pub fn create_writer(&self, path: &Path) -> Result<Box<dyn ArchiveWriter>> {
		let extension = sanitize_extension(&path.extension().map(|e| e.to_string_lossy()).unwrap_or_default());
		let create = self.writers.get(&extension).ok_or_else(|| {
			anyhow!(
				"cannot write '{extension}' archives, writable extensions are {:?}",
				self.writable_extensions()
			)
		})?;
		create(path)
	}

	/// Opens an archive with the opener registered for its extension.
	///
	/// Fails with a plain error for an unknown extension and with
	/// [`TileError::ArchiveOpenError`] when the file cannot be read as an archive.
	pub fn open(&self, path: &Path, options: OpenOptions) -> Result<ArchiveHandle> {
		let extension = sanitize_extension(&path.extension().map(|e| e.to_string_lossy()).unwrap_or_default());
		let open = self
			.openers
			.get(&extension)
			.ok_or_else(|| anyhow!("file extension '{extension}' of {path:?} is not a registered archive format"))?;

		let handle = open(path).and_then(|reader| ArchiveHandle::new(reader, options));
		match handle {
			Ok(handle) => {
				log::debug!(
					"opened {} archive {path:?} with sources {:?}",
					handle.format(),
					handle.tile_source_names()
				);
				Ok(handle)
			}
			Err(e) => {
				log::warn!("cannot open archive {path:?}: {e:#}");
				Err(TileError::ArchiveOpenError {
					path: path.to_path_buf(),
					reason: format!("{e:#}"),
				}
				.into())
			}
		}
	}
}

impl Default for ArchiveRegistry {
	fn default() -> Self {
		let mut registry = Self::new_empty();
		registry.register("sqlite", |p| Ok(Box::new(SqliteArchiveReader::open_path(p)?)));
		registry.register("mbtiles", |p| Ok(Box::new(MBTilesArchiveReader::open_path(p)?)));
		registry.register("zip", |p| Ok(Box::new(ZipArchiveReader::open_path(p)?)));
		registry.register("gemf", |p| Ok(Box::new(GemfArchiveReader::open_path(p)?)));

		registry.register_writer("sqlite", |p| Ok(Box::new(SqliteArchiveWriter::create_path(p)?)));
		registry.register_writer("mbtiles", |p| Ok(Box::new(MBTilesArchiveWriter::create_path(p)?)));
		registry.register_writer("zip", |p| Ok(Box::new(ZipArchiveWriter::create_path(p)?)));
		registry
	}
}

impl std::fmt::Debug for ArchiveRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ArchiveRegistry")
			.field("extensions", &self.registered_extensions())
			.field("writable", &self.writable_extensions())
			.finish()
	}
}

fn sanitize_extension(ext: &str) -> String {
	ext.to_ascii_lowercase().trim_matches('.').to_string()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		ArchiveFormat,
		testing::{write_gemf_archive, write_mbtiles, write_sqlite_archive, write_zip_archive},
	};
	use mapstash_core::{Blob, TileIndex};
	use rstest::rstest;
	use std::{collections::BTreeSet, path::PathBuf};

	#[rstest]
	#[case("zip", true)]
	#[case(".ZIP", true)]
	#[case("Gemf", true)]
	#[case("sqlite", true)]
	#[case("mbtiles", true)]
	#[case("tar", false)]
	#[case("", false)]
	fn default_extensions(#[case] ext: &str, #[case] expected: bool) {
		assert_eq!(ArchiveRegistry::default().is_extension_registered(ext), expected);
	}

	#[test]
	fn registered_extensions_sorted() {
		assert_eq!(
			ArchiveRegistry::default().registered_extensions(),
			vec!["gemf", "mbtiles", "sqlite", "zip"]
		);
		assert!(ArchiveRegistry::new_empty().registered_extensions().is_empty());
	}

	#[test]
	fn supports_path() {
		let registry = ArchiveRegistry::default();
		assert!(registry.supports_path(Path::new("/maps/World.MBTiles")));
		assert!(!registry.supports_path(Path::new("/maps/world")));
		assert!(!registry.supports_path(Path::new("/maps/world.pmtiles")));
	}

	#[test]
	fn open_every_default_format() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let tile = TileIndex::new(2, 1, 2)?;
		let bytes: &[u8] = b"tile";

		let sqlite = dir.path().join("a.sqlite");
		write_sqlite_archive(&sqlite, &[("Mapnik", tile, bytes)])?;
		let mbtiles = dir.path().join("Mapnik.mbtiles");
		write_mbtiles(&mbtiles, None, &[(tile, bytes)])?;
		let zip = dir.path().join("a.zip");
		write_zip_archive(&zip, &[("Mapnik/2/1/2.png", bytes)])?;
		let gemf = dir.path().join("a.gemf");
		write_gemf_archive(&gemf, &[("Mapnik", tile, bytes)], None)?;

		let registry = ArchiveRegistry::default();
		for (path, format) in [
			(sqlite, ArchiveFormat::Sqlite),
			(mbtiles, ArchiveFormat::MBTiles),
			(zip, ArchiveFormat::Zip),
			(gemf, ArchiveFormat::Gemf),
		] {
			let handle = registry.open(&path, OpenOptions::default())?;
			assert_eq!(handle.format(), format);
			assert_eq!(handle.tile_source_names(), &BTreeSet::from(["Mapnik".to_string()]));
			assert_eq!(handle.read_tile("Mapnik", &tile)?, Some(Blob::from(bytes)), "{path:?}");
			handle.close();
		}
		Ok(())
	}

	#[rstest]
	#[case("export.sqlite", ArchiveFormat::Sqlite)]
	#[case("export.MBTILES", ArchiveFormat::MBTiles)]
	#[case("export.zip", ArchiveFormat::Zip)]
	fn write_every_writable_format(#[case] name: &str, #[case] format: ArchiveFormat) -> Result<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join(name);
		let tile = TileIndex::new(4, 8, 5)?;

		let registry = ArchiveRegistry::default();
		let mut writer = registry.create_writer(&path)?;
		assert_eq!(writer.format(), format);
		writer.write_tile("Mapnik", &tile, &Blob::from("written"))?;
		writer.finish()?;

		let handle = registry.open(&path, OpenOptions::default())?;
		assert_eq!(handle.format(), format);
		assert_eq!(handle.read_tile("Mapnik", &tile)?, Some(Blob::from("written")));
		assert!(registry.create_writer(&path).is_err());
		Ok(())
	}

	#[test]
	fn gemf_is_not_writable() {
		let registry = ArchiveRegistry::default();
		assert_eq!(registry.writable_extensions(), ["mbtiles", "sqlite", "zip"]);
		let error = registry.create_writer(Path::new("/maps/world.gemf")).unwrap_err();
		assert!(error.to_string().contains("cannot write 'gemf' archives"), "{error}");
	}

	#[test]
	fn unknown_extension() {
		let error = ArchiveRegistry::default()
			.open(Path::new("/maps/world.tar"), OpenOptions::default())
			.unwrap_err();
		assert!(error.to_string().contains("extension 'tar'"), "{error}");
		assert!(error.downcast_ref::<TileError>().is_none());
	}

	#[test]
	fn unreadable_archive() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("broken.gemf");
		std::fs::write(&path, b"not a gemf file")?;

		let error = ArchiveRegistry::default()
			.open(&path, OpenOptions::default())
			.unwrap_err();
		match error.downcast_ref::<TileError>() {
			Some(TileError::ArchiveOpenError { path: failed, .. }) => assert_eq!(failed, &path),
			other => panic!("unexpected error {other:?}"),
		}
		Ok(())
	}

	#[test]
	fn custom_opener() -> Result<()> {
		#[derive(Debug)]
		struct Empty(PathBuf);
		impl ArchiveReader for Empty {
			fn format(&self) -> ArchiveFormat {
				ArchiveFormat::Custom("empty")
			}
			fn path(&self) -> &Path {
				&self.0
			}
			fn tile_source_names(&self) -> Result<BTreeSet<String>> {
				Ok(BTreeSet::new())
			}
			fn read_tile(&self, _source: Option<&str>, _index: &TileIndex) -> Result<Option<Blob>> {
				Ok(None)
			}
		}

		let mut registry = ArchiveRegistry::new_empty();
		registry.register(".EMPTY", |p| Ok(Box::new(Empty(p.to_path_buf()))));
		assert!(registry.is_extension_registered("empty"));

		let handle = registry.open(Path::new("x.empty"), OpenOptions::default())?;
		assert_eq!(handle.format().to_string(), "empty");
		assert_eq!(handle.read_tile("any", &TileIndex::new(0, 0, 0)?)?, None);
		Ok(())
	}
}
