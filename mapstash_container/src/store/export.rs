//! Export of stored tiles into an offline archive.
//!
//! The archive format follows the extension of the output path, see
//! [`ArchiveRegistry::create_writer`]. Exported archives open again through the same registry.

use super::{PersistentStore, persistent_store::area_ranges};
use crate::{ArchiveRegistry, ArchiveWriter};
use anyhow::{Context, Result};
use mapstash_core::{GeoBBox, TileRange};
use std::{fs, path::Path};

/// Counters of one export run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExportResult {
	/// Tiles written to the archive
	pub exported: u64,
	/// Tiles of the area the store does not hold
	pub missing: u64,
}

impl PersistentStore {
	/// Writes the stored tiles of `provider` covering `bbox` at `zoom_min..=zoom_max` to a new
	/// archive at `path`.
	///
	/// The tiles keep `provider` as their source name. An existing file at `path` is never
	/// replaced; when the export fails, the partial archive is removed.
	pub fn export_archive(
		&self,
		provider: &str,
		bbox: &GeoBBox,
		zoom_min: u8,
		zoom_max: u8,
		path: &Path,
	) -> Result<ExportResult> {
		let ranges = area_ranges(bbox, zoom_min, zoom_max)?;
		let writer = ArchiveRegistry::default().create_writer(path)?;
		log::debug!("export tiles of '{provider}' in {bbox:?} at zoom {zoom_min}..={zoom_max} to {path:?}");

		let exported = self.export_into(provider, &ranges, writer);
		match exported {
			Ok(exported) => {
				let total: u64 = ranges.iter().map(TileRange::count).sum();
				let result = ExportResult {
					exported,
					missing: total.saturating_sub(exported),
				};
				log::info!("exported {exported} tiles of '{provider}' to {path:?}, {} missing", result.missing);
				Ok(result)
			}
			Err(e) => {
				if let Err(remove) = fs::remove_file(path) {
					log::warn!("cannot remove partial export {path:?}: {remove}");
				}
				Err(e.context(format!("exporting tiles of '{provider}' to {path:?}")))
			}
		}
	}

	fn export_into(
		&self,
		provider: &str,
		ranges: &[TileRange],
		mut writer: Box<dyn ArchiveWriter>,
	) -> Result<u64> {
		let mut exported = 0u64;
		for range in ranges {
			exported += self.for_each_in_range(provider, range, |index, blob| {
				writer
					.write_tile(provider, &index, &blob)
					.with_context(|| format!("writing tile {index}"))
			})?;
		}
		writer.finish()?;
		Ok(exported)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{ArchiveFormat, OpenOptions};
	use mapstash_core::{Blob, TileIndex};
	use pretty_assertions::assert_eq;
	use rstest::rstest;
	use std::collections::BTreeSet;

	fn berlin() -> GeoBBox {
		GeoBBox::new(13.40, 52.51, 13.41, 52.52).unwrap()
	}

	fn filled_store(dir: &Path) -> Result<PersistentStore> {
		let store = PersistentStore::open(&dir.join("cache.sqlite"), 1_000_000, 500_000)?;
		store.write("Mapnik", &TileIndex::new(10, 550, 335)?, &Blob::from("z10"), None)?;
		store.write("Mapnik", &TileIndex::new(11, 1100, 671)?, &Blob::from("z11"), None)?;
		store.write("Mapnik", &TileIndex::new(10, 551, 335)?, &Blob::from("outside"), None)?;
		store.write("Cycle", &TileIndex::new(10, 550, 335)?, &Blob::from("cycle"), None)?;
		Ok(store)
	}

	#[rstest]
	#[case("export.sqlite", ArchiveFormat::Sqlite)]
	#[case("export.mbtiles", ArchiveFormat::MBTiles)]
	#[case("export.zip", ArchiveFormat::Zip)]
	fn exported_archive_reads_back(#[case] name: &str, #[case] format: ArchiveFormat) -> Result<()> {
		let dir = tempfile::tempdir()?;
		let store = filled_store(dir.path())?;
		let path = dir.path().join(name);

		let result = store.export_archive("Mapnik", &berlin(), 10, 12, &path)?;
		assert_eq!(result, ExportResult { exported: 2, missing: 1 });

		let handle = ArchiveRegistry::default().open(&path, OpenOptions::default())?;
		assert_eq!(handle.format(), format);
		assert_eq!(handle.tile_source_names(), &BTreeSet::from(["Mapnik".to_string()]));
		assert_eq!(
			handle.read_tile("Mapnik", &TileIndex::new(10, 550, 335)?)?,
			Some(Blob::from("z10"))
		);
		assert_eq!(
			handle.read_tile("Mapnik", &TileIndex::new(11, 1100, 671)?)?,
			Some(Blob::from("z11"))
		);
		assert_eq!(handle.read_tile("Mapnik", &TileIndex::new(10, 551, 335)?)?, None);
		Ok(())
	}

	#[test]
	fn sqlite_export_uses_archive_schema() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let store = filled_store(dir.path())?;
		let path = dir.path().join("offline.sqlite");
		store.export_archive("Cycle", &berlin(), 10, 10, &path)?;

		let conn = r2d2_sqlite::rusqlite::Connection::open(&path)?;
		let (key, provider): (i64, String) =
			conn.query_row("SELECT key, provider FROM tiles", [], |row| Ok((row.get(0)?, row.get(1)?)))?;
		assert_eq!(key, crate::sqlite_archive_key(&TileIndex::new(10, 550, 335)?));
		assert_eq!(provider, "Cycle");
		Ok(())
	}

	#[test]
	fn existing_output_is_kept() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let store = filled_store(dir.path())?;
		let path = dir.path().join("taken.zip");
		fs::write(&path, b"keep")?;

		let error = store.export_archive("Mapnik", &berlin(), 10, 10, &path).unwrap_err();
		assert!(error.to_string().contains("refusing to overwrite"), "{error}");
		assert_eq!(fs::read(&path)?, b"keep");
		Ok(())
	}

	#[test]
	fn failed_export_leaves_no_file() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let store = filled_store(dir.path())?;
		let path = dir.path().join("broken.zip");

		// a source name with a slash cannot become a zip directory
		store.write("a/b", &TileIndex::new(10, 550, 335)?, &Blob::from("x"), None)?;
		assert!(store.export_archive("a/b", &berlin(), 10, 10, &path).is_err());
		assert!(!path.exists());
		Ok(())
	}

	#[test]
	fn invalid_arguments() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let store = filled_store(dir.path())?;
		assert!(store.export_archive("Mapnik", &berlin(), 11, 10, &dir.path().join("a.zip")).is_err());
		assert!(store.export_archive("Mapnik", &berlin(), 10, 10, &dir.path().join("a.gemf")).is_err());
		assert!(!dir.path().join("a.zip").exists());
		Ok(())
	}
}
