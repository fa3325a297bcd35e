//! Read and write tiles of an MBTiles (SQLite) database.
//!
//! MBTiles stores rows in TMS order (`tile_row = 2^z - 1 - y`). The format carries a single tile
//! layer, so the requested tile source is not used to filter reads; the archive reports one
//! source, named after the `name` metadata entry or, lacking that, the file stem. Written files
//! get the name of the one source they hold.

use super::{
	ArchiveFormat, ArchiveReader, ArchiveWriter,
	writer::{WRITE_BATCH_SIZE, check_output_path, tile_extension},
};
use anyhow::{Context, Result, ensure};
use mapstash_core::{Blob, TileIndex};
use r2d2::Pool;
use r2d2_sqlite::{
	SqliteConnectionManager,
	rusqlite::{Connection, OpenFlags, OptionalExtension, params},
};
use std::{
	collections::BTreeSet,
	path::{Path, PathBuf},
};

pub struct MBTilesArchiveReader {
	path: PathBuf,
	name: String,
	pool: Pool<SqliteConnectionManager>,
}

impl MBTilesArchiveReader {
	pub fn open_path(path: &Path) -> Result<MBTilesArchiveReader> {
		log::debug!("open mbtiles {path:?}");
		ensure!(path.is_file(), "file {path:?} does not exist");

		let manager = SqliteConnectionManager::file(path)
			.with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX);
		let pool = Pool::builder()
			.max_size(10)
			.build(manager)
			.with_context(|| format!("opening mbtiles {path:?}"))?;

		let name = Self::load_name(&pool)?.or_else(|| {
			path
				.file_stem()
				.map(|stem| stem.to_string_lossy().into_owned())
		});

		Ok(MBTilesArchiveReader {
			path: path.to_path_buf(),
			name: name.unwrap_or_default(),
			pool,
		})
	}

	fn load_name(pool: &Pool<SqliteConnectionManager>) -> Result<Option<String>> {
		let conn = pool.get()?;
		let has_metadata: u32 = conn.query_row(
			"SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('metadata', 'tiles')",
			[],
			|row| row.get(0),
		)?;
		ensure!(has_metadata == 2, "mbtiles needs both a 'metadata' and a 'tiles' table");

		let name = conn
			.query_row("SELECT value FROM metadata WHERE name = 'name'", [], |row| {
				row.get::<_, String>(0)
			})
			.optional()?;
		Ok(name.filter(|name| !name.is_empty()))
	}
}

impl ArchiveReader for MBTilesArchiveReader {
	fn format(&self) -> ArchiveFormat {
		ArchiveFormat::MBTiles
	}

	fn path(&self) -> &Path {
		&self.path
	}

	fn tile_source_names(&self) -> Result<BTreeSet<String>> {
		Ok(BTreeSet::from([self.name.clone()]))
	}

	fn read_tile(&self, _source: Option<&str>, index: &TileIndex) -> Result<Option<Blob>> {
		log::trace!("read tile {index} from {:?}", self.path);

		let tms = index.flip_y();
		let conn = self.pool.get()?;
		let tile = conn
			.query_row(
				"SELECT tile_data FROM tiles WHERE tile_column = ?1 AND tile_row = ?2 AND zoom_level = ?3",
				params![tms.x, tms.y, tms.zoom],
				|row| row.get::<_, Vec<u8>>(0),
			)
			.optional()?;
		Ok(tile.map(Blob::from))
	}
}

impl std::fmt::Debug for MBTilesArchiveReader {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MBTilesArchiveReader")
			.field("path", &self.path)
			.field("name", &self.name)
			.finish()
	}
}

pub struct MBTilesArchiveWriter {
	path: PathBuf,
	conn: Connection,
	source: Option<String>,
	format: Option<&'static str>,
	pending: Vec<(TileIndex, Blob)>,
	written: u64,
}

impl MBTilesArchiveWriter {
	pub fn create_path(path: &Path) -> Result<MBTilesArchiveWriter> {
		log::debug!("create mbtiles {path:?}");
		check_output_path(path)?;

		let conn = Connection::open(path).with_context(|| format!("creating mbtiles {path:?}"))?;
		conn.execute_batch(
			"CREATE TABLE IF NOT EXISTS metadata (name TEXT, value TEXT, UNIQUE (name));
			CREATE TABLE IF NOT EXISTS tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB, UNIQUE (zoom_level, tile_column, tile_row));
			CREATE UNIQUE INDEX IF NOT EXISTS tile_index on tiles (zoom_level, tile_column, tile_row);",
		)?;

		Ok(MBTilesArchiveWriter {
			path: path.to_path_buf(),
			conn,
			source: None,
			format: None,
			pending: Vec::with_capacity(WRITE_BATCH_SIZE),
			written: 0,
		})
	}

	fn flush(&mut self) -> Result<()> {
		if self.pending.is_empty() {
			return Ok(());
		}
		let transaction = self.conn.transaction()?;
		for (index, blob) in &self.pending {
			let tms = index.flip_y();
			transaction.execute(
				"INSERT OR REPLACE INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (?1, ?2, ?3, ?4)",
				params![tms.zoom, tms.x, tms.y, blob.as_slice()],
			)?;
		}
		transaction.commit()?;
		self.written += self.pending.len() as u64;
		self.pending.clear();
		Ok(())
	}

	fn set_metadata(&self, name: &str, value: &str) -> Result<()> {
		self.conn.execute(
			"INSERT OR REPLACE INTO metadata (name, value) VALUES (?1, ?2)",
			params![name, value],
		)?;
		Ok(())
	}
}

impl ArchiveWriter for MBTilesArchiveWriter {
	fn format(&self) -> ArchiveFormat {
		ArchiveFormat::MBTiles
	}

	fn path(&self) -> &Path {
		&self.path
	}

	fn write_tile(&mut self, source: &str, index: &TileIndex, blob: &Blob) -> Result<()> {
		if let Some(first) = &self.source {
			ensure!(
				first == source,
				"mbtiles {:?} holds tiles of '{first}' and cannot take tiles of '{source}'",
				self.path
			);
		} else {
			self.source = Some(source.to_string());
		}
		self.format.get_or_insert_with(|| tile_extension(blob.as_slice()));

		self.pending.push((*index, blob.clone()));
		if self.pending.len() >= WRITE_BATCH_SIZE {
			self.flush()?;
		}
		Ok(())
	}

	fn finish(mut self: Box<Self>) -> Result<()> {
		self.flush()?;
		let name = self.source.clone().or_else(|| {
			self
				.path
				.file_stem()
				.map(|stem| stem.to_string_lossy().into_owned())
		});
		if let Some(name) = name {
			self.set_metadata("name", &name)?;
		}
		if let Some(format) = self.format {
			self.set_metadata("format", format)?;
		}
		log::debug!("wrote {} tiles to {:?}", self.written, self.path);
		Ok(())
	}
}

impl std::fmt::Debug for MBTilesArchiveWriter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MBTilesArchiveWriter")
			.field("path", &self.path)
			.field("source", &self.source)
			.field("written", &self.written)
			.finish()
	}
}
