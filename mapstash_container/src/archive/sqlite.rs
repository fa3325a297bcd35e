//! Read and write tiles of a single-table SQLite archive.
//!
//! The archive holds one table:
//!
//! ```sql
//! CREATE TABLE tiles (key INTEGER, provider TEXT, tile BLOB, PRIMARY KEY (key, provider));
//! ```
//!
//! where `key = (((z << z) + x) << z) + y` and `provider` is the name of the tile source. One file
//! may contain tiles of several sources.

use super::{
	ArchiveFormat, ArchiveReader, ArchiveWriter,
	writer::{WRITE_BATCH_SIZE, check_output_path},
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

/// Packs a tile index into the archive's primary key.
pub fn sqlite_archive_key(index: &TileIndex) -> i64 {
	let zoom = u64::from(index.zoom);
	((((zoom << zoom) + u64::from(index.x)) << zoom) + u64::from(index.y)) as i64
}

pub struct SqliteArchiveReader {
	path: PathBuf,
	pool: Pool<SqliteConnectionManager>,
}

impl SqliteArchiveReader {
	pub fn open_path(path: &Path) -> Result<SqliteArchiveReader> {
		log::debug!("open sqlite archive {path:?}");
		ensure!(path.is_file(), "file {path:?} does not exist");

		let manager = SqliteConnectionManager::file(path)
			.with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX);
		let pool = Pool::builder()
			.max_size(10)
			.build(manager)
			.with_context(|| format!("opening sqlite archive {path:?}"))?;

		let tables: u32 = pool.get()?.query_row(
			"SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'tiles'",
			[],
			|row| row.get(0),
		)?;
		ensure!(tables == 1, "sqlite archive {path:?} has no 'tiles' table");

		Ok(SqliteArchiveReader {
			path: path.to_path_buf(),
			pool,
		})
	}
}

impl ArchiveReader for SqliteArchiveReader {
	fn format(&self) -> ArchiveFormat {
		ArchiveFormat::Sqlite
	}

	fn path(&self) -> &Path {
		&self.path
	}

	fn tile_source_names(&self) -> Result<BTreeSet<String>> {
		let conn = self.pool.get()?;
		let mut stmt = conn.prepare("SELECT DISTINCT provider FROM tiles WHERE provider IS NOT NULL")?;
		let names = stmt
			.query_map([], |row| row.get::<_, String>(0))?
			.collect::<Result<BTreeSet<String>, _>>()?;
		Ok(names)
	}

	fn read_tile(&self, source: Option<&str>, index: &TileIndex) -> Result<Option<Blob>> {
		log::trace!("read tile {index} from {:?}", self.path);

		let key = sqlite_archive_key(index);
		let conn = self.pool.get()?;
		let tile = match source {
			Some(source) => conn
				.query_row(
					"SELECT tile FROM tiles WHERE key = ?1 AND provider = ?2",
					params![key, source],
					|row| row.get::<_, Vec<u8>>(0),
				)
				.optional()?,
			None => conn
				.query_row("SELECT tile FROM tiles WHERE key = ?1 LIMIT 1", params![key], |row| {
					row.get::<_, Vec<u8>>(0)
				})
				.optional()?,
		};
		Ok(tile.map(Blob::from))
	}
}

impl std::fmt::Debug for SqliteArchiveReader {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SqliteArchiveReader").field("path", &self.path).finish()
	}
}

/// Creates a new archive; one file may receive tiles of several sources.
pub struct SqliteArchiveWriter {
	path: PathBuf,
	conn: Connection,
	pending: Vec<(i64, String, Blob)>,
	written: u64,
}

impl SqliteArchiveWriter {
	pub fn create_path(path: &Path) -> Result<SqliteArchiveWriter> {
		log::debug!("create sqlite archive {path:?}");
		check_output_path(path)?;

		let conn = Connection::open(path).with_context(|| format!("creating sqlite archive {path:?}"))?;
		conn.execute_batch(
			"CREATE TABLE IF NOT EXISTS tiles (key INTEGER, provider TEXT, tile BLOB, PRIMARY KEY (key, provider));",
		)?;

		Ok(SqliteArchiveWriter {
			path: path.to_path_buf(),
			conn,
			pending: Vec::with_capacity(WRITE_BATCH_SIZE),
			written: 0,
		})
	}

	fn flush(&mut self) -> Result<()> {
		if self.pending.is_empty() {
			return Ok(());
		}
		let transaction = self.conn.transaction()?;
		for (key, provider, blob) in &self.pending {
			transaction.execute(
				"INSERT OR REPLACE INTO tiles (key, provider, tile) VALUES (?1, ?2, ?3)",
				params![key, provider, blob.as_slice()],
			)?;
		}
		transaction.commit()?;
		self.written += self.pending.len() as u64;
		self.pending.clear();
		Ok(())
	}
}

impl ArchiveWriter for SqliteArchiveWriter {
	fn format(&self) -> ArchiveFormat {
		ArchiveFormat::Sqlite
	}

	fn path(&self) -> &Path {
		&self.path
	}

	fn write_tile(&mut self, source: &str, index: &TileIndex, blob: &Blob) -> Result<()> {
		self
			.pending
			.push((sqlite_archive_key(index), source.to_string(), blob.clone()));
		if self.pending.len() >= WRITE_BATCH_SIZE {
			self.flush()?;
		}
		Ok(())
	}

	fn finish(mut self: Box<Self>) -> Result<()> {
		self.flush()?;
		log::debug!("wrote {} tiles to {:?}", self.written, self.path);
		Ok(())
	}
}

impl std::fmt::Debug for SqliteArchiveWriter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SqliteArchiveWriter")
			.field("path", &self.path)
			.field("written", &self.written)
			.finish()
	}
}
