//! `PersistentStore` keeps fetched tiles in a single SQLite database and bounds its size.
//!
//! ```sql
//! CREATE TABLE tiles (provider TEXT, zoom INTEGER, x INTEGER, y INTEGER, tile BLOB,
//!                     expires INTEGER, last_access INTEGER, PRIMARY KEY (provider, zoom, x, y));
//! CREATE TABLE cache_meta (name TEXT PRIMARY KEY, value INTEGER);
//! ```
//!
//! The total size of all stored tiles is tracked in `cache_meta` under `usage_bytes` and updated
//! in the same transaction as every change to `tiles`, so it never has to be recomputed by a
//! full scan. A write that pushes usage above the capacity trims the cache, least recently
//! accessed tiles first, down to the trim target. Times are stored as milliseconds since the
//! Unix epoch.

use anyhow::{Context, Result, ensure};
use mapstash_core::{Blob, GeoBBox, StoreConfig, TileError, TileIndex, TileRange, projection::tile_ranges_for};
use parking_lot::Mutex;
use r2d2::Pool;
use r2d2_sqlite::{
	SqliteConnectionManager,
	rusqlite::{OptionalExtension, ToSql, Transaction, TransactionBehavior, params},
};
use std::{
	fs,
	path::{Path, PathBuf},
	sync::atomic::{AtomicI64, Ordering},
	time::{Duration, SystemTime, UNIX_EPOCH},
};

const DEFAULT_MAX_TILE_BYTES: u64 = 1024 * 1024;

/// Tiles of provider `?1` inside a [`TileRange`] bound to `?2..?6`.
const IN_RANGE: &str = "provider = ?1 AND zoom = ?2 AND x BETWEEN ?3 AND ?4 AND y BETWEEN ?5 AND ?6";

const SCHEMA: &str = "
	CREATE TABLE IF NOT EXISTS tiles (
		provider TEXT NOT NULL,
		zoom INTEGER NOT NULL,
		x INTEGER NOT NULL,
		y INTEGER NOT NULL,
		tile BLOB NOT NULL,
		expires INTEGER,
		last_access INTEGER NOT NULL,
		PRIMARY KEY (provider, zoom, x, y)
	);
	CREATE INDEX IF NOT EXISTS tiles_last_access ON tiles (last_access);
	CREATE INDEX IF NOT EXISTS tiles_expires ON tiles (expires);
	CREATE TABLE IF NOT EXISTS cache_meta (name TEXT PRIMARY KEY, value INTEGER NOT NULL);
	INSERT OR IGNORE INTO cache_meta (name, value)
		SELECT 'usage_bytes', COALESCE(SUM(length(tile)), 0) FROM tiles;
";

/// A tile read back from the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredTile {
	pub bytes: Blob,
	pub expires: Option<SystemTime>,
}

impl StoredTile {
	pub fn is_expired(&self, now: SystemTime) -> bool {
		self.expires.is_some_and(|expires| expires <= now)
	}
}

/// Outcome of one trim pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrimReport {
	pub removed_tiles: u64,
	pub freed_bytes: u64,
	/// Usage after the pass
	pub usage_bytes: u64,
}

/// Tiles and bytes stored for one provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderUsage {
	pub provider: String,
	pub tiles: u64,
	pub bytes: u64,
}

#[derive(Clone, Copy, Debug)]
struct Limits {
	capacity: u64,
	trim_target: u64,
}

pub struct PersistentStore {
	path: PathBuf,
	pool: Pool<SqliteConnectionManager>,
	limits: Mutex<Limits>,
	max_tile_bytes: u64,
	/// Last `last_access` stamp handed out; strictly increasing
	access_clock: AtomicI64,
	trim_lock: Mutex<()>,
}

impl PersistentStore {
	/// Opens or creates the store at `path`.
	///
	/// A database that cannot be opened or fails its integrity check yields
	/// [`TileError::StoreUnavailable`].
	pub fn open(path: &Path, capacity_bytes: u64, trim_target_bytes: u64) -> Result<PersistentStore> {
		ensure!(
			trim_target_bytes < capacity_bytes,
			"trim target ({trim_target_bytes} bytes) must be smaller than the capacity ({capacity_bytes} bytes)"
		);
		let limits = Limits {
			capacity: capacity_bytes,
			trim_target: trim_target_bytes,
		};
		Self::open_database(path, limits, DEFAULT_MAX_TILE_BYTES).map_err(|e| {
			log::error!("tile store {path:?} is unavailable: {e:#}");
			TileError::StoreUnavailable(format!("{path:?}: {e:#}")).into()
		})
	}

	pub fn open_with_config(config: &StoreConfig) -> Result<PersistentStore> {
		config.validate()?;
		let mut store = Self::open(&config.path, config.capacity_bytes, config.trim_target_bytes)?;
		store.max_tile_bytes = config.max_tile_bytes;
		Ok(store)
	}

	fn open_database(path: &Path, limits: Limits, max_tile_bytes: u64) -> Result<PersistentStore> {
		log::debug!("open tile store {path:?}");

		if let Some(parent) = path.parent()
			&& !parent.as_os_str().is_empty()
		{
			fs::create_dir_all(parent).with_context(|| format!("creating directory {parent:?}"))?;
		}

		let manager = SqliteConnectionManager::file(path).with_init(|c| c.busy_timeout(Duration::from_secs(10)));
		let pool = Pool::builder().max_size(10).build(manager)?;

		let conn = pool.get()?;
		let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
		ensure!(check == "ok", "integrity check failed: {check}");
		let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
		conn.execute_batch(SCHEMA)?;
		let last_access: i64 = conn.query_row("SELECT COALESCE(MAX(last_access), 0) FROM tiles", [], |row| row.get(0))?;
		drop(conn);

		Ok(PersistentStore {
			path: path.to_path_buf(),
			pool,
			limits: Mutex::new(limits),
			max_tile_bytes,
			access_clock: AtomicI64::new(last_access),
			trim_lock: Mutex::new(()),
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn capacity_bytes(&self) -> u64 {
		self.limits.lock().capacity
	}

	pub fn trim_target_bytes(&self) -> u64 {
		self.limits.lock().trim_target
	}

	pub fn max_tile_bytes(&self) -> u64 {
		self.max_tile_bytes
	}

	/// Changes both thresholds and trims right away if usage exceeds the new capacity.
	pub fn set_capacity(&self, capacity_bytes: u64, trim_target_bytes: u64) -> Result<()> {
		ensure!(
			trim_target_bytes < capacity_bytes,
			"trim target ({trim_target_bytes} bytes) must be smaller than the capacity ({capacity_bytes} bytes)"
		);
		*self.limits.lock() = Limits {
			capacity: capacity_bytes,
			trim_target: trim_target_bytes,
		};
		if self.current_usage_bytes()? > capacity_bytes {
			self.trim()?;
		}
		Ok(())
	}

	pub fn current_usage_bytes(&self) -> Result<u64> {
		let conn = self.pool.get()?;
		Ok(read_usage(&conn)?)
	}

	/// Reads a tile and marks it as recently accessed.
	pub fn read(&self, provider: &str, index: &TileIndex) -> Result<Option<Blob>> {
		Ok(self.read_record(provider, index)?.map(|record| record.bytes))
	}

	/// Reads a tile with its expiry and marks it as recently accessed.
	pub fn read_record(&self, provider: &str, index: &TileIndex) -> Result<Option<StoredTile>> {
		let conn = self.pool.get()?;
		let row = conn
			.query_row(
				"SELECT tile, expires FROM tiles WHERE provider = ?1 AND zoom = ?2 AND x = ?3 AND y = ?4",
				params![provider, index.zoom, index.x, index.y],
				|row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Option<i64>>(1)?)),
			)
			.optional()
			.with_context(|| format!("reading tile {index} of '{provider}' from the store"))?;
		let Some((bytes, expires)) = row else {
			return Ok(None);
		};

		let touched = conn.execute(
			"UPDATE tiles SET last_access = ?5 WHERE provider = ?1 AND zoom = ?2 AND x = ?3 AND y = ?4",
			params![provider, index.zoom, index.x, index.y, self.next_access_stamp()],
		);
		if let Err(e) = touched {
			log::warn!("cannot update access time of tile {index} of '{provider}': {e}");
		}

		Ok(Some(StoredTile {
			bytes: Blob::from(bytes),
			expires: expires.map(from_millis),
		}))
	}

	pub fn contains(&self, provider: &str, index: &TileIndex) -> Result<bool> {
		let conn = self.pool.get()?;
		let found = conn
			.query_row(
				"SELECT 1 FROM tiles WHERE provider = ?1 AND zoom = ?2 AND x = ?3 AND y = ?4",
				params![provider, index.zoom, index.x, index.y],
				|_| Ok(()),
			)
			.optional()?;
		Ok(found.is_some())
	}

	/// Inserts or replaces a tile. Trims the store when usage ends up above the capacity.
	pub fn write(&self, provider: &str, index: &TileIndex, bytes: &Blob, expires: Option<SystemTime>) -> Result<()> {
		ensure!(
			bytes.len() <= self.max_tile_bytes,
			"tile {index} has {} bytes, more than the limit of {} bytes",
			bytes.len(),
			self.max_tile_bytes
		);

		let stamp = self.next_access_stamp();
		let usage = self
			.with_immediate_tx(|tx| {
				let previous: Option<i64> = tx
					.query_row(
						"SELECT length(tile) FROM tiles WHERE provider = ?1 AND zoom = ?2 AND x = ?3 AND y = ?4",
						params![provider, index.zoom, index.x, index.y],
						|row| row.get(0),
					)
					.optional()?;
				tx.execute(
					"INSERT OR REPLACE INTO tiles (provider, zoom, x, y, tile, expires, last_access) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
					params![
						provider,
						index.zoom,
						index.x,
						index.y,
						bytes.as_slice(),
						expires.map(to_millis),
						stamp
					],
				)?;
				add_usage(tx, bytes.len() as i64 - previous.unwrap_or(0))
			})
			.with_context(|| format!("writing tile {index} of '{provider}' to the store"))?;

		log::trace!("stored tile {index} of '{provider}', usage {usage} bytes");

		if usage > self.capacity_bytes() {
			self.trim()?;
		}
		Ok(())
	}

	/// Deletes one tile. Returns whether it existed.
	pub fn remove(&self, provider: &str, index: &TileIndex) -> Result<bool> {
		let removed = self.delete_where(
			"provider = ?1 AND zoom = ?2 AND x = ?3 AND y = ?4",
			params![provider, index.zoom, index.x, index.y],
		)?;
		Ok(removed > 0)
	}

	/// Deletes least recently accessed tiles until usage is at most the trim target.
	pub fn trim(&self) -> Result<TrimReport> {
		let _guard = self.trim_lock.lock();
		let target = self.trim_target_bytes();

		let report = self.with_immediate_tx(|tx| {
			let usage = read_usage(tx)?;
			if usage <= target {
				return Ok(TrimReport {
					usage_bytes: usage,
					..TrimReport::default()
				});
			}

			let mut victims: Vec<i64> = Vec::new();
			let mut freed = 0u64;
			{
				let mut stmt = tx.prepare("SELECT rowid, length(tile) FROM tiles ORDER BY last_access ASC, rowid ASC")?;
				let mut rows = stmt.query([])?;
				while usage.saturating_sub(freed) > target {
					let Some(row) = rows.next()? else {
						break;
					};
					victims.push(row.get(0)?);
					freed += row.get::<_, i64>(1)? as u64;
				}
			}

			let mut delete = tx.prepare("DELETE FROM tiles WHERE rowid = ?1")?;
			for rowid in &victims {
				delete.execute([rowid])?;
			}
			drop(delete);

			Ok(TrimReport {
				removed_tiles: victims.len() as u64,
				freed_bytes: freed,
				usage_bytes: add_usage(tx, -(freed as i64))?,
			})
		})?;

		if report.removed_tiles > 0 {
			log::debug!(
				"trimmed {} tiles ({} bytes) from {:?}, usage now {} bytes",
				report.removed_tiles,
				report.freed_bytes,
				self.path,
				report.usage_bytes
			);
		}
		Ok(report)
	}

	/// Number of stored tiles, for all providers or one.
	pub fn row_count(&self, provider: Option<&str>) -> Result<u64> {
		let conn = self.pool.get()?;
		let count: i64 = match provider {
			Some(provider) => conn.query_row("SELECT COUNT(*) FROM tiles WHERE provider = ?1", [provider], |row| {
				row.get(0)
			})?,
			None => conn.query_row("SELECT COUNT(*) FROM tiles", [], |row| row.get(0))?,
		};
		Ok(count as u64)
	}

	pub fn providers(&self) -> Result<Vec<String>> {
		Ok(self.provider_usage()?.into_iter().map(|usage| usage.provider).collect())
	}

	/// Tile count and bytes per provider, sorted by provider name.
	pub fn provider_usage(&self) -> Result<Vec<ProviderUsage>> {
		let conn = self.pool.get()?;
		let mut stmt = conn.prepare(
			"SELECT provider, COUNT(*), COALESCE(SUM(length(tile)), 0) FROM tiles GROUP BY provider ORDER BY provider",
		)?;
		let usage = stmt
			.query_map([], |row| {
				Ok(ProviderUsage {
					provider: row.get(0)?,
					tiles: row.get::<_, i64>(1)? as u64,
					bytes: row.get::<_, i64>(2)? as u64,
				})
			})?
			.collect::<Result<Vec<_>, _>>()?;
		Ok(usage)
	}

	/// The earliest expiry of any stored tile.
	pub fn first_expiry(&self) -> Result<Option<SystemTime>> {
		let conn = self.pool.get()?;
		let expires: Option<i64> = conn.query_row("SELECT MIN(expires) FROM tiles", [], |row| row.get(0))?;
		Ok(expires.map(from_millis))
	}

	/// Deletes all tiles, or those of one provider. Returns the number of deleted tiles.
	pub fn purge(&self, provider: Option<&str>) -> Result<u64> {
		let removed = match provider {
			Some(provider) => self.delete_where("provider = ?1", params![provider])?,
			None => self.delete_where("1", params![])?,
		};
		log::debug!("purged {removed} tiles from {:?}", self.path);
		Ok(removed)
	}

	/// Deletes the tiles of `provider` covering `bbox` on the zoom levels `zoom_min..=zoom_max`.
	///
	/// All levels are purged in one transaction. Returns the number of deleted tiles.
	pub fn purge_area(&self, provider: &str, bbox: &GeoBBox, zoom_min: u8, zoom_max: u8) -> Result<u64> {
		let ranges = area_ranges(bbox, zoom_min, zoom_max)?;
		let removed = self.with_immediate_tx(|tx| {
			let mut removed = 0u64;
			let mut freed = 0i64;
			for r in &ranges {
				freed += tx.query_row(
					&format!("SELECT COALESCE(SUM(length(tile)), 0) FROM tiles WHERE {IN_RANGE}"),
					params![provider, r.zoom, r.x_min, r.x_max, r.y_min, r.y_max],
					|row| row.get::<_, i64>(0),
				)?;
				removed += tx.execute(
					&format!("DELETE FROM tiles WHERE {IN_RANGE}"),
					params![provider, r.zoom, r.x_min, r.x_max, r.y_min, r.y_max],
				)? as u64;
			}
			add_usage(tx, -freed)?;
			Ok(removed)
		})?;
		log::debug!(
			"purged {removed} tiles of '{provider}' in {bbox:?} at zoom {zoom_min}..={zoom_max} from {:?}",
			self.path
		);
		Ok(removed)
	}

	/// Calls `visit` for every stored tile of `provider` inside `range`, ordered by x then y.
	///
	/// Access times are left untouched. Returns the number of visited tiles.
	pub fn for_each_in_range<F>(&self, provider: &str, range: &TileRange, mut visit: F) -> Result<u64>
	where
		F: FnMut(TileIndex, Blob) -> Result<()>,
	{
		let conn = self.pool.get()?;
		let mut stmt = conn.prepare(&format!("SELECT x, y, tile FROM tiles WHERE {IN_RANGE} ORDER BY x, y"))?;
		let mut rows = stmt.query(params![
			provider,
			range.zoom,
			range.x_min,
			range.x_max,
			range.y_min,
			range.y_max
		])?;
		let mut visited = 0u64;
		while let Some(row) = rows.next()? {
			let index = TileIndex::new(range.zoom, row.get(0)?, row.get(1)?)?;
			visit(index, Blob::from(row.get::<_, Vec<u8>>(2)?))?;
			visited += 1;
		}
		Ok(visited)
	}

	/// Deletes tiles that expired at or before `now`.
	pub fn purge_expired(&self, now: SystemTime) -> Result<u64> {
		self.delete_where("expires IS NOT NULL AND expires <= ?1", params![to_millis(now)])
	}

	fn delete_where(&self, condition: &str, params: &[&dyn ToSql]) -> Result<u64> {
		self.with_immediate_tx(|tx| {
			let freed: i64 = tx.query_row(
				&format!("SELECT COALESCE(SUM(length(tile)), 0) FROM tiles WHERE {condition}"),
				params,
				|row| row.get(0),
			)?;
			let removed = tx.execute(&format!("DELETE FROM tiles WHERE {condition}"), params)?;
			add_usage(tx, -freed)?;
			Ok(removed as u64)
		})
	}

	fn with_immediate_tx<T, F>(&self, f: F) -> Result<T>
	where
		F: FnOnce(&Transaction<'_>) -> Result<T>,
	{
		let mut conn = self.pool.get()?;
		let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
		let result = f(&tx)?;
		tx.commit()?;
		Ok(result)
	}

	fn next_access_stamp(&self) -> i64 {
		let now = to_millis(SystemTime::now());
		let step = |last: i64| now.max(last + 1);
		match self
			.access_clock
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(step(last)))
		{
			Ok(last) | Err(last) => step(last),
		}
	}
}

impl std::fmt::Debug for PersistentStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let limits = *self.limits.lock();
		f.debug_struct("PersistentStore")
			.field("path", &self.path)
			.field("capacity", &limits.capacity)
			.field("trim_target", &limits.trim_target)
			.finish()
	}
}

/// The tile ranges covering `bbox` on every zoom level of `zoom_min..=zoom_max`.
pub(super) fn area_ranges(bbox: &GeoBBox, zoom_min: u8, zoom_max: u8) -> Result<Vec<TileRange>> {
	ensure!(zoom_min <= zoom_max, "min zoom {zoom_min} is above max zoom {zoom_max}");
	let mut ranges = Vec::new();
	for zoom in zoom_min..=zoom_max {
		ranges.extend(tile_ranges_for(bbox, zoom)?);
	}
	Ok(ranges)
}

fn read_usage(conn: &r2d2_sqlite::rusqlite::Connection) -> Result<u64> {
	let usage: i64 = conn.query_row("SELECT value FROM cache_meta WHERE name = 'usage_bytes'", [], |row| {
		row.get(0)
	})?;
	Ok(usage.max(0) as u64)
}

fn add_usage(tx: &Transaction<'_>, delta: i64) -> Result<u64> {
	if delta != 0 {
		tx.execute(
			"UPDATE cache_meta SET value = MAX(value + ?1, 0) WHERE name = 'usage_bytes'",
			[delta],
		)?;
	}
	read_usage(tx)
}

fn to_millis(time: SystemTime) -> i64 {
	time.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis() as i64)
}

fn from_millis(millis: i64) -> SystemTime {
	UNIX_EPOCH + Duration::from_millis(millis.max(0) as u64)
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;
	use std::{sync::Arc, thread};

	fn index(x: u32) -> TileIndex {
		TileIndex::new(12, x, 7).unwrap()
	}

	fn blob(len: usize) -> Blob {
		Blob::from(vec![0x42u8; len])
	}

	fn open(dir: &Path, capacity: u64, target: u64) -> PersistentStore {
		PersistentStore::open(&dir.join("cache.sqlite"), capacity, target).unwrap()
	}

	#[test]
	fn write_read_and_usage() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let store = open(dir.path(), 10_000, 5_000);
		assert_eq!(store.current_usage_bytes()?, 0);

		store.write("Mapnik", &index(1), &blob(100), None)?;
		store.write("Mapnik", &index(2), &blob(50), None)?;
		assert_eq!(store.current_usage_bytes()?, 150);
		assert_eq!(store.read("Mapnik", &index(1))?, Some(blob(100)));
		assert_eq!(store.read("Cycle", &index(1))?, None);
		assert!(store.contains("Mapnik", &index(2))?);

		// replacing only counts the difference
		store.write("Mapnik", &index(1), &blob(30), None)?;
		assert_eq!(store.current_usage_bytes()?, 80);

		assert!(store.remove("Mapnik", &index(1))?);
		assert!(!store.remove("Mapnik", &index(1))?);
		assert_eq!(store.current_usage_bytes()?, 50);
		assert_eq!(store.row_count(None)?, 1);
		Ok(())
	}

	#[test]
	fn usage_survives_reopen() -> Result<()> {
		let dir = tempfile::tempdir()?;
		{
			let store = open(dir.path(), 10_000, 5_000);
			store.write("Mapnik", &index(1), &blob(123), None)?;
		}
		let store = open(dir.path(), 10_000, 5_000);
		assert_eq!(store.current_usage_bytes()?, 123);
		Ok(())
	}

	#[test]
	fn usage_recomputed_without_meta_row() -> Result<()> {
		let dir = tempfile::tempdir()?;
		{
			let store = open(dir.path(), 10_000, 5_000);
			store.write("Mapnik", &index(1), &blob(40), None)?;
			store.write("Cycle", &index(1), &blob(60), None)?;
			store.pool.get()?.execute("DELETE FROM cache_meta", [])?;
		}
		let store = open(dir.path(), 10_000, 5_000);
		assert_eq!(store.current_usage_bytes()?, 100);
		Ok(())
	}

	#[test]
	fn write_above_capacity_trims_least_recently_accessed() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let store = open(dir.path(), 400, 250);
		for x in 0..4 {
			store.write("Mapnik", &index(x), &blob(100), None)?;
		}
		assert_eq!(store.current_usage_bytes()?, 400);

		// touch the oldest tile so that tile 1 becomes the oldest
		assert!(store.read("Mapnik", &index(0))?.is_some());

		store.write("Mapnik", &index(4), &blob(100), None)?;
		// 500 > 400: trimmed to at most 250, oldest access first
		assert_eq!(store.current_usage_bytes()?, 200);
		assert!(!store.contains("Mapnik", &index(1))?);
		assert!(!store.contains("Mapnik", &index(2))?);
		assert!(!store.contains("Mapnik", &index(3))?);
		assert!(store.contains("Mapnik", &index(0))?);
		assert!(store.contains("Mapnik", &index(4))?);
		Ok(())
	}

	#[test]
	fn trim_below_target_is_noop() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let store = open(dir.path(), 1_000, 500);
		store.write("Mapnik", &index(0), &blob(300), None)?;
		assert_eq!(
			store.trim()?,
			TrimReport {
				removed_tiles: 0,
				freed_bytes: 0,
				usage_bytes: 300
			}
		);
		Ok(())
	}

	#[test]
	fn shrinking_capacity_trims() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let store = open(dir.path(), 1_000, 500);
		for x in 0..5 {
			store.write("Mapnik", &index(x), &blob(100), None)?;
		}
		store.set_capacity(300, 100)?;
		assert_eq!(store.capacity_bytes(), 300);
		assert_eq!(store.trim_target_bytes(), 100);
		assert_eq!(store.current_usage_bytes()?, 100);
		assert!(store.contains("Mapnik", &index(4))?);

		assert!(store.set_capacity(100, 100).is_err());
		Ok(())
	}

	#[test]
	fn purge_area_removes_covered_tiles_only() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let store = open(dir.path(), 10_000, 5_000);
		// Berlin, one tile per zoom level
		let bbox = GeoBBox::new(13.40, 52.51, 13.41, 52.52)?;
		let z10 = TileIndex::new(10, 550, 335)?;
		let z11 = TileIndex::new(11, 1100, 671)?;
		let z12 = TileIndex::new(12, 2200, 1343)?;
		let beside = TileIndex::new(10, 551, 335)?;

		store.write("Mapnik", &z10, &blob(10), None)?;
		store.write("Mapnik", &z11, &blob(20), None)?;
		store.write("Mapnik", &z12, &blob(30), None)?;
		store.write("Mapnik", &beside, &blob(40), None)?;
		store.write("Cycle", &z10, &blob(50), None)?;

		assert_eq!(store.purge_area("Mapnik", &bbox, 10, 11)?, 2);
		assert_eq!(store.current_usage_bytes()?, 120);
		assert!(!store.contains("Mapnik", &z10)?);
		assert!(!store.contains("Mapnik", &z11)?);
		assert!(store.contains("Mapnik", &z12)?);
		assert!(store.contains("Mapnik", &beside)?);
		assert!(store.contains("Cycle", &z10)?);

		assert_eq!(store.purge_area("Mapnik", &bbox, 10, 11)?, 0);
		let error = store.purge_area("Mapnik", &bbox, 12, 11).unwrap_err();
		assert!(error.to_string().contains("above max zoom"), "{error}");
		assert!(store.purge_area("Mapnik", &bbox, 10, 40).is_err());
		assert_eq!(store.row_count(None)?, 3);
		Ok(())
	}

	#[test]
	fn visit_range_keeps_access_times() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let store = open(dir.path(), 100, 50);
		store.write("Mapnik", &TileIndex::new(10, 551, 335)?, &blob(30), None)?;
		store.write("Mapnik", &TileIndex::new(10, 550, 335)?, &blob(30), None)?;
		store.write("Cycle", &TileIndex::new(10, 550, 335)?, &blob(1), None)?;
		store.write("Mapnik", &TileIndex::new(11, 0, 0)?, &blob(1), None)?;

		let mut visited = Vec::new();
		let count = store.for_each_in_range("Mapnik", &TileRange::world(10)?, |index, blob| {
			visited.push((index, blob.len()));
			Ok(())
		})?;
		assert_eq!(count, 2);
		assert_eq!(
			visited,
			[(TileIndex::new(10, 550, 335)?, 30), (TileIndex::new(10, 551, 335)?, 30)]
		);

		// the visited tiles are still the least recently accessed and get trimmed first
		store.write("Mapnik", &index(0), &blob(40), None)?;
		assert_eq!(store.row_count(Some("Mapnik"))?, 2);
		assert!(store.contains("Cycle", &TileIndex::new(10, 550, 335)?)?);
		assert!(store.contains("Mapnik", &TileIndex::new(11, 0, 0)?)?);
		Ok(())
	}

	#[test]
	fn thresholds_are_validated() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let error = PersistentStore::open(&dir.path().join("cache.sqlite"), 100, 200).unwrap_err();
		assert!(error.to_string().contains("must be smaller"));
		Ok(())
	}

	#[test]
	fn oversized_tile_is_rejected() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let mut config = StoreConfig::new(dir.path().join("cache.sqlite"), 10_000, 5_000);
		config.max_tile_bytes = 10;
		let store = PersistentStore::open_with_config(&config)?;
		assert!(store.write("Mapnik", &index(0), &blob(11), None).is_err());
		assert_eq!(store.current_usage_bytes()?, 0);
		Ok(())
	}

	#[test]
	fn expiry_and_purge_expired() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let store = open(dir.path(), 10_000, 5_000);
		let now = from_millis(to_millis(SystemTime::now()));
		let past = now - Duration::from_secs(60);
		let future = now + Duration::from_secs(3_600);

		store.write("Mapnik", &index(0), &blob(10), Some(past))?;
		store.write("Mapnik", &index(1), &blob(20), Some(future))?;
		store.write("Mapnik", &index(2), &blob(30), None)?;

		let record = store.read_record("Mapnik", &index(0))?.unwrap();
		assert_eq!(record.expires, Some(past));
		assert!(record.is_expired(now));
		assert!(!store.read_record("Mapnik", &index(2))?.unwrap().is_expired(now));
		assert_eq!(store.first_expiry()?, Some(past));

		assert_eq!(store.purge_expired(now)?, 1);
		assert_eq!(store.current_usage_bytes()?, 50);
		assert_eq!(store.first_expiry()?, Some(future));
		Ok(())
	}

	#[test]
	fn purge_per_provider() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let store = open(dir.path(), 10_000, 5_000);
		store.write("Mapnik", &index(0), &blob(10), None)?;
		store.write("Mapnik", &index(1), &blob(10), None)?;
		store.write("Cycle", &index(0), &blob(25), None)?;

		assert_eq!(store.providers()?, vec!["Cycle", "Mapnik"]);
		assert_eq!(
			store.provider_usage()?,
			vec![
				ProviderUsage {
					provider: "Cycle".to_string(),
					tiles: 1,
					bytes: 25
				},
				ProviderUsage {
					provider: "Mapnik".to_string(),
					tiles: 2,
					bytes: 20
				},
			]
		);
		assert_eq!(store.row_count(Some("Mapnik"))?, 2);

		assert_eq!(store.purge(Some("Mapnik"))?, 2);
		assert_eq!(store.current_usage_bytes()?, 25);
		assert_eq!(store.purge(None)?, 1);
		assert_eq!(store.current_usage_bytes()?, 0);
		assert!(store.providers()?.is_empty());
		Ok(())
	}

	#[test]
	fn concurrent_writers_keep_usage_exact() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let store = Arc::new(open(dir.path(), 1_000_000, 500_000));
		let workers: Vec<_> = (0..4u32)
			.map(|worker| {
				let store = store.clone();
				thread::spawn(move || {
					for x in 0..25 {
						store.write("Mapnik", &index(worker * 100 + x), &blob(10), None).unwrap();
					}
				})
			})
			.collect();
		for worker in workers {
			worker.join().unwrap();
		}
		assert_eq!(store.row_count(None)?, 100);
		assert_eq!(store.current_usage_bytes()?, 1_000);
		Ok(())
	}

	#[test]
	fn corrupt_database_is_unavailable() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("cache.sqlite");
		fs::write(&path, vec![0x17u8; 4096])?;
		let error = PersistentStore::open(&path, 1_000, 500).unwrap_err();
		assert!(
			matches!(error.downcast_ref::<TileError>(), Some(TileError::StoreUnavailable(_))),
			"{error:#}"
		);
		Ok(())
	}

	#[test]
	fn access_stamps_increase() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let store = open(dir.path(), 1_000, 500);
		let a = store.next_access_stamp();
		let b = store.next_access_stamp();
		assert!(b > a);
		Ok(())
	}
}
