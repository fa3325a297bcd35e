//! Offline tile archives: reading them and writing new ones.
//!
//! ## Supported archive formats
//!
//! | Extension  | Layout                                                        | Multiple sources |
//! |------------|---------------------------------------------------------------|:----------------:|
//! | `.sqlite`  | `tiles(key, provider, tile)` with a packed key per tile       | ✅               |
//! | `.mbtiles` | `tiles(zoom_level, tile_column, tile_row, tile_data)` (TMS)   | ❌               |
//! | `.zip`     | entries named `<source>/<z>/<x>/<y>.<ext>`                    | ✅               |
//! | `.gemf`    | big-endian header, range index and data, optionally split     | ✅               |
//!
//! Archives are opened through the [`ArchiveRegistry`], which maps file extensions to openers and
//! wraps the opened reader in an [`ArchiveHandle`]. The registry also creates [`ArchiveWriter`]s
//! for `.sqlite`, `.mbtiles` and `.zip`; GEMF files are read-only.

mod gemf;
pub use gemf::{
	GEMF_TILE_SIZE, GEMF_VERSION, GemfArchiveReader, GemfHeader, GemfRange, GemfSource, INDEX_RECORD_SIZE,
	continuation_path,
};

mod handle;
pub use handle::{ArchiveHandle, OpenOptions};

mod mbtiles;
pub use mbtiles::{MBTilesArchiveReader, MBTilesArchiveWriter};

mod registry;
pub use registry::ArchiveRegistry;

mod sqlite;
pub use sqlite::{SqliteArchiveReader, SqliteArchiveWriter, sqlite_archive_key};

mod writer;
pub use writer::{ArchiveWriter, tile_extension};

mod zip;
pub use zip::{ZipArchiveReader, ZipArchiveWriter};

use anyhow::Result;
use mapstash_core::{Blob, TileIndex};
use std::{
	collections::BTreeSet,
	fmt::{self, Debug, Display},
	path::Path,
};

/// The on-disk layout of an archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
	Sqlite,
	MBTiles,
	Zip,
	Gemf,
	/// A format registered at runtime, named by its extension
	Custom(&'static str),
}

impl Display for ArchiveFormat {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			ArchiveFormat::Sqlite => "sqlite",
			ArchiveFormat::MBTiles => "mbtiles",
			ArchiveFormat::Zip => "zip",
			ArchiveFormat::Gemf => "gemf",
			ArchiveFormat::Custom(name) => name,
		})
	}
}

/// A read-only tile archive.
///
/// Implementations must allow concurrent calls to [`read_tile`](Self::read_tile) from several
/// worker threads.
pub trait ArchiveReader: Send + Sync + Debug {
	fn format(&self) -> ArchiveFormat;

	fn path(&self) -> &Path;

	/// Names of the tile sources stored in this archive.
	fn tile_source_names(&self) -> Result<BTreeSet<String>>;

	/// Reads one tile. `source == None` accepts a tile of any source.
	///
	/// Returns `Ok(None)` when the archive holds no such tile.
	fn read_tile(&self, source: Option<&str>, index: &TileIndex) -> Result<Option<Blob>>;
}
