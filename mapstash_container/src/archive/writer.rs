use super::ArchiveFormat;
use anyhow::{Result, ensure};
use mapstash_core::{Blob, TileIndex};
use std::{fmt::Debug, path::Path};

/// Rows collected before the SQLite writers commit them in one transaction.
pub(super) const WRITE_BATCH_SIZE: usize = 1000;

/// A tile archive under construction.
///
/// Tiles are written in any order. The archive is only complete after [`finish`](Self::finish);
/// a writer dropped without finishing may leave a partial file behind.
pub trait ArchiveWriter: Send + Debug {
	fn format(&self) -> ArchiveFormat;

	fn path(&self) -> &Path;

	fn write_tile(&mut self, source: &str, index: &TileIndex, blob: &Blob) -> Result<()>;

	/// Flushes pending tiles and closes the archive.
	fn finish(self: Box<Self>) -> Result<()>;
}

/// Writers never replace an existing file.
pub(super) fn check_output_path(path: &Path) -> Result<()> {
	ensure!(!path.exists(), "refusing to overwrite existing file {path:?}");
	Ok(())
}

/// File extension for a tile, guessed from its magic bytes.
pub fn tile_extension(bytes: &[u8]) -> &'static str {
	match bytes {
		[0x89, b'P', b'N', b'G', ..] => "png",
		[0xFF, 0xD8, 0xFF, ..] => "jpg",
		[b'G', b'I', b'F', b'8', ..] => "gif",
		[b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "webp",
		_ => "tile",
	}
}
