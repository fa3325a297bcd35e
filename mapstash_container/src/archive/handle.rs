use super::{ArchiveFormat, ArchiveReader};
use anyhow::Result;
use mapstash_core::{Blob, TileIndex};
use std::{
	collections::BTreeSet,
	fmt::Debug,
	path::{Path, PathBuf},
};

/// How an archive is consulted once it is open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenOptions {
	/// Return tiles regardless of the tile source they were stored for
	pub ignore_tile_source: bool,
}

/// An open, read-only archive together with the tile sources it contains.
///
/// Created by [`ArchiveRegistry::open`](super::ArchiveRegistry::open). The underlying file
/// handles are released when the handle is closed or dropped.
pub struct ArchiveHandle {
	path: PathBuf,
	format: ArchiveFormat,
	tile_source_names: BTreeSet<String>,
	reader: Box<dyn ArchiveReader>,
	options: OpenOptions,
}

impl ArchiveHandle {
	pub fn new(reader: Box<dyn ArchiveReader>, options: OpenOptions) -> Result<ArchiveHandle> {
		Ok(ArchiveHandle {
			path: reader.path().to_path_buf(),
			format: reader.format(),
			tile_source_names: reader.tile_source_names()?,
			reader,
			options,
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn format(&self) -> ArchiveFormat {
		self.format
	}

	pub fn tile_source_names(&self) -> &BTreeSet<String> {
		&self.tile_source_names
	}

	pub fn options(&self) -> OpenOptions {
		self.options
	}

	/// Reads the tile stored for `source`, or for any source if the archive was opened with
	/// `ignore_tile_source`.
	pub fn read_tile(&self, source: &str, index: &TileIndex) -> Result<Option<Blob>> {
		let source = if self.options.ignore_tile_source {
			None
		} else {
			Some(source)
		};
		self.reader.read_tile(source, index)
	}

	pub fn close(self) {
		log::debug!("close {} archive {:?}", self.format, self.path);
	}
}

impl Debug for ArchiveHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ArchiveHandle")
			.field("path", &self.path)
			.field("format", &self.format)
			.field("tile_source_names", &self.tile_source_names)
			.field("ignore_tile_source", &self.options.ignore_tile_source)
			.finish()
	}
}
