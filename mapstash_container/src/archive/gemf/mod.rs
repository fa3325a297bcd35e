//! Read tiles from GEMF archives.
//!
//! A GEMF archive is one base file plus optional continuation files named `<path>-1`,
//! `<path>-2`, ... Data offsets in the index address the logical concatenation of all files;
//! the header and index always live in the base file.

mod header;
pub use header::{GEMF_TILE_SIZE, GEMF_VERSION, GemfHeader, GemfRange, GemfSource, INDEX_RECORD_SIZE};

use super::{ArchiveFormat, ArchiveReader};
use anyhow::{Context, Result, ensure};
use byteorder::{BigEndian, ReadBytesExt};
use mapstash_core::{Blob, TileIndex};
use parking_lot::Mutex;
use std::{
	collections::BTreeSet,
	ffi::OsString,
	fs::File,
	io::{BufReader, Read, Seek, SeekFrom},
	path::{Path, PathBuf},
};

struct DataFile {
	path: PathBuf,
	size: u64,
	file: Mutex<File>,
}

impl DataFile {
	fn open(path: PathBuf) -> Result<DataFile> {
		let file = File::open(&path).with_context(|| format!("opening GEMF file {path:?}"))?;
		let size = file.metadata()?.len();
		Ok(DataFile {
			path,
			size,
			file: Mutex::new(file),
		})
	}
}

pub struct GemfArchiveReader {
	path: PathBuf,
	header: GemfHeader,
	files: Vec<DataFile>,
}

/// `<path>-<number>`
pub fn continuation_path(path: &Path, number: usize) -> PathBuf {
	let mut name = OsString::from(path.as_os_str());
	name.push(format!("-{number}"));
	PathBuf::from(name)
}

impl GemfArchiveReader {
	pub fn open_path(path: &Path) -> Result<GemfArchiveReader> {
		log::debug!("open gemf archive {path:?}");
		ensure!(path.is_file(), "file {path:?} does not exist");

		let base = DataFile::open(path.to_path_buf())?;
		let header = {
			let mut file = base.file.lock();
			let mut reader = BufReader::new(&mut *file);
			GemfHeader::read(&mut reader).with_context(|| format!("reading GEMF header of {path:?}"))?
		};

		let mut files = vec![base];
		loop {
			let next = continuation_path(path, files.len());
			if !next.is_file() {
				break;
			}
			files.push(DataFile::open(next)?);
		}

		log::debug!(
			"gemf archive {path:?}: {} sources, {} ranges, {} files",
			header.sources.len(),
			header.ranges.len(),
			files.len()
		);

		Ok(GemfArchiveReader {
			path: path.to_path_buf(),
			header,
			files,
		})
	}

	pub fn header(&self) -> &GemfHeader {
		&self.header
	}

	pub fn file_count(&self) -> usize {
		self.files.len()
	}

	fn read_index_record(&self, offset: u64) -> Result<(u64, u32)> {
		let mut file = self.files[0].file.lock();
		file.seek(SeekFrom::Start(offset))?;
		let data_offset = u64::try_from(file.read_i64::<BigEndian>()?)?;
		let length = u32::try_from(file.read_i32::<BigEndian>()?)?;
		Ok((data_offset, length))
	}

	/// Maps a logical offset to a file and the offset inside that file.
	fn locate(&self, mut offset: u64) -> (&DataFile, u64) {
		let mut number = 0;
		while number < self.files.len() - 1 && offset >= self.files[number].size {
			offset -= self.files[number].size;
			number += 1;
		}
		(&self.files[number], offset)
	}
}

impl ArchiveReader for GemfArchiveReader {
	fn format(&self) -> ArchiveFormat {
		ArchiveFormat::Gemf
	}

	fn path(&self) -> &Path {
		&self.path
	}

	fn tile_source_names(&self) -> Result<BTreeSet<String>> {
		Ok(self.header.sources.iter().map(|source| source.name.clone()).collect())
	}

	fn read_tile(&self, source: Option<&str>, index: &TileIndex) -> Result<Option<Blob>> {
		let source_index = match source {
			Some(name) => match self.header.source_index(name) {
				Some(source_index) => Some(source_index),
				None => return Ok(None),
			},
			None => None,
		};
		let Some(range) = self.header.find_range(source_index, index) else {
			return Ok(None);
		};

		let (offset, length) = self
			.read_index_record(range.record_offset(index)?)
			.with_context(|| format!("reading GEMF index record of tile {index}"))?;
		if length == 0 {
			return Ok(None);
		}

		let (data_file, offset) = self.locate(offset);
		ensure!(
			offset.checked_add(u64::from(length)).is_some_and(|end| end <= data_file.size),
			"tile {index} points beyond the end of {:?}",
			data_file.path
		);

		log::trace!("read tile {index} from {:?} at {offset} ({length} bytes)", data_file.path);

		let mut buffer = vec![0u8; length as usize];
		let mut file = data_file.file.lock();
		file.seek(SeekFrom::Start(offset))?;
		file.read_exact(&mut buffer)?;
		Ok(Some(Blob::from(buffer)))
	}
}

impl std::fmt::Debug for GemfArchiveReader {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("GemfArchiveReader")
			.field("path", &self.path)
			.field("sources", &self.header.sources.len())
			.field("ranges", &self.header.ranges.len())
			.field("files", &self.files.len())
			.finish()
	}
}
