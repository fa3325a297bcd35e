//! Import of the legacy file-tree cache into the [`PersistentStore`].
//!
//! The legacy cache keeps one file per tile at `<root>/<provider>/<z>/<x>/<y>.<ext>`, where the
//! extension may have several parts (`12.png.tile`). Hidden files and directories are skipped.

use super::PersistentStore;
use anyhow::{Result, ensure};
use mapstash_core::{Blob, TileIndex};
use regex::Regex;
use std::{
	fs,
	path::{Path, PathBuf},
};

/// Counters of one import run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImportResult {
	/// Tiles inserted into the store
	pub success: u64,
	/// Tiles that could not be read or inserted
	pub failure: u64,
	/// Tiles skipped because the store already holds them
	pub already_present: u64,
	/// Files whose path does not name a tile
	pub unparseable: u64,
	/// Imported files removed from the file tree
	pub deleted: u64,
	pub delete_failed: u64,
}

impl PersistentStore {
	/// Copies every tile of a legacy file-tree cache into the store.
	///
	/// Individual failures are counted, never returned. With `delete_source`, each successfully
	/// inserted file is deleted and directories left empty are removed; `root` itself is kept.
	pub fn import_legacy_file_cache(&self, root: &Path, delete_source: bool) -> Result<ImportResult> {
		ensure!(root.is_dir(), "legacy cache {root:?} is not a directory");
		log::debug!("import legacy cache {root:?} (delete source: {delete_source})");

		let y_name = Regex::new(r"^(\d{1,10})\..+$")?;
		let mut files = Vec::new();
		collect_files(root, &mut files)?;
		files.sort();

		let mut result = ImportResult::default();
		for file in &files {
			let Some((provider, index)) = parse_tile_path(root, file, &y_name) else {
				log::debug!("skip unparseable legacy file {file:?}");
				result.unparseable += 1;
				continue;
			};

			match self.contains(&provider, &index) {
				Ok(true) => {
					result.already_present += 1;
					continue;
				}
				Ok(false) => {}
				Err(e) => {
					log::warn!("cannot look up tile {index} of '{provider}': {e:#}");
					result.failure += 1;
					continue;
				}
			}

			let inserted = fs::read(file)
				.map_err(anyhow::Error::from)
				.and_then(|bytes| self.write(&provider, &index, &Blob::from(bytes), None));
			if let Err(e) = inserted {
				log::warn!("cannot import legacy tile {file:?}: {e:#}");
				result.failure += 1;
				continue;
			}
			result.success += 1;

			if delete_source {
				match fs::remove_file(file) {
					Ok(()) => result.deleted += 1,
					Err(e) => {
						log::warn!("cannot delete imported tile {file:?}: {e}");
						result.delete_failed += 1;
					}
				}
			}
		}

		if delete_source {
			remove_empty_dirs(root, true);
		}

		log::debug!("legacy import of {root:?} finished: {result:?}");
		Ok(result)
	}
}

fn is_hidden(path: &Path) -> bool {
	path
		.file_name()
		.is_some_and(|name| name.to_string_lossy().starts_with('.'))
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
	for entry in fs::read_dir(dir)? {
		let path = match entry {
			Ok(entry) => entry.path(),
			Err(e) => {
				log::warn!("cannot list an entry of {dir:?}: {e}");
				continue;
			}
		};
		if is_hidden(&path) {
			continue;
		}
		if path.is_dir() {
			if let Err(e) = collect_files(&path, files) {
				log::warn!("cannot list {path:?}: {e:#}");
			}
		} else {
			files.push(path);
		}
	}
	Ok(())
}

/// `<root>/<provider>/<z>/<x>/<y>.<ext>` to provider and tile index.
fn parse_tile_path(root: &Path, file: &Path, y_name: &Regex) -> Option<(String, TileIndex)> {
	let relative = file.strip_prefix(root).ok()?;
	let parts: Vec<&str> = relative
		.components()
		.map(|c| c.as_os_str().to_str())
		.collect::<Option<Vec<_>>>()?;
	let [provider, zoom, x, y] = parts.as_slice() else {
		return None;
	};
	let zoom = zoom.parse::<u8>().ok()?;
	let x = x.parse::<u32>().ok()?;
	let y = y_name.captures(y)?[1].parse::<u32>().ok()?;
	let index = TileIndex::new(zoom, x, y).ok()?;
	Some(((*provider).to_string(), index))
}

/// Removes empty directories below `dir`; returns whether `dir` is empty afterwards.
fn remove_empty_dirs(dir: &Path, is_root: bool) -> bool {
	let Ok(entries) = fs::read_dir(dir) else {
		return false;
	};
	let mut empty = true;
	for entry in entries.flatten() {
		let path = entry.path();
		if path.is_dir() && !is_hidden(&path) && remove_empty_dirs(&path, false) {
			continue;
		}
		empty = false;
	}
	if empty && !is_root {
		if let Err(e) = fs::remove_dir(dir) {
			log::warn!("cannot remove empty directory {dir:?}: {e}");
			return false;
		}
	}
	empty
}
