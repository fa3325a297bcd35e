use super::{LoadedTile, TileProvider};
use anyhow::{Result, bail};
use mapstash_container::{ArchiveHandle, ArchiveRegistry, OpenOptions};
use mapstash_core::{ProviderId, TileIndex};
use std::{
	fmt::Debug,
	path::{Path, PathBuf},
	sync::{Arc, OnceLock},
};

/// Serves tiles from one offline archive.
///
/// The archive is opened on the first `load` and stays open until the provider is dropped. If it
/// cannot be opened, the failure is logged once and the provider answers every request with a
/// miss.
pub struct ArchiveProvider {
	path: PathBuf,
	name: String,
	registry: Arc<ArchiveRegistry>,
	options: OpenOptions,
	handle: OnceLock<Option<ArchiveHandle>>,
}

impl ArchiveProvider {
	/// Fails if no reader is registered for the file extension of `path`.
	pub fn new(path: &Path, registry: Arc<ArchiveRegistry>, options: OpenOptions) -> Result<ArchiveProvider> {
		if !registry.supports_path(path) {
			bail!(
				"{path:?} has no registered archive extension, expected one of: {}",
				registry.registered_extensions().join(", ")
			);
		}
		let name = path
			.file_name()
			.map_or_else(|| path.to_string_lossy(), |name| name.to_string_lossy())
			.to_string();
		Ok(ArchiveProvider {
			path: path.to_path_buf(),
			name,
			registry,
			options,
			handle: OnceLock::new(),
		})
	}

	/// Wraps an archive that is already open.
	pub fn from_handle(handle: ArchiveHandle) -> ArchiveProvider {
		let provider = ArchiveProvider {
			path: handle.path().to_path_buf(),
			name: handle
				.path()
				.file_name()
				.map(|name| name.to_string_lossy().to_string())
				.unwrap_or_default(),
			registry: Arc::new(ArchiveRegistry::new_empty()),
			options: handle.options(),
			handle: OnceLock::new(),
		};
		let _ = provider.handle.set(Some(handle));
		provider
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// The open archive, or `None` if opening failed.
	pub fn handle(&self) -> Option<&ArchiveHandle> {
		self
			.handle
			.get_or_init(|| match self.registry.open(&self.path, self.options) {
				Ok(handle) => {
					log::debug!(
						"opened {} archive {:?} with tile sources {:?}",
						handle.format(),
						self.path,
						handle.tile_source_names()
					);
					Some(handle)
				}
				Err(e) => {
					log::warn!("skipping archive {:?}: {e:#}", self.path);
					None
				}
			})
			.as_ref()
	}
}

impl TileProvider for ArchiveProvider {
	fn id(&self) -> ProviderId {
		ProviderId::Archive(self.name.clone())
	}

	fn load(&self, source: &str, index: &TileIndex) -> Result<Option<LoadedTile>> {
		let Some(handle) = self.handle() else {
			return Ok(None);
		};
		Ok(handle.read_tile(source, index)?.map(LoadedTile::new))
	}
}

impl Debug for ArchiveProvider {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ArchiveProvider")
			.field("path", &self.path)
			.field("options", &self.options)
			.field("open", &self.handle.get().map(Option::is_some))
			.finish()
	}
}
