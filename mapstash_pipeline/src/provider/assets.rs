use super::{LoadedTile, TileProvider};
use anyhow::{Context, Result, ensure};
use mapstash_core::{AssetsConfig, Blob, ProviderId, TileIndex};
use std::{
	fs,
	io::ErrorKind,
	path::{Path, PathBuf},
};

/// Serves tiles bundled as plain files under `<root>/<source>/<z>/<x>/<y>.<ext>`.
///
/// Extensions are tried in the configured order; the first existing file wins.
#[derive(Debug, Clone)]
pub struct AssetsProvider {
	root: PathBuf,
	extensions: Vec<String>,
}

impl AssetsProvider {
	pub fn new(config: &AssetsConfig) -> Result<AssetsProvider> {
		ensure!(!config.extensions.is_empty(), "assets.extensions must not be empty");
		let extensions = config
			.extensions
			.iter()
			.map(|ext| ext.trim_matches('.').to_lowercase())
			.collect();
		Ok(AssetsProvider {
			root: config.path.clone(),
			extensions,
		})
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn tile_path(&self, source: &str, index: &TileIndex, ext: &str) -> PathBuf {
		self
			.root
			.join(source)
			.join(index.zoom.to_string())
			.join(index.x.to_string())
			.join(format!("{}.{ext}", index.y))
	}
}

impl TileProvider for AssetsProvider {
	fn id(&self) -> ProviderId {
		ProviderId::Assets
	}

	fn load(&self, source: &str, index: &TileIndex) -> Result<Option<LoadedTile>> {
		for ext in &self.extensions {
			let path = self.tile_path(source, index, ext);
			match fs::read(&path) {
				Ok(bytes) => return Ok(Some(LoadedTile::new(Blob::from(bytes)))),
				Err(e) if e.kind() == ErrorKind::NotFound => {}
				Err(e) => return Err(e).with_context(|| format!("reading asset {path:?}")),
			}
		}
		Ok(None)
	}
}
