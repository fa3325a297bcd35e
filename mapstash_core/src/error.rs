//! Error kinds that callers of the tile pipeline may need to tell apart.
//!
//! Most functions in this workspace return [`anyhow::Result`]. When a failure belongs to one of
//! the kinds below, the `anyhow::Error` wraps a [`TileError`] and can be recovered with
//! `err.downcast_ref::<TileError>()`. Pipeline callbacks receive a `TileError` directly.

use crate::TileIndex;
use std::path::PathBuf;
use thiserror::Error;

/// Result type handed to tile request callbacks.
pub type TileResult<T> = std::result::Result<T, TileError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TileError {
	/// Zoom level outside `0..=MAX_ZOOM`
	#[error("zoom level {zoom} is outside the supported range 0..={max}", max = crate::MAX_ZOOM)]
	InvalidZoom { zoom: u32 },

	/// Disk cache unreachable or corrupt; the store instance is unusable
	#[error("tile store unavailable: {0}")]
	StoreUnavailable(String),

	/// Archive could not be opened; it is skipped
	#[error("cannot open archive {path:?}: {reason}")]
	ArchiveOpenError { path: PathBuf, reason: String },

	/// No provider produced bytes for the tile
	#[error("tile {0} is unavailable")]
	TileUnavailable(TileIndex),

	/// Request withdrawn before it resolved
	#[error("request for tile {0} was cancelled")]
	Cancelled(TileIndex),
}

impl TileError {
	/// Find a `TileError` anywhere in an `anyhow` error chain.
	pub fn find(err: &anyhow::Error) -> Option<&TileError> {
		err.chain().find_map(|cause| cause.downcast_ref::<TileError>())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use anyhow::{Context, anyhow};

	#[test]
	fn messages() -> anyhow::Result<()> {
		let index = TileIndex::new(3, 1, 2)?;
		assert_eq!(
			TileError::InvalidZoom { zoom: 42 }.to_string(),
			"zoom level 42 is outside the supported range 0..=29"
		);
		assert_eq!(TileError::TileUnavailable(index).to_string(), "tile 3/1/2 is unavailable");
		assert_eq!(TileError::Cancelled(index).to_string(), "request for tile 3/1/2 was cancelled");
		assert_eq!(
			TileError::ArchiveOpenError {
				path: PathBuf::from("a.zip"),
				reason: "truncated".into()
			}
			.to_string(),
			"cannot open archive \"a.zip\": truncated"
		);
		Ok(())
	}

	#[test]
	fn find_through_context() {
		let err = Err::<(), _>(anyhow!(TileError::StoreUnavailable("locked".into())))
			.context("opening cache")
			.unwrap_err();
		assert_eq!(
			TileError::find(&err),
			Some(&TileError::StoreUnavailable("locked".into()))
		);
		assert_eq!(TileError::find(&anyhow!("plain")), None);
	}
}
