use crate::provider::{LoadedTile, TileProvider};
use anyhow::{Result, bail};
use crossbeam_channel::{Receiver, Sender};
use mapstash_core::{Blob, ProviderId, TileIndex};
use std::{
	collections::HashMap,
	sync::atomic::{AtomicUsize, Ordering},
	thread,
	time::Duration,
};

/// Provider that counts its calls and can block until released.
#[derive(Debug, Default)]
pub struct SpyProvider {
	inner: Option<Box<dyn TileProvider>>,
	tiles: HashMap<TileIndex, Blob>,
	every_tile: bool,
	fail: bool,
	panic: bool,
	delay: Option<Duration>,
	gate: Option<(Sender<TileIndex>, Receiver<()>)>,
	calls: AtomicUsize,
	active: AtomicUsize,
	max_active: AtomicUsize,
}

/// Signals load starts and releases blocked loads of a gated [`SpyProvider`].
pub struct Gate {
	pub entered: Receiver<TileIndex>,
	pub release: Sender<()>,
}

impl Gate {
	pub fn wait_entered(&self) -> TileIndex {
		self.entered.recv_timeout(Duration::from_secs(5)).unwrap()
	}

	pub fn open(&self) {
		self.release.send(()).unwrap();
	}
}

impl SpyProvider {
	pub fn new() -> SpyProvider {
		SpyProvider::default()
	}

	/// Counts the calls of another provider.
	pub fn wrap(inner: impl TileProvider + 'static) -> SpyProvider {
		SpyProvider {
			inner: Some(Box::new(inner)),
			..SpyProvider::default()
		}
	}

	pub fn with_tile(mut self, index: TileIndex, bytes: &str) -> SpyProvider {
		self.tiles.insert(index, Blob::from(bytes));
		self
	}

	/// Answers every index with its `z/x/y` text.
	pub fn with_every_tile(mut self) -> SpyProvider {
		self.every_tile = true;
		self
	}

	pub fn failing(mut self) -> SpyProvider {
		self.fail = true;
		self
	}

	pub fn panicking(mut self) -> SpyProvider {
		self.panic = true;
		self
	}

	pub fn with_delay(mut self, delay: Duration) -> SpyProvider {
		self.delay = Some(delay);
		self
	}

	pub fn gated(mut self) -> (SpyProvider, Gate) {
		let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
		let (release_tx, release_rx) = crossbeam_channel::unbounded();
		self.gate = Some((entered_tx, release_rx));
		(
			self,
			Gate {
				entered: entered_rx,
				release: release_tx,
			},
		)
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	pub fn max_active(&self) -> usize {
		self.max_active.load(Ordering::SeqCst)
	}
}

impl TileProvider for SpyProvider {
	fn id(&self) -> ProviderId {
		match &self.inner {
			Some(inner) => inner.id(),
			None => ProviderId::Archive("spy".to_string()),
		}
	}

	fn load(&self, source: &str, index: &TileIndex) -> Result<Option<LoadedTile>> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_active.fetch_max(active, Ordering::SeqCst);

		if let Some((entered, release)) = &self.gate {
			entered.send(*index)?;
			release.recv()?;
		}
		if let Some(delay) = self.delay {
			thread::sleep(delay);
		}
		self.active.fetch_sub(1, Ordering::SeqCst);

		if self.panic {
			panic!("spy panic at tile {index}");
		}
		if self.fail {
			bail!("spy failure");
		}
		if let Some(inner) = &self.inner {
			return inner.load(source, index);
		}
		if self.every_tile {
			return Ok(Some(LoadedTile::new(Blob::from(index.to_string().as_str()))));
		}
		Ok(self.tiles.get(index).cloned().map(LoadedTile::new))
	}
}
