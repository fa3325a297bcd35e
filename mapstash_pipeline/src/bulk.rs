//! Pre-fetching every tile of an area into the persistent store.
//!
//! A [`BulkAreaJob`] enumerates the tiles of a bounding box over a zoom range and requests each one
//! through the pipeline, bypassing the memory cache. Only a few requests are outstanding at a
//! time: request `n + k` is not issued before one of the earlier ones has resolved.

use crate::{ProviderPipeline, RequestOptions, provider::CancelToken};
use anyhow::{Result, anyhow, ensure};
use crossbeam_channel::{RecvTimeoutError, Sender};
use mapstash_core::{
	BulkConfig, GeoBBox, TileIndex, check_zoom,
	projection::{TileIndices, count_tiles, tile_indices_for},
};
use std::{
	sync::Arc,
	thread::{self, JoinHandle},
	time::{Duration, Instant},
};

/// Number of tiles covering `bbox` on every zoom level of `zoom_min..=zoom_max`.
pub fn estimate_tile_count(bbox: &GeoBBox, zoom_min: u8, zoom_max: u8) -> Result<u64> {
	check_zoom_range(zoom_min, zoom_max)?;
	(zoom_min..=zoom_max).map(|zoom| count_tiles(bbox, zoom)).sum()
}

/// Expected download size for an average tile size of `avg_tile_bytes`.
pub fn estimate_download_bytes(bbox: &GeoBBox, zoom_min: u8, zoom_max: u8, avg_tile_bytes: u64) -> Result<u64> {
	Ok(estimate_tile_count(bbox, zoom_min, zoom_max)?.saturating_mul(avg_tile_bytes))
}

fn check_zoom_range(zoom_min: u8, zoom_max: u8) -> Result<()> {
	check_zoom(zoom_min)?;
	check_zoom(zoom_max)?;
	ensure!(
		zoom_min <= zoom_max,
		"zoom_min ({zoom_min}) must not be greater than zoom_max ({zoom_max})"
	);
	Ok(())
}

/// Final counts of a bulk job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BulkSummary {
	pub completed: u64,
	/// Includes the cancelled tiles
	pub failed: u64,
	/// Tiles never requested because the job was cancelled
	pub cancelled: u64,
	pub total: u64,
}

pub struct BulkAreaJob {
	pipeline: Arc<ProviderPipeline>,
	bbox: GeoBBox,
	zoom_min: u8,
	zoom_max: u8,
	max_in_flight: usize,
	progress_interval: Duration,
}

impl BulkAreaJob {
	pub fn new(pipeline: Arc<ProviderPipeline>, bbox: GeoBBox, zoom_min: u8, zoom_max: u8) -> Result<BulkAreaJob> {
		check_zoom_range(zoom_min, zoom_max)?;
		let defaults = BulkConfig::default();
		Ok(BulkAreaJob {
			pipeline,
			bbox,
			zoom_min,
			zoom_max,
			max_in_flight: defaults.max_in_flight,
			progress_interval: defaults.progress_interval(),
		})
	}

	pub fn with_config(self, config: &BulkConfig) -> Self {
		self
			.with_max_in_flight(config.max_in_flight)
			.with_progress_interval(config.progress_interval())
	}

	/// Requests kept outstanding at once; at least 1.
	pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
		self.max_in_flight = max_in_flight.max(1);
		self
	}

	/// Minimum time between two progress callbacks.
	pub fn with_progress_interval(mut self, interval: Duration) -> Self {
		self.progress_interval = interval;
		self
	}

	pub fn total(&self) -> Result<u64> {
		estimate_tile_count(&self.bbox, self.zoom_min, self.zoom_max)
	}

	/// Starts the job on its own thread.
	///
	/// `on_progress(completed, failed, total)` and `on_complete` run on the pipeline's callback
	/// thread. `on_complete` is called exactly once, after every tile is terminal, also when the
	/// job is cancelled. Requests already issued when the job is cancelled are allowed to finish.
	pub fn run<P, C>(self, on_progress: P, on_complete: C) -> Result<BulkJobHandle>
	where
		P: Fn(u64, u64, u64) + Send + Sync + 'static,
		C: FnOnce(BulkSummary) + Send + 'static,
	{
		let total = self.total()?;
		let indices = (self.zoom_min..=self.zoom_max)
			.map(|zoom| tile_indices_for(&self.bbox, zoom))
			.collect::<Result<Vec<TileIndices>>>()?;

		log::debug!(
			"bulk job for {:?} at zoom {}..={}: {total} tiles",
			self.bbox,
			self.zoom_min,
			self.zoom_max
		);

		let token = CancelToken::new();
		let state = JobState {
			pipeline: self.pipeline,
			token: token.clone(),
			max_in_flight: self.max_in_flight,
			progress_interval: self.progress_interval,
			on_progress: Arc::new(on_progress),
			summary: BulkSummary {
				total,
				..BulkSummary::default()
			},
			last_progress: None,
		};

		let thread = thread::Builder::new()
			.name("mapstash-bulk".to_string())
			.spawn(move || state.execute(indices.into_iter().flatten(), on_complete))?;

		Ok(BulkJobHandle {
			token,
			thread: Some(thread),
			total,
		})
	}
}

/// Reports the outcome of one request to the job thread; a callback dropped without being
/// called counts as a failure.
struct TileReport {
	sender: Sender<bool>,
	reported: bool,
}

impl TileReport {
	fn report(mut self, success: bool) {
		self.reported = true;
		let _ = self.sender.send(success);
	}
}

impl Drop for TileReport {
	fn drop(&mut self) {
		if !self.reported {
			let _ = self.sender.send(false);
		}
	}
}

struct JobState<P> {
	pipeline: Arc<ProviderPipeline>,
	token: CancelToken,
	max_in_flight: usize,
	progress_interval: Duration,
	on_progress: Arc<P>,
	summary: BulkSummary,
	last_progress: Option<Instant>,
}

impl<P> JobState<P>
where
	P: Fn(u64, u64, u64) + Send + Sync + 'static,
{
	fn execute<I, C>(mut self, indices: I, on_complete: C) -> BulkSummary
	where
		I: Iterator<Item = TileIndex>,
		C: FnOnce(BulkSummary) + Send + 'static,
	{
		let (sender, receiver) = crossbeam_channel::unbounded::<bool>();
		let mut in_flight = 0usize;
		let mut issued = 0u64;
		let options = RequestOptions { skip_memory: true };

		for index in indices {
			while in_flight >= self.max_in_flight {
				match receiver.recv_timeout(self.progress_interval) {
					Ok(success) => {
						in_flight -= 1;
						self.record(success);
					}
					Err(RecvTimeoutError::Timeout) => {}
					Err(RecvTimeoutError::Disconnected) => in_flight = 0,
				}
				self.maybe_progress();
			}
			if self.token.is_cancelled() {
				break;
			}

			issued += 1;
			let report = TileReport {
				sender: sender.clone(),
				reported: false,
			};
			// a rejected request drops its report, which then counts as a failure
			in_flight += 1;
			if let Err(e) = self
				.pipeline
				.request_with(index, options, move |result| report.report(result.is_ok()))
			{
				log::warn!("bulk request for tile {index} failed: {e:#}");
			}
			self.maybe_progress();
		}
		drop(sender);

		for success in receiver.iter() {
			self.record(success);
			self.maybe_progress();
		}

		let summary = &mut self.summary;
		summary.cancelled = summary.total.saturating_sub(issued);
		summary.failed += summary.cancelled;
		let summary = self.summary;

		if summary.cancelled > 0 {
			log::debug!("bulk job cancelled with {} tiles left", summary.cancelled);
		}
		log::debug!("bulk job finished: {summary:?}");

		self.emit_progress();
		self.deliver(Box::new(move || on_complete(summary)));
		summary
	}

	fn record(&mut self, success: bool) {
		if success {
			self.summary.completed += 1;
		} else {
			self.summary.failed += 1;
		}
	}

	fn maybe_progress(&mut self) {
		let due = self
			.last_progress
			.is_none_or(|last| last.elapsed() >= self.progress_interval);
		if due {
			self.emit_progress();
		}
	}

	fn emit_progress(&mut self) {
		self.last_progress = Some(Instant::now());
		let BulkSummary {
			completed,
			failed,
			total,
			..
		} = self.summary;
		let on_progress = self.on_progress.clone();
		self.deliver(Box::new(move || on_progress(completed, failed, total)));
	}

	/// Runs `f` on the callback thread, or right here once the pipeline has shut down.
	fn deliver(&self, f: Box<dyn FnOnce() + Send + 'static>) {
		if let Err(f) = self.pipeline.try_post(f) {
			f();
		}
	}
}

/// Controls a running [`BulkAreaJob`].
pub struct BulkJobHandle {
	token: CancelToken,
	thread: Option<JoinHandle<BulkSummary>>,
	total: u64,
}

impl BulkJobHandle {
	/// Stops issuing requests; the tiles not yet requested are reported as cancelled.
	pub fn cancel(&self) {
		self.token.cancel();
	}

	pub fn is_finished(&self) -> bool {
		self.thread.as_ref().is_none_or(JoinHandle::is_finished)
	}

	pub fn total(&self) -> u64 {
		self.total
	}

	/// Blocks until the job thread is done. `on_complete` may still be queued on the callback
	/// thread when this returns.
	pub fn wait(mut self) -> Result<BulkSummary> {
		let thread = self.thread.take().ok_or_else(|| anyhow!("bulk job already joined"))?;
		thread.join().map_err(|_| anyhow!("bulk job thread panicked"))
	}
}
