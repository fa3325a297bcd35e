use super::inner::Inner;
use parking_lot::Mutex;
use std::sync::Arc;

/// A terminal progress bar that counts completed and failed items separately.
///
/// Cloneable and thread-safe; clones draw the same bar.
#[derive(Clone)]
pub struct ProgressBar {
	inner: Arc<Mutex<Inner>>,
}

impl ProgressBar {
	pub fn new(message: &str, total: u64) -> ProgressBar {
		let progress = ProgressBar {
			inner: Arc::new(Mutex::new(Inner::new(message, total))),
		};
		progress.inner.lock().redraw();
		progress
	}

	/// Replace both counters, e.g. from a bulk job's progress callback.
	pub fn set_counts(&self, completed: u64, failed: u64) {
		let mut inner = self.inner.lock();
		inner.completed = completed;
		inner.failed = failed;
		inner.redraw();
	}

	pub fn inc_completed(&self, value: u64) {
		let mut inner = self.inner.lock();
		inner.completed = inner.completed.saturating_add(value);
		inner.redraw();
	}

	pub fn inc_failed(&self, value: u64) {
		let mut inner = self.inner.lock();
		inner.failed = inner.failed.saturating_add(value);
		inner.redraw();
	}

	pub fn set_total(&self, total: u64) {
		let mut inner = self.inner.lock();
		inner.total = total;
		inner.redraw();
	}

	/// Draw the final state and move to the next line.
	pub fn finish(&self) {
		let mut inner = self.inner.lock();
		inner.finished = true;
		inner.redraw();
		inner.write("\n");
	}

	/// Clear the bar from the terminal.
	pub fn remove(&self) {
		let mut inner = self.inner.lock();
		inner.finished = true;
		inner.write("\r\x1b[2K");
	}

	pub fn position(&self) -> u64 {
		self.inner.lock().position()
	}
}

impl std::fmt::Debug for ProgressBar {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let inner = self.inner.lock();
		f.debug_struct("ProgressBar")
			.field("message", &inner.message)
			.field("completed", &inner.completed)
			.field("failed", &inner.failed)
			.field("total", &inner.total)
			.finish()
	}
}
