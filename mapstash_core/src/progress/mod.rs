//! Terminal progress reporting for long-running jobs such as bulk downloads.
//!
//! Output is only drawn when the `cli` feature is enabled and the `test` feature is not, so
//! library users and test runs stay silent.
//!
//! # Examples
//!
//! ```rust
//! use mapstash_core::progress::*;
//!
//! let progress = get_progress_bar("Prefetching", 100);
//! progress.set_counts(40, 2);
//! progress.finish();
//! ```

mod inner;
mod progress_bar;

pub use progress_bar::ProgressBar;

/// Create a progress bar for `total` work items.
#[must_use]
pub fn get_progress_bar(message: &str, total: u64) -> ProgressBar {
	ProgressBar::new(message, total)
}
