use crate::provider::CancelToken;
use mapstash_core::{TileBlob, TileIndex, TileResult};
use std::sync::Arc;

/// Receives the outcome of a tile request on the pipeline's callback thread.
pub type TileCallback = Box<dyn FnOnce(TileResult<Arc<TileBlob>>) + Send + 'static>;

/// Per-request switches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequestOptions {
	/// Do not answer from the memory cache; used by bulk jobs that want the tile on disk
	pub skip_memory: bool,
}

/// Identifies one waiter of a tile request; pass it to
/// [`ProviderPipeline::cancel`](super::ProviderPipeline::cancel).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestHandle {
	pub(crate) index: TileIndex,
	pub(crate) request_id: u64,
	pub(crate) waiter_id: u64,
}

impl RequestHandle {
	pub(crate) fn memory_hit(index: TileIndex) -> RequestHandle {
		RequestHandle {
			index,
			request_id: 0,
			waiter_id: 0,
		}
	}

	pub fn index(&self) -> TileIndex {
		self.index
	}

	/// The request was answered from the memory cache and cannot be cancelled.
	pub fn is_memory_hit(&self) -> bool {
		self.request_id == 0
	}
}

/// A fetch that has been dispatched and not yet resolved.
///
/// Lives in the in-flight map from dispatch until resolution or until its last waiter cancels.
pub(crate) struct InFlightRequest {
	pub request_id: u64,
	pub token: CancelToken,
	/// In registration order
	pub waiters: Vec<(u64, TileCallback)>,
}
