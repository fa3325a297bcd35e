//! Core types of the mapstash tile pipeline: tile addressing, Web-Mercator projection, the
//! in-memory tile cache, configuration and the error kinds shared by all crates.

pub mod cache;
pub use cache::*;

pub mod config;
pub use config::*;

mod concurrency;
pub use concurrency::ConcurrencyLimits;

mod error;
pub use error::{TileError, TileResult};

pub mod progress;

pub mod projection;

pub mod types;
pub use types::*;
