//! Pipeline configuration, loaded from YAML.
//!
//! Every tunable of the pipeline lives in [`PipelineConfig`]; nothing is kept in process-wide
//! state. Disk cache thresholds are required whenever a store is configured.

mod bulk;
mod main;
mod memory;
mod network;
mod store;

pub use bulk::BulkConfig;
pub use main::{AssetsConfig, PipelineConfig};
pub use memory::MemoryConfig;
pub use network::NetworkConfig;
pub use store::StoreConfig;
