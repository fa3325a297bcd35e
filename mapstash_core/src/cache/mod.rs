mod memory_tile_cache;
pub use memory_tile_cache::*;
