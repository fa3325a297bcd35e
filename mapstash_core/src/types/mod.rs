//! Contains tile indices, bounding boxes, tile ranges and tile payload types.

mod blob;
pub use blob::*;

mod geo_bbox;
pub use geo_bbox::*;

mod tile_blob;
pub use tile_blob::*;

mod tile_index;
pub use tile_index::*;

mod tile_range;
pub use tile_range::*;
