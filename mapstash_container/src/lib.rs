//! Persistent tile storage for mapstash: read-only offline archives and the SQLite disk cache.
//!
//! - [`ArchiveRegistry`] opens `.sqlite`, `.mbtiles`, `.zip` and `.gemf` archives as
//!   [`ArchiveHandle`]s and creates [`ArchiveWriter`]s for all of them but `.gemf`.
//! - [`PersistentStore`] is the size-bounded disk cache, including the import of legacy
//!   file-tree caches and the export of areas into archives.
//!
//! # Features
//! - `test`: fixture writers for archives, used by tests of dependent crates.

mod archive;
pub use archive::*;

mod store;
pub use store::*;

#[cfg(any(test, feature = "test"))]
pub mod testing;
