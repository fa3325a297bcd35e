//! The size-bounded SQLite disk cache.

mod export;
pub use export::ExportResult;

mod legacy_import;
pub use legacy_import::ImportResult;

mod persistent_store;
pub use persistent_store::{PersistentStore, ProviderUsage, StoredTile, TrimReport};
