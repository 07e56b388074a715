//! # Storage driver
//!
//! The byte storage contract shared by every storage backend: a bucketed
//! key/value store with streaming reads and atomic writes.

mod driver;
mod error;

pub use driver::not_found;
pub use driver::Driver;
pub use driver::Metadata;
pub use driver::Reader;
pub use driver::Writer;
pub use error::{StorageError, StorageErrorBuilder, StorageErrorKind};
