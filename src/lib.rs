//! # Recstore - thread-safe record store with automatic expiry
//!
//! Holds transient application records (cached credentials, lookup results,
//! small key/value-like entries) behind one uniform contract:
//! - [`MemoryStore`]: volatile, insertion-ordered, in process memory
//! - [`SqliteStore`]: durable, one SQLite table, one connection per thread
//! - Predicate based `filter` / `exclude` instead of keys or a query language
//! - Optional outdate predicate swept before operations, at most once per
//!   configured interval
//!
//! ```
//! use recstore::{MemoryStore, Predicate, RecordStore};
//!
//! let store = MemoryStore::new();
//! store.add(vec![1, 2, 3]).unwrap();
//!
//! let odd = Predicate::new(|n: &i32| n % 2 == 1);
//! assert_eq!(store.exclude(Some(&odd)).unwrap(), vec![1, 3]);
//! assert_eq!(store.filter(None).unwrap(), vec![2]);
//! ```

pub mod codec;
pub mod config;
pub mod maintenance;
pub mod memory;
pub mod predicate;
pub mod storage;
pub mod store;

// Re-exports for convenient access
pub use codec::{Codec, CodecError, FnCodec, JsonCodec, Stored};
pub use config::{FieldMatch, StoreConfig};
pub use maintenance::Maintenance;
pub use memory::MemoryStore;
pub use predicate::Predicate;
pub use storage::{Location, SqliteStore};
pub use store::{RecordStore, StoreOptions};

/// Result type alias for record store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for record store operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
