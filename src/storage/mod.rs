//! Storage Layer - SQLite-backed persistence
//!
//! One table, `litestore(id, value)`, holds the records. Values are written
//! through the store's codec and tested against host predicates by the
//! `check_filter` / `check_exclude` SQL functions.

mod hooks;
pub mod schema;
pub mod sqlite;

pub use sqlite::{Location, SqliteStore};
