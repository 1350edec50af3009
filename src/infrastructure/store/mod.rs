//! Persistent store implementations

pub mod sqlite;

pub use sqlite::SqliteStore;
