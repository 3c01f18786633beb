//! # fieldguard-store
//!
//! SQLite backend for the safety core. One database holds the append-only
//! audit chain plus approval requests, Jidoka events, and rollback plans.

pub mod sqlite;

pub use sqlite::SqliteStore;
