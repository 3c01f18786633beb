//! # fieldguard-config
//!
//! Configuration system for the FieldGuard safety core. Reads from
//! `fieldguard.toml`, then environment variables, then CLI overrides.
//!
//! Supports hot-reload via filesystem watcher.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::FieldGuardConfig;
pub use schema::{
    ConfigWarning, JidokaConfig, LoggingConfig, SafetyConfig, StoreConfig, TriggerThreshold,
    WarningSeverity,
};
