//! # fieldguard-cli
//!
//! Operator command-line interface for the FieldGuard safety core.
//!
//! ## Commands
//!
//! - `fieldguard run` — Run the expiry sweeper and config watcher, streaming safety events
//! - `fieldguard status` — Automation level, chain integrity, open approvals and stops
//! - `fieldguard level` — Change the automation level (audited)
//! - `fieldguard approvals` — Propose, decide, cancel and report on actions
//! - `fieldguard reading` — Feed a sensor reading through the Jidoka monitor
//! - `fieldguard jidoka` — List, raise and resolve line stops
//! - `fieldguard rollback` — Generate and track rollback plans
//! - `fieldguard audit` — Verify, list, export and import the audit chain
//! - `fieldguard doctor` — Check the configuration for unsafe settings

pub mod commands;

pub use commands::Cli;
