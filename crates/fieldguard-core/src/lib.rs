//! # fieldguard-core
//!
//! Shared vocabulary for the FieldGuard safety core: the error taxonomy,
//! sensor readings, guardrail check records, and the event bus that carries
//! safety decisions to collaborators once they have been audited.

pub mod error;
pub mod event;
pub mod types;

pub use error::{FieldGuardError, Result};
pub use event::{Event, EventBus};
pub use types::*;
