//! # fieldguard-safety
//!
//! The safety core between recommendation and actuation. Five automation
//! levels (L0-L4) with per-level guardrails and approval policy, an approval
//! state machine, a SHA-256 hash-chained audit log, Jidoka stop-the-line
//! monitoring, and rollback planning. [`SafetyGate`] ties them together.

pub mod approval;
pub mod audit;
pub mod gate;
pub mod guardrail;
pub mod jidoka;
pub mod level;
pub mod rollback;
pub mod snapshot;
pub mod store;
pub mod sweeper;
pub mod usage;

pub use approval::{ActionParams, ActionType, ApprovalPolicy, ApprovalRequest, ApprovalStatus, Decision, NewApproval};
pub use audit::{
    AuditChain, AuditDraft, AuditEntry, AuditEntryType, AuditQuery, ChainState, ChainVerification, EntrySigner,
    GENESIS_HASH,
};
pub use gate::{ActionProposal, Clock, ExecutionOutcome, RollbackSource, SafetyGate, SafetyStores};
pub use guardrail::{GuardrailConfig, ObservedState};
pub use jidoka::{JidokaCheck, JidokaEvent, Severity, TriggerKind};
pub use level::AutomationLevel;
pub use rollback::{RollbackPlan, RollbackPriority, RollbackStep};
pub use snapshot::SensorSnapshot;
pub use store::{AuditStore, MemoryAuditStore, MemoryRecordStore, Record, RecordStore};
pub use sweeper::spawn_expiry_sweeper;
pub use usage::UsageTracker;
