//! Repository seams. The safety core never persists anything itself: it talks
//! to these traits, and callers inject an in-memory or SQLite backend.

use fieldguard_core::{FieldGuardError, Result};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::approval::ApprovalRequest;
use crate::audit::AuditEntry;
use crate::jidoka::JidokaEvent;
use crate::rollback::RollbackPlan;

/// Append-only storage for audit entries, in chain order.
pub trait AuditStore: Send + Sync {
    /// Append one sealed entry. Entries are never rewritten or removed.
    fn append(&self, entry: &AuditEntry) -> Result<()>;
    fn tail(&self) -> Result<Option<AuditEntry>>;
    fn list(&self) -> Result<Vec<AuditEntry>>;
    fn len(&self) -> Result<usize>;
}

/// A mutable record with an opaque id.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Stable name of the record kind, also used as a table name.
    const KIND: &'static str;
    fn id(&self) -> &str;
}

impl Record for ApprovalRequest {
    const KIND: &'static str = "approval_requests";
    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for JidokaEvent {
    const KIND: &'static str = "jidoka_events";
    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for RollbackPlan {
    const KIND: &'static str = "rollback_plans";
    fn id(&self) -> &str {
        &self.id
    }
}

/// Storage for mutable records (approvals, Jidoka events, rollback plans).
pub trait RecordStore<T: Record>: Send + Sync {
    /// Insert a new record. Fails if the id already exists.
    fn insert(&self, record: &T) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<T>>;
    /// Atomically replace the stored record with `updated` if `guard` accepts
    /// the stored version. Returns whether the swap happened.
    fn update_if(&self, updated: &T, guard: &dyn Fn(&T) -> bool) -> Result<bool>;
    /// All records in insertion order.
    fn list(&self) -> Result<Vec<T>>;
}

// ── In-memory backends ─────────────────────────────────────────

#[derive(Default)]
pub struct MemoryAuditStore {
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditStore for MemoryAuditStore {
    fn append(&self, entry: &AuditEntry) -> Result<()> {
        self.entries.write().push(entry.clone());
        Ok(())
    }

    fn tail(&self) -> Result<Option<AuditEntry>> {
        Ok(self.entries.read().last().cloned())
    }

    fn list(&self) -> Result<Vec<AuditEntry>> {
        Ok(self.entries.read().clone())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entries.read().len())
    }
}

pub struct MemoryRecordStore<T> {
    records: RwLock<Vec<T>>,
}

impl<T> Default for MemoryRecordStore<T> {
    fn default() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }
}

impl<T> MemoryRecordStore<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: Record> RecordStore<T> for MemoryRecordStore<T> {
    fn insert(&self, record: &T) -> Result<()> {
        let mut records = self.records.write();
        if records.iter().any(|r| r.id() == record.id()) {
            return Err(FieldGuardError::Store(format!(
                "duplicate {} id {}",
                T::KIND,
                record.id()
            )));
        }
        records.push(record.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<T>> {
        Ok(self.records.read().iter().find(|r| r.id() == id).cloned())
    }

    fn update_if(&self, updated: &T, guard: &dyn Fn(&T) -> bool) -> Result<bool> {
        let mut records = self.records.write();
        match records.iter_mut().find(|r| r.id() == updated.id()) {
            Some(slot) if guard(slot) => {
                *slot = updated.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(FieldGuardError::NotFound {
                entity: T::KIND,
                id: updated.id().to_string(),
            }),
        }
    }

    fn list(&self) -> Result<Vec<T>> {
        Ok(self.records.read().clone())
    }
}
