use chrono::{DateTime, SecondsFormat, Utc};
use fieldguard_core::{FieldGuardError, Result};
use fieldguard_safety::{
    ApprovalRequest, AuditEntry, AuditStore, JidokaEvent, Record, RecordStore, RollbackPlan, SafetyStores,
};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS audit_entries (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        timestamp TEXT NOT NULL,
        entry_type TEXT NOT NULL,
        actor TEXT NOT NULL,
        target TEXT,
        action TEXT NOT NULL,
        details TEXT,
        previous_hash TEXT NOT NULL UNIQUE,
        hash TEXT NOT NULL,
        signature TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_entries(timestamp);
    CREATE INDEX IF NOT EXISTS idx_audit_type ON audit_entries(entry_type);

    CREATE TRIGGER IF NOT EXISTS audit_entries_no_update
    BEFORE UPDATE ON audit_entries
    BEGIN
        SELECT RAISE(ABORT, 'audit entries are append-only');
    END;

    CREATE TRIGGER IF NOT EXISTS audit_entries_no_delete
    BEFORE DELETE ON audit_entries
    BEGIN
        SELECT RAISE(ABORT, 'audit entries are append-only');
    END;

    CREATE TABLE IF NOT EXISTS records (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        id TEXT NOT NULL,
        body TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(kind, id)
    );

    CREATE INDEX IF NOT EXISTS idx_records_kind ON records(kind);
";

fn db_err(e: rusqlite::Error) -> FieldGuardError {
    FieldGuardError::Store(e.to_string())
}

/// SQLite-backed store. Cloning shares the connection.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening safety store");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        Self::init(conn)
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(db_err)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // WAL for concurrent readers; in-memory databases ignore it.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Raw connection, for maintenance queries.
    pub fn db(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.db.lock()
    }

    /// All four gate stores backed by this database.
    pub fn stores(&self) -> SafetyStores {
        SafetyStores {
            audit: Arc::new(self.clone()),
            approvals: Arc::new(self.clone()) as Arc<dyn RecordStore<ApprovalRequest>>,
            jidoka: Arc::new(self.clone()) as Arc<dyn RecordStore<JidokaEvent>>,
            rollbacks: Arc::new(self.clone()) as Arc<dyn RecordStore<RollbackPlan>>,
        }
    }

    fn read_entries(&self, sql: &str) -> Result<Vec<AuditEntry>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(sql).map_err(db_err)?;
        let rows = stmt
            .query_map([], RawEntry::from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        rows.into_iter().map(RawEntry::into_entry).collect()
    }
}

const ENTRY_COLUMNS: &str =
    "id, timestamp, entry_type, actor, target, action, details, previous_hash, hash, signature";

/// An audit row before its text columns are parsed.
struct RawEntry {
    id: String,
    timestamp: String,
    entry_type: String,
    actor: String,
    target: Option<String>,
    action: String,
    details: Option<String>,
    previous_hash: String,
    hash: String,
    signature: Option<String>,
}

impl RawEntry {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            entry_type: row.get(2)?,
            actor: row.get(3)?,
            target: row.get(4)?,
            action: row.get(5)?,
            details: row.get(6)?,
            previous_hash: row.get(7)?,
            hash: row.get(8)?,
            signature: row.get(9)?,
        })
    }

    fn into_entry(self) -> Result<AuditEntry> {
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| FieldGuardError::Store(format!("audit entry {}: bad timestamp: {e}", self.id)))?
            .with_timezone(&Utc);
        let details: Option<serde_json::Value> = self.details.as_deref().map(serde_json::from_str).transpose()?;
        Ok(AuditEntry {
            entry_type: self.entry_type.parse()?,
            id: self.id,
            timestamp,
            actor: self.actor,
            target: self.target,
            action: self.action,
            details,
            previous_hash: self.previous_hash,
            hash: self.hash,
            signature: self.signature,
        })
    }
}

// ── Audit chain ────────────────────────────────────────────────

impl AuditStore for SqliteStore {
    fn append(&self, entry: &AuditEntry) -> Result<()> {
        let details = entry.details.as_ref().map(serde_json::to_string).transpose()?;
        let db = self.db.lock();
        db.execute(
            &format!("INSERT INTO audit_entries ({ENTRY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
            params![
                entry.id,
                entry.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                entry.entry_type.as_str(),
                entry.actor,
                entry.target,
                entry.action,
                details,
                entry.previous_hash,
                entry.hash,
                entry.signature,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn tail(&self) -> Result<Option<AuditEntry>> {
        Ok(self
            .read_entries(&format!(
                "SELECT {ENTRY_COLUMNS} FROM audit_entries ORDER BY seq DESC LIMIT 1"
            ))?
            .pop())
    }

    fn list(&self) -> Result<Vec<AuditEntry>> {
        self.read_entries(&format!("SELECT {ENTRY_COLUMNS} FROM audit_entries ORDER BY seq"))
    }

    fn len(&self) -> Result<usize> {
        let db = self.db.lock();
        let n: i64 = db
            .query_row("SELECT COUNT(*) FROM audit_entries", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(n as usize)
    }
}

// ── Records ────────────────────────────────────────────────────

impl<T: Record> RecordStore<T> for SqliteStore {
    fn insert(&self, record: &T) -> Result<()> {
        let body = serde_json::to_string(record)?;
        let db = self.db.lock();
        db.execute(
            "INSERT INTO records (kind, id, body, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![T::KIND, record.id(), body, Utc::now().to_rfc3339()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<T>> {
        let db = self.db.lock();
        let body: Option<String> = db
            .query_row(
                "SELECT body FROM records WHERE kind = ?1 AND id = ?2",
                params![T::KIND, id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        Ok(body.map(|b| serde_json::from_str(&b)).transpose()?)
    }

    fn update_if(&self, updated: &T, guard: &dyn Fn(&T) -> bool) -> Result<bool> {
        // Read, check, and write under one lock so the guard sees the row
        // that gets replaced.
        let db = self.db.lock();
        let body: Option<String> = db
            .query_row(
                "SELECT body FROM records WHERE kind = ?1 AND id = ?2",
                params![T::KIND, updated.id()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        let Some(body) = body else {
            return Err(FieldGuardError::NotFound {
                entity: T::KIND,
                id: updated.id().to_string(),
            });
        };
        let current: T = serde_json::from_str(&body)?;
        if !guard(&current) {
            return Ok(false);
        }
        db.execute(
            "UPDATE records SET body = ?1, updated_at = ?2 WHERE kind = ?3 AND id = ?4",
            params![serde_json::to_string(updated)?, Utc::now().to_rfc3339(), T::KIND, updated.id()],
        )
        .map_err(db_err)?;
        Ok(true)
    }

    fn list(&self) -> Result<Vec<T>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare("SELECT body FROM records WHERE kind = ?1 ORDER BY seq")
            .map_err(db_err)?;
        let bodies = stmt
            .query_map(params![T::KIND], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        bodies
            .iter()
            .map(|b| serde_json::from_str(b).map_err(FieldGuardError::from))
            .collect()
    }
}
