//! Append-only, hash-linked audit ledger.
//!
//! Each entry commits to its predecessor through `previous_hash`, and its own
//! `hash` is SHA-256 over a field-order-stable JSON rendering of every field
//! except `hash` and `signature`. Rewriting any entry invalidates its hash and
//! every later link, which `verify` reports by index.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use fieldguard_core::{AuditEntryId, FieldGuardError, Result, new_id};
use parking_lot::Mutex;
use ring::{digest, hmac};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::store::AuditStore;

/// `previous_hash` of the first entry in every chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntryType {
    ActionProposed,
    ActionApproved,
    ActionRejected,
    ActionExecuted,
    ActionFailed,
    JidokaTriggered,
    JidokaResolved,
    ConfigChanged,
    SensorReading,
    ManualLog,
    SystemEvent,
}

impl AuditEntryType {
    pub const ALL: [AuditEntryType; 11] = [
        Self::ActionProposed,
        Self::ActionApproved,
        Self::ActionRejected,
        Self::ActionExecuted,
        Self::ActionFailed,
        Self::JidokaTriggered,
        Self::JidokaResolved,
        Self::ConfigChanged,
        Self::SensorReading,
        Self::ManualLog,
        Self::SystemEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActionProposed => "action_proposed",
            Self::ActionApproved => "action_approved",
            Self::ActionRejected => "action_rejected",
            Self::ActionExecuted => "action_executed",
            Self::ActionFailed => "action_failed",
            Self::JidokaTriggered => "jidoka_triggered",
            Self::JidokaResolved => "jidoka_resolved",
            Self::ConfigChanged => "config_changed",
            Self::SensorReading => "sensor_reading",
            Self::ManualLog => "manual_log",
            Self::SystemEvent => "system_event",
        }
    }
}

impl fmt::Display for AuditEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditEntryType {
    type Err = FieldGuardError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| FieldGuardError::InvalidInput(format!("unknown audit entry type '{s}'")))
    }
}

/// One sealed ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub timestamp: DateTime<Utc>,
    pub entry_type: AuditEntryType,
    pub actor: String,
    #[serde(default)]
    pub target: Option<String>,
    pub action: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
    pub previous_hash: String,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Hashed view of an entry. Field order here is the canonical order.
#[derive(Serialize)]
struct Canonical<'a> {
    id: &'a str,
    timestamp: String,
    entry_type: AuditEntryType,
    actor: &'a str,
    target: Option<&'a str>,
    action: &'a str,
    details: Option<&'a serde_json::Value>,
    previous_hash: &'a str,
}

impl AuditEntry {
    /// Canonical bytes the hash is computed over.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let canonical = Canonical {
            id: &self.id,
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            entry_type: self.entry_type,
            actor: &self.actor,
            target: self.target.as_deref(),
            action: &self.action,
            details: self.details.as_ref(),
            previous_hash: &self.previous_hash,
        };
        Ok(serde_json::to_vec(&canonical)?)
    }

    /// Re-derive the hash from the entry's current field values.
    pub fn compute_hash(&self) -> Result<String> {
        let bytes = self.canonical_bytes()?;
        Ok(to_hex(digest::digest(&digest::SHA256, &bytes).as_ref()))
    }
}

/// An entry before it is linked and hashed.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditDraft {
    pub entry_type: AuditEntryType,
    pub actor: String,
    pub target: Option<String>,
    pub action: String,
    pub details: Option<serde_json::Value>,
}

impl AuditDraft {
    pub fn new(entry_type: AuditEntryType, actor: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            entry_type,
            actor: actor.into(),
            target: None,
            action: action.into(),
            details: None,
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn target_opt(mut self, target: Option<&str>) -> Self {
        self.target = target.map(str::to_string);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// HMAC-SHA256 signer over entry hashes.
#[derive(Clone)]
pub struct EntrySigner {
    key: hmac::Key,
}

impl fmt::Debug for EntrySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EntrySigner(..)")
    }
}

impl EntrySigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }

    pub fn sign(&self, hash: &str) -> String {
        to_hex(hmac::sign(&self.key, hash.as_bytes()).as_ref())
    }

    pub fn verify(&self, hash: &str, signature: &str) -> bool {
        match from_hex(signature) {
            Some(tag) => hmac::verify(&self.key, hash.as_bytes(), &tag).is_ok(),
            None => false,
        }
    }
}

/// Link and hash a draft onto `previous_hash`.
pub fn seal(
    draft: AuditDraft,
    previous_hash: &str,
    now: DateTime<Utc>,
    signer: Option<&EntrySigner>,
) -> Result<AuditEntry> {
    let mut entry = AuditEntry {
        id: new_id(),
        timestamp: now.trunc_subsecs(3),
        entry_type: draft.entry_type,
        actor: draft.actor,
        target: draft.target,
        action: draft.action,
        details: draft.details,
        previous_hash: previous_hash.to_string(),
        hash: String::new(),
        signature: None,
    };
    entry.hash = entry.compute_hash()?;
    entry.signature = signer.map(|s| s.sign(&entry.hash));
    Ok(entry)
}

/// Result of re-deriving a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_at: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ChainVerification {
    fn ok() -> Self {
        Self {
            valid: true,
            invalid_at: None,
            reason: None,
        }
    }

    fn broken(index: usize, reason: String) -> Self {
        Self {
            valid: false,
            invalid_at: Some(index),
            reason: Some(reason),
        }
    }

    /// Convert a failed verification into `ChainIntegrityViolation`.
    pub fn into_result(self) -> Result<()> {
        match (self.valid, self.invalid_at) {
            (true, _) => Ok(()),
            (false, index) => Err(FieldGuardError::ChainIntegrityViolation {
                index: index.unwrap_or(0),
                reason: self.reason.unwrap_or_else(|| "unknown".into()),
            }),
        }
    }
}

/// Verify a whole chain anchored at genesis.
pub fn verify(entries: &[AuditEntry]) -> ChainVerification {
    verify_continuation(entries, GENESIS_HASH, 0)
}

/// Verify `entries` as the continuation of a chain whose tail hash is
/// `anchor` and which already holds `offset` entries. Reported indices are
/// absolute.
pub fn verify_continuation(entries: &[AuditEntry], anchor: &str, offset: usize) -> ChainVerification {
    let mut expected_prev = anchor;
    for (i, entry) in entries.iter().enumerate() {
        let index = offset + i;
        // Entries are sealed at millisecond precision, which is all the hash covers.
        if entry.timestamp != entry.timestamp.trunc_subsecs(3) {
            return ChainVerification::broken(index, "timestamp carries sub-millisecond digits".into());
        }
        match entry.compute_hash() {
            Ok(h) if h == entry.hash => {}
            Ok(_) => return ChainVerification::broken(index, "hash mismatch: entry contents were modified".into()),
            Err(e) => return ChainVerification::broken(index, format!("entry cannot be serialized: {e}")),
        }
        if entry.previous_hash != expected_prev {
            let reason = if index == 0 {
                "first entry is not linked to genesis".to_string()
            } else {
                format!("previous_hash does not match hash of entry {}", index - 1)
            };
            return ChainVerification::broken(index, reason);
        }
        expected_prev = &entry.hash;
    }
    ChainVerification::ok()
}

/// Check every entry carries a valid signature under `signer`.
pub fn verify_signatures(entries: &[AuditEntry], signer: &EntrySigner) -> ChainVerification {
    for (index, entry) in entries.iter().enumerate() {
        match entry.signature.as_deref() {
            None => return ChainVerification::broken(index, "entry is not signed".into()),
            Some(sig) if !signer.verify(&entry.hash, sig) => {
                return ChainVerification::broken(index, "signature does not match entry hash".into());
            }
            Some(_) => {}
        }
    }
    ChainVerification::ok()
}

/// Summary of a chain's integrity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    pub entry_count: usize,
    pub last_hash: String,
    pub chain_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_at: Option<usize>,
}

pub fn chain_state(entries: &[AuditEntry]) -> ChainState {
    let verification = verify(entries);
    ChainState {
        entry_count: entries.len(),
        last_hash: entries
            .last()
            .map_or_else(|| GENESIS_HASH.to_string(), |e| e.hash.clone()),
        chain_valid: verification.valid,
        invalid_at: verification.invalid_at,
    }
}

/// Filter for listing entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditQuery {
    pub entry_type: Option<AuditEntryType>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Keep only the most recent N matches.
    pub limit: Option<usize>,
}

/// Apply a query to entries in chain order. Output stays in chain order.
pub fn query(entries: &[AuditEntry], q: &AuditQuery) -> Vec<AuditEntry> {
    let matched: Vec<&AuditEntry> = entries
        .iter()
        .filter(|e| q.entry_type.is_none_or(|t| e.entry_type == t))
        .filter(|e| q.since.is_none_or(|s| e.timestamp >= s))
        .filter(|e| q.until.is_none_or(|u| e.timestamp <= u))
        .collect();
    let skip = q.limit.map_or(0, |n| matched.len().saturating_sub(n));
    matched.into_iter().skip(skip).cloned().collect()
}

/// Entry counts per type.
pub fn summarize(entries: &[AuditEntry]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for e in entries {
        *counts.entry(e.entry_type.as_str().to_string()).or_insert(0) += 1;
    }
    counts
}

/// One JSON object per line, in chain order.
pub fn export_jsonl(entries: &[AuditEntry]) -> Result<String> {
    let mut out = String::new();
    for e in entries {
        out.push_str(&serde_json::to_string(e)?);
        out.push('\n');
    }
    Ok(out)
}

pub fn parse_jsonl(data: &str) -> Result<Vec<AuditEntry>> {
    data.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str::<AuditEntry>(l).map_err(FieldGuardError::from))
        .collect()
}

/// The single writer for one audit store.
pub struct AuditChain {
    store: Arc<dyn AuditStore>,
    signer: Option<EntrySigner>,
    // Held across read-tail-then-append so concurrent appenders cannot both
    // link to the same predecessor.
    write_lock: Mutex<()>,
}

impl AuditChain {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            signer: None,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_signer(mut self, signer: EntrySigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn signer(&self) -> Option<&EntrySigner> {
        self.signer.as_ref()
    }

    pub fn append(&self, draft: AuditDraft) -> Result<AuditEntry> {
        self.append_at(draft, Utc::now())
    }

    pub fn append_at(&self, draft: AuditDraft, now: DateTime<Utc>) -> Result<AuditEntry> {
        let _guard = self.write_lock.lock();
        let previous = self
            .store
            .tail()?
            .map_or_else(|| GENESIS_HASH.to_string(), |e| e.hash);
        let entry = seal(draft, &previous, now, self.signer.as_ref())?;
        self.store.append(&entry)?;
        debug!(
            entry_id = %entry.id,
            entry_type = %entry.entry_type,
            hash = %entry.hash,
            "audit entry appended"
        );
        Ok(entry)
    }

    pub fn entries(&self) -> Result<Vec<AuditEntry>> {
        self.store.list()
    }

    pub fn len(&self) -> Result<usize> {
        self.store.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn list(&self, q: &AuditQuery) -> Result<Vec<AuditEntry>> {
        Ok(query(&self.store.list()?, q))
    }

    /// Re-derive the stored chain. Signatures are checked too when a signer
    /// is configured.
    pub fn verify(&self) -> Result<ChainVerification> {
        let entries = self.store.list()?;
        let mut result = verify(&entries);
        if result.valid {
            if let Some(signer) = &self.signer {
                result = verify_signatures(&entries, signer);
            }
        }
        if !result.valid {
            warn!(
                invalid_at = ?result.invalid_at,
                reason = ?result.reason,
                "audit chain integrity violation"
            );
        }
        Ok(result)
    }

    pub fn state(&self) -> Result<ChainState> {
        Ok(chain_state(&self.store.list()?))
    }

    pub fn export(&self) -> Result<String> {
        export_jsonl(&self.store.list()?)
    }

    /// Append previously exported entries verbatim. The whole batch is
    /// verified as a continuation of the current tail before anything is
    /// written.
    pub fn import(&self, entries: &[AuditEntry]) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let offset = self.store.len()?;
        let anchor = self
            .store
            .tail()?
            .map_or_else(|| GENESIS_HASH.to_string(), |e| e.hash);
        verify_continuation(entries, &anchor, offset).into_result()?;
        for entry in entries {
            self.store.append(entry)?;
        }
        info!(count = entries.len(), "audit entries imported");
        Ok(entries.len())
    }

    pub fn import_jsonl(&self, data: &str) -> Result<usize> {
        self.import(&parse_jsonl(data)?)
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}
