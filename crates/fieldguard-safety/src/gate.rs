//! The safety gate: the one entry point collaborators use to propose,
//! decide, execute, and observe. Every state change on a live record is
//! mirrored by an audit append before anything is published.

use chrono::{DateTime, Duration, Utc};
use fieldguard_config::{FieldGuardConfig, JidokaConfig};
use fieldguard_core::{Event, EventBus, FieldGuardError, Result, SensorReading};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::approval::{
    ActionParams, ActionType, ApprovalPolicy, ApprovalRequest, ApprovalStatus, Decision, NewApproval,
};
use crate::audit::{AuditChain, AuditDraft, AuditEntry, AuditEntryType, AuditQuery, ChainState, ChainVerification, EntrySigner};
use crate::guardrail::{self, ObservedState};
use crate::jidoka::{self, EventSource, JidokaCheck, JidokaEvent, Severity, TriggerKind};
use crate::level::AutomationLevel;
use crate::rollback::{self, RollbackContext, RollbackPlan};
use crate::snapshot::SensorSnapshot;
use crate::store::{AuditStore, MemoryAuditStore, MemoryRecordStore, RecordStore};
use crate::usage::UsageTracker;

/// Actor recorded for decisions the gate takes on its own.
pub const SYSTEM_ACTOR: &str = "system";

/// Actor recorded for outcomes reported by the actuator bridge.
pub const ACTUATOR_ACTOR: &str = "actuator";

/// Usage key for proposals without a target.
const UNTARGETED: &str = "untargeted";

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Injected persistence for the gate.
pub struct SafetyStores {
    pub audit: Arc<dyn AuditStore>,
    pub approvals: Arc<dyn RecordStore<ApprovalRequest>>,
    pub jidoka: Arc<dyn RecordStore<JidokaEvent>>,
    pub rollbacks: Arc<dyn RecordStore<RollbackPlan>>,
}

impl SafetyStores {
    pub fn in_memory() -> Self {
        Self {
            audit: Arc::new(MemoryAuditStore::new()),
            approvals: Arc::new(MemoryRecordStore::new()),
            jidoka: Arc::new(MemoryRecordStore::new()),
            rollbacks: Arc::new(MemoryRecordStore::new()),
        }
    }
}

/// An action put forward by the recommendation engine or an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionProposal {
    pub action_type: ActionType,
    pub target_id: Option<String>,
    pub target_name: Option<String>,
    pub proposed_action: String,
    pub reason: String,
    pub params: ActionParams,
    pub ai_confidence: Option<f64>,
    pub sources_used: Vec<String>,
    pub automation_level: AutomationLevel,
    pub proposed_by: String,
}

impl ActionProposal {
    pub fn new(action_type: ActionType, proposed_action: impl Into<String>, automation_level: AutomationLevel) -> Self {
        Self {
            action_type,
            target_id: None,
            target_name: None,
            proposed_action: proposed_action.into(),
            reason: String::new(),
            params: ActionParams::default(),
            ai_confidence: None,
            sources_used: Vec::new(),
            automation_level,
            proposed_by: SYSTEM_ACTOR.into(),
        }
    }

    pub fn target(mut self, id: impl Into<String>, name: Option<&str>) -> Self {
        self.target_id = Some(id.into());
        self.target_name = name.map(str::to_string);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn params(mut self, params: ActionParams) -> Self {
        self.params = params;
        self
    }

    pub fn confidence(mut self, c: f64) -> Self {
        self.ai_confidence = Some(c);
        self
    }

    pub fn proposed_by(mut self, actor: impl Into<String>) -> Self {
        self.proposed_by = actor.into();
        self
    }
}

/// Final result of an approved action, as reported by the actuator bridge
/// after its own retries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub retry_count: u32,
    pub error: Option<String>,
    pub result: Option<String>,
}

/// What a rollback plan reverses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackSource {
    Action(String),
    JidokaEvent(String),
}

#[derive(Debug, Clone)]
struct GateSettings {
    sensor_freshness_minutes: u32,
    audit_sensor_readings: bool,
    jidoka: JidokaConfig,
}

impl From<&FieldGuardConfig> for GateSettings {
    fn from(config: &FieldGuardConfig) -> Self {
        Self {
            sensor_freshness_minutes: config.safety.sensor_freshness_minutes,
            audit_sensor_readings: config.safety.audit_sensor_readings,
            jidoka: config.jidoka.clone(),
        }
    }
}

pub struct SafetyGate {
    max_level: RwLock<AutomationLevel>,
    settings: RwLock<GateSettings>,
    chain: AuditChain,
    approvals: Arc<dyn RecordStore<ApprovalRequest>>,
    jidoka: Arc<dyn RecordStore<JidokaEvent>>,
    rollbacks: Arc<dyn RecordStore<RollbackPlan>>,
    rollback_lock: Mutex<()>,
    snapshot: SensorSnapshot,
    usage: UsageTracker,
    events: EventBus,
    clock: Clock,
}

impl SafetyGate {
    pub fn new(config: &FieldGuardConfig, stores: SafetyStores) -> Self {
        let mut chain = AuditChain::new(stores.audit);
        if let Some(key) = config.safety.signing_key.as_deref().filter(|k| !k.is_empty()) {
            chain = chain.with_signer(EntrySigner::new(key.as_bytes()));
        }
        Self {
            max_level: RwLock::new(AutomationLevel::from_u8(config.safety.automation_level)),
            settings: RwLock::new(GateSettings::from(config)),
            chain,
            approvals: stores.approvals,
            jidoka: stores.jidoka,
            rollbacks: stores.rollbacks,
            rollback_lock: Mutex::new(()),
            snapshot: SensorSnapshot::new(),
            usage: UsageTracker::new(),
            events: EventBus::default(),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn chain(&self) -> &AuditChain {
        &self.chain
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn automation_level(&self) -> AutomationLevel {
        *self.max_level.read()
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    // ── Proposals ──────────────────────────────────────────────

    /// Evaluate a proposal and hold it for approval. Resolves immediately
    /// when policy auto-approves, when the level can never grant, or when a
    /// guardrail fails (returned as `PolicyViolation`).
    pub fn propose_action(&self, proposal: ActionProposal) -> Result<ApprovalRequest> {
        let now = self.now();
        let level = proposal.automation_level.min(self.automation_level());

        if let Some((event_id, scope)) = self.line_stop_for(&proposal.params.sensor_ids, proposal.target_id.as_deref())? {
            self.chain.append_at(
                AuditDraft::new(AuditEntryType::SystemEvent, SYSTEM_ACTOR, "proposal blocked by jidoka")
                    .target_opt(proposal.target_id.as_deref())
                    .details(json!({
                        "jidoka_event_id": event_id,
                        "scope": scope,
                        "proposed_action": proposal.proposed_action,
                        "proposed_by": proposal.proposed_by,
                    })),
                now,
            )?;
            warn!(%event_id, %scope, action = %proposal.proposed_action, "proposal blocked, line stopped");
            return Err(FieldGuardError::LineStopped { event_id, scope });
        }

        let observed = self.observe(&proposal, now);
        let checks = guardrail::evaluate(level, &observed);
        let passed = guardrail::all_pass(&checks);
        let proposed_by = proposal.proposed_by.clone();
        let request = ApprovalRequest::create(
            NewApproval {
                action_type: proposal.action_type,
                target_id: proposal.target_id,
                target_name: proposal.target_name,
                proposed_action: proposal.proposed_action,
                reason: proposal.reason,
                ai_confidence: proposal.ai_confidence,
                sources_used: proposal.sources_used,
                parameters: proposal.params,
            },
            level,
            checks,
            now,
        )?;

        self.chain.append_at(
            AuditDraft::new(AuditEntryType::ActionProposed, proposed_by, request.proposed_action.clone())
                .target_opt(request.target_id.as_deref())
                .details(json!({
                    "approval_id": request.id,
                    "action_type": request.action_type,
                    "automation_level": request.automation_level,
                    "parameters": request.parameters,
                    "guardrail_checks": request.guardrail_checks,
                    "expires_at": request.expires_at,
                })),
            now,
        )?;
        self.approvals.insert(&request)?;
        info!(
            request_id = %request.id,
            action = %request.proposed_action,
            %level,
            guardrails_passed = passed,
            "action proposed"
        );
        self.events.publish(Event::ApprovalRequested {
            request_id: request.id.clone(),
            action: request.proposed_action.clone(),
            reason: request.reason.clone(),
        });

        if !passed {
            let checks = request.guardrail_checks.clone();
            let next = request.reject_violation(SYSTEM_ACTOR, now)?;
            self.finish_decision(&request, next, Decision::Reject, SYSTEM_ACTOR, Some("guardrail violation"), now)?;
            return Err(FieldGuardError::PolicyViolation {
                request_id: request.id,
                checks,
            });
        }

        if !level.allows_actuation() {
            return self.apply_expiry(&request, now);
        }
        if ApprovalPolicy::for_level(level).auto_approve_if_guardrails_pass {
            return self.decide_loaded(
                &request,
                Decision::Approve,
                SYSTEM_ACTOR,
                Some("auto-approved: all guardrails passed"),
                now,
            );
        }
        Ok(request)
    }

    fn observe(&self, proposal: &ActionProposal, now: DateTime<Utc>) -> ObservedState {
        if !proposal.action_type.is_actuation() {
            return ObservedState::default();
        }
        let freshness = Duration::minutes(i64::from(self.settings.read().sensor_freshness_minutes));
        let zone = self.snapshot.zone(&proposal.params.sensor_ids, now, freshness);
        let usage = self
            .usage
            .snapshot(proposal.target_id.as_deref().unwrap_or(UNTARGETED), now);
        let waters = proposal.action_type == ActionType::Water || proposal.params.water_gallons.is_some();
        ObservedState {
            proposed_water_gallons: waters.then(|| proposal.params.water_gallons.unwrap_or(0.0)),
            water_used_today_gallons: waters.then_some(usage.water_used_today_gallons),
            minutes_since_last_action: if waters { usage.minutes_since_last_action } else { None },
            consecutive_actions_today: Some(usage.consecutive_actions_today),
            has_sensor_reading: Some(zone.has_fresh_reading),
            moisture_percent: zone.moisture_percent,
            ec_ms_cm: zone.ec_ms_cm,
            temp_f: zone.temp_f,
        }
    }

    // ── Decisions ──────────────────────────────────────────────

    pub fn decide(
        &self,
        approval_id: &str,
        decision: Decision,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<ApprovalRequest> {
        let now = self.now();
        let request = self.load_approval(approval_id)?;
        if request.is_expired(now) {
            self.expire_quietly(&request, now)?;
            return Err(FieldGuardError::ExpiredRequest {
                id: request.id,
                expires_at: request.expires_at,
            });
        }
        self.decide_loaded(&request, decision, actor, reason, now)
    }

    fn decide_loaded(
        &self,
        request: &ApprovalRequest,
        decision: Decision,
        actor: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest> {
        if decision == Decision::Approve && request.status == ApprovalStatus::Pending {
            // A stop may have fired after this request cleared its proposal check.
            let stop = self.line_stop_for(&request.parameters.sensor_ids, request.target_id.as_deref())?;
            if let Some((event_id, scope)) = stop {
                let why = format!("stopped by jidoka event {event_id}");
                self.cancel_loaded(request, SYSTEM_ACTOR, Some(&why), now)?;
                warn!(request_id = %request.id, %event_id, %scope, "approval refused, line stopped");
                return Err(FieldGuardError::LineStopped { event_id, scope });
            }
        }
        let next = request.decide(decision, actor, reason, now)?;
        self.finish_decision(request, next, decision, actor, reason, now)
    }

    fn finish_decision(
        &self,
        request: &ApprovalRequest,
        next: ApprovalRequest,
        decision: Decision,
        actor: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest> {
        let (entry_type, verb) = match decision {
            Decision::Approve => (AuditEntryType::ActionApproved, "approved"),
            Decision::Reject => (AuditEntryType::ActionRejected, "rejected"),
        };
        let draft = AuditDraft::new(entry_type, actor, format!("{verb}: {}", request.proposed_action))
            .target_opt(request.target_id.as_deref())
            .details(json!({
                "approval_id": request.id,
                "reason": reason,
            }));
        let decided = self.commit(request, next, draft, &decision.to_string(), now)?;
        info!(request_id = %decided.id, status = %decided.status, actor, "approval decided");
        self.events.publish(match decision {
            Decision::Approve => Event::ApprovalGranted {
                request_id: decided.id.clone(),
                approved_by: actor.to_string(),
            },
            Decision::Reject => Event::ApprovalRejected {
                request_id: decided.id.clone(),
                rejected_by: actor.to_string(),
            },
        });
        Ok(decided)
    }

    pub fn cancel(&self, approval_id: &str, actor: &str, reason: Option<&str>) -> Result<ApprovalRequest> {
        let now = self.now();
        let request = self.load_approval(approval_id)?;
        if request.is_expired(now) {
            self.expire_quietly(&request, now)?;
            return Err(FieldGuardError::ExpiredRequest {
                id: request.id,
                expires_at: request.expires_at,
            });
        }
        self.cancel_loaded(&request, actor, reason, now)
    }

    fn cancel_loaded(
        &self,
        request: &ApprovalRequest,
        actor: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest> {
        let next = request.cancel(actor, reason, now)?;
        let draft = AuditDraft::new(AuditEntryType::SystemEvent, actor, "approval_cancelled")
            .target_opt(request.target_id.as_deref())
            .details(json!({
                "approval_id": request.id,
                "reason": reason,
            }));
        let cancelled = self.commit(request, next, draft, "cancel", now)?;
        info!(request_id = %cancelled.id, actor, "approval cancelled");
        self.events.publish(Event::ApprovalCancelled {
            request_id: cancelled.id.clone(),
        });
        Ok(cancelled)
    }

    /// Record the actuator bridge's final outcome for an approved action.
    pub fn record_execution(&self, approval_id: &str, outcome: ExecutionOutcome) -> Result<ApprovalRequest> {
        let now = self.now();
        let request = self.load_approval(approval_id)?;
        let summary = match (&outcome.result, &outcome.error) {
            (Some(r), _) if outcome.success => r.clone(),
            (_, Some(e)) if !outcome.success => format!("failed: {e}"),
            _ if outcome.success => "succeeded".to_string(),
            _ => "failed".to_string(),
        };
        let next = request.record_execution(&summary, now)?;
        let entry_type = if outcome.success {
            AuditEntryType::ActionExecuted
        } else {
            AuditEntryType::ActionFailed
        };
        let draft = AuditDraft::new(entry_type, ACTUATOR_ACTOR, request.proposed_action.clone())
            .target_opt(request.target_id.as_deref())
            .details(json!({
                "approval_id": request.id,
                "success": outcome.success,
                "retry_count": outcome.retry_count,
                "error": outcome.error,
                "result": outcome.result,
            }));
        let executed = self.commit(&request, next, draft, "record execution", now)?;

        if outcome.success && executed.action_type.is_actuation() {
            let human_approved = executed.approved_by.as_deref() != Some(SYSTEM_ACTOR);
            self.usage.record_action(
                executed.target_id.as_deref().unwrap_or(UNTARGETED),
                executed.parameters.water_gallons.unwrap_or(0.0),
                human_approved,
                now,
            );
        }
        if outcome.success {
            info!(request_id = %executed.id, retries = outcome.retry_count, "action executed");
        } else {
            warn!(request_id = %executed.id, retries = outcome.retry_count, error = ?outcome.error, "action failed");
        }
        self.events.publish(Event::ActionExecuted {
            request_id: executed.id.clone(),
            success: outcome.success,
        });
        Ok(executed)
    }

    /// Compare-and-swap `current` to `next`, then audit. If the audit append
    /// fails the swap is undone and the error returned.
    fn commit(
        &self,
        current: &ApprovalRequest,
        next: ApprovalRequest,
        draft: AuditDraft,
        attempted: &str,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest> {
        let (status, executed_at) = (current.status, current.executed_at);
        let swapped = self
            .approvals
            .update_if(&next, &|stored| stored.status == status && stored.executed_at == executed_at)?;
        if !swapped {
            let stored = self.load_approval(&current.id)?;
            return Err(FieldGuardError::IllegalStateTransition {
                entity: "approval",
                id: stored.id,
                from: stored.status.to_string(),
                attempted: attempted.to_string(),
            });
        }
        if let Err(e) = self.chain.append_at(draft, now) {
            error!(request_id = %next.id, error = %e, "audit append failed, reverting transition");
            let (status, executed_at) = (next.status, next.executed_at);
            self.approvals
                .update_if(current, &|stored| stored.status == status && stored.executed_at == executed_at)?;
            return Err(e);
        }
        Ok(next)
    }

    // ── Expiry ─────────────────────────────────────────────────

    fn apply_expiry(&self, request: &ApprovalRequest, now: DateTime<Utc>) -> Result<ApprovalRequest> {
        let next = request.expire(now)?;
        let draft = AuditDraft::new(AuditEntryType::SystemEvent, SYSTEM_ACTOR, "approval_expired")
            .target_opt(request.target_id.as_deref())
            .details(json!({
                "approval_id": request.id,
                "expires_at": request.expires_at,
                "automation_level": request.automation_level,
            }));
        let expired = self.commit(request, next, draft, "expire", now)?;
        info!(request_id = %expired.id, "approval expired");
        if expired.policy().notify_on_expiration {
            self.events.publish(Event::ApprovalExpired {
                request_id: expired.id.clone(),
            });
        }
        Ok(expired)
    }

    /// Expire, tolerating a concurrent caller having already moved the request.
    fn expire_quietly(&self, request: &ApprovalRequest, now: DateTime<Utc>) -> Result<ApprovalRequest> {
        match self.apply_expiry(request, now) {
            Ok(r) => Ok(r),
            Err(e) if e.is_illegal_transition() => {
                debug!(request_id = %request.id, "request already left pending");
                self.load_approval(&request.id)
            }
            Err(e) => Err(e),
        }
    }

    /// Expire every pending request whose window has closed.
    pub fn sweep_expired(&self) -> Result<Vec<ApprovalRequest>> {
        let now = self.now();
        let mut expired = Vec::new();
        for request in self.approvals.list()? {
            if request.is_expired(now) {
                let r = self.expire_quietly(&request, now)?;
                if r.status == ApprovalStatus::Expired {
                    expired.push(r);
                }
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expiry sweep");
        }
        Ok(expired)
    }

    // ── Queries ────────────────────────────────────────────────

    fn load_approval(&self, id: &str) -> Result<ApprovalRequest> {
        self.approvals.get(id)?.ok_or_else(|| FieldGuardError::NotFound {
            entity: "approval",
            id: id.to_string(),
        })
    }

    /// Read one request, expiring it first if its window closed.
    pub fn get_approval(&self, id: &str) -> Result<ApprovalRequest> {
        let request = self.load_approval(id)?;
        let now = self.now();
        if request.is_expired(now) {
            return self.expire_quietly(&request, now);
        }
        Ok(request)
    }

    /// Newest first, after a lazy expiry pass.
    pub fn list_approvals(&self, status: Option<ApprovalStatus>, limit: Option<usize>) -> Result<Vec<ApprovalRequest>> {
        self.sweep_expired()?;
        let mut requests: Vec<ApprovalRequest> = self
            .approvals
            .list()?
            .into_iter()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(n) = limit {
            requests.truncate(n);
        }
        Ok(requests)
    }

    pub fn list_audit(&self, q: &AuditQuery) -> Result<Vec<AuditEntry>> {
        self.chain.list(q)
    }

    pub fn verify_chain(&self) -> Result<ChainVerification> {
        self.chain.verify()
    }

    pub fn chain_state(&self) -> Result<ChainState> {
        self.chain.state()
    }

    pub fn audit_summary(&self) -> Result<BTreeMap<String, usize>> {
        Ok(crate::audit::summarize(&self.chain.entries()?))
    }

    pub fn export_audit(&self) -> Result<String> {
        self.chain.export()
    }

    pub fn import_audit(&self, jsonl: &str) -> Result<usize> {
        self.chain.import_jsonl(jsonl)
    }

    pub fn log_manual(&self, actor: &str, action: &str, details: Option<serde_json::Value>) -> Result<AuditEntry> {
        let mut draft = AuditDraft::new(AuditEntryType::ManualLog, actor, action);
        draft.details = details;
        self.chain.append_at(draft, self.now())
    }

    /// Rebuild usage counters from `action_executed` entries, for a gate
    /// opened over an existing store. Returns how many actions were replayed.
    pub fn restore_usage(&self) -> Result<usize> {
        let executed = self.chain.list(&AuditQuery {
            entry_type: Some(AuditEntryType::ActionExecuted),
            ..Default::default()
        })?;
        let mut replayed = 0;
        for entry in executed {
            let Some(id) = entry
                .details
                .as_ref()
                .and_then(|d| d.get("approval_id"))
                .and_then(|v| v.as_str())
            else {
                continue;
            };
            let Some(request) = self.approvals.get(id)? else {
                continue;
            };
            if !request.action_type.is_actuation() {
                continue;
            }
            self.usage.record_action(
                request.target_id.as_deref().unwrap_or(UNTARGETED),
                request.parameters.water_gallons.unwrap_or(0.0),
                request.approved_by.as_deref() != Some(SYSTEM_ACTOR),
                entry.timestamp,
            );
            replayed += 1;
        }
        debug!(replayed, "usage restored from audit chain");
        Ok(replayed)
    }

    // ── Configuration ──────────────────────────────────────────

    pub fn set_automation_level(&self, level: AutomationLevel, actor: &str) -> Result<AuditEntry> {
        let from = self.automation_level();
        let entry = self.chain.append_at(
            AuditDraft::new(AuditEntryType::ConfigChanged, actor, "automation level changed").details(json!({
                "key": "safety.automation_level",
                "from": from,
                "to": level,
            })),
            self.now(),
        )?;
        *self.max_level.write() = level;
        info!(%from, to = %level, actor, "automation level changed");
        self.events.publish(Event::ConfigChanged {
            key: "safety.automation_level".into(),
            value: level.as_u8().to_string(),
        });
        Ok(entry)
    }

    /// Apply a reloaded config. A level change is audited.
    pub fn apply_config(&self, config: &FieldGuardConfig, actor: &str) -> Result<()> {
        *self.settings.write() = GateSettings::from(config);
        let level = AutomationLevel::from_u8(config.safety.automation_level);
        if level != self.automation_level() {
            self.set_automation_level(level, actor)?;
        }
        Ok(())
    }

    // ── Jidoka ─────────────────────────────────────────────────

    /// Ingest a reading and fire any crossed triggers.
    pub fn report_reading(&self, reading: &SensorReading) -> Result<Vec<JidokaEvent>> {
        let now = self.now();
        self.snapshot.update(reading);
        let settings = self.settings.read().clone();

        if settings.audit_sensor_readings {
            self.chain.append_at(
                AuditDraft::new(
                    AuditEntryType::SensorReading,
                    reading.sensor_id.clone(),
                    format!("{} = {} {}", reading.reading_type, reading.value, reading.unit),
                )
                .details(serde_json::to_value(reading)?),
                now,
            )?;
        }

        let mut measured: Vec<(TriggerKind, f64)> = TriggerKind::for_reading(reading.reading_type)
            .iter()
            .map(|k| (*k, reading.value))
            .collect();
        if let Some(battery) = reading.battery_pct {
            measured.push((TriggerKind::LowBattery, battery));
        }

        let mut fired = Vec::new();
        for (kind, value) in measured {
            let Some(threshold) = kind.threshold(&settings.jidoka) else {
                continue;
            };
            let result = jidoka::check(kind, value, &threshold);
            if !result.triggered || self.already_open(kind, &reading.sensor_id, result.severity)? {
                continue;
            }
            let source = EventSource {
                sensor_id: Some(reading.sensor_id.clone()),
                actuator_id: None,
                current_value: Some(value),
                threshold: Some(threshold.threshold),
            };
            fired.push(self.fire(kind, result, source, now)?);
        }
        Ok(fired)
    }

    /// Pull the andon cord by hand. With no sensor or actuator the stop covers
    /// every actuator.
    pub fn manual_stop(
        &self,
        actor: &str,
        sensor_id: Option<&str>,
        actuator_id: Option<&str>,
        reason: &str,
    ) -> Result<JidokaEvent> {
        let now = self.now();
        let result = JidokaCheck {
            triggered: true,
            severity: Some(Severity::Critical),
            message: format!("line stopped manually by {actor}: {reason}"),
        };
        let source = EventSource {
            sensor_id: sensor_id.map(str::to_string),
            actuator_id: actuator_id.map(str::to_string),
            current_value: None,
            threshold: None,
        };
        self.fire(TriggerKind::ManualStop, result, source, now)
    }

    /// An open event of this kind on this sensor already covers the severity.
    fn already_open(&self, kind: TriggerKind, sensor_id: &str, severity: Option<Severity>) -> Result<bool> {
        Ok(self.jidoka.list()?.iter().any(|e| {
            !e.resolved
                && e.trigger_kind == kind
                && e.sensor_id.as_deref() == Some(sensor_id)
                && severity.is_none_or(|s| e.severity >= s)
        }))
    }

    fn fire(&self, kind: TriggerKind, result: JidokaCheck, source: EventSource, now: DateTime<Utc>) -> Result<JidokaEvent> {
        let severity = result.severity.unwrap_or(Severity::Warning);
        let mut event = jidoka::create_event(kind, severity, result.message, source, now);

        self.chain.append_at(
            AuditDraft::new(AuditEntryType::JidokaTriggered, SYSTEM_ACTOR, event.message.clone())
                .target_opt(event.actuator_id.as_deref().or(event.sensor_id.as_deref()))
                .details(json!({
                    "jidoka_event_id": event.id,
                    "trigger_kind": kind,
                    "severity": severity,
                    "current_value": event.current_value,
                    "threshold": event.threshold,
                    "recommended_actions": jidoka::recommended_actions(kind),
                })),
            now,
        )?;
        self.jidoka.insert(&event)?;
        warn!(
            event_id = %event.id,
            trigger = %kind,
            %severity,
            sensor = ?event.sensor_id,
            "jidoka triggered"
        );

        if severity.stops_line() {
            for request in self.approvals.list()? {
                if request.status != ApprovalStatus::Pending || !covers(&event, &request) {
                    continue;
                }
                let reason = format!("stopped by jidoka event {}", event.id);
                match self.cancel_loaded(&request, SYSTEM_ACTOR, Some(&reason), now) {
                    Ok(_) => event.actions_taken.push(format!("cancelled pending approval {}", request.id)),
                    Err(e) if e.is_illegal_transition() => {
                        debug!(request_id = %request.id, "request left pending before stop");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let plan = self.generate_rollback(RollbackSource::JidokaEvent(event.id.clone()))?;
        event.actions_taken.push(format!("rollback plan {} generated", plan.id));
        if !self.jidoka.update_if(&event, &|stored| !stored.resolved)? {
            // Resolved while the stop was in progress: keep the resolution, record what was done.
            if let Some(mut stored) = self.jidoka.get(&event.id)? {
                stored.actions_taken = event.actions_taken.clone();
                self.jidoka.update_if(&stored, &|s| s.resolved)?;
                warn!(
                    event_id = %event.id,
                    resolved_by = ?stored.resolved_by,
                    "jidoka event resolved before its stop finished"
                );
                event = stored;
            }
        }

        self.events.publish(Event::JidokaTriggered {
            event_id: event.id.clone(),
            trigger: kind.to_string(),
            severity: severity.to_string(),
            sensor_id: event.sensor_id.clone(),
        });
        Ok(event)
    }

    /// The first unresolved line-stopping event covering this zone/target.
    fn line_stop_for(&self, sensor_ids: &[String], target_id: Option<&str>) -> Result<Option<(String, String)>> {
        Ok(self
            .jidoka
            .list()?
            .into_iter()
            .filter(|e| !e.resolved && e.severity.stops_line())
            .find_map(|e| stop_scope(&e, sensor_ids, target_id).map(|scope| (e.id, scope))))
    }

    pub fn resolve_jidoka(&self, event_id: &str, by: &str, notes: Option<&str>) -> Result<JidokaEvent> {
        let now = self.now();
        let event = self.get_jidoka(event_id)?;
        let next = event.resolve(by, notes, now)?;
        if !self.jidoka.update_if(&next, &|stored| !stored.resolved)? {
            return Err(FieldGuardError::IllegalStateTransition {
                entity: "jidoka event",
                id: event.id,
                from: "resolved".into(),
                attempted: "resolve".into(),
            });
        }
        let draft = AuditDraft::new(AuditEntryType::JidokaResolved, by, format!("resolved: {}", event.message))
            .target_opt(event.actuator_id.as_deref().or(event.sensor_id.as_deref()))
            .details(json!({
                "jidoka_event_id": event.id,
                "notes": notes,
            }));
        if let Err(e) = self.chain.append_at(draft, now) {
            error!(event_id = %event.id, error = %e, "audit append failed, reverting resolution");
            self.jidoka.update_if(&event, &|stored| stored.resolved)?;
            return Err(e);
        }
        info!(event_id = %next.id, by, "jidoka resolved");
        self.events.publish(Event::JidokaResolved {
            event_id: next.id.clone(),
            resolved_by: by.to_string(),
        });
        Ok(next)
    }

    pub fn get_jidoka(&self, event_id: &str) -> Result<JidokaEvent> {
        self.jidoka.get(event_id)?.ok_or_else(|| FieldGuardError::NotFound {
            entity: "jidoka event",
            id: event_id.to_string(),
        })
    }

    pub fn list_jidoka(&self, unresolved_only: bool) -> Result<Vec<JidokaEvent>> {
        Ok(self
            .jidoka
            .list()?
            .into_iter()
            .filter(|e| !unresolved_only || !e.resolved)
            .collect())
    }

    // ── Rollback ───────────────────────────────────────────────

    /// Plan for an action or event. Generated once per origin; later calls
    /// return the stored plan.
    pub fn generate_rollback(&self, source: RollbackSource) -> Result<RollbackPlan> {
        let _guard = self.rollback_lock.lock();
        let origin = match &source {
            RollbackSource::Action(id) | RollbackSource::JidokaEvent(id) => id.clone(),
        };
        if let Some(existing) = self
            .rollbacks
            .list()?
            .into_iter()
            .find(|p| p.original_action_id == origin)
        {
            return Ok(existing);
        }

        let now = self.now();
        let (action_type, ctx) = match source {
            RollbackSource::Action(id) => {
                let request = self.load_approval(&id)?;
                let failed: Vec<String> = guardrail::failed(&request.guardrail_checks)
                    .into_iter()
                    .map(|c| c.message.clone())
                    .collect();
                let trigger_conditions = if failed.is_empty() {
                    vec![format!("post-hoc review of {} action", request.status)]
                } else {
                    failed
                };
                (request.action_type, RollbackContext {
                    original_action_id: request.id,
                    original_action: request.proposed_action,
                    target_id: request.target_id,
                    trigger_conditions,
                    severity: None,
                })
            }
            RollbackSource::JidokaEvent(id) => {
                let event = self.get_jidoka(&id)?;
                (action_type_for(event.trigger_kind), RollbackContext {
                    original_action_id: event.id,
                    original_action: event.message.clone(),
                    target_id: event.actuator_id.or(event.sensor_id),
                    trigger_conditions: vec![event.message],
                    severity: Some(event.severity),
                })
            }
        };
        let plan = rollback::generate(action_type, ctx, now);

        self.chain.append_at(
            AuditDraft::new(AuditEntryType::SystemEvent, SYSTEM_ACTOR, "rollback_plan_generated")
                .details(json!({ "plan": plan })),
            now,
        )?;
        self.rollbacks.insert(&plan)?;
        info!(
            plan_id = %plan.id,
            origin = %plan.original_action_id,
            priority = ?plan.priority,
            total_minutes = plan.estimated_total_minutes,
            "rollback plan generated"
        );
        self.events.publish(Event::RollbackGenerated {
            plan_id: plan.id.clone(),
            original_action_id: plan.original_action_id.clone(),
        });
        Ok(plan)
    }

    pub fn get_rollback(&self, plan_id: &str) -> Result<RollbackPlan> {
        self.rollbacks.get(plan_id)?.ok_or_else(|| FieldGuardError::NotFound {
            entity: "rollback plan",
            id: plan_id.to_string(),
        })
    }

    pub fn mark_rollback_executed(&self, plan_id: &str, actor: &str) -> Result<RollbackPlan> {
        let now = self.now();
        let plan = self.get_rollback(plan_id)?;
        let next = plan.mark_executed(now)?;
        if !self.rollbacks.update_if(&next, &|stored| !stored.executed)? {
            return Err(FieldGuardError::IllegalStateTransition {
                entity: "rollback plan",
                id: plan.id,
                from: "executed".into(),
                attempted: "mark executed".into(),
            });
        }
        let draft = AuditDraft::new(AuditEntryType::SystemEvent, actor, "rollback_plan_executed").details(json!({
            "plan_id": plan.id,
            "original_action_id": plan.original_action_id,
        }));
        if let Err(e) = self.chain.append_at(draft, now) {
            error!(plan_id = %plan.id, error = %e, "audit append failed, reverting rollback execution");
            self.rollbacks.update_if(&plan, &|stored| stored.executed)?;
            return Err(e);
        }
        info!(plan_id = %next.id, actor, "rollback plan executed");
        Ok(next)
    }
}

fn action_type_for(kind: TriggerKind) -> ActionType {
    match kind {
        TriggerKind::Overwatering | TriggerKind::Underwatering | TriggerKind::LeakDetected | TriggerKind::Frost => {
            ActionType::Water
        }
        TriggerKind::EcSpike => ActionType::Fertilize,
        TriggerKind::HeatStress => ActionType::Ventilate,
        TriggerKind::LowBattery | TriggerKind::ManualStop => ActionType::Other,
    }
}

/// Describe what part of the farm `event` stops for this zone/target, if any.
fn stop_scope(event: &JidokaEvent, sensor_ids: &[String], target_id: Option<&str>) -> Option<String> {
    match (&event.sensor_id, &event.actuator_id) {
        (None, None) => Some("all actuators".into()),
        (sensor, actuator) => {
            if let Some(s) = sensor.as_ref().filter(|s| sensor_ids.contains(s)) {
                return Some(format!("sensor {s}"));
            }
            actuator
                .as_deref()
                .filter(|a| Some(*a) == target_id)
                .map(|a| format!("actuator {a}"))
        }
    }
}

fn covers(event: &JidokaEvent, request: &ApprovalRequest) -> bool {
    stop_scope(event, &request.parameters.sensor_ids, request.target_id.as_deref()).is_some()
}
