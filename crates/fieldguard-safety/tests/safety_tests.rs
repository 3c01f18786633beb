#[cfg(test)]
mod tests {
    // ── Shared fixtures ────────────────────────────────────────

    mod support {
        use chrono::{DateTime, Duration, TimeZone, Utc};
        use fieldguard_config::FieldGuardConfig;
        use fieldguard_core::{ReadingType, SensorReading};
        use fieldguard_safety::{
            ActionParams, ActionProposal, ActionType, AutomationLevel, Clock, SafetyGate, SafetyStores,
        };
        use parking_lot::Mutex;
        use std::sync::Arc;

        pub fn start() -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap()
        }

        /// A clock the test can move forward.
        #[derive(Clone)]
        pub struct TestClock(Arc<Mutex<DateTime<Utc>>>);

        impl TestClock {
            pub fn new() -> Self {
                Self(Arc::new(Mutex::new(start())))
            }

            pub fn now(&self) -> DateTime<Utc> {
                *self.0.lock()
            }

            pub fn advance(&self, minutes: i64) {
                *self.0.lock() += Duration::minutes(minutes);
            }

            pub fn clock(&self) -> Clock {
                let inner = self.0.clone();
                Arc::new(move || *inner.lock())
            }
        }

        pub fn config(level: u8) -> FieldGuardConfig {
            let mut config = FieldGuardConfig::default();
            config.safety.automation_level = level;
            config
        }

        pub fn gate_with(config: &FieldGuardConfig, stores: SafetyStores) -> (SafetyGate, TestClock) {
            let clock = TestClock::new();
            let gate = SafetyGate::new(config, stores).with_clock(clock.clock());
            (gate, clock)
        }

        pub fn gate(level: u8) -> (SafetyGate, TestClock) {
            gate_with(&config(level), SafetyStores::in_memory())
        }

        pub fn water(level: u8, gallons: f64) -> ActionProposal {
            ActionProposal::new(ActionType::Water, "Water zone A", AutomationLevel::from_u8(level))
                .target("zone-a", Some("Zone A"))
                .reason("soil drying out")
                .params(ActionParams {
                    water_gallons: Some(gallons),
                    sensor_ids: vec!["s1".into()],
                    ..Default::default()
                })
                .confidence(0.9)
        }

        pub fn reading(clock: &TestClock, reading_type: ReadingType, value: f64, unit: &str) -> SensorReading {
            SensorReading::new("s1", reading_type, value, unit).at(clock.now())
        }

        pub fn moisture(gate: &SafetyGate, clock: &TestClock, value: f64) {
            gate.report_reading(&reading(clock, ReadingType::SoilMoisture, value, "%"))
                .unwrap();
        }
    }

    // ── Automation levels ──────────────────────────────────────

    mod level {
        use fieldguard_safety::AutomationLevel;

        #[test]
        fn test_from_u8_clamps() {
            assert_eq!(AutomationLevel::from_u8(0), AutomationLevel::Observe);
            assert_eq!(AutomationLevel::from_u8(2), AutomationLevel::Supervised);
            assert_eq!(AutomationLevel::from_u8(4), AutomationLevel::Autonomous);
            assert_eq!(AutomationLevel::from_u8(9), AutomationLevel::Autonomous);
        }

        #[test]
        fn test_ordering_and_actuation() {
            assert!(AutomationLevel::Observe < AutomationLevel::Assist);
            assert!(AutomationLevel::Trusted < AutomationLevel::Autonomous);
            assert!(!AutomationLevel::Assist.allows_actuation());
            assert!(AutomationLevel::Supervised.allows_actuation());
        }

        #[test]
        fn test_display() {
            assert_eq!(AutomationLevel::Trusted.to_string(), "L3 (Trusted)");
        }

        #[test]
        fn test_serde_as_number() {
            let json = serde_json::to_string(&AutomationLevel::Supervised).unwrap();
            assert_eq!(json, "2");
            let back: AutomationLevel = serde_json::from_str("7").unwrap();
            assert_eq!(back, AutomationLevel::Autonomous);
        }
    }

    // ── Guardrails ─────────────────────────────────────────────

    mod guardrail {
        use fieldguard_core::GuardrailKind;
        use fieldguard_safety::guardrail::{all_pass, evaluate, failed};
        use fieldguard_safety::{AutomationLevel, GuardrailConfig, ObservedState};

        fn water(gallons: f64) -> ObservedState {
            ObservedState {
                proposed_water_gallons: Some(gallons),
                ..Default::default()
            }
        }

        #[test]
        fn test_observe_and_assist_permit_no_water() {
            for level in [AutomationLevel::Observe, AutomationLevel::Assist] {
                let checks = evaluate(level, &water(0.5));
                let fail = failed(&checks);
                assert_eq!(fail.len(), 1);
                assert_eq!(fail[0].kind, GuardrailKind::MaxWaterPerAction);
            }
        }

        #[test]
        fn test_zero_gallon_action_passes_locked_ceiling() {
            let checks = evaluate(AutomationLevel::Observe, &water(0.0));
            assert!(all_pass(&checks));
        }

        #[test]
        fn test_unassessed_inputs_produce_no_checks() {
            let checks = evaluate(AutomationLevel::Supervised, &ObservedState::default());
            assert!(checks.is_empty());
            assert!(all_pass(&checks));
        }

        #[test]
        fn test_moisture_ceiling_message() {
            let observed = ObservedState {
                moisture_percent: Some(75.0),
                ..Default::default()
            };
            let checks = evaluate(AutomationLevel::Supervised, &observed);
            let ceiling = checks
                .iter()
                .find(|c| c.kind == GuardrailKind::MoistureCeiling)
                .unwrap();
            assert!(!ceiling.passed);
            assert!(ceiling.message.contains("do not water"));
            assert_eq!(ceiling.current_value, Some(75.0));
            assert_eq!(ceiling.limit, Some(70.0));
        }

        #[test]
        fn test_ec_ceiling_message() {
            let observed = ObservedState {
                ec_ms_cm: Some(3.2),
                ..Default::default()
            };
            let checks = evaluate(AutomationLevel::Supervised, &observed);
            assert!(checks[0].message.contains("do not fertilize"));
            assert!(all_pass(&evaluate(AutomationLevel::Trusted, &observed)));
        }

        #[test]
        fn test_daily_total_includes_proposed() {
            let observed = ObservedState {
                proposed_water_gallons: Some(40.0),
                water_used_today_gallons: Some(170.0),
                ..Default::default()
            };
            let checks = evaluate(AutomationLevel::Supervised, &observed);
            let daily = checks
                .iter()
                .find(|c| c.kind == GuardrailKind::MaxDailyWater)
                .unwrap();
            assert!(!daily.passed);
            assert_eq!(daily.current_value, Some(210.0));
        }

        #[test]
        fn test_interval_and_consecutive() {
            let observed = ObservedState {
                minutes_since_last_action: Some(90.0),
                consecutive_actions_today: Some(3),
                ..Default::default()
            };
            let l2 = evaluate(AutomationLevel::Supervised, &observed);
            assert_eq!(failed(&l2).len(), 2);
            let l3 = evaluate(AutomationLevel::Trusted, &observed);
            let fail = failed(&l3);
            assert_eq!(fail.len(), 1);
            assert_eq!(fail[0].kind, GuardrailKind::MinWateringInterval);
        }

        #[test]
        fn test_missing_sensor_reading_fails() {
            let observed = ObservedState {
                has_sensor_reading: Some(false),
                ..Default::default()
            };
            let checks = evaluate(AutomationLevel::Autonomous, &observed);
            assert_eq!(checks[0].kind, GuardrailKind::SensorReadingRequired);
            assert!(!checks[0].passed);
        }

        #[test]
        fn test_higher_levels_never_stricter() {
            let mut grid = Vec::new();
            for water in [0.0, 30.0, 60.0, 120.0] {
                for used in [0.0, 150.0, 300.0] {
                    for minutes in [None, Some(90.0), Some(300.0)] {
                        for count in [0, 2, 4] {
                            for moisture in [12.0, 18.0, 50.0, 72.0, 78.0] {
                                for temp in [34.5, 36.0, 98.0] {
                                    grid.push(ObservedState {
                                        proposed_water_gallons: Some(water),
                                        water_used_today_gallons: Some(used),
                                        minutes_since_last_action: minutes,
                                        consecutive_actions_today: Some(count),
                                        has_sensor_reading: Some(true),
                                        moisture_percent: Some(moisture),
                                        ec_ms_cm: Some(3.2),
                                        temp_f: Some(temp),
                                    });
                                }
                            }
                        }
                    }
                }
            }
            let pairs = [
                (AutomationLevel::Supervised, AutomationLevel::Trusted),
                (AutomationLevel::Trusted, AutomationLevel::Autonomous),
            ];
            for (lower, higher) in pairs {
                for observed in &grid {
                    if all_pass(&evaluate(lower, observed)) {
                        assert!(
                            all_pass(&evaluate(higher, observed)),
                            "{higher} rejected {observed:?} accepted by {lower}"
                        );
                    }
                }
            }
        }

        #[test]
        fn test_level_table() {
            let l2 = GuardrailConfig::for_level(AutomationLevel::Supervised);
            assert_eq!(l2.max_water_per_action_gallons, 50.0);
            assert_eq!(l2.max_consecutive_actions, 3);
            let l4 = GuardrailConfig::for_level(AutomationLevel::Autonomous);
            assert_eq!(l4.max_daily_water_gallons, 800.0);
            assert_eq!(
                GuardrailConfig::for_level(AutomationLevel::Observe).max_water_per_action_gallons,
                0.0
            );
        }
    }

    // ── Approval state machine ─────────────────────────────────

    mod approval {
        use super::support::start;
        use chrono::Duration;
        use fieldguard_core::FieldGuardError;
        use fieldguard_safety::{
            ActionType, ApprovalPolicy, ApprovalRequest, ApprovalStatus, AutomationLevel, Decision, NewApproval,
        };

        fn new_approval() -> NewApproval {
            NewApproval {
                action_type: ActionType::Water,
                target_id: Some("zone-a".into()),
                target_name: None,
                proposed_action: "Water zone A".into(),
                reason: "dry".into(),
                ai_confidence: Some(0.8),
                sources_used: vec!["forecast".into()],
                parameters: Default::default(),
            }
        }

        fn pending(level: AutomationLevel) -> ApprovalRequest {
            ApprovalRequest::create(new_approval(), level, vec![], start()).unwrap()
        }

        #[test]
        fn test_policy_table() {
            let l2 = ApprovalPolicy::for_level(AutomationLevel::Supervised);
            assert!(l2.requires_approval);
            assert_eq!(l2.expiration_minutes, 60);
            assert!(!l2.auto_approve_if_guardrails_pass);
            let l3 = ApprovalPolicy::for_level(AutomationLevel::Trusted);
            assert!(l3.auto_approve_if_guardrails_pass);
            assert_eq!(l3.expiration_minutes, 30);
            assert!(!ApprovalPolicy::for_level(AutomationLevel::Assist).grantable());
            assert!(!ApprovalPolicy::for_level(AutomationLevel::Autonomous).notify_on_expiration);
        }

        #[test]
        fn test_create_stamps_window() {
            let r = pending(AutomationLevel::Supervised);
            assert_eq!(r.status, ApprovalStatus::Pending);
            assert_eq!(r.expires_at - r.created_at, Duration::minutes(60));
        }

        #[test]
        fn test_create_rejects_bad_input() {
            let mut bad = new_approval();
            bad.ai_confidence = Some(1.5);
            let err = ApprovalRequest::create(bad, AutomationLevel::Supervised, vec![], start()).unwrap_err();
            assert!(matches!(err, FieldGuardError::InvalidInput(_)));

            let mut empty = new_approval();
            empty.proposed_action = "  ".into();
            assert!(ApprovalRequest::create(empty, AutomationLevel::Supervised, vec![], start()).is_err());
        }

        #[test]
        fn test_double_approve_is_illegal() {
            let r = pending(AutomationLevel::Supervised);
            let approved = r.decide(Decision::Approve, "alice", None, start()).unwrap();
            assert_eq!(approved.status, ApprovalStatus::Approved);
            assert_eq!(approved.approved_by.as_deref(), Some("alice"));
            let err = approved
                .decide(Decision::Approve, "bob", None, start())
                .unwrap_err();
            assert!(matches!(err, FieldGuardError::IllegalStateTransition { .. }));
        }

        #[test]
        fn test_reject_records_reason() {
            let r = pending(AutomationLevel::Supervised);
            let rejected = r
                .decide(Decision::Reject, "alice", Some("rain forecast"), start())
                .unwrap();
            assert_eq!(rejected.status, ApprovalStatus::Rejected);
            assert_eq!(rejected.rejection_reason.as_deref(), Some("rain forecast"));
            assert!(rejected.status.is_terminal());
        }

        #[test]
        fn test_decide_after_window_is_expired() {
            let r = pending(AutomationLevel::Supervised);
            let late = start() + Duration::minutes(61);
            assert!(r.is_expired(late));
            let err = r.decide(Decision::Approve, "alice", None, late).unwrap_err();
            assert!(matches!(err, FieldGuardError::ExpiredRequest { .. }));
            assert!(r.decide(Decision::Approve, "alice", None, start() + Duration::minutes(60)).is_ok());
        }

        #[test]
        fn test_zero_window_is_expired_at_creation() {
            let r = pending(AutomationLevel::Observe);
            assert!(r.is_expired(start()));
            assert_eq!(r.expire(start()).unwrap().status, ApprovalStatus::Expired);
        }

        #[test]
        fn test_expire_requires_closed_window() {
            let r = pending(AutomationLevel::Supervised);
            assert!(r.expire(start()).is_err());
        }

        #[test]
        fn test_cancel_only_from_pending() {
            let r = pending(AutomationLevel::Supervised);
            let cancelled = r.cancel("alice", Some("superseded"), start()).unwrap();
            assert_eq!(cancelled.status, ApprovalStatus::Cancelled);
            assert_eq!(cancelled.cancellation_reason.as_deref(), Some("superseded"));
            assert!(cancelled.rejected_by.is_none());
            assert!(cancelled.rejection_reason.is_none());
            assert!(cancelled.cancel("alice", None, start()).is_err());
        }

        #[test]
        fn test_violation_reject_ignores_window() {
            let r = pending(AutomationLevel::Observe);
            let rejected = r.reject_violation("system", start()).unwrap();
            assert_eq!(rejected.status, ApprovalStatus::Rejected);
            assert_eq!(rejected.rejected_by.as_deref(), Some("system"));
        }

        #[test]
        fn test_record_execution_once() {
            let r = pending(AutomationLevel::Supervised);
            assert!(r.record_execution("ok", start()).is_err());
            let approved = r.decide(Decision::Approve, "alice", None, start()).unwrap();
            let executed = approved.record_execution("ok", start()).unwrap();
            assert!(executed.executed_at.is_some());
            let err = executed.record_execution("again", start()).unwrap_err();
            assert!(err.is_illegal_transition());
        }

        #[test]
        fn test_status_parse() {
            assert_eq!("expired".parse::<ApprovalStatus>().unwrap(), ApprovalStatus::Expired);
            assert!("done".parse::<ApprovalStatus>().is_err());
        }
    }

    // ── Audit chain ────────────────────────────────────────────

    mod audit {
        use fieldguard_core::FieldGuardError;
        use fieldguard_safety::audit::{chain_state, parse_jsonl, query, verify};
        use fieldguard_safety::{
            AuditChain, AuditDraft, AuditEntryType, AuditQuery, EntrySigner, GENESIS_HASH, MemoryAuditStore,
        };
        use std::sync::Arc;

        fn chain_of(n: usize) -> AuditChain {
            let chain = AuditChain::new(Arc::new(MemoryAuditStore::new()));
            for i in 0..n {
                chain
                    .append(AuditDraft::new(AuditEntryType::SystemEvent, "system", format!("Event {i}")))
                    .unwrap();
            }
            chain
        }

        #[test]
        fn test_three_events_link() {
            let chain = chain_of(3);
            let entries = chain.entries().unwrap();
            assert_eq!(entries.len(), 3);
            assert_eq!(entries[0].previous_hash, GENESIS_HASH);
            assert_eq!(entries[2].previous_hash, entries[1].hash);
            assert_eq!(entries[2].action, "Event 2");

            let state = chain.state().unwrap();
            assert!(state.chain_valid);
            assert_eq!(state.entry_count, 3);
            assert_eq!(state.last_hash, entries[2].hash);
        }

        #[test]
        fn test_empty_chain_state() {
            let chain = chain_of(0);
            let state = chain.state().unwrap();
            assert_eq!(state.entry_count, 0);
            assert_eq!(state.last_hash, GENESIS_HASH);
            assert!(state.chain_valid);
            assert!(chain.is_empty().unwrap());
        }

        #[test]
        fn test_hash_is_hex_sha256() {
            let chain = chain_of(1);
            let entry = &chain.entries().unwrap()[0];
            assert_eq!(entry.hash.len(), 64);
            assert!(entry.hash.chars().all(|c| c.is_ascii_hexdigit()));
            assert_eq!(entry.compute_hash().unwrap(), entry.hash);
        }

        #[test]
        fn test_any_length_verifies() {
            for n in [0, 1, 2, 17] {
                let chain = chain_of(n);
                assert!(chain.verify().unwrap().valid, "chain of {n} failed");
            }
        }

        #[test]
        fn test_field_mutation_reports_index() {
            let entries = chain_of(6).entries().unwrap();
            for index in 0..entries.len() {
                let mut tampered = entries.clone();
                tampered[index].actor = "mallory".into();
                let result = verify(&tampered);
                assert!(!result.valid);
                assert_eq!(result.invalid_at, Some(index));
            }

            let mut tampered = entries.clone();
            tampered[3].details = Some(serde_json::json!({"gallons": 9000}));
            assert_eq!(verify(&tampered).invalid_at, Some(3));

            let state = chain_state(&tampered);
            assert!(!state.chain_valid);
            assert_eq!(state.invalid_at, Some(3));
        }

        #[test]
        fn test_sub_millisecond_timestamp_shift_reports_index() {
            let mut entries = chain_of(2).entries().unwrap();
            entries[1].timestamp += chrono::Duration::microseconds(500);
            let result = verify(&entries);
            assert!(!result.valid);
            assert_eq!(result.invalid_at, Some(1));
            assert!(result.reason.unwrap().contains("sub-millisecond"));
        }

        #[test]
        fn test_computed_floats_survive_export_import() {
            let source = chain_of(0);
            for secs in 1..200u32 {
                let secs = f64::from(secs);
                source
                    .append(
                        AuditDraft::new(AuditEntryType::ActionProposed, "recommender", "Water zone A")
                            .details(serde_json::json!({"minutes_since_last": secs / 60.0, "daily": 0.1 * secs + 0.2})),
                    )
                    .unwrap();
            }
            let target = chain_of(0);
            assert_eq!(target.import_jsonl(&source.export().unwrap()).unwrap(), 199);
            assert!(target.verify().unwrap().valid);
        }

        #[test]
        fn test_rehashed_entry_breaks_next_link() {
            let mut entries = chain_of(5).entries().unwrap();
            entries[2].action = "rewritten".into();
            entries[2].hash = entries[2].compute_hash().unwrap();
            let result = verify(&entries);
            assert_eq!(result.invalid_at, Some(3));
            assert!(result.reason.unwrap().contains("previous_hash"));
        }

        #[test]
        fn test_first_entry_must_link_to_genesis() {
            let mut entries = chain_of(2).entries().unwrap();
            entries.remove(0);
            let result = verify(&entries);
            assert_eq!(result.invalid_at, Some(0));
            let err = result.into_result().unwrap_err();
            assert!(matches!(err, FieldGuardError::ChainIntegrityViolation { index: 0, .. }));
        }

        #[test]
        fn test_concurrent_appends_stay_linear() {
            let chain = Arc::new(chain_of(0));
            let handles: Vec<_> = (0..8)
                .map(|t| {
                    let chain = chain.clone();
                    std::thread::spawn(move || {
                        for i in 0..25 {
                            chain
                                .append(AuditDraft::new(
                                    AuditEntryType::ManualLog,
                                    format!("worker-{t}"),
                                    format!("note {i}"),
                                ))
                                .unwrap();
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
            assert_eq!(chain.len().unwrap(), 200);
            assert!(chain.verify().unwrap().valid);
        }

        #[test]
        fn test_signatures() {
            let store = Arc::new(MemoryAuditStore::new());
            let signed = AuditChain::new(store.clone()).with_signer(EntrySigner::new(b"field-secret"));
            for i in 0..3 {
                signed
                    .append(AuditDraft::new(AuditEntryType::ManualLog, "alice", format!("note {i}")))
                    .unwrap();
            }
            assert!(signed.entries().unwrap().iter().all(|e| e.signature.is_some()));
            assert!(signed.verify().unwrap().valid);

            let wrong_key = AuditChain::new(store).with_signer(EntrySigner::new(b"other"));
            let result = wrong_key.verify().unwrap();
            assert!(!result.valid);
            assert_eq!(result.invalid_at, Some(0));
        }

        #[test]
        fn test_query_and_summary() {
            let chain = chain_of(4);
            chain
                .append(AuditDraft::new(AuditEntryType::ManualLog, "alice", "walked the rows").target("zone-a"))
                .unwrap();
            let entries = chain.entries().unwrap();

            let last_two = query(&entries, &AuditQuery {
                limit: Some(2),
                ..Default::default()
            });
            assert_eq!(last_two.len(), 2);
            assert_eq!(last_two[0].action, "Event 3");
            assert_eq!(last_two[1].action, "walked the rows");

            let manual = chain
                .list(&AuditQuery {
                    entry_type: Some(AuditEntryType::ManualLog),
                    ..Default::default()
                })
                .unwrap();
            assert_eq!(manual.len(), 1);
            assert_eq!(manual[0].target.as_deref(), Some("zone-a"));

            let summary = fieldguard_safety::audit::summarize(&entries);
            assert_eq!(summary.get("system_event"), Some(&4));
            assert_eq!(summary.get("manual_log"), Some(&1));
        }

        #[test]
        fn test_export_import() {
            let source = chain_of(4);
            let jsonl = source.export().unwrap();
            assert_eq!(jsonl.lines().count(), 4);
            assert_eq!(parse_jsonl(&jsonl).unwrap(), source.entries().unwrap());

            let target = chain_of(0);
            assert_eq!(target.import_jsonl(&jsonl).unwrap(), 4);
            assert_eq!(target.state().unwrap(), source.state().unwrap());

            // Continuing after import links to the imported tail.
            let next = target
                .append(AuditDraft::new(AuditEntryType::SystemEvent, "system", "after import"))
                .unwrap();
            assert_eq!(next.previous_hash, source.state().unwrap().last_hash);
            assert!(target.verify().unwrap().valid);
        }

        #[test]
        fn test_import_rejects_unlinked_batch() {
            let source = chain_of(3);
            let target = chain_of(2);
            let err = target.import_jsonl(&source.export().unwrap()).unwrap_err();
            assert!(matches!(err, FieldGuardError::ChainIntegrityViolation { index: 2, .. }));
            assert_eq!(target.len().unwrap(), 2);
        }

        #[test]
        fn test_import_rejects_tampered_batch() {
            let source = chain_of(3);
            let mut entries = source.entries().unwrap();
            entries[1].action = "edited".into();
            let target = chain_of(0);
            assert!(target.import(&entries).is_err());
            assert!(target.is_empty().unwrap());
        }

        #[test]
        fn test_entry_type_roundtrip() {
            for t in AuditEntryType::ALL {
                assert_eq!(t.as_str().parse::<AuditEntryType>().unwrap(), t);
            }
        }
    }

    // ── Jidoka ─────────────────────────────────────────────────

    mod jidoka {
        use super::support::start;
        use fieldguard_config::{JidokaConfig, TriggerThreshold};
        use fieldguard_core::{FieldGuardError, ReadingType};
        use fieldguard_safety::jidoka::{EventSource, check, create_event, recommended_actions};
        use fieldguard_safety::{Severity, TriggerKind};

        #[test]
        fn test_frost_below_freeze_is_emergency() {
            let result = check(TriggerKind::Frost, 30.0, &TriggerThreshold::new(35.0, 3.0));
            assert!(result.triggered);
            assert_eq!(result.severity, Some(Severity::Emergency));
        }

        #[test]
        fn test_frost_above_freeze_is_critical() {
            let result = check(TriggerKind::Frost, 33.0, &TriggerThreshold::new(35.0, 3.0));
            assert_eq!(result.severity, Some(Severity::Critical));
            assert!(!check(TriggerKind::Frost, 36.0, &TriggerThreshold::new(35.0, 3.0)).triggered);
        }

        #[test]
        fn test_escalation_offset() {
            let t = TriggerThreshold::new(80.0, 10.0);
            assert!(!check(TriggerKind::Overwatering, 80.0, &t).triggered);
            assert_eq!(check(TriggerKind::Overwatering, 85.0, &t).severity, Some(Severity::Warning));
            assert_eq!(check(TriggerKind::Overwatering, 95.0, &t).severity, Some(Severity::Critical));

            let t = TriggerThreshold::new(15.0, 5.0);
            assert_eq!(check(TriggerKind::Underwatering, 12.0, &t).severity, Some(Severity::Warning));
            assert_eq!(check(TriggerKind::Underwatering, 8.0, &t).severity, Some(Severity::Critical));
        }

        #[test]
        fn test_leak_starts_critical() {
            let t = TriggerThreshold::new(10.0, 10.0);
            assert_eq!(check(TriggerKind::LeakDetected, 15.0, &t).severity, Some(Severity::Critical));
            assert_eq!(check(TriggerKind::LeakDetected, 25.0, &t).severity, Some(Severity::Emergency));
        }

        #[test]
        fn test_severity_ordering() {
            assert!(Severity::Warning < Severity::Critical);
            assert!(Severity::Critical < Severity::Emergency);
            assert!(!Severity::Warning.stops_line());
            assert!(Severity::Critical.stops_line());
        }

        #[test]
        fn test_triggers_per_reading() {
            assert_eq!(TriggerKind::for_reading(ReadingType::Temperature), &[
                TriggerKind::Frost,
                TriggerKind::HeatStress
            ]);
            assert!(TriggerKind::for_reading(ReadingType::Humidity).is_empty());
            assert!(TriggerKind::ManualStop.threshold(&JidokaConfig::default()).is_none());
        }

        #[test]
        fn test_every_kind_has_recommendations() {
            for kind in [
                TriggerKind::Overwatering,
                TriggerKind::Underwatering,
                TriggerKind::EcSpike,
                TriggerKind::Frost,
                TriggerKind::HeatStress,
                TriggerKind::LeakDetected,
                TriggerKind::LowBattery,
                TriggerKind::ManualStop,
            ] {
                assert!(!recommended_actions(kind).is_empty(), "{kind}");
            }
        }

        #[test]
        fn test_resolve_once() {
            let event = create_event(
                TriggerKind::Frost,
                Severity::Emergency,
                "frost",
                EventSource {
                    sensor_id: Some("s1".into()),
                    ..Default::default()
                },
                start(),
            );
            assert!(!event.resolved);
            let resolved = event.resolve("alice", Some("covers deployed"), start()).unwrap();
            assert!(resolved.resolved);
            assert_eq!(resolved.resolved_by.as_deref(), Some("alice"));
            let err = resolved.resolve("bob", None, start()).unwrap_err();
            assert!(matches!(err, FieldGuardError::IllegalStateTransition { .. }));
        }
    }

    // ── Rollback ───────────────────────────────────────────────

    mod rollback {
        use super::support::start;
        use fieldguard_safety::rollback::{RollbackContext, generate, total_minutes};
        use fieldguard_safety::{ActionType, RollbackPriority, Severity};

        fn ctx(severity: Option<Severity>) -> RollbackContext {
            RollbackContext {
                original_action_id: "req-1".into(),
                original_action: "Water zone A".into(),
                target_id: Some("valve-3".into()),
                trigger_conditions: vec!["moisture too high".into()],
                severity,
            }
        }

        #[test]
        fn test_total_is_sum_of_steps() {
            for action_type in [ActionType::Water, ActionType::Fertilize, ActionType::Ventilate] {
                let plan = generate(action_type, ctx(None), start());
                let sum: u32 = plan
                    .steps
                    .iter()
                    .map(|s| s.estimated_duration_minutes.unwrap_or(0))
                    .sum();
                assert_eq!(plan.estimated_total_minutes, sum);
                assert_eq!(total_minutes(&plan.steps), sum);
            }
        }

        #[test]
        fn test_watering_template() {
            let plan = generate(ActionType::Water, ctx(None), start());
            assert_eq!(plan.steps.len(), 5);
            assert_eq!(plan.estimated_total_minutes, 1466);
            assert_eq!(plan.steps[2].command.as_deref(), Some("valve.close valve-3"));
            let numbers: Vec<u32> = plan.steps.iter().map(|s| s.step).collect();
            assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        }

        #[test]
        fn test_fertilize_and_generic_totals() {
            assert_eq!(generate(ActionType::Fertilize, ctx(None), start()).estimated_total_minutes, 130);
            assert_eq!(generate(ActionType::Other, ctx(None), start()).estimated_total_minutes, 145);
        }

        #[test]
        fn test_missing_target_uses_zone() {
            let mut c = ctx(None);
            c.target_id = None;
            let plan = generate(ActionType::Water, c, start());
            assert_eq!(plan.steps[0].command.as_deref(), Some("sensors.read zone soil_moisture"));
        }

        #[test]
        fn test_priority_from_severity() {
            let p = |s| generate(ActionType::Water, ctx(s), start()).priority;
            assert_eq!(p(Some(Severity::Emergency)), RollbackPriority::Critical);
            assert_eq!(p(Some(Severity::Critical)), RollbackPriority::High);
            assert_eq!(p(Some(Severity::Warning)), RollbackPriority::Medium);
            assert_eq!(p(None), RollbackPriority::Low);
        }

        #[test]
        fn test_mark_executed_once() {
            let plan = generate(ActionType::Water, ctx(None), start());
            let done = plan.mark_executed(start()).unwrap();
            assert!(done.executed);
            assert!(done.mark_executed(start()).is_err());
        }
    }

    // ── Usage and sensor snapshot ──────────────────────────────

    mod usage {
        use super::support::start;
        use chrono::Duration;
        use fieldguard_core::{ReadingType, SensorReading};
        use fieldguard_safety::{SensorSnapshot, UsageTracker};

        #[test]
        fn test_streak_and_daily_total() {
            let usage = UsageTracker::new();
            let t = start();
            usage.record_action("zone-a", 10.0, false, t);
            usage.record_action("zone-a", 15.0, false, t + Duration::minutes(30));
            let snap = usage.snapshot("zone-a", t + Duration::minutes(90));
            assert_eq!(snap.water_used_today_gallons, 25.0);
            assert_eq!(snap.consecutive_actions_today, 2);
            assert_eq!(snap.minutes_since_last_action, Some(60.0));

            usage.record_action("zone-a", 5.0, true, t + Duration::minutes(100));
            assert_eq!(usage.snapshot("zone-a", t + Duration::minutes(100)).consecutive_actions_today, 0);
        }

        #[test]
        fn test_new_day_resets() {
            let usage = UsageTracker::new();
            usage.record_action("zone-a", 40.0, false, start());
            let tomorrow = start() + Duration::days(1);
            let snap = usage.snapshot("zone-a", tomorrow);
            assert_eq!(snap.water_used_today_gallons, 0.0);
            assert_eq!(snap.consecutive_actions_today, 0);
            assert_eq!(usage.get("zone-a").unwrap().total_water_gallons, 40.0);
        }

        #[test]
        fn test_unknown_target_is_zero() {
            let snap = UsageTracker::new().snapshot("nowhere", start());
            assert_eq!(snap.water_used_today_gallons, 0.0);
            assert!(snap.minutes_since_last_action.is_none());
        }

        #[test]
        fn test_zone_freshness() {
            let snapshot = SensorSnapshot::new();
            let t = start();
            snapshot.update(&SensorReading::new("s1", ReadingType::SoilMoisture, 40.0, "%").at(t));
            snapshot.update(&SensorReading::new("s2", ReadingType::Temperature, 70.0, "F").at(t - Duration::hours(3)));
            let ids = vec!["s1".to_string(), "s2".to_string()];
            let zone = snapshot.zone(&ids, t, Duration::minutes(60));
            assert_eq!(zone.moisture_percent, Some(40.0));
            assert_eq!(zone.temp_f, None);
            assert!(zone.has_fresh_reading);

            let stale = snapshot.zone(&ids, t + Duration::hours(2), Duration::minutes(60));
            assert!(!stale.has_fresh_reading);
        }

        #[test]
        fn test_older_reading_does_not_replace_newer() {
            let snapshot = SensorSnapshot::new();
            let t = start();
            assert!(snapshot.update(&SensorReading::new("s1", ReadingType::SoilEc, 2.0, "mS/cm").at(t)));
            assert!(!snapshot.update(
                &SensorReading::new("s1", ReadingType::SoilEc, 9.0, "mS/cm").at(t - Duration::minutes(5))
            ));
            assert_eq!(snapshot.latest("s1", ReadingType::SoilEc).unwrap().value, 2.0);
        }
    }

    // ── Safety gate ────────────────────────────────────────────

    mod gate {
        use super::support::{config, gate, gate_with, moisture, reading, water};
        use fieldguard_core::{Event, FieldGuardError, GuardrailKind, ReadingType};
        use fieldguard_safety::{
            ActionProposal, ActionType, ApprovalStatus, AuditChain, AuditEntryType, AuditQuery, AutomationLevel,
            Decision, EntrySigner, ExecutionOutcome, MemoryAuditStore, MemoryRecordStore, RollbackPriority,
            RollbackSource, SafetyStores, Severity, TriggerKind,
        };
        use std::sync::Arc;

        fn entry_types(gate: &fieldguard_safety::SafetyGate) -> Vec<AuditEntryType> {
            gate.list_audit(&AuditQuery::default())
                .unwrap()
                .into_iter()
                .map(|e| e.entry_type)
                .collect()
        }

        #[test]
        fn test_trusted_level_auto_approves() {
            let (gate, clock) = gate(4);
            moisture(&gate, &clock, 40.0);
            let mut rx = gate.events().subscribe();

            let request = gate.propose_action(water(3, 20.0)).unwrap();
            assert_eq!(request.status, ApprovalStatus::Approved);
            assert_eq!(request.approved_by.as_deref(), Some("system"));
            assert_eq!(request.automation_level, AutomationLevel::Trusted);
            assert!(request.guardrail_checks.iter().all(|c| c.passed));

            assert_eq!(entry_types(&gate), vec![
                AuditEntryType::ActionProposed,
                AuditEntryType::ActionApproved
            ]);
            assert!(gate.verify_chain().unwrap().valid);

            assert!(matches!(rx.try_recv().unwrap(), Event::ApprovalRequested { .. }));
            match rx.try_recv().unwrap() {
                Event::ApprovalGranted {
                    request_id,
                    approved_by,
                } => {
                    assert_eq!(request_id, request.id);
                    assert_eq!(approved_by, "system");
                }
                other => panic!("unexpected event {other:?}"),
            }
        }

        #[test]
        fn test_supervised_level_waits_for_human() {
            let (gate, clock) = gate(2);
            moisture(&gate, &clock, 40.0);
            let request = gate.propose_action(water(2, 20.0)).unwrap();
            assert_eq!(request.status, ApprovalStatus::Pending);

            let approved = gate
                .decide(&request.id, Decision::Approve, "alice", None)
                .unwrap();
            assert_eq!(approved.status, ApprovalStatus::Approved);

            let err = gate
                .decide(&request.id, Decision::Approve, "bob", None)
                .unwrap_err();
            assert!(matches!(err, FieldGuardError::IllegalStateTransition { .. }));
            assert_eq!(entry_types(&gate).len(), 2);
        }

        #[test]
        fn test_requested_level_is_capped() {
            let (gate, clock) = gate(2);
            moisture(&gate, &clock, 40.0);
            let request = gate.propose_action(water(4, 20.0)).unwrap();
            assert_eq!(request.automation_level, AutomationLevel::Supervised);
            assert_eq!(request.status, ApprovalStatus::Pending);
        }

        #[test]
        fn test_moisture_ceiling_is_policy_violation() {
            let (gate, clock) = gate(2);
            moisture(&gate, &clock, 75.0);
            let err = gate.propose_action(water(2, 20.0)).unwrap_err();
            let FieldGuardError::PolicyViolation { request_id, checks } = err else {
                panic!("expected policy violation, got {err:?}");
            };
            let ceiling = checks
                .iter()
                .find(|c| c.kind == GuardrailKind::MoistureCeiling)
                .unwrap();
            assert!(!ceiling.passed);
            assert!(ceiling.message.contains("do not water"));

            let stored = gate.get_approval(&request_id).unwrap();
            assert_eq!(stored.status, ApprovalStatus::Rejected);
            assert_eq!(stored.rejected_by.as_deref(), Some("system"));
            assert_eq!(entry_types(&gate), vec![
                AuditEntryType::ActionProposed,
                AuditEntryType::ActionRejected
            ]);
        }

        #[test]
        fn test_missing_reading_is_policy_violation() {
            let (gate, _clock) = gate(2);
            let err = gate.propose_action(water(2, 20.0)).unwrap_err();
            match err {
                FieldGuardError::PolicyViolation { checks, .. } => {
                    assert!(checks
                        .iter()
                        .any(|c| c.kind == GuardrailKind::SensorReadingRequired && !c.passed));
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        #[test]
        fn test_observe_level_water_is_rejected() {
            let (gate, clock) = gate(2);
            moisture(&gate, &clock, 40.0);
            let err = gate.propose_action(water(0, 5.0)).unwrap_err();
            let FieldGuardError::PolicyViolation { checks, .. } = err else {
                panic!("expected policy violation");
            };
            assert!(checks
                .iter()
                .any(|c| c.kind == GuardrailKind::MaxWaterPerAction && !c.passed));
        }

        #[test]
        fn test_observe_level_notification_expires_immediately() {
            let (gate, _clock) = gate(2);
            let proposal = ActionProposal::new(ActionType::Notify, "Send frost warning", AutomationLevel::Observe);
            let request = gate.propose_action(proposal).unwrap();
            assert_eq!(request.status, ApprovalStatus::Expired);
            assert!(request.guardrail_checks.is_empty());
            let err = gate
                .decide(&request.id, Decision::Approve, "alice", None)
                .unwrap_err();
            assert!(err.is_illegal_transition());
        }

        #[test]
        fn test_lazy_expiry_on_decide() {
            let (gate, clock) = gate(2);
            moisture(&gate, &clock, 40.0);
            let request = gate.propose_action(water(2, 20.0)).unwrap();
            let mut rx = gate.events().subscribe();

            clock.advance(61);
            let err = gate
                .decide(&request.id, Decision::Approve, "alice", None)
                .unwrap_err();
            assert!(matches!(err, FieldGuardError::ExpiredRequest { .. }));
            assert_eq!(gate.get_approval(&request.id).unwrap().status, ApprovalStatus::Expired);

            let expiries: Vec<_> = gate
                .list_audit(&AuditQuery {
                    entry_type: Some(AuditEntryType::SystemEvent),
                    ..Default::default()
                })
                .unwrap()
                .into_iter()
                .filter(|e| e.action == "approval_expired")
                .collect();
            assert_eq!(expiries.len(), 1);
            assert!(matches!(rx.try_recv().unwrap(), Event::ApprovalExpired { .. }));
        }

        #[test]
        fn test_decide_at_window_edge() {
            let (gate, clock) = gate(2);
            moisture(&gate, &clock, 40.0);
            let request = gate.propose_action(water(2, 20.0)).unwrap();
            clock.advance(60);
            assert!(gate.decide(&request.id, Decision::Reject, "alice", Some("rain")).is_ok());
        }

        #[test]
        fn test_sweep_and_list() {
            let (gate, clock) = gate(2);
            moisture(&gate, &clock, 40.0);
            let first = gate.propose_action(water(2, 20.0)).unwrap();
            clock.advance(30);
            moisture(&gate, &clock, 40.0);
            let second = gate.propose_action(water(2, 10.0)).unwrap();

            clock.advance(40);
            let expired = gate.sweep_expired().unwrap();
            assert_eq!(expired.len(), 1);
            assert_eq!(expired[0].id, first.id);
            assert!(gate.sweep_expired().unwrap().is_empty());

            let pending = gate.list_approvals(Some(ApprovalStatus::Pending), None).unwrap();
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].id, second.id);

            let all = gate.list_approvals(None, None).unwrap();
            assert_eq!(all[0].id, second.id, "newest first");
            assert_eq!(gate.list_approvals(None, Some(1)).unwrap().len(), 1);
        }

        #[test]
        fn test_cancel() {
            let (gate, clock) = gate(2);
            moisture(&gate, &clock, 40.0);
            let request = gate.propose_action(water(2, 20.0)).unwrap();
            let cancelled = gate.cancel(&request.id, "alice", Some("superseded")).unwrap();
            assert_eq!(cancelled.status, ApprovalStatus::Cancelled);
            let err = gate
                .decide(&request.id, Decision::Approve, "alice", None)
                .unwrap_err();
            assert!(matches!(err, FieldGuardError::IllegalStateTransition { .. }));
        }

        #[test]
        fn test_unknown_request() {
            let (gate, _clock) = gate(2);
            let err = gate
                .decide("missing", Decision::Approve, "alice", None)
                .unwrap_err();
            assert!(matches!(err, FieldGuardError::NotFound { .. }));
        }

        #[test]
        fn test_record_execution_feeds_usage() {
            let (gate, clock) = gate(4);
            moisture(&gate, &clock, 40.0);
            let request = gate.propose_action(water(3, 20.0)).unwrap();

            let executed = gate
                .record_execution(&request.id, ExecutionOutcome {
                    success: true,
                    retry_count: 1,
                    ..Default::default()
                })
                .unwrap();
            assert!(executed.executed_at.is_some());
            assert_eq!(executed.execution_result.as_deref(), Some("succeeded"));

            let usage = gate.usage().get("zone-a").unwrap();
            assert_eq!(usage.water_today_gallons, 20.0);
            assert_eq!(usage.consecutive_today, 1);

            let last = gate.list_audit(&AuditQuery::default()).unwrap().pop().unwrap();
            assert_eq!(last.entry_type, AuditEntryType::ActionExecuted);
            assert_eq!(last.details.unwrap()["retry_count"], 1);

            let err = gate
                .record_execution(&request.id, ExecutionOutcome {
                    success: true,
                    ..Default::default()
                })
                .unwrap_err();
            assert!(err.is_illegal_transition());
        }

        #[test]
        fn test_interval_guardrail_after_execution() {
            let (gate, clock) = gate(4);
            moisture(&gate, &clock, 40.0);
            let request = gate.propose_action(water(3, 20.0)).unwrap();
            gate.record_execution(&request.id, ExecutionOutcome {
                success: true,
                ..Default::default()
            })
            .unwrap();

            clock.advance(30);
            moisture(&gate, &clock, 40.0);
            let err = gate.propose_action(water(3, 20.0)).unwrap_err();
            let FieldGuardError::PolicyViolation { checks, .. } = err else {
                panic!("expected policy violation");
            };
            assert!(checks
                .iter()
                .any(|c| c.kind == GuardrailKind::MinWateringInterval && !c.passed));
        }

        #[test]
        fn test_failed_execution() {
            let (gate, clock) = gate(2);
            moisture(&gate, &clock, 40.0);
            let request = gate.propose_action(water(2, 20.0)).unwrap();
            assert!(gate
                .record_execution(&request.id, ExecutionOutcome::default())
                .is_err());

            gate.decide(&request.id, Decision::Approve, "alice", None)
                .unwrap();
            let failed = gate
                .record_execution(&request.id, ExecutionOutcome {
                    success: false,
                    retry_count: 3,
                    error: Some("valve stuck".into()),
                    result: None,
                })
                .unwrap();
            assert_eq!(failed.execution_result.as_deref(), Some("failed: valve stuck"));
            assert!(gate.usage().get("zone-a").is_none());
            assert!(entry_types(&gate).contains(&AuditEntryType::ActionFailed));
        }

        #[test]
        fn test_leak_stops_the_line() {
            let (gate, clock) = gate(2);
            moisture(&gate, &clock, 40.0);
            let request = gate.propose_action(water(2, 20.0)).unwrap();

            let fired = gate
                .report_reading(&reading(&clock, ReadingType::FlowRate, 15.0, "gal/min"))
                .unwrap();
            assert_eq!(fired.len(), 1);
            let event = &fired[0];
            assert_eq!(event.trigger_kind, TriggerKind::LeakDetected);
            assert_eq!(event.severity, Severity::Critical);
            assert!(event
                .actions_taken
                .contains(&format!("cancelled pending approval {}", request.id)));
            assert!(event.actions_taken.iter().any(|a| a.starts_with("rollback plan")));

            let cancelled = gate.get_approval(&request.id).unwrap();
            assert_eq!(cancelled.status, ApprovalStatus::Cancelled);
            assert_eq!(cancelled.cancelled_by.as_deref(), Some("system"));

            let err = gate.propose_action(water(2, 20.0)).unwrap_err();
            match err {
                FieldGuardError::LineStopped { event_id, scope } => {
                    assert_eq!(event_id, event.id);
                    assert_eq!(scope, "sensor s1");
                }
                other => panic!("unexpected {other:?}"),
            }

            // Same reading again does not raise a duplicate.
            assert!(gate
                .report_reading(&reading(&clock, ReadingType::FlowRate, 15.0, "gal/min"))
                .unwrap()
                .is_empty());

            gate.resolve_jidoka(&event.id, "alice", Some("fitting replaced"))
                .unwrap();
            assert!(gate.list_jidoka(true).unwrap().is_empty());
            assert!(gate.propose_action(water(2, 20.0)).is_ok());
            assert!(gate.verify_chain().unwrap().valid);

            let err = gate.resolve_jidoka(&event.id, "bob", None).unwrap_err();
            assert!(matches!(err, FieldGuardError::IllegalStateTransition { .. }));
        }

        #[test]
        fn test_warning_does_not_stop_the_line() {
            let (gate, clock) = gate(2);
            let fired = gate
                .report_reading(&reading(&clock, ReadingType::SoilMoisture, 40.0, "%").with_battery(15.0))
                .unwrap();
            assert_eq!(fired.len(), 1);
            assert_eq!(fired[0].trigger_kind, TriggerKind::LowBattery);
            assert_eq!(fired[0].severity, Severity::Warning);
            assert_eq!(gate.propose_action(water(2, 20.0)).unwrap().status, ApprovalStatus::Pending);
        }

        #[test]
        fn test_frost_generates_critical_rollback() {
            let (gate, clock) = gate(2);
            let fired = gate
                .report_reading(&reading(&clock, ReadingType::Temperature, 30.0, "F"))
                .unwrap();
            assert_eq!(fired.len(), 1);
            assert_eq!(fired[0].severity, Severity::Emergency);

            let plan = gate
                .generate_rollback(RollbackSource::JidokaEvent(fired[0].id.clone()))
                .unwrap();
            assert_eq!(plan.priority, RollbackPriority::Critical);
            assert_eq!(plan.estimated_total_minutes, 1466);
            assert_eq!(plan.original_action_id, fired[0].id);
        }

        #[test]
        fn test_manual_stop_is_global() {
            let (gate, clock) = gate(2);
            moisture(&gate, &clock, 40.0);
            let event = gate
                .manual_stop("alice", None, None, "maintenance on main line")
                .unwrap();
            assert_eq!(event.trigger_kind, TriggerKind::ManualStop);
            assert_eq!(event.severity, Severity::Critical);

            let other_zone = water(2, 5.0).target("zone-b", None);
            let err = gate.propose_action(other_zone).unwrap_err();
            assert!(matches!(err, FieldGuardError::LineStopped { ref scope, .. } if scope == "all actuators"));

            let plan = gate
                .generate_rollback(RollbackSource::JidokaEvent(event.id.clone()))
                .unwrap();
            assert_eq!(plan.priority, RollbackPriority::High);
            assert_eq!(plan.estimated_total_minutes, 145);
        }

        #[test]
        fn test_actuator_stop_covers_target_only() {
            let (gate, clock) = gate(2);
            moisture(&gate, &clock, 40.0);
            gate.manual_stop("alice", None, Some("zone-a"), "valve replacement")
                .unwrap();
            assert!(gate.propose_action(water(2, 5.0)).is_err());
            let elsewhere = water(2, 5.0).target("zone-b", None);
            assert!(gate.propose_action(elsewhere).is_ok());
        }

        #[test]
        fn test_approve_refused_while_line_stopped() {
            use fieldguard_safety::jidoka::{EventSource, create_event};
            use fieldguard_safety::{JidokaEvent, RecordStore};

            let jidoka: Arc<MemoryRecordStore<JidokaEvent>> = Arc::new(MemoryRecordStore::new());
            let stores = SafetyStores {
                jidoka: jidoka.clone(),
                ..SafetyStores::in_memory()
            };
            let (gate, clock) = gate_with(&config(2), stores);
            moisture(&gate, &clock, 40.0);
            let request = gate.propose_action(water(2, 20.0)).unwrap();
            assert_eq!(request.status, ApprovalStatus::Pending);

            // A stop that landed after the proposal cleared its check.
            let event = create_event(
                TriggerKind::LeakDetected,
                Severity::Critical,
                "flow far above normal",
                EventSource {
                    sensor_id: Some("s1".into()),
                    actuator_id: None,
                    current_value: Some(30.0),
                    threshold: Some(10.0),
                },
                clock.now(),
            );
            jidoka.insert(&event).unwrap();

            let err = gate
                .decide(&request.id, Decision::Approve, "alice", None)
                .unwrap_err();
            assert!(matches!(err, FieldGuardError::LineStopped { ref event_id, .. } if *event_id == event.id));
            let stored = gate.get_approval(&request.id).unwrap();
            assert_eq!(stored.status, ApprovalStatus::Cancelled);
            assert!(stored.approved_by.is_none());

            // Rejection is still a legal answer for other pending requests in the zone.
            gate.resolve_jidoka(&event.id, "alice", None).unwrap();
            let next = gate.propose_action(water(2, 20.0)).unwrap();
            jidoka.insert(&create_event(
                TriggerKind::ManualStop,
                Severity::Critical,
                "hold",
                EventSource {
                    sensor_id: None,
                    actuator_id: None,
                    current_value: None,
                    threshold: None,
                },
                clock.now(),
            ))
            .unwrap();
            let rejected = gate.decide(&next.id, Decision::Reject, "alice", None).unwrap();
            assert_eq!(rejected.status, ApprovalStatus::Rejected);
            assert!(gate.verify_chain().unwrap().valid);
        }

        #[test]
        fn test_stop_resolved_mid_fire_keeps_resolution() {
            use fieldguard_core::Result;
            use fieldguard_safety::{JidokaEvent, Record, RecordStore};
            use std::sync::atomic::{AtomicBool, Ordering};

            /// Resolves the stored event just before the gate's first guarded update.
            struct ResolvedConcurrently {
                inner: MemoryRecordStore<JidokaEvent>,
                done: AtomicBool,
            }

            impl RecordStore<JidokaEvent> for ResolvedConcurrently {
                fn insert(&self, record: &JidokaEvent) -> Result<()> {
                    self.inner.insert(record)
                }
                fn get(&self, id: &str) -> Result<Option<JidokaEvent>> {
                    self.inner.get(id)
                }
                fn update_if(&self, updated: &JidokaEvent, guard: &dyn Fn(&JidokaEvent) -> bool) -> Result<bool> {
                    if !self.done.swap(true, Ordering::SeqCst) {
                        if let Some(stored) = self.inner.get(updated.id())? {
                            let resolved = stored.resolve("bob", Some("valve closed"), stored.timestamp)?;
                            self.inner.update_if(&resolved, &|_: &JidokaEvent| true)?;
                        }
                    }
                    self.inner.update_if(updated, guard)
                }
                fn list(&self) -> Result<Vec<JidokaEvent>> {
                    self.inner.list()
                }
            }

            let stores = SafetyStores {
                jidoka: Arc::new(ResolvedConcurrently {
                    inner: MemoryRecordStore::new(),
                    done: AtomicBool::new(false),
                }),
                ..SafetyStores::in_memory()
            };
            let (gate, _clock) = gate_with(&config(2), stores);
            let event = gate.manual_stop("alice", None, None, "pump inspection").unwrap();

            assert!(event.resolved);
            assert_eq!(event.resolved_by.as_deref(), Some("bob"));
            assert!(event.actions_taken.iter().any(|a| a.starts_with("rollback plan")));
            assert_eq!(gate.get_jidoka(&event.id).unwrap(), event);
        }

        #[test]
        fn test_rollback_is_idempotent() {
            let (gate, clock) = gate(2);
            moisture(&gate, &clock, 75.0);
            let FieldGuardError::PolicyViolation { request_id, .. } = gate.propose_action(water(2, 20.0)).unwrap_err()
            else {
                panic!("expected policy violation");
            };

            let first = gate
                .generate_rollback(RollbackSource::Action(request_id.clone()))
                .unwrap();
            let second = gate
                .generate_rollback(RollbackSource::Action(request_id.clone()))
                .unwrap();
            assert_eq!(first.id, second.id);
            assert_eq!(first.priority, RollbackPriority::Low);
            assert!(first
                .trigger_conditions
                .iter()
                .any(|c| c.contains("do not water")));

            let generated = gate
                .list_audit(&AuditQuery::default())
                .unwrap()
                .into_iter()
                .filter(|e| e.action == "rollback_plan_generated")
                .count();
            assert_eq!(generated, 1);

            let done = gate.mark_rollback_executed(&first.id, "alice").unwrap();
            assert!(done.executed);
            assert!(gate.mark_rollback_executed(&first.id, "alice").is_err());
        }

        #[test]
        fn test_rollback_for_unknown_action() {
            let (gate, _clock) = gate(2);
            let err = gate
                .generate_rollback(RollbackSource::Action("nope".into()))
                .unwrap_err();
            assert!(matches!(err, FieldGuardError::NotFound { .. }));
        }

        #[test]
        fn test_signed_gate() {
            let mut cfg = config(2);
            cfg.safety.signing_key = Some("field-secret".into());
            let audit = Arc::new(MemoryAuditStore::new());
            let stores = SafetyStores {
                audit: audit.clone(),
                approvals: Arc::new(MemoryRecordStore::new()),
                jidoka: Arc::new(MemoryRecordStore::new()),
                rollbacks: Arc::new(MemoryRecordStore::new()),
            };
            let (gate, _clock) = gate_with(&cfg, stores);
            gate.log_manual("alice", "scouted north field", None).unwrap();
            gate.log_manual("alice", "checked emitters", None).unwrap();
            assert!(gate.verify_chain().unwrap().valid);

            let other = AuditChain::new(audit).with_signer(EntrySigner::new(b"wrong"));
            assert!(!other.verify().unwrap().valid);
        }

        #[test]
        fn test_export_import_between_gates() {
            let (source, clock) = gate(4);
            moisture(&source, &clock, 40.0);
            source.propose_action(water(3, 20.0)).unwrap();
            source.log_manual("alice", "note", None).unwrap();
            let jsonl = source.export_audit().unwrap();

            let (target, _clock) = gate(2);
            assert_eq!(target.import_audit(&jsonl).unwrap(), 3);
            assert_eq!(target.chain_state().unwrap(), source.chain_state().unwrap());

            let summary = target.audit_summary().unwrap();
            assert_eq!(summary.get("action_proposed"), Some(&1));
            assert_eq!(summary.get("manual_log"), Some(&1));
        }

        #[test]
        fn test_sensor_readings_audited_when_enabled() {
            let mut cfg = config(2);
            cfg.safety.audit_sensor_readings = true;
            let (gate, clock) = gate_with(&cfg, SafetyStores::in_memory());
            moisture(&gate, &clock, 40.0);
            let entries = gate.list_audit(&AuditQuery::default()).unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].entry_type, AuditEntryType::SensorReading);
            assert_eq!(entries[0].actor, "s1");
        }

        #[test]
        fn test_set_automation_level() {
            let (gate, _clock) = gate(2);
            let mut rx = gate.events().subscribe();
            let entry = gate
                .set_automation_level(AutomationLevel::Trusted, "alice")
                .unwrap();
            assert_eq!(entry.entry_type, AuditEntryType::ConfigChanged);
            let details = entry.details.unwrap();
            assert_eq!(details["from"], 2);
            assert_eq!(details["to"], 3);
            assert_eq!(gate.automation_level(), AutomationLevel::Trusted);
            match rx.try_recv().unwrap() {
                Event::ConfigChanged { key, value } => {
                    assert_eq!(key, "safety.automation_level");
                    assert_eq!(value, "3");
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        #[test]
        fn test_apply_config_audits_level_change_only() {
            let (gate, _clock) = gate(2);
            gate.apply_config(&config(2), "reload").unwrap();
            assert!(gate.chain_state().unwrap().entry_count == 0);
            gate.apply_config(&config(1), "reload").unwrap();
            assert_eq!(gate.automation_level(), AutomationLevel::Assist);
            assert_eq!(gate.chain_state().unwrap().entry_count, 1);
        }
    }

    // ── Sweeper ────────────────────────────────────────────────

    mod sweeper {
        use super::support::{gate, moisture, water};
        use fieldguard_safety::{AuditEntryType, AuditQuery, spawn_expiry_sweeper};
        use std::sync::Arc;
        use std::time::Duration;

        #[tokio::test]
        async fn test_sweeper_expires_in_background() {
            let (gate, clock) = gate(2);
            moisture(&gate, &clock, 40.0);
            gate.propose_action(water(2, 20.0)).unwrap();
            clock.advance(120);

            let gate = Arc::new(gate);
            let handle = spawn_expiry_sweeper(gate.clone(), Duration::from_millis(10));
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.abort();

            let expiries = gate
                .list_audit(&AuditQuery {
                    entry_type: Some(AuditEntryType::SystemEvent),
                    ..Default::default()
                })
                .unwrap()
                .into_iter()
                .filter(|e| e.action == "approval_expired")
                .count();
            assert_eq!(expiries, 1);
        }
    }
}
