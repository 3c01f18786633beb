use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration — maps to `fieldguard.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldGuardConfig {
    pub safety: SafetyConfig,
    pub jidoka: JidokaConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

// ── Safety ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Highest automation level the gate will honour: 0 = observe, 1 = assist,
    /// 2 = supervised, 3 = trusted, 4 = autonomous. Proposals asking for more
    /// are clamped down to this.
    pub automation_level: u8,
    /// A reading older than this many minutes is not a "fresh" reading.
    pub sensor_freshness_minutes: u32,
    /// Seconds between periodic expiry sweeps.
    pub sweep_interval_secs: u64,
    /// Append a `sensor_reading` audit entry for every reported reading.
    pub audit_sensor_readings: bool,
    /// HMAC-SHA256 key used to sign audit entries. Unsigned when absent.
    pub signing_key: Option<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            automation_level: 2,
            sensor_freshness_minutes: 60,
            sweep_interval_secs: 60,
            audit_sensor_readings: false,
            signing_key: None,
        }
    }
}

// ── Jidoka ─────────────────────────────────────────────────────

/// Threshold for one trigger kind. The escalation offset is measured from the
/// threshold in the trigger's direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriggerThreshold {
    pub threshold: f64,
    pub escalation_offset: f64,
}

impl TriggerThreshold {
    pub const fn new(threshold: f64, escalation_offset: f64) -> Self {
        Self {
            threshold,
            escalation_offset,
        }
    }
}

/// Each `[jidoka.<kind>]` table may be partial; missing fields keep that
/// kind's default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "JidokaOverrides")]
pub struct JidokaConfig {
    /// Soil moisture % above which the zone is overwatered.
    pub overwatering: TriggerThreshold,
    /// Soil moisture % below which the zone is too dry.
    pub underwatering: TriggerThreshold,
    /// Soil EC (mS/cm) above which fertilizer has built up.
    pub ec_spike: TriggerThreshold,
    /// Temperature (°F) below which frost protection kicks in.
    pub frost: TriggerThreshold,
    /// Temperature (°F) above which crops are heat stressed.
    pub heat_stress: TriggerThreshold,
    /// Flow (gal/min) above which a line is assumed to be leaking.
    pub leak_detected: TriggerThreshold,
    /// Battery % below which a sensor may drop off.
    pub low_battery: TriggerThreshold,
}

impl Default for JidokaConfig {
    fn default() -> Self {
        Self {
            overwatering: TriggerThreshold::new(80.0, 10.0),
            underwatering: TriggerThreshold::new(15.0, 5.0),
            ec_spike: TriggerThreshold::new(3.5, 1.0),
            frost: TriggerThreshold::new(35.0, 3.0),
            heat_stress: TriggerThreshold::new(100.0, 5.0),
            leak_detected: TriggerThreshold::new(10.0, 10.0),
            low_battery: TriggerThreshold::new(20.0, 10.0),
        }
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct ThresholdOverride {
    threshold: Option<f64>,
    escalation_offset: Option<f64>,
}

impl ThresholdOverride {
    fn over(self, base: TriggerThreshold) -> TriggerThreshold {
        TriggerThreshold {
            threshold: self.threshold.unwrap_or(base.threshold),
            escalation_offset: self.escalation_offset.unwrap_or(base.escalation_offset),
        }
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct JidokaOverrides {
    overwatering: ThresholdOverride,
    underwatering: ThresholdOverride,
    ec_spike: ThresholdOverride,
    frost: ThresholdOverride,
    heat_stress: ThresholdOverride,
    leak_detected: ThresholdOverride,
    low_battery: ThresholdOverride,
}

impl From<JidokaOverrides> for JidokaConfig {
    fn from(o: JidokaOverrides) -> Self {
        let base = Self::default();
        Self {
            overwatering: o.overwatering.over(base.overwatering),
            underwatering: o.underwatering.over(base.underwatering),
            ec_spike: o.ec_spike.over(base.ec_spike),
            frost: o.frost.over(base.frost),
            heat_stress: o.heat_stress.over(base.heat_stress),
            leak_detected: o.leak_detected.over(base.leak_detected),
            low_battery: o.low_battery.over(base.low_battery),
        }
    }
}

impl JidokaConfig {
    fn entries(&self) -> [(&'static str, &TriggerThreshold); 7] {
        [
            ("overwatering", &self.overwatering),
            ("underwatering", &self.underwatering),
            ("ec_spike", &self.ec_spike),
            ("frost", &self.frost),
            ("heat_stress", &self.heat_stress),
            ("leak_detected", &self.leak_detected),
            ("low_battery", &self.low_battery),
        ]
    }
}

// ── Store ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database holding the audit chain and projections.
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("fieldguard.db"),
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "[{}] {}: {}", tag, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   hint: {}", h)?;
        }
        Ok(())
    }
}

impl FieldGuardConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Automation level ───
        if self.safety.automation_level > 4 {
            warnings.push(ConfigWarning {
                field: "safety.automation_level".into(),
                message: format!("level {} is invalid", self.safety.automation_level),
                severity: WarningSeverity::Error,
                hint: Some("Valid levels: 0 (observe), 1 (assist), 2 (supervised), 3 (trusted), 4 (autonomous)".into()),
            });
        } else if self.safety.automation_level == 4 {
            warnings.push(ConfigWarning {
                field: "safety.automation_level".into(),
                message: "level 4 (autonomous) — actuator actions auto-approve when guardrails pass".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Consider level 2 or 3 until the guardrail table is tuned for your site".into()),
            });
        }

        // ── Sweep interval ───
        if self.safety.sweep_interval_secs == 0 {
            warnings.push(ConfigWarning {
                field: "safety.sweep_interval_secs".into(),
                message: "sweep interval is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 60".into()),
            });
        }

        // ── Sensor freshness ───
        if self.safety.sensor_freshness_minutes == 0 {
            warnings.push(ConfigWarning {
                field: "safety.sensor_freshness_minutes".into(),
                message: "freshness window is 0 — no reading will ever count as fresh".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set to e.g. 60".into()),
            });
        }

        // ── Signing key ───
        match self.safety.signing_key.as_deref() {
            None => warnings.push(ConfigWarning {
                field: "safety.signing_key".into(),
                message: "audit entries will not be signed".into(),
                severity: WarningSeverity::Info,
                hint: Some("Set a device-local key to sign entries with HMAC-SHA256".into()),
            }),
            Some("") => warnings.push(ConfigWarning {
                field: "safety.signing_key".into(),
                message: "signing key is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Remove the key or set a non-empty value".into()),
            }),
            Some(_) => {}
        }

        // ── Jidoka thresholds ───
        for (name, t) in self.jidoka.entries() {
            if !t.threshold.is_finite() || t.threshold <= 0.0 {
                warnings.push(ConfigWarning {
                    field: format!("jidoka.{name}.threshold"),
                    message: format!("threshold {} must be positive", t.threshold),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
            if !t.escalation_offset.is_finite() || t.escalation_offset < 0.0 {
                warnings.push(ConfigWarning {
                    field: format!("jidoka.{name}.escalation_offset"),
                    message: format!("escalation offset {} must not be negative", t.escalation_offset),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
        }
        if self.jidoka.underwatering.threshold >= self.jidoka.overwatering.threshold {
            warnings.push(ConfigWarning {
                field: "jidoka.underwatering.threshold".into(),
                message: "underwatering threshold is not below the overwatering threshold".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Every moisture value would trigger one of the two".into()),
            });
        }

        // ── Store ───
        if self.store.db_path.as_os_str().is_empty() {
            warnings.push(ConfigWarning {
                field: "store.db_path".into(),
                message: "database path is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 'fieldguard.db'".into()),
            });
        }

        // ── Logging format ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // ── Logging level ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
