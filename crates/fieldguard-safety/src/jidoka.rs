//! Stop-the-line anomaly detection.

use chrono::{DateTime, Utc};
use fieldguard_config::{JidokaConfig, TriggerThreshold};
use fieldguard_core::{FieldGuardError, JidokaEventId, ReadingType, Result, new_id};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hard freeze point. Below it frost is an emergency whatever the configured
/// threshold says.
pub const FREEZE_POINT_F: f64 = 32.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Overwatering,
    Underwatering,
    EcSpike,
    Frost,
    HeatStress,
    LeakDetected,
    LowBattery,
    ManualStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Exceeds,
    FallsBelow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
    Emergency,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
        }
    }

    /// Critical and emergency events stop the line.
    pub fn stops_line(&self) -> bool {
        *self >= Self::Critical
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overwatering => "overwatering",
            Self::Underwatering => "underwatering",
            Self::EcSpike => "ec_spike",
            Self::Frost => "frost",
            Self::HeatStress => "heat_stress",
            Self::LeakDetected => "leak_detected",
            Self::LowBattery => "low_battery",
            Self::ManualStop => "manual_stop",
        }
    }

    /// `None` for triggers that are pulled by hand rather than measured.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Self::Overwatering | Self::EcSpike | Self::HeatStress | Self::LeakDetected => {
                Some(Direction::Exceeds)
            }
            Self::Underwatering | Self::Frost | Self::LowBattery => Some(Direction::FallsBelow),
            Self::ManualStop => None,
        }
    }

    fn base_severity(&self) -> Severity {
        match self {
            Self::Frost | Self::LeakDetected | Self::ManualStop => Severity::Critical,
            _ => Severity::Warning,
        }
    }

    fn escalated_severity(&self) -> Severity {
        match self {
            Self::Frost | Self::LeakDetected | Self::ManualStop => Severity::Emergency,
            _ => Severity::Critical,
        }
    }

    fn label(&self) -> (&'static str, &'static str) {
        match self {
            Self::Overwatering | Self::Underwatering => ("soil moisture", "%"),
            Self::EcSpike => ("soil EC", " mS/cm"),
            Self::Frost | Self::HeatStress => ("temperature", "°F"),
            Self::LeakDetected => ("flow", " gal/min"),
            Self::LowBattery => ("battery", "%"),
            Self::ManualStop => ("manual stop", ""),
        }
    }

    /// Configured threshold for this kind. Manual stops have none.
    pub fn threshold(&self, config: &JidokaConfig) -> Option<TriggerThreshold> {
        match self {
            Self::Overwatering => Some(config.overwatering),
            Self::Underwatering => Some(config.underwatering),
            Self::EcSpike => Some(config.ec_spike),
            Self::Frost => Some(config.frost),
            Self::HeatStress => Some(config.heat_stress),
            Self::LeakDetected => Some(config.leak_detected),
            Self::LowBattery => Some(config.low_battery),
            Self::ManualStop => None,
        }
    }

    /// Triggers watching a reading type. Battery is checked separately from
    /// the reading's battery field.
    pub fn for_reading(reading_type: ReadingType) -> &'static [TriggerKind] {
        match reading_type {
            ReadingType::SoilMoisture => &[Self::Overwatering, Self::Underwatering],
            ReadingType::SoilEc => &[Self::EcSpike],
            ReadingType::Temperature => &[Self::Frost, Self::HeatStress],
            ReadingType::FlowRate => &[Self::LeakDetected],
            ReadingType::Humidity => &[],
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one threshold comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JidokaCheck {
    pub triggered: bool,
    pub severity: Option<Severity>,
    pub message: String,
}

/// Compare `value` against a trigger's threshold.
pub fn check(kind: TriggerKind, value: f64, threshold: &TriggerThreshold) -> JidokaCheck {
    let (label, unit) = kind.label();
    let Some(direction) = kind.direction() else {
        return JidokaCheck {
            triggered: true,
            severity: Some(kind.base_severity()),
            message: "line stopped manually".into(),
        };
    };
    let t = threshold.threshold;
    let (crossed, escalated, verb) = match direction {
        Direction::Exceeds => (
            value > t,
            value > t + threshold.escalation_offset,
            "exceeds",
        ),
        Direction::FallsBelow => (
            value < t,
            value < t - threshold.escalation_offset,
            "is below",
        ),
    };

    if kind == TriggerKind::Frost {
        let frozen = value < FREEZE_POINT_F;
        if frozen {
            return JidokaCheck {
                triggered: true,
                severity: Some(Severity::Emergency),
                message: format!(
                    "{label} {value:.1}{unit} is below the {FREEZE_POINT_F:.0}{unit} freeze point"
                ),
            };
        }
        return if crossed {
            JidokaCheck {
                triggered: true,
                severity: Some(Severity::Critical),
                message: format!("{label} {value:.1}{unit} {verb} frost threshold {t:.1}{unit}"),
            }
        } else {
            not_triggered(label, unit, value)
        };
    }

    if !crossed {
        return not_triggered(label, unit, value);
    }
    let severity = if escalated {
        kind.escalated_severity()
    } else {
        kind.base_severity()
    };
    JidokaCheck {
        triggered: true,
        severity: Some(severity),
        message: format!("{label} {value:.1}{unit} {verb} {kind} threshold {t:.1}{unit}"),
    }
}

fn not_triggered(label: &str, unit: &str, value: f64) -> JidokaCheck {
    JidokaCheck {
        triggered: false,
        severity: None,
        message: format!("{label} {value:.1}{unit} within limits"),
    }
}

/// Advisory follow-up steps per trigger. Not enforced.
pub fn recommended_actions(kind: TriggerKind) -> &'static [&'static str] {
    match kind {
        TriggerKind::Overwatering => &[
            "Stop irrigation for the affected zone",
            "Inspect drainage and emitters",
            "Re-check soil moisture in 6 hours",
        ],
        TriggerKind::Underwatering => &[
            "Verify the moisture sensor is seated and reporting",
            "Inspect irrigation lines for blockages",
            "Schedule a supervised watering",
        ],
        TriggerKind::EcSpike => &[
            "Suspend fertilizer dosing",
            "Flush the zone with clean water",
            "Re-check EC after the flush",
        ],
        TriggerKind::Frost => &[
            "Suspend irrigation to avoid ice formation",
            "Deploy frost protection (covers or heaters)",
            "Monitor temperature every 15 minutes",
        ],
        TriggerKind::HeatStress => &[
            "Open vents or activate shade cloth",
            "Defer fertilizer dosing until temperatures drop",
            "Check crops for wilting",
        ],
        TriggerKind::LeakDetected => &[
            "Shut off the main valve immediately",
            "Inspect lines and fittings for the leak",
            "Do not resume irrigation until the leak is repaired",
        ],
        TriggerKind::LowBattery => &[
            "Replace or recharge the sensor battery",
            "Treat readings from this sensor as unreliable until replaced",
        ],
        TriggerKind::ManualStop => &[
            "Hold all actuator actions",
            "Record the reason for the stop",
            "Resolve the event before resuming automation",
        ],
    }
}

/// A fired trigger. Created unresolved; resolves once and is never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JidokaEvent {
    pub id: JidokaEventId,
    pub timestamp: DateTime<Utc>,
    pub trigger_kind: TriggerKind,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actuator_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    pub message: String,
    pub actions_taken: Vec<String>,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Where a trigger fired.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventSource {
    pub sensor_id: Option<String>,
    pub actuator_id: Option<String>,
    pub current_value: Option<f64>,
    pub threshold: Option<f64>,
}

pub fn create_event(
    kind: TriggerKind,
    severity: Severity,
    message: impl Into<String>,
    source: EventSource,
    now: DateTime<Utc>,
) -> JidokaEvent {
    JidokaEvent {
        id: new_id(),
        timestamp: now,
        trigger_kind: kind,
        severity,
        sensor_id: source.sensor_id,
        actuator_id: source.actuator_id,
        current_value: source.current_value,
        threshold: source.threshold,
        message: message.into(),
        actions_taken: vec![format!("{severity} alert raised")],
        resolved: false,
        resolved_by: None,
        resolved_at: None,
        notes: None,
    }
}

impl JidokaEvent {
    /// The single legal terminal transition.
    pub fn resolve(&self, by: &str, notes: Option<&str>, now: DateTime<Utc>) -> Result<Self> {
        if self.resolved {
            return Err(FieldGuardError::IllegalStateTransition {
                entity: "jidoka event",
                id: self.id.clone(),
                from: "resolved".into(),
                attempted: "resolve".into(),
            });
        }
        let mut next = self.clone();
        next.resolved = true;
        next.resolved_by = Some(by.to_string());
        next.resolved_at = Some(now);
        next.notes = notes.map(str::to_string);
        Ok(next)
    }

    pub fn recommended_actions(&self) -> &'static [&'static str] {
        recommended_actions(self.trigger_kind)
    }
}
