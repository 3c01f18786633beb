use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of an approval request (UUID-like opaque string).
pub type ApprovalId = String;

/// Identifier of a Jidoka event.
pub type JidokaEventId = String;

/// Identifier of an audit entry.
pub type AuditEntryId = String;

/// Identifier of a sensor as reported by the ingestion layer.
pub type SensorId = String;

/// Mint a fresh opaque identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// What a sensor measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingType {
    SoilMoisture,
    SoilEc,
    Temperature,
    Humidity,
    FlowRate,
}

impl ReadingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SoilMoisture => "soil_moisture",
            Self::SoilEc => "soil_ec",
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::FlowRate => "flow_rate",
        }
    }
}

impl fmt::Display for ReadingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReadingType {
    type Err = crate::error::FieldGuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "soil_moisture" | "moisture" => Ok(Self::SoilMoisture),
            "soil_ec" | "ec" => Ok(Self::SoilEc),
            "temperature" | "temp" => Ok(Self::Temperature),
            "humidity" => Ok(Self::Humidity),
            "flow_rate" | "flow" => Ok(Self::FlowRate),
            other => Err(crate::error::FieldGuardError::InvalidInput(format!(
                "unknown reading type '{other}'"
            ))),
        }
    }
}

/// A single sensor sample handed over by the ingestion layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub timestamp: DateTime<Utc>,
    pub sensor_id: SensorId,
    pub reading_type: ReadingType,
    pub value: f64,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_pct: Option<f64>,
}

impl SensorReading {
    pub fn new(sensor_id: impl Into<String>, reading_type: ReadingType, value: f64, unit: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            sensor_id: sensor_id.into(),
            reading_type,
            value,
            unit: unit.into(),
            battery_pct: None,
        }
    }

    pub fn with_battery(mut self, pct: f64) -> Self {
        self.battery_pct = Some(pct);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Which guardrail a check evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailKind {
    MaxWaterPerAction,
    MaxDailyWater,
    MinWateringInterval,
    MaxConsecutiveActions,
    SensorReadingRequired,
    MoistureCeiling,
    MoistureFloor,
    EcCeiling,
    TempFloor,
    TempCeiling,
}

impl GuardrailKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxWaterPerAction => "max_water_per_action",
            Self::MaxDailyWater => "max_daily_water",
            Self::MinWateringInterval => "min_watering_interval",
            Self::MaxConsecutiveActions => "max_consecutive_actions",
            Self::SensorReadingRequired => "sensor_reading_required",
            Self::MoistureCeiling => "moisture_ceiling",
            Self::MoistureFloor => "moisture_floor",
            Self::EcCeiling => "ec_ceiling",
            Self::TempFloor => "temp_floor",
            Self::TempCeiling => "temp_ceiling",
        }
    }
}

impl fmt::Display for GuardrailKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of one guardrail comparison. Never stored on its own: it always
/// travels inside an approval request or an audit entry's details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailCheck {
    pub kind: GuardrailKind,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<f64>,
    pub message: String,
}
