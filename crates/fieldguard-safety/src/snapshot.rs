use chrono::{DateTime, Duration, Utc};
use fieldguard_core::{ReadingType, SensorReading};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Latest reading per (sensor, reading type).
#[derive(Debug, Default)]
pub struct SensorSnapshot {
    latest: RwLock<HashMap<(String, ReadingType), SensorReading>>,
}

/// Freshest in-window values across a zone's sensors.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ZoneReadings {
    pub moisture_percent: Option<f64>,
    pub ec_ms_cm: Option<f64>,
    pub temp_f: Option<f64>,
    pub has_fresh_reading: bool,
}

impl SensorSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a reading unless a newer one for the same key is already held.
    /// Returns whether it was stored.
    pub fn update(&self, reading: &SensorReading) -> bool {
        let mut latest = self.latest.write();
        let key = (reading.sensor_id.clone(), reading.reading_type);
        match latest.get(&key) {
            Some(existing) if existing.timestamp > reading.timestamp => false,
            _ => {
                latest.insert(key, reading.clone());
                true
            }
        }
    }

    pub fn latest(&self, sensor_id: &str, reading_type: ReadingType) -> Option<SensorReading> {
        self.latest
            .read()
            .get(&(sensor_id.to_string(), reading_type))
            .cloned()
    }

    pub fn zone(&self, sensor_ids: &[String], now: DateTime<Utc>, freshness: Duration) -> ZoneReadings {
        let latest = self.latest.read();
        let freshest = |rt: ReadingType| -> Option<&SensorReading> {
            sensor_ids
                .iter()
                .filter_map(|id| latest.get(&(id.clone(), rt)))
                .filter(|r| now - r.timestamp <= freshness)
                .max_by_key(|r| r.timestamp)
        };
        let moisture = freshest(ReadingType::SoilMoisture);
        let ec = freshest(ReadingType::SoilEc);
        let temp = freshest(ReadingType::Temperature);
        let has_fresh_reading = latest
            .iter()
            .any(|((id, _), r)| sensor_ids.contains(id) && now - r.timestamp <= freshness);
        ZoneReadings {
            moisture_percent: moisture.map(|r| r.value),
            ec_ms_cm: ec.map(|r| r.value),
            temp_f: temp.map(|r| r.value),
            has_fresh_reading,
        }
    }
}
