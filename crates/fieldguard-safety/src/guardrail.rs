use fieldguard_core::{GuardrailCheck, GuardrailKind};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::level::AutomationLevel;

/// Hard limits a proposed action must satisfy at one automation level.
///
/// Levels 0 and 1 carry zero water ceilings, so any nonzero water action fails
/// the table instead of needing a dedicated "disabled" branch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuardrailConfig {
    pub max_water_per_action_gallons: f64,
    pub max_daily_water_gallons: f64,
    pub min_watering_interval_minutes: f64,
    pub max_consecutive_actions: u32,
    pub moisture_ceiling_percent: f64,
    pub moisture_floor_percent: f64,
    pub ec_ceiling_ms_cm: f64,
    pub temp_floor_f: f64,
    pub temp_ceiling_f: f64,
    pub require_sensor_reading: bool,
}

const LOCKED: GuardrailConfig = GuardrailConfig {
    max_water_per_action_gallons: 0.0,
    max_daily_water_gallons: 0.0,
    min_watering_interval_minutes: 1440.0,
    max_consecutive_actions: 0,
    moisture_ceiling_percent: 70.0,
    moisture_floor_percent: 20.0,
    ec_ceiling_ms_cm: 3.0,
    temp_floor_f: 35.0,
    temp_ceiling_f: 95.0,
    require_sensor_reading: true,
};

const GUARDRAILS: [GuardrailConfig; 5] = [
    LOCKED,
    LOCKED,
    GuardrailConfig {
        max_water_per_action_gallons: 50.0,
        max_daily_water_gallons: 200.0,
        min_watering_interval_minutes: 240.0,
        max_consecutive_actions: 3,
        ..LOCKED
    },
    GuardrailConfig {
        max_water_per_action_gallons: 100.0,
        max_daily_water_gallons: 400.0,
        min_watering_interval_minutes: 120.0,
        max_consecutive_actions: 5,
        moisture_ceiling_percent: 75.0,
        moisture_floor_percent: 15.0,
        ec_ceiling_ms_cm: 3.5,
        temp_floor_f: 34.0,
        temp_ceiling_f: 100.0,
        require_sensor_reading: true,
    },
    GuardrailConfig {
        max_water_per_action_gallons: 200.0,
        max_daily_water_gallons: 800.0,
        min_watering_interval_minutes: 60.0,
        max_consecutive_actions: 8,
        moisture_ceiling_percent: 80.0,
        moisture_floor_percent: 10.0,
        ec_ceiling_ms_cm: 4.0,
        temp_floor_f: 33.0,
        temp_ceiling_f: 105.0,
        require_sensor_reading: true,
    },
];

impl GuardrailConfig {
    /// The fixed limits for a level.
    pub fn for_level(level: AutomationLevel) -> &'static GuardrailConfig {
        &GUARDRAILS[level.as_u8() as usize]
    }
}

/// What is known about the action and the field at proposal time.
/// `None` means "not assessed": no check is produced for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedState {
    pub proposed_water_gallons: Option<f64>,
    pub water_used_today_gallons: Option<f64>,
    pub minutes_since_last_action: Option<f64>,
    pub consecutive_actions_today: Option<u32>,
    pub has_sensor_reading: Option<bool>,
    pub moisture_percent: Option<f64>,
    pub ec_ms_cm: Option<f64>,
    pub temp_f: Option<f64>,
}

/// Evaluate every supplied observation against the level's limits.
pub fn evaluate(level: AutomationLevel, observed: &ObservedState) -> Vec<GuardrailCheck> {
    let cfg = GuardrailConfig::for_level(level);
    let mut checks = Vec::new();

    if let Some(has) = observed.has_sensor_reading {
        let passed = has || !cfg.require_sensor_reading;
        checks.push(GuardrailCheck {
            kind: GuardrailKind::SensorReadingRequired,
            passed,
            current_value: None,
            limit: None,
            message: if passed {
                "fresh sensor reading available".into()
            } else {
                format!("no fresh sensor reading, {level} requires one before acting")
            },
        });
    }

    if let Some(proposed) = observed.proposed_water_gallons {
        let limit = cfg.max_water_per_action_gallons;
        let passed = proposed <= limit;
        let message = if passed {
            format!("{proposed:.1} gal within per-action limit {limit:.1} gal")
        } else if limit == 0.0 {
            format!("{level} permits no water actions ({proposed:.1} gal proposed)")
        } else {
            format!("{proposed:.1} gal exceeds per-action limit {limit:.1} gal")
        };
        checks.push(check(GuardrailKind::MaxWaterPerAction, passed, proposed, limit, message));
    }

    if let Some(used) = observed.water_used_today_gallons {
        let total = used + observed.proposed_water_gallons.unwrap_or(0.0);
        let limit = cfg.max_daily_water_gallons;
        let passed = total <= limit;
        let message = if passed {
            format!("{total:.1} gal today within daily limit {limit:.1} gal")
        } else {
            format!("{total:.1} gal today would exceed daily limit {limit:.1} gal")
        };
        checks.push(check(GuardrailKind::MaxDailyWater, passed, total, limit, message));
    }

    if let Some(minutes) = observed.minutes_since_last_action {
        let limit = cfg.min_watering_interval_minutes;
        let passed = minutes >= limit;
        let message = if passed {
            format!("{minutes:.0} min since last action, minimum {limit:.0} min")
        } else {
            format!("only {minutes:.0} min since last action, wait at least {limit:.0} min")
        };
        checks.push(check(GuardrailKind::MinWateringInterval, passed, minutes, limit, message));
    }

    if let Some(count) = observed.consecutive_actions_today {
        let limit = cfg.max_consecutive_actions;
        // `count` actions already ran; this one would be the next.
        let passed = count < limit;
        let message = if passed {
            format!("{count} consecutive actions today, limit {limit}")
        } else {
            format!("{count} consecutive actions today reaches limit {limit}, pause for review")
        };
        checks.push(check(
            GuardrailKind::MaxConsecutiveActions,
            passed,
            f64::from(count),
            f64::from(limit),
            message,
        ));
    }

    if let Some(moisture) = observed.moisture_percent {
        let ceiling = cfg.moisture_ceiling_percent;
        let passed = moisture <= ceiling;
        let message = if passed {
            format!("soil moisture {moisture:.1}% at or below ceiling {ceiling:.1}%")
        } else {
            format!("soil moisture {moisture:.1}% exceeds ceiling {ceiling:.1}%, do not water")
        };
        checks.push(check(GuardrailKind::MoistureCeiling, passed, moisture, ceiling, message));

        let floor = cfg.moisture_floor_percent;
        let passed = moisture >= floor;
        let message = if passed {
            format!("soil moisture {moisture:.1}% at or above floor {floor:.1}%")
        } else {
            format!("soil moisture {moisture:.1}% below floor {floor:.1}%, verify sensor before automating")
        };
        checks.push(check(GuardrailKind::MoistureFloor, passed, moisture, floor, message));
    }

    if let Some(ec) = observed.ec_ms_cm {
        let ceiling = cfg.ec_ceiling_ms_cm;
        let passed = ec <= ceiling;
        let message = if passed {
            format!("EC {ec:.2} mS/cm at or below ceiling {ceiling:.2}")
        } else {
            format!("EC {ec:.2} mS/cm exceeds ceiling {ceiling:.2}, do not fertilize")
        };
        checks.push(check(GuardrailKind::EcCeiling, passed, ec, ceiling, message));
    }

    if let Some(temp) = observed.temp_f {
        let floor = cfg.temp_floor_f;
        let passed = temp >= floor;
        let message = if passed {
            format!("temperature {temp:.1}°F at or above floor {floor:.1}°F")
        } else {
            format!("temperature {temp:.1}°F below floor {floor:.1}°F, frost risk, do not irrigate")
        };
        checks.push(check(GuardrailKind::TempFloor, passed, temp, floor, message));

        let ceiling = cfg.temp_ceiling_f;
        let passed = temp <= ceiling;
        let message = if passed {
            format!("temperature {temp:.1}°F at or below ceiling {ceiling:.1}°F")
        } else {
            format!("temperature {temp:.1}°F exceeds ceiling {ceiling:.1}°F, heat stress, defer action")
        };
        checks.push(check(GuardrailKind::TempCeiling, passed, temp, ceiling, message));
    }

    for failed in checks.iter().filter(|c| !c.passed) {
        warn!(%level, guardrail = %failed.kind, message = %failed.message, "guardrail failed");
    }

    checks
}

fn check(kind: GuardrailKind, passed: bool, current: f64, limit: f64, message: String) -> GuardrailCheck {
    GuardrailCheck {
        kind,
        passed,
        current_value: Some(current),
        limit: Some(limit),
        message,
    }
}

/// Logical AND over the produced checks. Vacuously true when empty.
pub fn all_pass(checks: &[GuardrailCheck]) -> bool {
    checks.iter().all(|c| c.passed)
}

/// The failed subset, in evaluation order.
pub fn failed(checks: &[GuardrailCheck]) -> Vec<&GuardrailCheck> {
    checks.iter().filter(|c| !c.passed).collect()
}
