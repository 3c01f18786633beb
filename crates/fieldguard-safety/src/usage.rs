use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Tracks executed actuator actions per target (water volume, cadence, streaks).
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    state: Arc<RwLock<HashMap<String, TargetUsage>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetUsage {
    /// Current day (resets daily).
    pub current_day: NaiveDate,
    /// Gallons applied today.
    pub water_today_gallons: f64,
    /// Auto-approved actions since the last human-approved one, today.
    pub consecutive_today: u32,
    pub last_action_at: Option<DateTime<Utc>>,
    /// Gallons since tracking started.
    pub total_water_gallons: f64,
}

/// Usage as seen at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub water_used_today_gallons: f64,
    pub minutes_since_last_action: Option<f64>,
    pub consecutive_actions_today: u32,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successfully executed action.
    pub fn record_action(&self, target: &str, gallons: f64, human_approved: bool, at: DateTime<Utc>) {
        let mut state = self.state.write();
        let usage = state.entry(target.to_string()).or_insert_with(|| TargetUsage {
            current_day: at.date_naive(),
            water_today_gallons: 0.0,
            consecutive_today: 0,
            last_action_at: None,
            total_water_gallons: 0.0,
        });
        maybe_reset_day(usage, at);

        usage.water_today_gallons += gallons;
        usage.total_water_gallons += gallons;
        usage.consecutive_today = if human_approved {
            0
        } else {
            usage.consecutive_today + 1
        };
        usage.last_action_at = Some(at);
        debug!(
            target,
            gallons,
            today = usage.water_today_gallons,
            consecutive = usage.consecutive_today,
            "usage recorded"
        );
    }

    /// Usage for a target as of `now`. Unknown targets report zero usage.
    pub fn snapshot(&self, target: &str, now: DateTime<Utc>) -> UsageSnapshot {
        let state = self.state.read();
        let Some(usage) = state.get(target) else {
            return UsageSnapshot {
                water_used_today_gallons: 0.0,
                minutes_since_last_action: None,
                consecutive_actions_today: 0,
            };
        };
        let same_day = usage.current_day == now.date_naive();
        UsageSnapshot {
            water_used_today_gallons: if same_day { usage.water_today_gallons } else { 0.0 },
            minutes_since_last_action: usage
                .last_action_at
                .map(|t| (now - t).num_seconds().max(0) as f64 / 60.0),
            consecutive_actions_today: if same_day { usage.consecutive_today } else { 0 },
        }
    }

    pub fn get(&self, target: &str) -> Option<TargetUsage> {
        self.state.read().get(target).cloned()
    }
}

fn maybe_reset_day(usage: &mut TargetUsage, at: DateTime<Utc>) {
    let day = at.date_naive();
    if usage.current_day != day {
        usage.current_day = day;
        usage.water_today_gallons = 0.0;
        usage.consecutive_today = 0;
    }
}
