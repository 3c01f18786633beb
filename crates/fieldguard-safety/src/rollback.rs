use chrono::{DateTime, Utc};
use fieldguard_core::{FieldGuardError, Result, new_id};
use serde::{Deserialize, Serialize};

use crate::approval::ActionType;
use crate::jidoka::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl RollbackPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl From<Option<Severity>> for RollbackPriority {
    fn from(severity: Option<Severity>) -> Self {
        match severity {
            Some(Severity::Emergency) => Self::Critical,
            Some(Severity::Critical) => Self::High,
            Some(Severity::Warning) => Self::Medium,
            None => Self::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackStep {
    pub step: u32,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub manual: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A corrective plan for one originating action or Jidoka event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackPlan {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub original_action_id: String,
    pub original_action: String,
    pub trigger_conditions: Vec<String>,
    pub steps: Vec<RollbackStep>,
    /// Always the sum of the steps' durations, missing counted as zero.
    pub estimated_total_minutes: u32,
    pub priority: RollbackPriority,
    pub executed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

/// What the plan is reversing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollbackContext {
    pub original_action_id: String,
    pub original_action: String,
    pub target_id: Option<String>,
    pub trigger_conditions: Vec<String>,
    pub severity: Option<Severity>,
}

struct Template {
    action: &'static str,
    command: Option<&'static str>,
    manual: bool,
    minutes: u32,
    notes: Option<&'static str>,
}

const WATERING: &[Template] = &[
    Template {
        action: "Check soil moisture in the affected zone",
        command: Some("sensors.read {target} soil_moisture"),
        manual: false,
        minutes: 5,
        notes: None,
    },
    Template {
        action: "Inspect drainage for standing water",
        command: None,
        manual: true,
        minutes: 15,
        notes: Some("Look for pooling around emitters and low spots"),
    },
    Template {
        action: "Stop irrigation",
        command: Some("valve.close {target}"),
        manual: false,
        minutes: 1,
        notes: None,
    },
    Template {
        action: "Wait 24 hours for the soil to drain",
        command: None,
        manual: false,
        minutes: 1440,
        notes: Some("Keep automation for this zone on hold"),
    },
    Template {
        action: "Resume the normal watering schedule",
        command: Some("schedule.resume {target}"),
        manual: true,
        minutes: 5,
        notes: Some("Only after moisture is back under the ceiling"),
    },
];

const FERTILIZATION: &[Template] = &[
    Template {
        action: "Check soil EC in the affected zone",
        command: Some("sensors.read {target} soil_ec"),
        manual: false,
        minutes: 5,
        notes: None,
    },
    Template {
        action: "Flush the zone with clean water",
        command: Some("irrigation.flush {target}"),
        manual: false,
        minutes: 30,
        notes: None,
    },
    Template {
        action: "Drain the flush water",
        command: None,
        manual: true,
        minutes: 60,
        notes: None,
    },
    Template {
        action: "Re-check soil EC",
        command: Some("sensors.read {target} soil_ec"),
        manual: false,
        minutes: 5,
        notes: None,
    },
    Template {
        action: "Repeat the flush if EC is still above the ceiling",
        command: None,
        manual: true,
        minutes: 30,
        notes: Some("Skip when EC is back within limits"),
    },
];

const GENERIC: &[Template] = &[
    Template {
        action: "Document the issue and current state",
        command: None,
        manual: true,
        minutes: 10,
        notes: None,
    },
    Template {
        action: "Diagnose the root cause",
        command: None,
        manual: true,
        minutes: 30,
        notes: None,
    },
    Template {
        action: "Determine the corrective action",
        command: None,
        manual: true,
        minutes: 15,
        notes: None,
    },
    Template {
        action: "Execute the correction",
        command: None,
        manual: true,
        minutes: 30,
        notes: None,
    },
    Template {
        action: "Monitor for recurrence",
        command: None,
        manual: false,
        minutes: 60,
        notes: Some("Watch the affected sensors for at least an hour"),
    },
];

fn template_for(action_type: ActionType) -> &'static [Template] {
    match action_type {
        ActionType::Water => WATERING,
        ActionType::Fertilize => FERTILIZATION,
        ActionType::Ventilate | ActionType::Notify | ActionType::Other => GENERIC,
    }
}

/// Sum of step durations, missing counted as zero.
pub fn total_minutes(steps: &[RollbackStep]) -> u32 {
    steps
        .iter()
        .map(|s| s.estimated_duration_minutes.unwrap_or(0))
        .sum()
}

/// Build the deterministic plan for an action type.
pub fn generate(action_type: ActionType, ctx: RollbackContext, now: DateTime<Utc>) -> RollbackPlan {
    let target = ctx.target_id.as_deref().unwrap_or("zone");
    let steps: Vec<RollbackStep> = template_for(action_type)
        .iter()
        .zip(1u32..)
        .map(|(t, step)| RollbackStep {
            step,
            action: t.action.to_string(),
            command: t.command.map(|c| c.replace("{target}", target)),
            manual: t.manual,
            estimated_duration_minutes: Some(t.minutes),
            notes: t.notes.map(str::to_string),
        })
        .collect();
    RollbackPlan {
        id: new_id(),
        created_at: now,
        original_action_id: ctx.original_action_id,
        original_action: ctx.original_action,
        trigger_conditions: ctx.trigger_conditions,
        estimated_total_minutes: total_minutes(&steps),
        steps,
        priority: RollbackPriority::from(ctx.severity),
        executed: false,
        executed_at: None,
    }
}

impl RollbackPlan {
    /// Flip `executed` once.
    pub fn mark_executed(&self, now: DateTime<Utc>) -> Result<Self> {
        if self.executed {
            return Err(FieldGuardError::IllegalStateTransition {
                entity: "rollback plan",
                id: self.id.clone(),
                from: "executed".into(),
                attempted: "mark executed".into(),
            });
        }
        let mut next = self.clone();
        next.executed = true;
        next.executed_at = Some(now);
        Ok(next)
    }
}
