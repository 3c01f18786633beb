use chrono::{DateTime, Duration, Utc};
use fieldguard_core::{ApprovalId, FieldGuardError, GuardrailCheck, Result, new_id};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::level::AutomationLevel;

/// How approval works at one automation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    pub requires_approval: bool,
    /// Minutes a request stays decidable. Zero means it can never be granted.
    pub expiration_minutes: u32,
    pub auto_approve_if_guardrails_pass: bool,
    pub notify_on_expiration: bool,
}

const POLICIES: [ApprovalPolicy; 5] = [
    ApprovalPolicy {
        requires_approval: true,
        expiration_minutes: 0,
        auto_approve_if_guardrails_pass: false,
        notify_on_expiration: false,
    },
    ApprovalPolicy {
        requires_approval: true,
        expiration_minutes: 0,
        auto_approve_if_guardrails_pass: false,
        notify_on_expiration: true,
    },
    ApprovalPolicy {
        requires_approval: true,
        expiration_minutes: 60,
        auto_approve_if_guardrails_pass: false,
        notify_on_expiration: true,
    },
    ApprovalPolicy {
        requires_approval: false,
        expiration_minutes: 30,
        auto_approve_if_guardrails_pass: true,
        notify_on_expiration: true,
    },
    ApprovalPolicy {
        requires_approval: false,
        expiration_minutes: 15,
        auto_approve_if_guardrails_pass: true,
        notify_on_expiration: false,
    },
];

impl ApprovalPolicy {
    pub fn for_level(level: AutomationLevel) -> ApprovalPolicy {
        POLICIES[level.as_u8() as usize]
    }

    /// Whether a request under this policy can ever reach `approved`.
    pub fn grantable(&self) -> bool {
        self.expiration_minutes > 0
    }
}

/// What kind of actuator action is being proposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Water,
    Fertilize,
    Ventilate,
    Notify,
    Other,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Water => "water",
            Self::Fertilize => "fertilize",
            Self::Ventilate => "ventilate",
            Self::Notify => "notify",
            Self::Other => "other",
        }
    }

    /// Whether the action moves a physical actuator.
    pub fn is_actuation(&self) -> bool {
        matches!(self, Self::Water | Self::Fertilize | Self::Ventilate)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionType {
    type Err = FieldGuardError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "water" => Ok(Self::Water),
            "fertilize" => Ok(Self::Fertilize),
            "ventilate" => Ok(Self::Ventilate),
            "notify" => Ok(Self::Notify),
            "other" => Ok(Self::Other),
            other => Err(FieldGuardError::InvalidInput(format!("unknown action type '{other}'"))),
        }
    }
}

/// Numeric parameters of a proposed action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub water_gallons: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fertilizer_ml: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<f64>,
    /// Sensors covering the target zone.
    #[serde(default)]
    pub sensor_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Cancelled,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self != Self::Pending
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = FieldGuardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(FieldGuardError::InvalidInput(format!("unknown approval status '{other}'"))),
        }
    }
}

/// A human (or policy) decision on a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        })
    }
}

/// A proposed action before it becomes a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewApproval {
    pub action_type: ActionType,
    pub target_id: Option<String>,
    pub target_name: Option<String>,
    pub proposed_action: String,
    pub reason: String,
    pub ai_confidence: Option<f64>,
    pub sources_used: Vec<String>,
    pub parameters: ActionParams,
}

/// An action held for approval. Moves out of `pending` exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ApprovalStatus,
    pub automation_level: AutomationLevel,
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
    pub proposed_action: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_confidence: Option<f64>,
    pub parameters: ActionParams,
    pub guardrail_checks: Vec<GuardrailCheck>,
    pub sources_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_result: Option<String>,
}

impl ApprovalRequest {
    /// Create a pending request stamped with the level's expiration window.
    pub fn create(
        new: NewApproval,
        level: AutomationLevel,
        guardrail_checks: Vec<GuardrailCheck>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if let Some(c) = new.ai_confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(FieldGuardError::InvalidInput(format!(
                    "ai_confidence {c} is outside [0, 1]"
                )));
            }
        }
        if new.proposed_action.trim().is_empty() {
            return Err(FieldGuardError::InvalidInput("proposed_action is empty".into()));
        }
        let policy = ApprovalPolicy::for_level(level);
        Ok(Self {
            id: new_id(),
            created_at: now,
            expires_at: now + Duration::minutes(i64::from(policy.expiration_minutes)),
            status: ApprovalStatus::Pending,
            automation_level: level,
            action_type: new.action_type,
            target_id: new.target_id,
            target_name: new.target_name,
            proposed_action: new.proposed_action,
            reason: new.reason,
            ai_confidence: new.ai_confidence,
            parameters: new.parameters,
            guardrail_checks,
            sources_used: new.sources_used,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            cancelled_by: None,
            cancelled_at: None,
            cancellation_reason: None,
            executed_at: None,
            execution_result: None,
        })
    }

    pub fn policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::for_level(self.automation_level)
    }

    /// Pending and past its window. A zero-minute window is closed from the
    /// moment of creation.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending
            && (now > self.expires_at || !self.policy().grantable())
    }

    fn illegal(&self, attempted: impl Into<String>) -> FieldGuardError {
        FieldGuardError::IllegalStateTransition {
            entity: "approval",
            id: self.id.clone(),
            from: self.status.to_string(),
            attempted: attempted.into(),
        }
    }

    /// Apply a decision. Only legal from `pending` inside the window.
    pub fn decide(
        &self,
        decision: Decision,
        actor: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if self.status.is_terminal() {
            return Err(self.illegal(decision.to_string()));
        }
        if self.is_expired(now) {
            return Err(FieldGuardError::ExpiredRequest {
                id: self.id.clone(),
                expires_at: self.expires_at,
            });
        }
        let mut next = self.clone();
        match decision {
            Decision::Approve => {
                next.status = ApprovalStatus::Approved;
                next.approved_by = Some(actor.to_string());
                next.approved_at = Some(now);
            }
            Decision::Reject => {
                next.status = ApprovalStatus::Rejected;
                next.rejected_by = Some(actor.to_string());
                next.rejected_at = Some(now);
                next.rejection_reason = reason.map(str::to_string);
            }
        }
        Ok(next)
    }

    /// System rejection of a request that failed a guardrail. Legal from
    /// `pending` even when the window is already closed.
    pub fn reject_violation(&self, actor: &str, now: DateTime<Utc>) -> Result<Self> {
        if self.status.is_terminal() {
            return Err(self.illegal("reject"));
        }
        let mut next = self.clone();
        next.status = ApprovalStatus::Rejected;
        next.rejected_by = Some(actor.to_string());
        next.rejected_at = Some(now);
        next.rejection_reason = Some("guardrail violation".into());
        Ok(next)
    }

    /// Time-triggered transition. Only legal for a pending request whose
    /// window has closed.
    pub fn expire(&self, now: DateTime<Utc>) -> Result<Self> {
        if !self.is_expired(now) {
            return Err(self.illegal("expire"));
        }
        let mut next = self.clone();
        next.status = ApprovalStatus::Expired;
        Ok(next)
    }

    /// Withdraw a pending request, e.g. when superseded or stopped by Jidoka.
    pub fn cancel(&self, actor: &str, reason: Option<&str>, now: DateTime<Utc>) -> Result<Self> {
        if self.status.is_terminal() {
            return Err(self.illegal("cancel"));
        }
        let mut next = self.clone();
        next.status = ApprovalStatus::Cancelled;
        next.cancelled_by = Some(actor.to_string());
        next.cancelled_at = Some(now);
        next.cancellation_reason = reason.map(str::to_string);
        Ok(next)
    }

    /// Record the actuator's outcome. Only after approval, and only once.
    pub fn record_execution(&self, result: &str, now: DateTime<Utc>) -> Result<Self> {
        if self.status != ApprovalStatus::Approved {
            return Err(self.illegal("record execution"));
        }
        if self.executed_at.is_some() {
            return Err(FieldGuardError::IllegalStateTransition {
                entity: "approval",
                id: self.id.clone(),
                from: "executed".into(),
                attempted: "record execution".into(),
            });
        }
        let mut next = self.clone();
        next.executed_at = Some(now);
        next.execution_result = Some(result.to_string());
        Ok(next)
    }
}
