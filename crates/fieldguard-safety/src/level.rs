use serde::{Deserialize, Serialize};
use std::fmt;

/// Five automation levels, from watching to acting alone:
///
/// - **L0 (Observe)**: Reads sensors only. No actuator action can be granted.
/// - **L1 (Assist)**: Proposes actions for the record. Still nothing can be granted.
/// - **L2 (Supervised)**: Actions run only with explicit human approval.
/// - **L3 (Trusted)**: Actions auto-approve when every guardrail passes.
/// - **L4 (Autonomous)**: As L3 with wider guardrails and a shorter window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", from = "u8")]
#[repr(u8)]
pub enum AutomationLevel {
    Observe = 0,
    Assist = 1,
    Supervised = 2,
    Trusted = 3,
    Autonomous = 4,
}

impl AutomationLevel {
    pub const ALL: [AutomationLevel; 5] = [
        Self::Observe,
        Self::Assist,
        Self::Supervised,
        Self::Trusted,
        Self::Autonomous,
    ];

    /// Out-of-range values clamp to the nearest bound.
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Observe,
            1 => Self::Assist,
            2 => Self::Supervised,
            3 => Self::Trusted,
            _ => Self::Autonomous,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Whether any actuator action can ever be granted at this level.
    pub fn allows_actuation(&self) -> bool {
        *self >= Self::Supervised
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Observe => "Monitor only, no actuator actions",
            Self::Assist => "Recommendations recorded, no actuator actions",
            Self::Supervised => "Every action needs human approval",
            Self::Trusted => "Auto-approved within guardrails",
            Self::Autonomous => "Fully autonomous within wide guardrails",
        }
    }
}

impl From<AutomationLevel> for u8 {
    fn from(level: AutomationLevel) -> Self {
        level as u8
    }
}

impl From<u8> for AutomationLevel {
    fn from(v: u8) -> Self {
        Self::from_u8(v)
    }
}

impl fmt::Display for AutomationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{} ({})", *self as u8, match self {
            Self::Observe => "Observe",
            Self::Assist => "Assist",
            Self::Supervised => "Supervised",
            Self::Trusted => "Trusted",
            Self::Autonomous => "Autonomous",
        })
    }
}
