//! Outcomes of replaying steps and traces.

use serde::{Deserialize, Serialize};

/// Observable result of a step transition or a whole unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// The authority finalized the call but refused it.
    Reverted { reason: String },
    /// The machine halted and reported this HTIF exit code.
    Halted { exit_code: u64 },
}

impl Outcome {
    pub fn reverted(reason: impl Into<String>) -> Self {
        Outcome::Reverted {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn is_reverted(&self) -> bool {
        matches!(self, Outcome::Reverted { .. })
    }
}

/// Result of a single proof submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AccessOutcome {
    Accepted,
    Rejected { reason: String },
}

impl AccessOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AccessOutcome::Accepted)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "SUCCESS"),
            Outcome::Reverted { reason } => write!(f, "REVERTED ({reason})"),
            Outcome::Halted { exit_code } => write!(f, "HALTED with exit code {exit_code}"),
        }
    }
}
