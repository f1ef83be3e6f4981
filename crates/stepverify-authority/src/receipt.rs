//! Finalized call results and the events read back from them.
//!
//! Authorities hand back return values through events rather than return
//! data, so every mutating call yields a [`Receipt`] and the caller extracts
//! the event it expects in a second step.

use std::fmt;

use alloy_primitives::B256;
use serde::Serialize;
use stepverify_core::Hash;

use crate::authority::InstanceHandle;
use crate::error::{AuthorityError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Reverted { reason: String },
}

/// Events the replay client knows how to interpret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AuthorityEvent {
    MemoryCreated { handle: InstanceHandle, root: Hash },
    StepStatus { cycle: u64, halt: bool },
    HtifExit { handle: InstanceHandle, exit_code: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    MemoryCreated,
    StepStatus,
    HtifExit,
}

impl AuthorityEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            AuthorityEvent::MemoryCreated { .. } => EventKind::MemoryCreated,
            AuthorityEvent::StepStatus { .. } => EventKind::StepStatus,
            AuthorityEvent::HtifExit { .. } => EventKind::HtifExit,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::MemoryCreated => "MemoryCreated",
            EventKind::StepStatus => "StepStatus",
            EventKind::HtifExit => "HTIFExit",
        };
        f.write_str(name)
    }
}

/// Status event emitted by a step transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepStatus {
    pub cycle: u64,
    pub halt: bool,
}

/// A finalized call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub tx_hash: Option<B256>,
    pub status: ReceiptStatus,
    pub events: Vec<AuthorityEvent>,
}

impl Receipt {
    pub fn success(events: Vec<AuthorityEvent>) -> Self {
        Self {
            tx_hash: None,
            status: ReceiptStatus::Success,
            events,
        }
    }

    pub fn reverted(reason: impl Into<String>) -> Self {
        Self {
            tx_hash: None,
            status: ReceiptStatus::Reverted {
                reason: reason.into(),
            },
            events: Vec::new(),
        }
    }

    pub fn with_tx_hash(mut self, tx_hash: B256) -> Self {
        self.tx_hash = Some(tx_hash);
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ReceiptStatus::Success)
    }

    /// Reason the authority gave for refusing the call, if it did.
    pub fn revert_reason(&self) -> Option<&str> {
        match &self.status {
            ReceiptStatus::Success => None,
            ReceiptStatus::Reverted { reason } => Some(reason),
        }
    }

    /// The most recent event of `kind` carried by this receipt.
    pub fn extract_event(&self, kind: EventKind) -> Result<&AuthorityEvent> {
        self.events
            .iter()
            .rev()
            .find(|event| event.kind() == kind)
            .ok_or(AuthorityError::EventNotFound(kind))
    }

    pub fn created_instance(&self) -> Result<InstanceHandle> {
        match self.extract_event(EventKind::MemoryCreated)? {
            AuthorityEvent::MemoryCreated { handle, .. } => Ok(*handle),
            _ => Err(AuthorityError::EventNotFound(EventKind::MemoryCreated)),
        }
    }

    pub fn step_status(&self) -> Result<StepStatus> {
        match self.extract_event(EventKind::StepStatus)? {
            AuthorityEvent::StepStatus { cycle, halt } => Ok(StepStatus {
                cycle: *cycle,
                halt: *halt,
            }),
            _ => Err(AuthorityError::EventNotFound(EventKind::StepStatus)),
        }
    }

    pub fn exit_code(&self) -> Result<u64> {
        match self.extract_event(EventKind::HtifExit)? {
            AuthorityEvent::HtifExit { exit_code, .. } => Ok(*exit_code),
            _ => Err(AuthorityError::EventNotFound(EventKind::HtifExit)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    #[test]
    fn extract_event_prefers_the_most_recent_match() {
        let receipt = Receipt::success(vec![
            AuthorityEvent::MemoryCreated {
                handle: InstanceHandle(U256::from(3)),
                root: Hash::ZERO,
            },
            AuthorityEvent::StepStatus {
                cycle: 1,
                halt: false,
            },
            AuthorityEvent::MemoryCreated {
                handle: InstanceHandle(U256::from(9)),
                root: Hash::ZERO,
            },
        ]);
        assert_eq!(
            receipt.created_instance().unwrap(),
            InstanceHandle(U256::from(9))
        );
        assert_eq!(receipt.step_status().unwrap().cycle, 1);
    }

    #[test]
    fn missing_event_is_reported() {
        let receipt = Receipt::success(Vec::new());
        assert!(matches!(
            receipt.exit_code(),
            Err(AuthorityError::EventNotFound(EventKind::HtifExit))
        ));
        assert_eq!(Receipt::reverted("nope").revert_reason(), Some("nope"));
    }
}
