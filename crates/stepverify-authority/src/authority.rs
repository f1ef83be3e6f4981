//! The authority interface and the values that cross it.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

use stepverify_core::{AccessKind, Hash, Step, Word};

use crate::error::Result;
use crate::receipt::Receipt;

/// Opaque identifier of a memory instance, as assigned by the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceHandle(pub U256);

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque identifier of a saved authority state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub String);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accounts the replay client sends calls from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accounts {
    /// Submits proofs and bulk loads.
    pub provider: Address,
    /// Invokes step transitions.
    pub client: Address,
}

/// How the authority expects a step transition to be invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepShape {
    /// `Step(handle)`: the authority replays what was proven against the handle.
    HandleAddressed,
    /// `Step(positions, values, was_read)`: the caller passes the replay log.
    ExplicitArray,
}

impl fmt::Display for StepShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepShape::HandleAddressed => f.write_str("handle-addressed"),
            StepShape::ExplicitArray => f.write_str("explicit-array"),
        }
    }
}

/// Protocol revision an authority declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDescriptor {
    pub step_shape: StepShape,
    /// Whether proofs must be closed with `FinishProofPhase` before stepping.
    pub finish_phase: bool,
}

impl ProtocolDescriptor {
    pub fn handle_addressed() -> Self {
        Self {
            step_shape: StepShape::HandleAddressed,
            finish_phase: true,
        }
    }

    pub fn explicit_array() -> Self {
        Self {
            step_shape: StepShape::ExplicitArray,
            finish_phase: true,
        }
    }

    pub fn without_finish_phase(mut self) -> Self {
        self.finish_phase = false;
        self
    }
}

impl Default for ProtocolDescriptor {
    fn default() -> Self {
        Self::handle_addressed()
    }
}

/// The replay log of an instance, as three parallel arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayArrays {
    pub positions: Vec<u64>,
    pub values: Vec<Word>,
    pub was_read: Vec<bool>,
}

impl ReplayArrays {
    /// The arrays replaying `step` should leave behind: the read value for
    /// reads and the written value for writes.
    pub fn from_step(step: &Step) -> Self {
        let mut arrays = Self::default();
        for access in &step.accesses {
            arrays.push(access.address, access.resulting_value(), access.kind);
        }
        arrays
    }

    pub fn push(&mut self, position: u64, value: Word, kind: AccessKind) {
        self.positions.push(position);
        self.values.push(value);
        self.was_read.push(kind.is_read());
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Whether the three arrays have the same length.
    pub fn is_consistent(&self) -> bool {
        self.positions.len() == self.values.len() && self.values.len() == self.was_read.len()
    }
}

/// A remote stateful service owning memory roots and executing steps.
///
/// Calls the authority finalizes return a [`Receipt`] whether it accepted
/// them or not; `Err` means the call itself could not be completed. All calls
/// against one authority must be issued sequentially.
pub trait Authority {
    /// Name used in logs.
    fn name(&self) -> &str;

    fn protocol(&self) -> ProtocolDescriptor;

    fn accounts(&self) -> Result<Accounts>;

    /// Open a memory instance. The receipt carries a `MemoryCreated` event.
    fn instantiate(&self, owner: Address, client: Address, root: Hash) -> Result<Receipt>;

    fn prove_read(
        &self,
        handle: InstanceHandle,
        address: u64,
        value: Word,
        root_to_leaf: &[Hash],
    ) -> Result<Receipt>;

    fn prove_write(
        &self,
        handle: InstanceHandle,
        address: u64,
        old_value: Word,
        new_value: Word,
        root_to_leaf: &[Hash],
    ) -> Result<Receipt>;

    fn finish_proof_phase(&self, handle: InstanceHandle) -> Result<Receipt>;

    fn replay_arrays(&self, handle: InstanceHandle) -> Result<ReplayArrays>;

    /// Handle-addressed transition. The receipt carries a `StepStatus` event.
    fn step(&self, handle: InstanceHandle) -> Result<Receipt>;

    /// Explicit-array transition.
    fn step_with_arrays(&self, arrays: &ReplayArrays) -> Result<Receipt>;

    /// Store one word without a proof (bulk loading).
    fn write_word(&self, handle: InstanceHandle, address: u64, value: Word) -> Result<Receipt>;

    /// Read the exit code of a halted machine. The receipt carries an
    /// `HTIFExit` event.
    fn htif_exit(&self, handle: InstanceHandle) -> Result<Receipt>;

    fn snapshot(&self) -> Result<SnapshotId>;

    /// Restore a snapshot. The snapshot is consumed.
    fn revert(&self, snapshot: &SnapshotId) -> Result<()>;
}

impl<A: Authority + ?Sized> Authority for &A {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn protocol(&self) -> ProtocolDescriptor {
        (**self).protocol()
    }

    fn accounts(&self) -> Result<Accounts> {
        (**self).accounts()
    }

    fn instantiate(&self, owner: Address, client: Address, root: Hash) -> Result<Receipt> {
        (**self).instantiate(owner, client, root)
    }

    fn prove_read(
        &self,
        handle: InstanceHandle,
        address: u64,
        value: Word,
        root_to_leaf: &[Hash],
    ) -> Result<Receipt> {
        (**self).prove_read(handle, address, value, root_to_leaf)
    }

    fn prove_write(
        &self,
        handle: InstanceHandle,
        address: u64,
        old_value: Word,
        new_value: Word,
        root_to_leaf: &[Hash],
    ) -> Result<Receipt> {
        (**self).prove_write(handle, address, old_value, new_value, root_to_leaf)
    }

    fn finish_proof_phase(&self, handle: InstanceHandle) -> Result<Receipt> {
        (**self).finish_proof_phase(handle)
    }

    fn replay_arrays(&self, handle: InstanceHandle) -> Result<ReplayArrays> {
        (**self).replay_arrays(handle)
    }

    fn step(&self, handle: InstanceHandle) -> Result<Receipt> {
        (**self).step(handle)
    }

    fn step_with_arrays(&self, arrays: &ReplayArrays) -> Result<Receipt> {
        (**self).step_with_arrays(arrays)
    }

    fn write_word(&self, handle: InstanceHandle, address: u64, value: Word) -> Result<Receipt> {
        (**self).write_word(handle, address, value)
    }

    fn htif_exit(&self, handle: InstanceHandle) -> Result<Receipt> {
        (**self).htif_exit(handle)
    }

    fn snapshot(&self) -> Result<SnapshotId> {
        (**self).snapshot()
    }

    fn revert(&self, snapshot: &SnapshotId) -> Result<()> {
        (**self).revert(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepverify_core::{MemoryAccess, Proof};

    fn proof() -> Proof {
        Proof {
            root_hash: None,
            siblings: Default::default(),
        }
    }

    #[test]
    fn arrays_from_step_use_resulting_values() {
        let step = Step::new(vec![
            MemoryAccess::read(0x8, Word::repeat_byte(1), proof()),
            MemoryAccess::write(0x10, Word::ZERO, Word::repeat_byte(2), proof()),
        ]);
        let arrays = ReplayArrays::from_step(&step);
        assert_eq!(arrays.positions, vec![0x8, 0x10]);
        assert_eq!(arrays.values, vec![Word::repeat_byte(1), Word::repeat_byte(2)]);
        assert_eq!(arrays.was_read, vec![true, false]);
        assert!(arrays.is_consistent());
    }
}
