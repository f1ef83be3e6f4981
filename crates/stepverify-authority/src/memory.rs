//! In-process authority for development and testing.
//!
//! `MemoryAuthority` verifies proofs exactly like a deployed memory manager
//! would (recomputing the root from the submitted value and siblings) and
//! keeps snapshots as cloned state. Step semantics are a stand-in machine:
//! a step consumes the word at the program counter, and a word with its low
//! bit set is taken as the HTIF `tohost` value and halts the machine.
//!
//! A step also consumes the proofs submitted for it. An instance replaying a
//! trace goes back to accepting proofs afterwards, so one instance can carry
//! a whole trace. Instances holding bulk-loaded words stay in the replay
//! phase and keep stepping.

use alloy_primitives::{Address, U256};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use tracing::debug;

use stepverify_core::manifest::RAM_START;
use stepverify_core::{AccessKind, Hash, Word};

use crate::authority::{
    Accounts, Authority, InstanceHandle, ProtocolDescriptor, ReplayArrays, SnapshotId, StepShape,
};
use crate::error::{AuthorityError, Result};
use crate::receipt::{AuthorityEvent, Receipt};
use crate::tree::{root_from_proof, WORD_SIZE};

/// When the stand-in machine accepts a handle-addressed or explicit step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepPolicy {
    /// Refuse to step an instance that had a proof rejected.
    #[default]
    RequireCompleteLog,
    /// Step regardless of rejected proofs.
    AcceptAll,
}

/// Counters that survive snapshot reverts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallStats {
    pub instantiations: usize,
    pub proofs: usize,
    pub rejected_proofs: usize,
    pub steps: usize,
    pub reverts: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Proof,
    Replay,
}

#[derive(Debug, Clone)]
struct Instance {
    root: Hash,
    phase: Phase,
    log: ReplayArrays,
    rejected: usize,
    memory: BTreeMap<u64, Word>,
    pc: u64,
    cycle: u64,
    tohost: Option<u64>,
}

impl Instance {
    fn new(root: Hash) -> Self {
        Self {
            root,
            phase: Phase::Proof,
            log: ReplayArrays::default(),
            rejected: 0,
            memory: BTreeMap::new(),
            pc: RAM_START,
            cycle: 0,
            tohost: None,
        }
    }

    fn end_step(&mut self) {
        if self.memory.is_empty() {
            self.phase = Phase::Proof;
            self.log = ReplayArrays::default();
            self.rejected = 0;
        }
    }
}

#[derive(Debug, Clone, Default)]
struct State {
    instances: BTreeMap<U256, Instance>,
    next_index: u64,
}

#[derive(Debug, Default)]
struct Faults {
    transport_failures: usize,
    step_rejections: usize,
}

pub struct MemoryAuthority {
    protocol: ProtocolDescriptor,
    policy: StepPolicy,
    state: RefCell<State>,
    snapshots: RefCell<BTreeMap<u64, State>>,
    next_snapshot: Cell<u64>,
    faults: RefCell<Faults>,
    stats: Cell<CallStats>,
}

impl MemoryAuthority {
    pub fn new(protocol: ProtocolDescriptor) -> Self {
        Self {
            protocol,
            policy: StepPolicy::default(),
            state: RefCell::new(State::default()),
            snapshots: RefCell::new(BTreeMap::new()),
            next_snapshot: Cell::new(1),
            faults: RefCell::new(Faults::default()),
            stats: Cell::new(CallStats::default()),
        }
    }

    pub fn with_policy(mut self, policy: StepPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Start handle numbering at `index`.
    pub fn with_first_index(mut self, index: u64) -> Self {
        self.state.get_mut().next_index = index;
        self
    }

    /// Make the next `count` handle-addressed steps fail at the transport level.
    pub fn fail_next_steps(&self, count: usize) {
        self.faults.borrow_mut().transport_failures = count;
    }

    /// Make the next `count` step transitions revert.
    pub fn reject_next_steps(&self, count: usize) {
        self.faults.borrow_mut().step_rejections = count;
    }

    pub fn stats(&self) -> CallStats {
        self.stats.get()
    }

    /// Number of instances currently held.
    pub fn instance_count(&self) -> usize {
        self.state.borrow().instances.len()
    }

    /// Current root of an instance.
    pub fn root_of(&self, handle: InstanceHandle) -> Option<Hash> {
        self.state
            .borrow()
            .instances
            .get(&handle.0)
            .map(|instance| instance.root)
    }

    fn record(&self, update: impl FnOnce(&mut CallStats)) {
        let mut stats = self.stats.get();
        update(&mut stats);
        self.stats.set(stats);
    }

    fn take_scripted_rejection(&self) -> bool {
        let mut faults = self.faults.borrow_mut();
        if faults.step_rejections > 0 {
            faults.step_rejections -= 1;
            return true;
        }
        false
    }

    fn with_instance<T>(
        &self,
        handle: InstanceHandle,
        f: impl FnOnce(&mut Instance) -> T,
    ) -> Option<T> {
        self.state.borrow_mut().instances.get_mut(&handle.0).map(f)
    }

    fn prove(
        &self,
        handle: InstanceHandle,
        kind: AccessKind,
        address: u64,
        old_value: Word,
        new_value: Word,
        root_to_leaf: &[Hash],
    ) -> Result<Receipt> {
        self.record(|stats| stats.proofs += 1);
        let finish_phase = self.protocol.finish_phase;
        let outcome = self.with_instance(handle, |instance| {
            if finish_phase && instance.phase == Phase::Replay {
                return Err("proof phase already finished".to_string());
            }
            if address % WORD_SIZE != 0 {
                return Err(format!("address {address:#x} is not word aligned"));
            }
            if root_from_proof(address, &old_value, root_to_leaf) != instance.root {
                instance.rejected += 1;
                return Err("proof does not match the current root".to_string());
            }
            if kind == AccessKind::Write {
                instance.root = root_from_proof(address, &new_value, root_to_leaf);
            }
            instance.log.push(address, new_value, kind);
            Ok(())
        });

        match outcome {
            None => Ok(Receipt::reverted(format!("unknown instance {handle}"))),
            Some(Ok(())) => Ok(Receipt::success(Vec::new())),
            Some(Err(reason)) => {
                self.record(|stats| stats.rejected_proofs += 1);
                debug!(%handle, address, %reason, "proof rejected");
                Ok(Receipt::reverted(reason))
            }
        }
    }

    fn ready_to_step(&self, instance: &Instance) -> std::result::Result<(), String> {
        if self.protocol.finish_phase && instance.phase != Phase::Replay {
            return Err("proof phase not finished".to_string());
        }
        if self.policy == StepPolicy::RequireCompleteLog && instance.rejected > 0 {
            return Err(format!(
                "replay log incomplete ({} rejected proofs)",
                instance.rejected
            ));
        }
        Ok(())
    }
}

impl Default for MemoryAuthority {
    fn default() -> Self {
        Self::new(ProtocolDescriptor::default())
    }
}

impl Authority for MemoryAuthority {
    fn name(&self) -> &str {
        "memory"
    }

    fn protocol(&self) -> ProtocolDescriptor {
        self.protocol
    }

    fn accounts(&self) -> Result<Accounts> {
        Ok(Accounts {
            provider: Address::with_last_byte(0xa0),
            client: Address::with_last_byte(0xa1),
        })
    }

    fn instantiate(&self, _owner: Address, _client: Address, root: Hash) -> Result<Receipt> {
        self.record(|stats| stats.instantiations += 1);
        let mut state = self.state.borrow_mut();
        let index = U256::from(state.next_index);
        state.next_index += 1;
        state.instances.insert(index, Instance::new(root));
        Ok(Receipt::success(vec![AuthorityEvent::MemoryCreated {
            handle: InstanceHandle(index),
            root,
        }]))
    }

    fn prove_read(
        &self,
        handle: InstanceHandle,
        address: u64,
        value: Word,
        root_to_leaf: &[Hash],
    ) -> Result<Receipt> {
        self.prove(handle, AccessKind::Read, address, value, value, root_to_leaf)
    }

    fn prove_write(
        &self,
        handle: InstanceHandle,
        address: u64,
        old_value: Word,
        new_value: Word,
        root_to_leaf: &[Hash],
    ) -> Result<Receipt> {
        self.prove(
            handle,
            AccessKind::Write,
            address,
            old_value,
            new_value,
            root_to_leaf,
        )
    }

    fn finish_proof_phase(&self, handle: InstanceHandle) -> Result<Receipt> {
        if !self.protocol.finish_phase {
            return Err(AuthorityError::ProtocolMismatch(
                "authority has no proof phase to finish".to_string(),
            ));
        }
        let outcome = self.with_instance(handle, |instance| {
            if instance.phase == Phase::Replay {
                return false;
            }
            instance.phase = Phase::Replay;
            true
        });
        Ok(match outcome {
            None => Receipt::reverted(format!("unknown instance {handle}")),
            Some(false) => Receipt::reverted("proof phase already finished"),
            Some(true) => Receipt::success(Vec::new()),
        })
    }

    fn replay_arrays(&self, handle: InstanceHandle) -> Result<ReplayArrays> {
        self.state
            .borrow()
            .instances
            .get(&handle.0)
            .map(|instance| instance.log.clone())
            .ok_or_else(|| AuthorityError::UnknownInstance(handle.to_string()))
    }

    fn step(&self, handle: InstanceHandle) -> Result<Receipt> {
        if self.protocol.step_shape != StepShape::HandleAddressed {
            return Err(AuthorityError::ProtocolMismatch(
                "handle-addressed step invoked on an explicit-array authority".to_string(),
            ));
        }
        {
            let mut faults = self.faults.borrow_mut();
            if faults.transport_failures > 0 {
                faults.transport_failures -= 1;
                return Err(AuthorityError::Transport("connection reset".to_string()));
            }
        }
        self.record(|stats| stats.steps += 1);
        if self.take_scripted_rejection() {
            return Ok(Receipt::reverted("step rejected"));
        }

        let mut state = self.state.borrow_mut();
        let Some(instance) = state.instances.get_mut(&handle.0) else {
            return Ok(Receipt::reverted(format!("unknown instance {handle}")));
        };
        if let Err(reason) = self.ready_to_step(instance) {
            return Ok(Receipt::reverted(reason));
        }
        if instance.tohost.is_some() {
            return Ok(Receipt::reverted("machine already halted"));
        }

        let word = instance.memory.get(&instance.pc).copied().unwrap_or(Word::ZERO);
        let value = u64::from_le_bytes(word.0);
        instance.cycle += 1;
        let halt = value & 1 == 1;
        if halt {
            instance.tohost = Some(value);
        } else {
            instance.pc += WORD_SIZE;
        }
        instance.end_step();
        Ok(Receipt::success(vec![AuthorityEvent::StepStatus {
            cycle: instance.cycle,
            halt,
        }]))
    }

    fn step_with_arrays(&self, arrays: &ReplayArrays) -> Result<Receipt> {
        if self.protocol.step_shape != StepShape::ExplicitArray {
            return Err(AuthorityError::ProtocolMismatch(
                "explicit-array step invoked on a handle-addressed authority".to_string(),
            ));
        }
        self.record(|stats| stats.steps += 1);
        if self.take_scripted_rejection() {
            return Ok(Receipt::reverted("step rejected"));
        }
        if !arrays.is_consistent() {
            return Ok(Receipt::reverted("replay arrays differ in length"));
        }

        // Arrays read back from an instance must come from a complete log.
        // Arrays no instance produced are executed as given.
        let mut state = self.state.borrow_mut();
        let mut refusal = None;
        let mut stepped = None;
        for (index, instance) in state.instances.iter().filter(|(_, i)| i.log == *arrays) {
            match self.ready_to_step(instance) {
                Err(reason) if self.policy == StepPolicy::RequireCompleteLog => {
                    refusal.get_or_insert(reason);
                }
                _ => {
                    stepped = Some(*index);
                    break;
                }
            }
        }
        match stepped {
            Some(index) => {
                if let Some(instance) = state.instances.get_mut(&index) {
                    instance.end_step();
                }
            }
            None => {
                if let Some(reason) = refusal {
                    return Ok(Receipt::reverted(reason));
                }
            }
        }
        Ok(Receipt::success(vec![AuthorityEvent::StepStatus {
            cycle: 1,
            halt: false,
        }]))
    }

    fn write_word(&self, handle: InstanceHandle, address: u64, value: Word) -> Result<Receipt> {
        if address % WORD_SIZE != 0 {
            return Ok(Receipt::reverted(format!(
                "address {address:#x} is not word aligned"
            )));
        }
        let stored = self.with_instance(handle, |instance| {
            instance.memory.insert(address, value);
        });
        Ok(match stored {
            Some(()) => Receipt::success(Vec::new()),
            None => Receipt::reverted(format!("unknown instance {handle}")),
        })
    }

    fn htif_exit(&self, handle: InstanceHandle) -> Result<Receipt> {
        let tohost = self.with_instance(handle, |instance| instance.tohost);
        Ok(match tohost {
            None => Receipt::reverted(format!("unknown instance {handle}")),
            Some(None) => Receipt::reverted("machine has not halted"),
            Some(Some(value)) => Receipt::success(vec![AuthorityEvent::HtifExit {
                handle,
                exit_code: value >> 1,
            }]),
        })
    }

    fn snapshot(&self) -> Result<SnapshotId> {
        let id = self.next_snapshot.get();
        self.next_snapshot.set(id + 1);
        self.snapshots
            .borrow_mut()
            .insert(id, self.state.borrow().clone());
        Ok(SnapshotId(format!("{id:#x}")))
    }

    fn revert(&self, snapshot: &SnapshotId) -> Result<()> {
        let id = snapshot
            .0
            .strip_prefix("0x")
            .and_then(|digits| u64::from_str_radix(digits, 16).ok())
            .ok_or_else(|| AuthorityError::UnknownSnapshot(snapshot.to_string()))?;

        let mut snapshots = self.snapshots.borrow_mut();
        let state = snapshots
            .remove(&id)
            .ok_or_else(|| AuthorityError::UnknownSnapshot(snapshot.to_string()))?;
        // Later snapshots are invalidated along with the reverted one.
        snapshots.retain(|&other, _| other < id);
        *self.state.borrow_mut() = state;
        self.record(|stats| stats.reverts += 1);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAuthority")
            .field("protocol", &self.protocol)
            .field("policy", &self.policy)
            .field("instances", &self.instance_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::SparseMemory;

    fn open(authority: &MemoryAuthority, root: Hash) -> InstanceHandle {
        authority
            .instantiate(Address::ZERO, Address::ZERO, root)
            .unwrap()
            .created_instance()
            .unwrap()
    }

    #[test]
    fn accepts_valid_write_and_advances_root() {
        let authority = MemoryAuthority::default();
        let mut producer = SparseMemory::new(8);
        let handle = open(&authority, producer.root());

        let access = producer.record_write(0x10, Word::repeat_byte(1));
        let receipt = authority
            .prove_write(
                handle,
                access.address,
                access.read,
                access.resulting_value(),
                &access.proof.siblings.root_to_leaf(),
            )
            .unwrap();
        assert!(receipt.is_success());
        assert_eq!(authority.root_of(handle), Some(producer.root()));
    }

    #[test]
    fn rejected_proof_blocks_step_under_strict_policy() {
        let authority = MemoryAuthority::default();
        let producer = SparseMemory::new(8);
        let handle = open(&authority, producer.root());

        let access = producer.record_read(0x20);
        let receipt = authority
            .prove_read(handle, 0x20, Word::repeat_byte(9), &access.proof.siblings.root_to_leaf())
            .unwrap();
        assert!(!receipt.is_success());

        authority.finish_proof_phase(handle).unwrap();
        assert!(!authority.step(handle).unwrap().is_success());
        assert_eq!(authority.stats().rejected_proofs, 1);
    }

    #[test]
    fn one_instance_replays_consecutive_steps() {
        let authority = MemoryAuthority::default();
        let mut producer = SparseMemory::new(8);
        let handle = open(&authority, producer.root());

        for value in 1..=2u8 {
            let access = producer.record_write(0x10, Word::repeat_byte(value));
            let receipt = authority
                .prove_write(
                    handle,
                    access.address,
                    access.read,
                    access.resulting_value(),
                    &access.proof.siblings.root_to_leaf(),
                )
                .unwrap();
            assert!(receipt.is_success());
            authority.finish_proof_phase(handle).unwrap();
            assert!(authority.step(handle).unwrap().is_success());
        }
        assert_eq!(authority.root_of(handle), Some(producer.root()));
        assert!(authority.replay_arrays(handle).unwrap().is_empty());
    }

    #[test]
    fn unproven_arrays_are_stepped_as_given() {
        let authority = MemoryAuthority::new(ProtocolDescriptor::explicit_array());
        let mut arrays = ReplayArrays::default();
        arrays.push(0x8, Word::ZERO, AccessKind::Read);
        arrays.push(0x8, Word::repeat_byte(2), AccessKind::Write);
        assert!(authority.step_with_arrays(&arrays).unwrap().is_success());
    }

    #[test]
    fn step_requires_finished_proof_phase() {
        let authority = MemoryAuthority::default();
        let handle = open(&authority, Hash::ZERO);
        assert_eq!(
            authority.step(handle).unwrap().revert_reason(),
            Some("proof phase not finished")
        );
        authority.finish_proof_phase(handle).unwrap();
        assert!(authority.step(handle).unwrap().is_success());
    }

    #[test]
    fn revert_restores_state_and_invalidates_later_snapshots() {
        let authority = MemoryAuthority::default().with_first_index(40);
        let first = authority.snapshot().unwrap();
        let handle = open(&authority, Hash::ZERO);
        assert_eq!(handle, InstanceHandle(U256::from(40)));
        let second = authority.snapshot().unwrap();

        authority.revert(&first).unwrap();
        assert_eq!(authority.instance_count(), 0);
        assert!(matches!(
            authority.revert(&second),
            Err(AuthorityError::UnknownSnapshot(_))
        ));
        assert_eq!(open(&authority, Hash::ZERO), handle);
    }

    #[test]
    fn program_halts_on_tohost_word() {
        let authority = MemoryAuthority::default();
        let handle = open(&authority, Hash::ZERO);
        authority.finish_proof_phase(handle).unwrap();
        authority
            .write_word(handle, RAM_START + 8, Word::from((3u64 << 1 | 1).to_le_bytes()))
            .unwrap();

        let first = authority.step(handle).unwrap().step_status().unwrap();
        assert!(!first.halt);
        assert!(!authority.htif_exit(handle).unwrap().is_success());

        let second = authority.step(handle).unwrap().step_status().unwrap();
        assert_eq!((second.cycle, second.halt), (2, true));
        assert_eq!(authority.htif_exit(handle).unwrap().exit_code().unwrap(), 3);
    }

    #[test]
    fn call_shape_must_match_protocol() {
        let authority = MemoryAuthority::new(ProtocolDescriptor::explicit_array());
        let handle = open(&authority, Hash::ZERO);
        assert!(matches!(
            authority.step(handle),
            Err(AuthorityError::ProtocolMismatch(_))
        ));

        authority.finish_proof_phase(handle).unwrap();
        let arrays = authority.replay_arrays(handle).unwrap();
        assert!(authority.step_with_arrays(&arrays).unwrap().is_success());
    }
}
