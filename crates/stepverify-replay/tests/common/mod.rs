#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use stepverify_authority::{MemoryAuthority, SparseMemory};
use stepverify_core::format::to_json;
use stepverify_core::{MemoryAccess, SiblingPath, Step, TraceLoader, Word};
use stepverify_replay::{
    NoopObserver, RemoteSession, Report, ReplayObserver, StepResult, UnitResult, Verifier,
    VerifyConfig,
};

pub const TREE_DEPTH: usize = 16;

pub fn word(byte: u8) -> Word {
    Word::repeat_byte(byte)
}

/// Records steps the way a trace producer does: every access carries a
/// proof against the tree as it was when the access happened.
pub struct TraceBuilder {
    memory: SparseMemory,
    steps: Vec<Step>,
    current: Vec<MemoryAccess>,
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self::from_memory(SparseMemory::new(TREE_DEPTH))
    }

    pub fn from_memory(memory: SparseMemory) -> Self {
        Self {
            memory,
            steps: Vec::new(),
            current: Vec::new(),
        }
    }

    pub fn read(mut self, address: u64) -> Self {
        self.current.push(self.memory.record_read(address));
        self
    }

    pub fn write(mut self, address: u64, value: Word) -> Self {
        let access = self.memory.record_write(address, value);
        self.current.push(access);
        self
    }

    pub fn end_step(mut self, brackets: &[&str]) -> Self {
        let accesses = std::mem::take(&mut self.current);
        let brackets = brackets.iter().map(|b| b.to_string()).collect();
        self.steps.push(Step::new(accesses).with_brackets(brackets));
        self
    }

    pub fn build(self) -> Vec<Step> {
        self.steps
    }
}

/// Flip one byte of one sibling hash of an access.
pub fn corrupt_sibling(access: &mut MemoryAccess, level: usize) {
    let mut hashes = access.proof.siblings.leaf_to_root().to_vec();
    hashes[level].0[0] ^= 0xff;
    access.proof.siblings = SiblingPath::from_leaf_to_root(hashes);
}

/// Drop every root except the one on the first access of the first step,
/// which is all most trace producers declare.
pub fn keep_initial_root_only(steps: &mut [Step]) {
    for (index, step) in steps.iter_mut().enumerate() {
        let skip = usize::from(index == 0);
        for access in step.accesses.iter_mut().skip(skip) {
            access.proof.root_hash = None;
        }
    }
}

pub fn write_trace(dir: &Path, name: &str, steps: &[Step]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, to_json(steps).unwrap()).unwrap();
    path
}

pub fn session(authority: MemoryAuthority) -> RemoteSession<MemoryAuthority> {
    RemoteSession::open(authority).unwrap()
}

pub fn verify_path(
    session: &RemoteSession<MemoryAuthority>,
    path: &Path,
    config: VerifyConfig,
) -> Report {
    let files = TraceLoader::new().load(path).unwrap();
    Verifier::new(session, config, &NoopObserver)
        .unwrap()
        .verify(&files)
        .unwrap()
}

/// A program image: `nops` words the stand-in machine skips, then a
/// `tohost` word carrying `exit_code`.
pub fn program_image(nops: usize, exit_code: u64) -> Vec<u8> {
    let mut image = vec![0u8; nops * 8];
    image.extend_from_slice(&((exit_code << 1) | 1).to_le_bytes());
    image
}

/// Observer that keeps a log of what it was told.
#[derive(Default)]
pub struct Recorder {
    pub log: RefCell<Vec<String>>,
    pub cycles: RefCell<Vec<u64>>,
}

impl ReplayObserver for Recorder {
    fn on_unit_start(&self, index: usize, name: &str) {
        self.log.borrow_mut().push(format!("start {index} {name}"));
    }

    fn on_step(&self, unit: usize, result: &StepResult) {
        self.log
            .borrow_mut()
            .push(format!("step {unit}/{} {}", result.index, result.outcome));
    }

    fn on_unit_complete(&self, result: &UnitResult) {
        self.log
            .borrow_mut()
            .push(format!("done {} {}", result.index, result.outcome));
    }

    fn on_cycle(&self, cycle: u64) {
        self.cycles.borrow_mut().push(cycle);
    }
}
