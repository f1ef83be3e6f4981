//! Trace types.
//!
//! A trace is what a trace producer recorded while running the stepped
//! machine locally: for every step, the memory accesses it performed and a
//! Merkle proof for each of them. Everything here is read-only once loaded.

use alloy_primitives::{FixedBytes, B256};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A 64-bit memory word, as held by the authority at an aligned address.
pub type Word = FixedBytes<8>;

/// A 32-byte Merkle node hash.
pub type Hash = B256;

/// Whether an access proves a read or replaces a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    Read,
    Write,
}

impl AccessKind {
    pub fn is_read(&self) -> bool {
        matches!(self, AccessKind::Read)
    }
}

/// Sibling hashes of a Merkle proof.
///
/// Trace files store siblings from the leaf up to the root, while the
/// authority expects them from the root down to the leaf. The path keeps the
/// on-disk order and only hands out the wire order through
/// [`SiblingPath::root_to_leaf`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiblingPath(Vec<Hash>);

impl SiblingPath {
    /// Build a path from hashes ordered leaf to root (the on-disk order).
    pub fn from_leaf_to_root(hashes: Vec<Hash>) -> Self {
        Self(hashes)
    }

    /// Build a path from hashes ordered root to leaf (the wire order).
    pub fn from_root_to_leaf(mut hashes: Vec<Hash>) -> Self {
        hashes.reverse();
        Self(hashes)
    }

    pub fn leaf_to_root(&self) -> &[Hash] {
        &self.0
    }

    /// Siblings in the order the authority consumes them.
    pub fn root_to_leaf(&self) -> Vec<Hash> {
        self.0.iter().rev().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Merkle proof attached to a memory access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    /// Root the proof verifies against. Producers usually only fill this in
    /// on the first access of a step.
    pub root_hash: Option<Hash>,
    pub siblings: SiblingPath,
}

/// One authenticated memory operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryAccess {
    pub kind: AccessKind,
    /// Byte address into the authority's memory space.
    pub address: u64,
    /// Value the authority must currently hold at `address`.
    pub read: Word,
    /// Replacement value, present for writes only.
    pub written: Option<Word>,
    pub proof: Proof,
}

impl MemoryAccess {
    pub fn read(address: u64, value: Word, proof: Proof) -> Self {
        Self {
            kind: AccessKind::Read,
            address,
            read: value,
            written: None,
            proof,
        }
    }

    pub fn write(address: u64, read: Word, written: Word, proof: Proof) -> Self {
        Self {
            kind: AccessKind::Write,
            address,
            read,
            written: Some(written),
            proof,
        }
    }

    /// The value this access leaves behind at `address`.
    pub fn resulting_value(&self) -> Word {
        match self.kind {
            AccessKind::Read => self.read,
            AccessKind::Write => self.written.unwrap_or(self.read),
        }
    }
}

/// Cycle counters recorded alongside a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSpan {
    pub start: u64,
    pub end: u64,
}

/// One state transition of the stepped machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Step {
    /// Accesses to replay, in order, before the transition is invoked.
    pub accesses: Vec<MemoryAccess>,
    /// Execution-context breadcrumbs, used only when reporting failures.
    pub brackets: Vec<String>,
    pub cycles: Option<CycleSpan>,
}

impl Step {
    pub fn new(accesses: Vec<MemoryAccess>) -> Self {
        Self {
            accesses,
            brackets: Vec::new(),
            cycles: None,
        }
    }

    pub fn with_brackets(mut self, brackets: Vec<String>) -> Self {
        self.brackets = brackets;
        self
    }

    /// Root hash declared by the first access of this step.
    pub fn root_hash(&self) -> Option<Hash> {
        self.accesses.first().and_then(|access| access.proof.root_hash)
    }

    /// Whether any access carries Merkle material. Sequence files record
    /// bare accesses with neither roots nor siblings.
    pub fn carries_proofs(&self) -> bool {
        self.accesses
            .iter()
            .any(|access| access.proof.root_hash.is_some() || !access.proof.siblings.is_empty())
    }

    /// The last `n` bracket entries (fewer if the step has fewer).
    pub fn bracket_tail(&self, n: usize) -> &[String] {
        let start = self.brackets.len().saturating_sub(n);
        &self.brackets[start..]
    }
}

/// A recorded sequence of steps to replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    /// Display name: the file name, or `file#test` for sequence files.
    pub name: String,
    pub source: PathBuf,
    pub steps: Vec<Step>,
}

impl Trace {
    pub fn new(name: impl Into<String>, source: impl Into<PathBuf>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            steps,
        }
    }

    /// Root hash of the first access of the first step.
    pub fn initial_root(&self) -> Option<Hash> {
        self.steps.first().and_then(Step::root_hash)
    }

    /// Whether every step from `first` on declares its own root, so each one
    /// can start from a fresh instance.
    pub fn roots_every_step(&self, first: usize) -> bool {
        let rest = self.steps.get(first..).unwrap_or_default();
        !rest.is_empty() && rest.iter().all(|step| step.root_hash().is_some())
    }

    pub fn access_count(&self) -> usize {
        self.steps.iter().map(|step| step.accesses.len()).sum()
    }
}
