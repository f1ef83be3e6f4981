//! Sparse Merkle tree over 64-bit memory words.
//!
//! Leaves are the SHA-256 of a word, inner nodes the SHA-256 of the
//! concatenated children. Empty subtrees are precomputed per level so a tree
//! only stores the words that were actually written.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use stepverify_core::{AccessKind, Hash, MemoryAccess, Proof, SiblingPath, Word};

/// Bytes per memory word.
pub const WORD_SIZE: u64 = 8;

/// Deepest tree a 64-bit byte address space of 8-byte words can need.
pub const MAX_DEPTH: usize = 61;

/// Hash of a single word.
pub fn leaf_hash(word: &Word) -> Hash {
    Hash::from_slice(&Sha256::digest(word.as_slice()))
}

/// Hash of two sibling nodes.
pub fn combine(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left.as_slice());
    hasher.update(right.as_slice());
    Hash::from_slice(&hasher.finalize())
}

/// Recompute a root from a word and its siblings in root-to-leaf order.
pub fn root_from_proof(address: u64, value: &Word, root_to_leaf: &[Hash]) -> Hash {
    let index = address / WORD_SIZE;
    let mut node = leaf_hash(value);
    for (level, sibling) in root_to_leaf.iter().rev().enumerate() {
        let bit = index.checked_shr(level as u32).unwrap_or(0) & 1;
        node = if bit == 1 {
            combine(sibling, &node)
        } else {
            combine(&node, sibling)
        };
    }
    node
}

/// Empty node hashes, `empty[0]` being the hash of a zero word.
fn empty_nodes(depth: usize) -> Vec<Hash> {
    let mut nodes = Vec::with_capacity(depth + 1);
    nodes.push(leaf_hash(&Word::ZERO));
    for level in 0..depth {
        let below = nodes[level];
        nodes.push(combine(&below, &below));
    }
    nodes
}

/// In-memory sparse tree. Addresses beyond the tree wrap around.
#[derive(Debug, Clone)]
pub struct SparseMemory {
    depth: usize,
    words: BTreeMap<u64, Word>,
    empty: Vec<Hash>,
}

impl SparseMemory {
    pub fn new(depth: usize) -> Self {
        let depth = depth.min(MAX_DEPTH);
        Self {
            depth,
            words: BTreeMap::new(),
            empty: empty_nodes(depth),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn root(&self) -> Hash {
        self.node(self.depth, 0)
    }

    pub fn read(&self, address: u64) -> Word {
        self.words
            .get(&self.word_index(address))
            .copied()
            .unwrap_or(Word::ZERO)
    }

    pub fn write(&mut self, address: u64, value: Word) {
        let index = self.word_index(address);
        if value == Word::ZERO {
            self.words.remove(&index);
        } else {
            self.words.insert(index, value);
        }
    }

    /// Siblings of the leaf holding `address`.
    pub fn siblings(&self, address: u64) -> SiblingPath {
        let index = self.word_index(address);
        let hashes = (0..self.depth)
            .map(|level| self.node(level, (index >> level) ^ 1))
            .collect();
        SiblingPath::from_leaf_to_root(hashes)
    }

    /// Record a read of `address` as a trace producer would.
    pub fn record_read(&self, address: u64) -> MemoryAccess {
        MemoryAccess::read(address, self.read(address), self.proof(address))
    }

    /// Record a write of `value` to `address` and apply it.
    ///
    /// The proof is taken against the root before the write, which is what
    /// the authority checks the prior value against.
    pub fn record_write(&mut self, address: u64, value: Word) -> MemoryAccess {
        let access = MemoryAccess::write(address, self.read(address), value, self.proof(address));
        self.write(address, value);
        access
    }

    /// Replay an access against this tree, as an authority would.
    pub fn apply(&mut self, access: &MemoryAccess) -> bool {
        let siblings = access.proof.siblings.root_to_leaf();
        if root_from_proof(access.address, &access.read, &siblings) != self.root() {
            return false;
        }
        if access.kind == AccessKind::Write {
            self.write(access.address, access.resulting_value());
        }
        true
    }

    fn proof(&self, address: u64) -> Proof {
        Proof {
            root_hash: Some(self.root()),
            siblings: self.siblings(address),
        }
    }

    fn word_index(&self, address: u64) -> u64 {
        let index = address / WORD_SIZE;
        if self.depth >= 64 {
            index
        } else {
            index & ((1u64 << self.depth) - 1)
        }
    }

    fn node(&self, level: usize, index: u64) -> Hash {
        let first = index << level;
        let last = first + ((1u64 << level) - 1);
        if self.words.range(first..=last).next().is_none() {
            return self.empty[level];
        }
        if level == 0 {
            return leaf_hash(&self.words[&first]);
        }
        combine(
            &self.node(level - 1, index * 2),
            &self.node(level - 1, index * 2 + 1),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(byte: u8) -> Word {
        Word::repeat_byte(byte)
    }

    #[test]
    fn empty_tree_root_matches_precomputed_node() {
        let memory = SparseMemory::new(4);
        assert_eq!(memory.root(), empty_nodes(4)[4]);
    }

    #[test]
    fn proof_recomputes_root() {
        let mut memory = SparseMemory::new(6);
        memory.write(0x10, word(0x11));
        memory.write(0x28, word(0x22));

        for address in [0x0, 0x10, 0x28, 0x1f8] {
            let siblings = memory.siblings(address).root_to_leaf();
            assert_eq!(
                root_from_proof(address, &memory.read(address), &siblings),
                memory.root()
            );
        }
    }

    #[test]
    fn proof_only_verifies_in_root_to_leaf_order() {
        let mut memory = SparseMemory::new(5);
        memory.write(0x18, word(0x07));
        let path = memory.siblings(0x10);
        let value = memory.read(0x10);

        assert_eq!(root_from_proof(0x10, &value, &path.root_to_leaf()), memory.root());
        assert_ne!(root_from_proof(0x10, &value, path.leaf_to_root()), memory.root());
    }

    #[test]
    fn recorded_write_advances_root() {
        let mut producer = SparseMemory::new(4);
        let mut authority = producer.clone();
        let before = producer.root();

        let access = producer.record_write(0x10, word(0x01));
        assert_eq!(access.proof.root_hash, Some(before));
        assert_eq!(access.read, Word::ZERO);
        assert_ne!(producer.root(), before);

        assert!(authority.apply(&access));
        assert_eq!(authority.root(), producer.root());
        assert!(!authority.apply(&access));
    }

    #[test]
    fn writing_zero_restores_empty_root() {
        let mut memory = SparseMemory::new(3);
        let empty = memory.root();
        memory.write(0x8, word(0xff));
        memory.write(0x8, Word::ZERO);
        assert_eq!(memory.root(), empty);
    }
}
