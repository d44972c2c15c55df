//! Lean incremental Merkle tree over Poseidon.
//!
//! Append-only binary tree with dynamic depth. The lean rule: a lone node
//! at any level is lifted unchanged to the next level, never paired with
//! itself or a zero filler. Proof siblings therefore skip lifted levels,
//! and the proof `index` packs the left/right path bits of the levels that
//! do hash - the same convention the withdrawal circuit expects, with
//! siblings padded to [`MAX_TREE_DEPTH`].

use std::collections::HashMap;

use ark_bn254::Fr;
use ark_ff::Zero;

use crate::error::PoolError;
use crate::field::{field_to_hex, MAX_TREE_DEPTH};
use crate::poseidon::hash2;

/// Inclusion proof in circuit layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleProof {
    pub root: Fr,
    pub leaf: Fr,
    /// Packed path bits: bit `i` is 1 when the node is the right child at
    /// the `i`-th hashing level. Not the leaf index.
    pub index: u64,
    /// Padded to [`MAX_TREE_DEPTH`] with zeros.
    pub siblings: Vec<Fr>,
    /// Number of meaningful entries in `siblings`.
    pub depth: usize,
}

impl MerkleProof {
    /// Recompute the root from the leaf and compare.
    pub fn verify(&self) -> bool {
        if self.depth > MAX_TREE_DEPTH || self.siblings.len() != MAX_TREE_DEPTH {
            return false;
        }
        let mut node = self.leaf;
        for level in 0..self.depth {
            let sibling = self.siblings[level];
            node = if (self.index >> level) & 1 == 0 {
                hash2(node, sibling)
            } else {
                hash2(sibling, node)
            };
        }
        node == self.root
    }
}

/// Append-only lean incremental Merkle tree.
#[derive(Clone, Debug)]
pub struct LeanImt {
    /// `nodes[0]` are the leaves; the top level holds the root when non-empty.
    nodes: Vec<Vec<Fr>>,
    /// Leaf -> first insertion index.
    indices: HashMap<Fr, u64>,
    depth: usize,
}

impl LeanImt {
    pub fn new() -> Self {
        Self {
            nodes: vec![Vec::new()],
            indices: HashMap::new(),
            depth: 0,
        }
    }

    /// Build a tree by inserting `leaves` in order.
    pub fn from_leaves<I: IntoIterator<Item = Fr>>(leaves: I) -> Self {
        let mut tree = Self::new();
        for leaf in leaves {
            tree.insert(leaf);
        }
        tree
    }

    pub fn size(&self) -> u64 {
        self.nodes[0].len() as u64
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// `0` for the empty tree, otherwise the top node.
    pub fn root(&self) -> Fr {
        if self.size() == 0 {
            Fr::zero()
        } else {
            self.nodes[self.depth][0]
        }
    }

    /// First insertion index of `leaf`, if present.
    pub fn index_of(&self, leaf: &Fr) -> Option<u64> {
        self.indices.get(leaf).copied()
    }

    /// Append a leaf and recompute the path to the root. Returns the new root.
    pub fn insert(&mut self, leaf: Fr) -> Fr {
        let index = self.size();
        if index + 1 > (1u64 << self.depth) {
            self.depth += 1;
        }
        while self.nodes.len() <= self.depth {
            self.nodes.push(Vec::new());
        }

        let mut node = leaf;
        let mut level_index = index;
        for level in 0..self.depth {
            Self::set_node(&mut self.nodes[level], level_index, node);
            if level_index & 1 == 1 {
                // right child: the pair is complete, hash it
                node = hash2(self.nodes[level][(level_index - 1) as usize], node);
            }
            // left child without a sibling is lifted unchanged
            level_index >>= 1;
        }
        Self::set_node(&mut self.nodes[self.depth], level_index, node);

        self.indices.entry(leaf).or_insert(index);
        self.root()
    }

    /// Inclusion proof for the leaf at `leaf_index`.
    pub fn proof(&self, leaf_index: u64) -> Result<MerkleProof, PoolError> {
        if leaf_index >= self.size() {
            return Err(PoolError::TreeLeafNotFound(format!(
                "index {leaf_index} of {}",
                self.size()
            )));
        }
        let leaf = self.nodes[0][leaf_index as usize];

        let mut siblings = Vec::with_capacity(self.depth);
        let mut packed_index = 0u64;
        let mut level_index = leaf_index;
        for level in 0..self.depth {
            let is_right = level_index & 1 == 1;
            let sibling_index = if is_right {
                level_index - 1
            } else {
                level_index + 1
            };
            if let Some(sibling) = self.nodes[level].get(sibling_index as usize) {
                if is_right {
                    packed_index |= 1u64 << siblings.len();
                }
                siblings.push(*sibling);
            }
            // no sibling: this node was lifted, the level contributes no hash
            level_index >>= 1;
        }

        let depth = siblings.len();
        siblings.resize(MAX_TREE_DEPTH, Fr::zero());
        Ok(MerkleProof {
            root: self.root(),
            leaf,
            index: packed_index,
            siblings,
            depth,
        })
    }

    /// Proof by leaf value.
    pub fn proof_of(&self, leaf: &Fr) -> Result<MerkleProof, PoolError> {
        let index = self
            .index_of(leaf)
            .ok_or_else(|| PoolError::TreeLeafNotFound(field_to_hex(leaf)))?;
        self.proof(index)
    }

    fn set_node(level: &mut Vec<Fr>, index: u64, node: Fr) {
        let index = index as usize;
        if index == level.len() {
            level.push(node);
        } else {
            level[index] = node;
        }
    }
}

impl Default for LeanImt {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: u64) -> Vec<Fr> {
        (1..=n).map(Fr::from).collect()
    }

    #[test]
    fn test_empty_tree() {
        let tree = LeanImt::new();
        assert_eq!(tree.root(), Fr::zero());
        assert_eq!(tree.size(), 0);
        assert_eq!(tree.depth(), 0);
    }

    #[test]
    fn test_single_leaf_root_is_leaf() {
        let mut tree = LeanImt::new();
        let leaf = Fr::from(42u64);
        let root = tree.insert(leaf);
        assert_eq!(root, leaf);
        assert_eq!(tree.depth(), 0);
    }

    #[test]
    fn test_lean_lifting_of_odd_node() {
        // three leaves: root must be H(H(l0, l1), l2), with l2 lifted once
        let mut tree = LeanImt::new();
        let l = leaves(3);
        for leaf in &l {
            tree.insert(*leaf);
        }
        let expected = hash2(hash2(l[0], l[1]), l[2]);
        assert_eq!(tree.root(), expected);
        assert_eq!(tree.depth(), 2);
    }

    #[test]
    fn test_every_proof_verifies() {
        // property: for every i < size, verify(proof(i)) across growing trees
        for n in 1..=16u64 {
            let mut tree = LeanImt::new();
            for leaf in leaves(n) {
                tree.insert(leaf);
            }
            for i in 0..n {
                let proof = tree.proof(i).unwrap();
                assert!(proof.verify(), "size {n}, leaf {i}");
                assert_eq!(proof.root, tree.root());
                assert_eq!(proof.siblings.len(), MAX_TREE_DEPTH);
            }
        }
    }

    #[test]
    fn test_lifted_leaf_has_shallow_proof() {
        let mut tree = LeanImt::new();
        for leaf in leaves(3) {
            tree.insert(leaf);
        }
        // leaf 2 skips the lifted level 0, so only one hashing level remains
        let proof = tree.proof(2).unwrap();
        assert_eq!(proof.depth, 1);
        assert_eq!(proof.index, 1);
        assert!(proof.verify());
    }

    #[test]
    fn test_tamper_rejection() {
        let mut tree = LeanImt::new();
        for leaf in leaves(8) {
            tree.insert(leaf);
        }
        let proof = tree.proof(3).unwrap();
        assert!(proof.verify());

        // flipping any single sibling must break verification
        for level in 0..proof.depth {
            let mut bad = proof.clone();
            bad.siblings[level] += Fr::from(1u64);
            assert!(!bad.verify(), "sibling {level}");
        }

        // flipping the packed index must break verification
        let mut bad = proof.clone();
        bad.index ^= 1;
        assert!(!bad.verify());

        // and so must a different leaf
        let mut bad = proof.clone();
        bad.leaf += Fr::from(1u64);
        assert!(!bad.verify());
    }

    #[test]
    fn test_index_of_first_occurrence() {
        let mut tree = LeanImt::new();
        let leaf = Fr::from(7u64);
        tree.insert(leaf);
        tree.insert(Fr::from(8u64));
        tree.insert(leaf);
        assert_eq!(tree.index_of(&leaf), Some(0));
        assert_eq!(tree.index_of(&Fr::from(9u64)), None);
    }

    #[test]
    fn test_unknown_leaf_errors() {
        let tree = LeanImt::new();
        assert!(matches!(
            tree.proof(0),
            Err(PoolError::TreeLeafNotFound(_))
        ));
        assert!(matches!(
            tree.proof_of(&Fr::from(1u64)),
            Err(PoolError::TreeLeafNotFound(_))
        ));
    }

    #[test]
    fn test_roots_match_incremental_and_batch() {
        // property 7 shape: inserting a sequence one-by-one equals a fresh
        // tree built over the same sequence
        let seq = leaves(11);
        let mut a = LeanImt::new();
        for leaf in &seq {
            a.insert(*leaf);
        }
        let mut b = LeanImt::new();
        for leaf in &seq {
            b.insert(*leaf);
        }
        assert_eq!(a.root(), b.root());
    }
}
