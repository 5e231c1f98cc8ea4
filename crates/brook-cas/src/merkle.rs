//! Binary Merkle tree over ordered chunk hashes.
//!
//! The root is a pure function of the ordered leaf sequence: interior nodes
//! are `H(left || right)`, and a level with an odd node count duplicates its
//! last node. This padding rule is fixed for the whole system — producers
//! and verifiers must agree on it for identifiers to be portable.
//!
//! Two verification strategies are supported:
//! - full recomputation from all leaf hashes ([`verify_leaf`]), which is
//!   always available since manifests carry the full ordered hash list;
//! - sibling authentication paths ([`MerkleTree::proof`] /
//!   [`MerkleProof::verify`]) for checking a single leaf without rebuilding
//!   the whole tree.

use brook_types::{HASH_LEN, HashAlgorithm};
use serde::{Deserialize, Serialize};

/// Compute the Merkle root over an ordered sequence of leaf hashes.
///
/// A single leaf is its own root. Zero leaves hash to `H("")`.
pub fn merkle_root(algo: HashAlgorithm, leaves: &[[u8; HASH_LEN]]) -> [u8; HASH_LEN] {
    if leaves.is_empty() {
        return algo.digest(b"");
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = reduce(algo, &level);
    }
    level[0]
}

/// Hash one level into its parent level, duplicating the last node when the
/// count is odd.
fn reduce(algo: HashAlgorithm, level: &[[u8; HASH_LEN]]) -> Vec<[u8; HASH_LEN]> {
    let mut next = Vec::with_capacity(level.len().div_ceil(2));
    for pair in level.chunks(2) {
        let left = &pair[0];
        let right = pair.get(1).unwrap_or(left);
        next.push(combine(algo, left, right));
    }
    next
}

fn combine(algo: HashAlgorithm, left: &[u8; HASH_LEN], right: &[u8; HASH_LEN]) -> [u8; HASH_LEN] {
    let mut buf = [0u8; HASH_LEN * 2];
    buf[..HASH_LEN].copy_from_slice(left);
    buf[HASH_LEN..].copy_from_slice(right);
    algo.digest(&buf)
}

/// A fully-built Merkle tree retaining every level, for proof generation.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    algo: HashAlgorithm,
    /// `levels[0]` is the leaves; the last level holds the single root.
    levels: Vec<Vec<[u8; HASH_LEN]>>,
}

impl MerkleTree {
    /// Build a tree from ordered leaf hashes.
    pub fn build(algo: HashAlgorithm, leaves: Vec<[u8; HASH_LEN]>) -> Self {
        let mut levels = vec![leaves];
        loop {
            let next = match levels.last() {
                Some(level) if level.len() > 1 => reduce(algo, level),
                _ => break,
            };
            levels.push(next);
        }
        Self { algo, levels }
    }

    /// The tree root. Matches [`merkle_root`] over the same leaves.
    pub fn root(&self) -> [u8; HASH_LEN] {
        match self.levels.last().and_then(|level| level.first()) {
            Some(root) => *root,
            None => self.algo.digest(b""),
        }
    }

    /// Number of leaves the tree was built over.
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Generate the sibling authentication path for the leaf at `index`.
    ///
    /// Returns `None` when the index is out of range. Where a level has an
    /// odd count and the node is last, it is its own sibling (the duplicate
    /// padding rule).
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut path = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut idx = index;
        for level in &self.levels[..self.levels.len().saturating_sub(1)] {
            let sibling_idx = idx ^ 1;
            let sibling = level.get(sibling_idx).or_else(|| level.get(idx))?;
            path.push(*sibling);
            idx /= 2;
        }

        Some(MerkleProof {
            index: index as u64,
            path,
        })
    }
}

/// Sibling hashes proving one leaf's membership under a root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Index of the proven leaf.
    pub index: u64,
    /// Sibling hash per level, leaf level first.
    pub path: Vec<[u8; HASH_LEN]>,
}

impl MerkleProof {
    /// Check that `leaf_hash` at this proof's index folds up to
    /// `expected_root`.
    pub fn verify(
        &self,
        algo: HashAlgorithm,
        leaf_hash: &[u8; HASH_LEN],
        expected_root: &[u8; HASH_LEN],
    ) -> bool {
        let mut acc = *leaf_hash;
        let mut idx = self.index;
        for sibling in &self.path {
            acc = if idx % 2 == 0 {
                combine(algo, &acc, sibling)
            } else {
                combine(algo, sibling, &acc)
            };
            idx /= 2;
        }
        acc == *expected_root
    }
}

/// Verify a single leaf by full recomputation from all known leaf hashes.
///
/// `leaves` must be the complete ordered hash list (as carried by a
/// manifest); the leaf at `index` is replaced with `leaf_hash` before the
/// root is recomputed, so a forged hash can never satisfy a correct root.
pub fn verify_leaf(
    algo: HashAlgorithm,
    index: usize,
    leaf_hash: &[u8; HASH_LEN],
    leaves: &[[u8; HASH_LEN]],
    expected_root: &[u8; HASH_LEN],
) -> bool {
    if index >= leaves.len() {
        return false;
    }
    let mut candidate = leaves.to_vec();
    candidate[index] = *leaf_hash;
    merkle_root(algo, &candidate) == *expected_root
}
