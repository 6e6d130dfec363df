//! Map-proof and range-proof reconstruction.
//!
//! Every value a server response claims about the ledger crosses exactly one
//! of the two algorithms here before it is used: the sparse-map proof binds a
//! key to a value (or to absence) under a single root digest, and the range
//! proof binds an ordered run of history leaves under a single root digest.
//! Both recompute the root from scratch and hard-stop on any disagreement
//! with the caller-supplied expected root.
//!
//! The tree uses domain-separated BLAKE2b-256 hashing to combine leaves, with
//! distinct domains for map and list structures. Builders for both tree
//! shapes live next to the verifiers so that fixtures and server-side tooling
//! can produce proofs the verifiers accept.

use blake2::digest::{consts::U32, Digest as _};
use blake2::Blake2b;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::data::{digest_to_hex, Digest};

const MAP_LEAF_DOMAIN: &[u8] = b"LENS_MAP_LEAF";
const MAP_NODE_DOMAIN: &[u8] = b"LENS_MAP_NODE";
const MAP_EMPTY_DOMAIN: &[u8] = b"LENS_MAP_EMPTY";
const LIST_LEAF_DOMAIN: &[u8] = b"LENS_LIST_LEAF";
const LIST_NODE_DOMAIN: &[u8] = b"LENS_LIST_NODE";
const LIST_EMPTY_DOMAIN: &[u8] = b"LENS_LIST_EMPTY";

/// Bit depth of the sparse map trie; one level per key bit.
pub const MAP_KEY_BITS: usize = 256;

/// Errors raised while reconstructing a proof.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProofError {
    /// The recomputed root disagrees with the expected root.
    #[error(
        "reconstructed root {} does not match expected root {}",
        digest_to_hex(.actual),
        digest_to_hex(.expected)
    )]
    RootMismatch {
        /// Root the caller required.
        expected: Digest,
        /// Root the proof actually reconstructs.
        actual: Digest,
    },
    /// The proof yielded a different number of leaves than requested.
    #[error("proof yielded {actual} leaves, range requested {expected}")]
    LengthMismatch {
        /// Leaves the requested range spans.
        expected: u64,
        /// Leaves the proof produced.
        actual: u64,
    },
    /// The proof structure itself is invalid.
    #[error("malformed proof: {0}")]
    Malformed(&'static str),
}

fn hash_parts(domain: &[u8], parts: &[&[u8]]) -> Digest {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(domain);
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn map_leaf_hash(key: &Digest, value: &[u8]) -> Digest {
    hash_parts(MAP_LEAF_DOMAIN, &[key, value])
}

fn map_node_hash(left: &Digest, right: &Digest) -> Digest {
    hash_parts(MAP_NODE_DOMAIN, &[left, right])
}

fn list_leaf_hash(value: &[u8]) -> Digest {
    hash_parts(LIST_LEAF_DOMAIN, &[value])
}

fn list_node_hash(left: &Digest, right: Option<&Digest>) -> Digest {
    match right {
        Some(right) => hash_parts(LIST_NODE_DOMAIN, &[left, right]),
        None => hash_parts(LIST_NODE_DOMAIN, &[left]),
    }
}

/// Root digest of an empty history list.
pub fn empty_list_digest() -> Digest {
    hash_parts(LIST_EMPTY_DOMAIN, &[])
}

/// Digests of empty map subtrees, indexed by height above the leaf level.
fn empty_map_chain() -> Vec<Digest> {
    let mut chain = Vec::with_capacity(MAP_KEY_BITS + 1);
    chain.push(hash_parts(MAP_EMPTY_DOMAIN, &[]));
    for height in 1..=MAP_KEY_BITS {
        let below = chain[height - 1];
        chain.push(map_node_hash(&below, &below));
    }
    chain
}

/// Bit of `key` at trie depth `index`, MSB-first; bit 0 decides at the root.
fn key_bit(key: &Digest, index: usize) -> bool {
    (key[index / 8] >> (7 - index % 8)) & 1 == 1
}

/// Non-default sibling encountered while ascending a map proof path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapProofNode {
    /// Levels above the leaf at which the sibling is combined.
    pub height: u16,
    /// Sibling subtree digest.
    pub sibling: Digest,
}

/// Succinct proof that a key is bound to a value (or absent) in a sparse map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapProof {
    /// Key whose binding is proven.
    pub key: Digest,
    /// Bound value, or `None` when proving absence.
    pub value: Option<Vec<u8>>,
    /// Non-default siblings, strictly ascending by height; omitted levels
    /// use the empty-subtree digest.
    pub siblings: Vec<MapProofNode>,
}

impl MapProof {
    /// Recomputes the map root from the proof path and compares it with the
    /// expected root. On match, returns the bound value (`None` for a proven
    /// absence); on mismatch, fails hard with [`ProofError::RootMismatch`].
    pub fn check_against(&self, expected_root: &Digest) -> Result<Option<&[u8]>, ProofError> {
        let empties = empty_map_chain();
        let mut cur = match &self.value {
            Some(value) => map_leaf_hash(&self.key, value),
            None => empties[0],
        };
        let mut next_sibling = self.siblings.iter().peekable();
        for height in 0..MAP_KEY_BITS {
            let sibling = match next_sibling.peek() {
                Some(node) if (node.height as usize) == height => {
                    let sibling = node.sibling;
                    next_sibling.next();
                    sibling
                }
                Some(node) if (node.height as usize) < height => {
                    return Err(ProofError::Malformed(
                        "sibling heights must be strictly ascending",
                    ));
                }
                _ => empties[height],
            };
            // Ascending step `height` resolves the key bit closest to the
            // leaf first.
            cur = if key_bit(&self.key, MAP_KEY_BITS - 1 - height) {
                map_node_hash(&sibling, &cur)
            } else {
                map_node_hash(&cur, &sibling)
            };
        }
        if next_sibling.next().is_some() {
            return Err(ProofError::Malformed("sibling height out of range"));
        }
        if cur != *expected_root {
            return Err(ProofError::RootMismatch {
                expected: *expected_root,
                actual: cur,
            });
        }
        Ok(self.value.as_deref())
    }
}

/// In-memory sparse map used to produce roots and proofs.
#[derive(Debug, Clone, Default)]
pub struct MapTree {
    entries: BTreeMap<Digest, Vec<u8>>,
}

impl MapTree {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `key` to `value`, replacing any previous binding.
    pub fn insert(&mut self, key: Digest, value: Vec<u8>) {
        self.entries.insert(key, value);
    }

    /// Computes the map root over all current bindings.
    pub fn root(&self) -> Digest {
        let empties = empty_map_chain();
        let entries: Vec<(&Digest, &Vec<u8>)> = self.entries.iter().collect();
        Self::subtree_hash(&entries, 0, &empties)
    }

    /// Builds a presence or absence proof for `key`.
    pub fn proof(&self, key: &Digest) -> MapProof {
        let empties = empty_map_chain();
        let entries: Vec<(&Digest, &Vec<u8>)> = self.entries.iter().collect();
        let mut siblings = Vec::new();
        let mut current: &[(&Digest, &Vec<u8>)] = &entries;
        for depth in 0..MAP_KEY_BITS {
            if current.is_empty() {
                break;
            }
            let split = current.partition_point(|(k, _)| !key_bit(k, depth));
            let (zeros, ones) = current.split_at(split);
            let (path, sibling) = if key_bit(key, depth) {
                (ones, zeros)
            } else {
                (zeros, ones)
            };
            if !sibling.is_empty() {
                siblings.push(MapProofNode {
                    height: (MAP_KEY_BITS - 1 - depth) as u16,
                    sibling: Self::subtree_hash(sibling, depth + 1, &empties),
                });
            }
            current = path;
        }
        siblings.reverse();
        MapProof {
            key: *key,
            value: self.entries.get(key).cloned(),
            siblings,
        }
    }

    fn subtree_hash(
        entries: &[(&Digest, &Vec<u8>)],
        depth: usize,
        empties: &[Digest],
    ) -> Digest {
        if entries.is_empty() {
            return empties[MAP_KEY_BITS - depth];
        }
        if depth == MAP_KEY_BITS {
            let (key, value) = entries[0];
            return map_leaf_hash(key, value);
        }
        let split = entries.partition_point(|(k, _)| !key_bit(k, depth));
        let (zeros, ones) = entries.split_at(split);
        let left = Self::subtree_hash(zeros, depth + 1, empties);
        let right = Self::subtree_hash(ones, depth + 1, empties);
        map_node_hash(&left, &right)
    }
}

/// Succinct proof that an ordered run of leaves belongs to a list summarised
/// by a single root digest. Subtrees outside the proven range are pruned to
/// their digests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListProof {
    /// Both children carry proven leaves.
    Full(Box<ListProof>, Box<ListProof>),
    /// Only the left child carries proven leaves; `None` when the right
    /// subtree does not exist at this list length.
    Left(Box<ListProof>, Option<Digest>),
    /// Only the right child carries proven leaves.
    Right(Digest, Box<ListProof>),
    /// A proven leaf value.
    Leaf(Vec<u8>),
}

fn tree_height(len: u64) -> u32 {
    len.next_power_of_two().trailing_zeros()
}

fn collect(
    proof: &ListProof,
    height: u32,
    index: u64,
    len: u64,
    out: &mut Vec<(u64, Vec<u8>)>,
) -> Result<Digest, ProofError> {
    match proof {
        ListProof::Leaf(value) => {
            if height != 0 {
                return Err(ProofError::Malformed("leaf above the base level"));
            }
            if index >= len {
                return Err(ProofError::Malformed("leaf index beyond list length"));
            }
            out.push((index, value.clone()));
            Ok(list_leaf_hash(value))
        }
        ListProof::Full(left, right) => {
            if height == 0 {
                return Err(ProofError::Malformed("branch at the leaf level"));
            }
            let left = collect(left, height - 1, index * 2, len, out)?;
            let right = collect(right, height - 1, index * 2 + 1, len, out)?;
            Ok(list_node_hash(&left, Some(&right)))
        }
        ListProof::Left(left, right_hash) => {
            if height == 0 {
                return Err(ProofError::Malformed("branch at the leaf level"));
            }
            let left = collect(left, height - 1, index * 2, len, out)?;
            Ok(list_node_hash(&left, right_hash.as_ref()))
        }
        ListProof::Right(left_hash, right) => {
            if height == 0 {
                return Err(ProofError::Malformed("branch at the leaf level"));
            }
            let right = collect(right, height - 1, index * 2 + 1, len, out)?;
            Ok(list_node_hash(left_hash, Some(&right)))
        }
    }
}

/// Reconstructs the root of a list of `len` leaves from a range proof and
/// returns the leaf values for `from..to` in order.
///
/// The proof must yield exactly the requested leaves: a shortfall or surplus
/// is [`ProofError::LengthMismatch`], leaves outside the range are
/// [`ProofError::Malformed`], and a root disagreement is
/// [`ProofError::RootMismatch`]. The range must be non-empty; an empty list
/// is summarised by [`empty_list_digest`] and carries no proof.
pub fn collect_range(
    proof: &ListProof,
    len: u64,
    from: u64,
    to: u64,
    expected_root: &Digest,
) -> Result<Vec<Vec<u8>>, ProofError> {
    if from >= to || to > len {
        return Err(ProofError::Malformed("requested range out of bounds"));
    }
    let mut leaves = Vec::new();
    let root = collect(proof, tree_height(len), 0, len, &mut leaves)?;
    if root != *expected_root {
        return Err(ProofError::RootMismatch {
            expected: *expected_root,
            actual: root,
        });
    }
    if leaves.len() as u64 != to - from {
        return Err(ProofError::LengthMismatch {
            expected: to - from,
            actual: leaves.len() as u64,
        });
    }
    for (offset, (index, _)) in leaves.iter().enumerate() {
        if *index != from + offset as u64 {
            return Err(ProofError::Malformed("leaves outside the requested range"));
        }
    }
    Ok(leaves.into_iter().map(|(_, value)| value).collect())
}

/// In-memory leaf list used to produce roots and range proofs.
#[derive(Debug, Clone, Default)]
pub struct ListTree {
    leaves: Vec<Vec<u8>>,
}

impl ListTree {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a leaf value.
    pub fn push(&mut self, value: Vec<u8>) {
        self.leaves.push(value);
    }

    /// Number of leaves.
    pub fn len(&self) -> u64 {
        self.leaves.len() as u64
    }

    /// Whether the list holds no leaves.
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Computes the list root.
    pub fn root(&self) -> Digest {
        if self.leaves.is_empty() {
            return empty_list_digest();
        }
        self.subtree_hash(tree_height(self.len()), 0)
    }

    /// Builds a proof for the leaves in `from..to`; `None` when the range is
    /// empty or extends past the list.
    pub fn range_proof(&self, from: u64, to: u64) -> Option<ListProof> {
        if from >= to || to > self.len() {
            return None;
        }
        Some(self.build(tree_height(self.len()), 0, from, to))
    }

    fn build(&self, height: u32, index: u64, from: u64, to: u64) -> ListProof {
        if height == 0 {
            return ListProof::Leaf(self.leaves[index as usize].clone());
        }
        let len = self.len();
        let child_span = 1u64 << (height - 1);
        let left_index = index * 2;
        let right_index = index * 2 + 1;
        let right_start = right_index * child_span;
        let right_exists = right_start < len;
        let left_overlaps = from < (left_index * child_span + child_span).min(len)
            && to > left_index * child_span;
        let right_overlaps =
            right_exists && from < (right_start + child_span).min(len) && to > right_start;
        if left_overlaps && right_overlaps {
            ListProof::Full(
                Box::new(self.build(height - 1, left_index, from, to)),
                Box::new(self.build(height - 1, right_index, from, to)),
            )
        } else if left_overlaps {
            let right = right_exists.then(|| self.subtree_hash(height - 1, right_index));
            ListProof::Left(Box::new(self.build(height - 1, left_index, from, to)), right)
        } else {
            ListProof::Right(
                self.subtree_hash(height - 1, left_index),
                Box::new(self.build(height - 1, right_index, from, to)),
            )
        }
    }

    fn subtree_hash(&self, height: u32, index: u64) -> Digest {
        if height == 0 {
            return list_leaf_hash(&self.leaves[index as usize]);
        }
        let child_span = 1u64 << (height - 1);
        let left = self.subtree_hash(height - 1, index * 2);
        let right_index = index * 2 + 1;
        if right_index * child_span < self.len() {
            let right = self.subtree_hash(height - 1, right_index);
            list_node_hash(&left, Some(&right))
        } else {
            list_node_hash(&left, None)
        }
    }
}
