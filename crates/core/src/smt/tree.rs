//! Persistent compact sparse Merkle tree.
//!
//! The tree is a value handle `{id, depth, root}`; all nodes live in a
//! [`NodeStore`]. Path bit `i` is bit `i` of the key's little-endian
//! encoding and selects the child at level `i` (set = right). A leaf sits
//! at the shallowest level where its key's path is unique, so a single
//! leaf under the root is the root itself.

use ark_ff::Zero;
use tracing::debug;

use super::node::Node;
use super::proof::{NodeAux, Proof};
use super::store::{NodeStore, WriteBatch};
use crate::error::{MerkleError, StorageError};
use crate::field::{fr_to_hex, fr_to_le_bytes, test_bit, FIELD_BYTES};
use crate::Fr;

/// Default number of levels for identity trees.
pub const DEFAULT_DEPTH: usize = 40;

/// Deepest tree whose paths still fit in a field element's bits.
pub const MAX_DEPTH: usize = 254;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SparseMerkleTree {
    id: u64,
    depth: usize,
    root: Fr,
}

fn check_depth(depth: usize) -> Result<(), MerkleError> {
    if !(2..=MAX_DEPTH).contains(&depth) {
        return Err(MerkleError::InvalidDepth(depth));
    }
    Ok(())
}

type Path = [u8; FIELD_BYTES];

impl SparseMerkleTree {
    /// Allocate a new, empty tree in `store`.
    pub async fn create<S: NodeStore + ?Sized>(store: &mut S, depth: usize) -> Result<Self, MerkleError> {
        check_depth(depth)?;
        let id = store.next_tree_id().await?;
        let mut batch = WriteBatch::new();
        batch.set_root(Fr::zero());
        store.commit(id, batch).await?;
        debug!(tree_id = id, depth, "created tree");
        Ok(Self { id, depth, root: Fr::zero() })
    }

    /// Open an existing tree at its persisted root.
    pub async fn load<S: NodeStore + ?Sized>(store: &mut S, id: u64, depth: usize) -> Result<Self, MerkleError> {
        check_depth(depth)?;
        let root = store
            .get_root(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("root of tree {id}")))?;
        Ok(Self { id, depth, root })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn root(&self) -> Fr {
        self.root
    }

    async fn node<S: NodeStore + ?Sized>(&self, store: &mut S, key: &Fr) -> Result<Node, MerkleError> {
        if key.is_zero() {
            return Ok(Node::Empty);
        }
        store
            .get_node(self.id, key)
            .await?
            .ok_or_else(|| MerkleError::MissingNode(fr_to_hex(key)))
    }

    /// Insert `(key, value)` and persist every new node plus the new root
    /// as one batch. The handle's root only advances once the batch landed.
    pub async fn add<S: NodeStore + ?Sized>(
        &mut self,
        store: &mut S,
        key: Fr,
        value: Fr,
    ) -> Result<Fr, MerkleError> {
        let path = fr_to_le_bytes(&key);
        let mut siblings: Vec<Fr> = Vec::new();
        let mut current = self.root;
        let mut lvl = 0;

        let bottom = loop {
            if lvl > self.depth - 1 {
                return Err(MerkleError::TreeFull);
            }
            match self.node(store, &current).await? {
                Node::Empty => break Node::Leaf { key, value },
                Node::Leaf { key: old_key, value: old_value } => {
                    if old_key == key {
                        return Err(MerkleError::KeyExists);
                    }
                    let old_path = fr_to_le_bytes(&old_key);
                    // Extend with empty siblings until the two paths split.
                    while test_bit(&path, lvl) == test_bit(&old_path, lvl) {
                        if lvl > self.depth - 2 {
                            return Err(MerkleError::TreeFull);
                        }
                        siblings.push(Fr::zero());
                        lvl += 1;
                    }
                    if lvl > self.depth - 2 {
                        return Err(MerkleError::TreeFull);
                    }
                    siblings.push(Node::Leaf { key: old_key, value: old_value }.hash()?);
                    lvl += 1;
                    break Node::Leaf { key, value };
                }
                Node::Middle { left, right } => {
                    if test_bit(&path, lvl) {
                        siblings.push(left);
                        current = right;
                    } else {
                        siblings.push(right);
                        current = left;
                    }
                    lvl += 1;
                }
            }
        };

        let mut batch = WriteBatch::new();
        let root = fold_up(&mut batch, &path, bottom, &siblings)?;
        batch.set_root(root);
        store.commit(self.id, batch).await?;

        debug!(tree_id = self.id, leaf_level = lvl, root = %fr_to_hex(&root), "added leaf");
        self.root = root;
        Ok(root)
    }

    /// Value stored under `key`.
    pub async fn get<S: NodeStore + ?Sized>(&self, store: &mut S, key: &Fr) -> Result<Fr, MerkleError> {
        let path = fr_to_le_bytes(key);
        let mut current = self.root;
        for lvl in 0..self.depth {
            match self.node(store, &current).await? {
                Node::Empty => return Err(MerkleError::NotFound),
                Node::Leaf { key: k, value } => {
                    return if k == *key { Ok(value) } else { Err(MerkleError::NotFound) };
                }
                Node::Middle { left, right } => {
                    current = if test_bit(&path, lvl) { right } else { left };
                }
            }
        }
        Err(MerkleError::NotFound)
    }

    /// Proof for `key` at the current root.
    pub async fn generate_proof<S: NodeStore + ?Sized>(
        &self,
        store: &mut S,
        key: &Fr,
    ) -> Result<(Proof, Fr), MerkleError> {
        self.generate_proof_at(store, key, &self.root).await
    }

    /// Proof for `key` at a historic root of this tree, together with the
    /// value found (zero for non-inclusion).
    pub async fn generate_proof_at<S: NodeStore + ?Sized>(
        &self,
        store: &mut S,
        key: &Fr,
        at_root: &Fr,
    ) -> Result<(Proof, Fr), MerkleError> {
        let path: Path = fr_to_le_bytes(key);
        let mut proof = Proof::empty(self.depth);
        let mut current = *at_root;

        for lvl in 0..self.depth {
            proof.depth = lvl;
            match self.node(store, &current).await? {
                Node::Empty => return Ok((proof, Fr::zero())),
                Node::Leaf { key: k, value } => {
                    if k == *key {
                        proof.existence = true;
                        return Ok((proof, value));
                    }
                    proof.node_aux = Some(NodeAux { key: k, value });
                    return Ok((proof, Fr::zero()));
                }
                Node::Middle { left, right } => {
                    let (next, sibling) = if test_bit(&path, lvl) { (right, left) } else { (left, right) };
                    proof.siblings[lvl] = sibling;
                    current = next;
                }
            }
        }
        Err(MerkleError::NotFound)
    }

    /// Check `proof` for `(key, value)` against the current root.
    pub fn verify_proof(&self, proof: &Proof, key: &Fr, value: &Fr) -> Result<bool, MerkleError> {
        proof.verify(&self.root, key, value)
    }
}

/// Hash `bottom` up through `siblings` (root-first), buffering every
/// non-empty node into `batch`. Returns the new root.
fn fold_up(batch: &mut WriteBatch, path: &Path, bottom: Node, siblings: &[Fr]) -> Result<Fr, MerkleError> {
    let mut key = bottom.hash()?;
    batch.put_node(key, bottom);
    for (lvl, sibling) in siblings.iter().enumerate().rev() {
        let node = if test_bit(path, lvl) {
            Node::Middle { left: *sibling, right: key }
        } else {
            Node::Middle { left: key, right: *sibling }
        };
        key = node.hash()?;
        batch.put_node(key, node);
    }
    Ok(key)
}

/// Root a proof commits to; see [`Proof::root`].
pub fn root_from_proof(proof: &Proof, key: &Fr, value: &Fr) -> Result<Fr, MerkleError> {
    proof.root(key, value)
}

/// Stateless proof check against an arbitrary root.
pub fn verify_proof(root: &Fr, proof: &Proof, key: &Fr, value: &Fr) -> Result<bool, MerkleError> {
    proof.verify(root, key, value)
}
