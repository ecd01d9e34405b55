//! Node/root storage contract for persistent trees.
//!
//! A store maps `(tree_id, node_hash)` to a node record and `tree_id` to the
//! tree's current root. Records are content-addressed, so writing the same
//! node twice is a no-op.

use std::collections::HashMap;

use async_trait::async_trait;

use super::node::Node;
use crate::error::StorageError;
use crate::Fr;

/// Node writes and the root update produced by one tree mutation.
///
/// A batch is applied as a unit through [`NodeStore::commit`]; the engine
/// never writes nodes outside a batch.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    nodes: Vec<(Fr, Node)>,
    root: Option<Fr>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_node(&mut self, key: Fr, node: Node) {
        self.nodes.push((key, node));
    }

    pub fn set_root(&mut self, root: Fr) {
        self.root = Some(root);
    }

    pub fn nodes(&self) -> &[(Fr, Node)] {
        &self.nodes
    }

    pub fn root(&self) -> Option<Fr> {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.root.is_none()
    }

    pub fn into_parts(self) -> (Vec<(Fr, Node)>, Option<Fr>) {
        (self.nodes, self.root)
    }
}

/// Capability interface over a node store.
///
/// Methods take `&mut self` so that an implementation may wrap a single
/// connection or an open transaction.
#[async_trait]
pub trait NodeStore: Send {
    /// Allocate a fresh, never reused tree id.
    async fn next_tree_id(&mut self) -> Result<u64, StorageError>;

    async fn get_node(&mut self, tree_id: u64, key: &Fr) -> Result<Option<Node>, StorageError>;

    async fn put_node(&mut self, tree_id: u64, key: &Fr, node: &Node) -> Result<(), StorageError>;

    async fn get_root(&mut self, tree_id: u64) -> Result<Option<Fr>, StorageError>;

    async fn put_root(&mut self, tree_id: u64, root: &Fr) -> Result<(), StorageError>;

    /// Apply a batch. Backends with transactions override this so that a
    /// failure leaves none of the batch behind.
    async fn commit(&mut self, tree_id: u64, batch: WriteBatch) -> Result<(), StorageError> {
        let (nodes, root) = batch.into_parts();
        for (key, node) in &nodes {
            self.put_node(tree_id, key, node).await?;
        }
        if let Some(root) = root {
            self.put_root(tree_id, &root).await?;
        }
        Ok(())
    }
}

/// Process-local store for tests and ephemeral trees.
#[derive(Clone, Debug, Default)]
pub struct MemoryNodeStore {
    nodes: HashMap<(u64, Fr), Node>,
    roots: HashMap<u64, Fr>,
    last_id: u64,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored node records across all trees.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn next_tree_id(&mut self) -> Result<u64, StorageError> {
        self.last_id += 1;
        Ok(self.last_id)
    }

    async fn get_node(&mut self, tree_id: u64, key: &Fr) -> Result<Option<Node>, StorageError> {
        Ok(self.nodes.get(&(tree_id, *key)).copied())
    }

    async fn put_node(&mut self, tree_id: u64, key: &Fr, node: &Node) -> Result<(), StorageError> {
        self.nodes.entry((tree_id, *key)).or_insert(*node);
        Ok(())
    }

    async fn get_root(&mut self, tree_id: u64) -> Result<Option<Fr>, StorageError> {
        Ok(self.roots.get(&tree_id).copied())
    }

    async fn put_root(&mut self, tree_id: u64, root: &Fr) -> Result<(), StorageError> {
        self.roots.insert(tree_id, *root);
        Ok(())
    }
}
