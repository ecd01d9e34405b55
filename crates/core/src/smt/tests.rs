//! Integration tests for the SMT module.

use super::*;
use crate::error::{MerkleError, StorageError};
use crate::field::fr_from_decimal;
use crate::Fr;
use ark_ff::Zero;
use async_trait::async_trait;

fn fr(n: u64) -> Fr {
    Fr::from(n)
}

/// Store whose commits can be made to fail.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryNodeStore,
    fail_commits: bool,
}

#[async_trait]
impl NodeStore for FlakyStore {
    async fn next_tree_id(&mut self) -> Result<u64, StorageError> {
        self.inner.next_tree_id().await
    }
    async fn get_node(&mut self, tree_id: u64, key: &Fr) -> Result<Option<Node>, StorageError> {
        self.inner.get_node(tree_id, key).await
    }
    async fn put_node(&mut self, tree_id: u64, key: &Fr, node: &Node) -> Result<(), StorageError> {
        self.inner.put_node(tree_id, key, node).await
    }
    async fn get_root(&mut self, tree_id: u64) -> Result<Option<Fr>, StorageError> {
        self.inner.get_root(tree_id).await
    }
    async fn put_root(&mut self, tree_id: u64, root: &Fr) -> Result<(), StorageError> {
        self.inner.put_root(tree_id, root).await
    }
    async fn commit(&mut self, tree_id: u64, batch: WriteBatch) -> Result<(), StorageError> {
        if self.fail_commits {
            return Err(StorageError::Backend("connection reset".into()));
        }
        self.inner.commit(tree_id, batch).await
    }
}

#[tokio::test]
async fn test_known_roots() {
    // Reference roots for a 10-level tree (circomlib smt.js vectors).
    let mut store = MemoryNodeStore::new();
    let mut tree = SparseMerkleTree::create(&mut store, 10).await.unwrap();
    assert_eq!(tree.root(), Fr::zero());

    tree.add(&mut store, fr(1), fr(2)).await.unwrap();
    assert_eq!(
        tree.root(),
        fr_from_decimal("13578938674299138072471463694055224830892726234048532520316387704878000008795").unwrap()
    );

    tree.add(&mut store, fr(33), fr(44)).await.unwrap();
    assert_eq!(
        tree.root(),
        fr_from_decimal("5412393676474193513566895793055462193090331607895808993925969873307089394741").unwrap()
    );

    tree.add(&mut store, fr(1234), fr(9876)).await.unwrap();
    assert_eq!(
        tree.root(),
        fr_from_decimal("14204494359367183802864593755198662203838502594566452929175967972147978322084").unwrap()
    );
}

#[tokio::test]
async fn test_single_leaf_is_root() {
    let mut store = MemoryNodeStore::new();
    let mut tree = SparseMerkleTree::create(&mut store, 32).await.unwrap();
    let root = tree.add(&mut store, fr(7), fr(8)).await.unwrap();
    assert_eq!(root, leaf_hash(fr(7), fr(8)).unwrap());
}

#[tokio::test]
async fn test_duplicate_key_rejected() {
    let mut store = MemoryNodeStore::new();
    let mut tree = SparseMerkleTree::create(&mut store, 32).await.unwrap();
    tree.add(&mut store, fr(5), fr(1)).await.unwrap();
    let before = tree.root();

    let err = tree.add(&mut store, fr(5), fr(2)).await.unwrap_err();
    assert_eq!(err, MerkleError::KeyExists);
    assert_eq!(tree.root(), before);
}

#[tokio::test]
async fn test_get_values() {
    let mut store = MemoryNodeStore::new();
    let mut tree = SparseMerkleTree::create(&mut store, 32).await.unwrap();
    for k in [1u64, 2, 3, 17, 1024] {
        tree.add(&mut store, fr(k), fr(k * 10)).await.unwrap();
    }

    assert_eq!(tree.get(&mut store, &fr(17)).await.unwrap(), fr(170));
    assert_eq!(tree.get(&mut store, &fr(1024)).await.unwrap(), fr(10240));
    assert_eq!(tree.get(&mut store, &fr(4)).await.unwrap_err(), MerkleError::NotFound);
}

#[tokio::test]
async fn test_inclusion_proofs_have_fixed_length() {
    let mut store = MemoryNodeStore::new();
    let mut tree = SparseMerkleTree::create(&mut store, 40).await.unwrap();
    let items = [(1u64, 100u64), (5, 50), (100, 25), (6, 3), (2, 9)];
    for (k, v) in items {
        tree.add(&mut store, fr(k), fr(v)).await.unwrap();
    }

    for (k, v) in items {
        let (proof, value) = tree.generate_proof(&mut store, &fr(k)).await.unwrap();
        assert!(proof.existence);
        assert_eq!(value, fr(v));
        assert_eq!(proof.siblings.len(), 40);
        assert!(tree.verify_proof(&proof, &fr(k), &fr(v)).unwrap());
        assert!(!tree.verify_proof(&proof, &fr(k), &fr(v + 1)).unwrap());
    }
}

#[tokio::test]
async fn test_non_inclusion_with_aux_leaf() {
    let mut store = MemoryNodeStore::new();
    let mut tree = SparseMerkleTree::create(&mut store, 32).await.unwrap();
    tree.add(&mut store, fr(1), fr(11)).await.unwrap();
    tree.add(&mut store, fr(2), fr(22)).await.unwrap();

    // 5 = 0b101 follows 1 = 0b001 down to the leaf at level 1
    let (proof, value) = tree.generate_proof(&mut store, &fr(5)).await.unwrap();
    assert!(!proof.existence);
    assert_eq!(value, Fr::zero());
    let aux = proof.node_aux.expect("aux leaf");
    assert_eq!(aux.key, fr(1));
    assert_eq!(aux.value, fr(11));
    assert!(tree.verify_proof(&proof, &fr(5), &Fr::zero()).unwrap());
}

#[tokio::test]
async fn test_non_inclusion_empty_slot() {
    let mut store = MemoryNodeStore::new();
    let mut tree = SparseMerkleTree::create(&mut store, 32).await.unwrap();
    // 1 and 3 share bit 0, leaving the left subtree of the root empty
    tree.add(&mut store, fr(1), fr(1)).await.unwrap();
    tree.add(&mut store, fr(3), fr(3)).await.unwrap();

    let (proof, _) = tree.generate_proof(&mut store, &fr(4)).await.unwrap();
    assert!(!proof.existence);
    assert!(proof.node_aux.is_none());
    assert!(tree.verify_proof(&proof, &fr(4), &Fr::zero()).unwrap());
}

#[tokio::test]
async fn test_proof_at_historic_root() {
    let mut store = MemoryNodeStore::new();
    let mut tree = SparseMerkleTree::create(&mut store, 32).await.unwrap();
    tree.add(&mut store, fr(1), fr(10)).await.unwrap();
    let old_root = tree.root();
    tree.add(&mut store, fr(2), fr(20)).await.unwrap();

    let (old_proof, _) = tree.generate_proof_at(&mut store, &fr(2), &old_root).await.unwrap();
    assert!(!old_proof.existence);
    assert!(verify_proof(&old_root, &old_proof, &fr(2), &Fr::zero()).unwrap());

    let (new_proof, _) = tree.generate_proof(&mut store, &fr(2)).await.unwrap();
    assert!(new_proof.existence);
    assert_eq!(root_from_proof(&new_proof, &fr(2), &fr(20)).unwrap(), tree.root());
}

#[tokio::test]
async fn test_tree_full() {
    let mut store = MemoryNodeStore::new();
    let mut tree = SparseMerkleTree::create(&mut store, 2).await.unwrap();
    tree.add(&mut store, fr(1), fr(1)).await.unwrap();
    tree.add(&mut store, fr(2), fr(2)).await.unwrap();

    let err = tree.add(&mut store, fr(3), fr(3)).await.unwrap_err();
    assert_eq!(err, MerkleError::TreeFull);
}

#[tokio::test]
async fn test_invalid_depth() {
    let mut store = MemoryNodeStore::new();
    assert_eq!(
        SparseMerkleTree::create(&mut store, 1).await.unwrap_err(),
        MerkleError::InvalidDepth(1)
    );
    assert!(SparseMerkleTree::create(&mut store, 255).await.is_err());
}

#[tokio::test]
async fn test_reload_from_store() {
    let mut store = MemoryNodeStore::new();
    let mut tree = SparseMerkleTree::create(&mut store, 32).await.unwrap();
    tree.add(&mut store, fr(9), fr(99)).await.unwrap();

    let reloaded = SparseMerkleTree::load(&mut store, tree.id(), 32).await.unwrap();
    assert_eq!(reloaded.root(), tree.root());
    assert_eq!(reloaded.get(&mut store, &fr(9)).await.unwrap(), fr(99));

    assert!(matches!(
        SparseMerkleTree::load(&mut store, 999, 32).await,
        Err(MerkleError::Storage(StorageError::NotFound(_)))
    ));
}

#[tokio::test]
async fn test_trees_are_isolated() {
    let mut store = MemoryNodeStore::new();
    let mut a = SparseMerkleTree::create(&mut store, 32).await.unwrap();
    let b = SparseMerkleTree::create(&mut store, 32).await.unwrap();
    assert_ne!(a.id(), b.id());

    a.add(&mut store, fr(1), fr(1)).await.unwrap();
    assert_eq!(b.root(), Fr::zero());
    assert_eq!(b.get(&mut store, &fr(1)).await.unwrap_err(), MerkleError::NotFound);
}

#[tokio::test]
async fn test_failed_commit_leaves_tree_unchanged() {
    let mut store = FlakyStore::default();
    let mut tree = SparseMerkleTree::create(&mut store, 32).await.unwrap();
    tree.add(&mut store, fr(1), fr(1)).await.unwrap();
    let root = tree.root();
    let nodes = store.inner.node_count();

    store.fail_commits = true;
    let err = tree.add(&mut store, fr(2), fr(2)).await.unwrap_err();
    assert!(matches!(err, MerkleError::Storage(StorageError::Backend(_))));
    assert_eq!(tree.root(), root);
    assert_eq!(store.inner.node_count(), nodes);
    assert_eq!(store.get_root(tree.id()).await.unwrap(), Some(root));
}
