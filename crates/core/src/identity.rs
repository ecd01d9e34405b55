//! Triple-tree identity state.
//!
//! Every identity owns a claims tree, a revocation tree and a roots tree.
//! Its state is `Poseidon(claims_root, revocation_root, roots_root)`.
//! Claims are stored as `(hash_index, hash_value)`; each claims root
//! reached by an insert is recorded in the roots tree with value 1;
//! revoked nonces are stored with value 0.

use ark_ff::{One, Zero};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::babyjub::PublicKey;
use crate::claim::{Claim, ClaimOption, SchemaHash};
use crate::did::{Blockchain, Did, DidMethod, Network};
use crate::error::{ClaimError, IdentityError, MerkleError};
use crate::field::{self, fr_to_hex};
use crate::poseidon::hash_elems;
use crate::smt::{NodeStore, Proof, SparseMerkleTree};
use crate::Fr;

/// Revocation nonce of every identity's self-authentication claim.
pub const AUTH_CLAIM_NONCE: u64 = 1;

/// The self-authentication claim for `key`: auth schema, index slots
/// `(X, Y)`, revocation nonce 1.
pub fn auth_claim(key: &PublicKey) -> Result<Claim, ClaimError> {
    Claim::new([
        ClaimOption::SchemaHash(SchemaHash::auth()),
        ClaimOption::IndexDataInts(key.x(), key.y()),
        ClaimOption::RevocationNonce(AUTH_CLAIM_NONCE),
    ])
}

/// The three roots of an identity and the state they compose to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeState {
    #[serde(with = "field::decimal")]
    pub state: Fr,
    #[serde(with = "field::decimal")]
    pub claims_root: Fr,
    #[serde(with = "field::decimal")]
    pub revocation_root: Fr,
    #[serde(with = "field::decimal")]
    pub root_of_roots: Fr,
}

impl TreeState {
    pub fn new(claims_root: Fr, revocation_root: Fr, root_of_roots: Fr) -> Result<Self, IdentityError> {
        Ok(Self {
            state: hash_elems(claims_root, revocation_root, root_of_roots)?,
            claims_root,
            revocation_root,
            root_of_roots,
        })
    }

    /// All-zero roots; the "old state" of a genesis transition.
    pub fn zero() -> Self {
        Self {
            state: Fr::zero(),
            claims_root: Fr::zero(),
            revocation_root: Fr::zero(),
            root_of_roots: Fr::zero(),
        }
    }

    /// Whether `state` is the hash of the three roots.
    pub fn is_consistent(&self) -> bool {
        hash_elems(self.claims_root, self.revocation_root, self.root_of_roots)
            .map(|s| s == self.state)
            .unwrap_or(false)
    }
}

/// Persistent ids of an identity's trees.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeHandles {
    pub claims_mt_id: u64,
    pub rev_mt_id: u64,
    pub roots_mt_id: u64,
    pub depth: usize,
}

/// An identity's key and trees.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityState {
    public_key: PublicKey,
    claims: SparseMerkleTree,
    revocations: SparseMerkleTree,
    roots: SparseMerkleTree,
}

impl IdentityState {
    /// Allocate three empty trees and insert the auth claim into the
    /// claims tree. The resulting state is the genesis state.
    pub async fn create<S: NodeStore + ?Sized>(
        store: &mut S,
        public_key: PublicKey,
        depth: usize,
    ) -> Result<Self, IdentityError> {
        let mut claims = SparseMerkleTree::create(store, depth).await?;
        let revocations = SparseMerkleTree::create(store, depth).await?;
        let roots = SparseMerkleTree::create(store, depth).await?;

        let (hi, hv) = auth_claim(&public_key)?.hi_hv()?;
        claims.add(store, hi, hv).await?;

        let identity = Self { public_key, claims, revocations, roots };
        info!(
            claims_mt_id = claims.id(),
            state = %fr_to_hex(&identity.state_value()?),
            "created identity trees"
        );
        Ok(identity)
    }

    /// Reopen an identity from persisted tree ids.
    pub async fn restore<S: NodeStore + ?Sized>(
        store: &mut S,
        public_key: PublicKey,
        handles: TreeHandles,
    ) -> Result<Self, IdentityError> {
        Ok(Self {
            public_key,
            claims: SparseMerkleTree::load(store, handles.claims_mt_id, handles.depth).await?,
            revocations: SparseMerkleTree::load(store, handles.rev_mt_id, handles.depth).await?,
            roots: SparseMerkleTree::load(store, handles.roots_mt_id, handles.depth).await?,
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn handles(&self) -> TreeHandles {
        TreeHandles {
            claims_mt_id: self.claims.id(),
            rev_mt_id: self.revocations.id(),
            roots_mt_id: self.roots.id(),
            depth: self.claims.depth(),
        }
    }

    pub fn depth(&self) -> usize {
        self.claims.depth()
    }

    pub fn claims_root(&self) -> Fr {
        self.claims.root()
    }

    pub fn revocation_root(&self) -> Fr {
        self.revocations.root()
    }

    pub fn roots_root(&self) -> Fr {
        self.roots.root()
    }

    pub fn state_value(&self) -> Result<Fr, IdentityError> {
        Ok(hash_elems(self.claims_root(), self.revocation_root(), self.roots_root())?)
    }

    pub fn tree_state(&self) -> Result<TreeState, IdentityError> {
        TreeState::new(self.claims_root(), self.revocation_root(), self.roots_root())
    }

    pub fn auth_claim(&self) -> Result<Claim, IdentityError> {
        Ok(auth_claim(&self.public_key)?)
    }

    /// DID for the current state.
    pub fn did(&self, method: DidMethod, blockchain: Blockchain, network: Network) -> Result<Did, IdentityError> {
        Did::from_state(method, blockchain, network, &self.state_value()?)
    }

    /// Insert a claim and record the new claims root in the roots tree.
    pub async fn add_claim<S: NodeStore + ?Sized>(
        &mut self,
        store: &mut S,
        claim: &Claim,
    ) -> Result<TreeState, IdentityError> {
        let (hi, hv) = claim.hi_hv()?;
        let claims_root = self.claims.add(store, hi, hv).await?;
        self.roots.add(store, claims_root, Fr::one()).await?;
        debug!(
            claims_mt_id = self.claims.id(),
            nonce = claim.revocation_nonce(),
            "added claim"
        );
        self.tree_state()
    }

    pub async fn revoke_claim<S: NodeStore + ?Sized>(
        &mut self,
        store: &mut S,
        claim: &Claim,
    ) -> Result<TreeState, IdentityError> {
        self.revoke_nonce(store, claim.revocation_nonce()).await
    }

    /// Insert `(nonce, 0)` into the revocation tree.
    pub async fn revoke_nonce<S: NodeStore + ?Sized>(
        &mut self,
        store: &mut S,
        nonce: u64,
    ) -> Result<TreeState, IdentityError> {
        match self.revocations.add(store, Fr::from(nonce), Fr::zero()).await {
            Ok(_) => {}
            Err(MerkleError::KeyExists) => return Err(IdentityError::AlreadyRevoked(nonce)),
            Err(e) => return Err(e.into()),
        }
        debug!(rev_mt_id = self.revocations.id(), nonce, "revoked nonce");
        self.tree_state()
    }

    pub async fn is_revoked<S: NodeStore + ?Sized>(&self, store: &mut S, nonce: u64) -> Result<bool, IdentityError> {
        match self.revocations.get(store, &Fr::from(nonce)).await {
            Ok(_) => Ok(true),
            Err(MerkleError::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Inclusion proof of `claim` in the claims tree at the current root.
    pub async fn inclusion_proof<S: NodeStore + ?Sized>(
        &self,
        store: &mut S,
        claim: &Claim,
    ) -> Result<Proof, IdentityError> {
        self.inclusion_proof_at(store, claim, &self.claims_root()).await
    }

    /// Inclusion proof of `claim` at a historic claims root.
    pub async fn inclusion_proof_at<S: NodeStore + ?Sized>(
        &self,
        store: &mut S,
        claim: &Claim,
        claims_root: &Fr,
    ) -> Result<Proof, IdentityError> {
        let hi = claim.hash_index()?;
        let (proof, _) = self.claims.generate_proof_at(store, &hi, claims_root).await?;
        Ok(proof)
    }

    /// Proof about `nonce` in the revocation tree at the current root; a
    /// non-existence proof means the claim is not revoked.
    pub async fn non_revocation_proof<S: NodeStore + ?Sized>(
        &self,
        store: &mut S,
        nonce: u64,
    ) -> Result<Proof, IdentityError> {
        self.non_revocation_proof_at(store, nonce, &self.revocation_root()).await
    }

    pub async fn non_revocation_proof_at<S: NodeStore + ?Sized>(
        &self,
        store: &mut S,
        nonce: u64,
        revocation_root: &Fr,
    ) -> Result<Proof, IdentityError> {
        let (proof, _) = self
            .revocations
            .generate_proof_at(store, &Fr::from(nonce), revocation_root)
            .await?;
        Ok(proof)
    }

    /// Proof that `claims_root` was recorded in the roots tree.
    pub async fn root_proof<S: NodeStore + ?Sized>(
        &self,
        store: &mut S,
        claims_root: &Fr,
    ) -> Result<Proof, IdentityError> {
        let (proof, _) = self.roots.generate_proof(store, claims_root).await?;
        Ok(proof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::babyjub::PrivateKey;
    use crate::smt::MemoryNodeStore;

    fn key() -> PublicKey {
        let mut seed = [0u8; 32];
        seed[31] = 1;
        PrivateKey::from_seed(&seed).unwrap().public()
    }

    fn claim(nonce: u64) -> Claim {
        Claim::new([
            ClaimOption::SchemaHash(SchemaHash::from_hex("e500b653ca82273b7bfad8045d85a470").unwrap()),
            ClaimOption::IndexDataInts(Fr::from(19900101u64), Fr::zero()),
            ClaimOption::RevocationNonce(nonce),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_genesis_contains_only_auth_claim() {
        let mut store = MemoryNodeStore::new();
        let identity = IdentityState::create(&mut store, key(), 32).await.unwrap();

        assert_ne!(identity.claims_root(), Fr::zero());
        assert_eq!(identity.revocation_root(), Fr::zero());
        assert_eq!(identity.roots_root(), Fr::zero());

        let auth = identity.auth_claim().unwrap();
        assert_eq!(identity.claims_root(), crate::smt::leaf_hash(auth.hash_index().unwrap(), auth.hash_value().unwrap()).unwrap());
        assert_eq!(
            identity.state_value().unwrap(),
            hash_elems(identity.claims_root(), Fr::zero(), Fr::zero()).unwrap()
        );
    }

    #[tokio::test]
    async fn test_add_claim_advances_claims_and_roots() {
        let mut store = MemoryNodeStore::new();
        let mut identity = IdentityState::create(&mut store, key(), 32).await.unwrap();
        let before = identity.tree_state().unwrap();

        let after = identity.add_claim(&mut store, &claim(42)).await.unwrap();
        assert_ne!(after.claims_root, before.claims_root);
        assert_ne!(after.root_of_roots, before.root_of_roots);
        assert_eq!(after.revocation_root, before.revocation_root);
        assert!(after.is_consistent());

        let proof = identity.root_proof(&mut store, &after.claims_root).await.unwrap();
        assert!(proof.verify(&after.root_of_roots, &after.claims_root, &Fr::one()).unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_claim_rejected() {
        let mut store = MemoryNodeStore::new();
        let mut identity = IdentityState::create(&mut store, key(), 32).await.unwrap();
        identity.add_claim(&mut store, &claim(42)).await.unwrap();
        let err = identity.add_claim(&mut store, &claim(42)).await.unwrap_err();
        assert_eq!(err, IdentityError::KeyExists);
    }

    #[tokio::test]
    async fn test_inclusion_proof_verifies() {
        let mut store = MemoryNodeStore::new();
        let mut identity = IdentityState::create(&mut store, key(), 32).await.unwrap();
        let c = claim(42);
        identity.add_claim(&mut store, &c).await.unwrap();

        let proof = identity.inclusion_proof(&mut store, &c).await.unwrap();
        let (hi, hv) = c.hi_hv().unwrap();
        assert!(proof.existence);
        assert_eq!(proof.siblings.len(), 32);
        assert!(proof.verify(&identity.claims_root(), &hi, &hv).unwrap());
    }

    #[tokio::test]
    async fn test_revocation_and_monotonicity() {
        let mut store = MemoryNodeStore::new();
        let mut identity = IdentityState::create(&mut store, key(), 32).await.unwrap();
        let c = claim(42);
        identity.add_claim(&mut store, &c).await.unwrap();

        let proof = identity.non_revocation_proof(&mut store, 42).await.unwrap();
        assert!(!proof.existence);

        let before = identity.tree_state().unwrap();
        let after = identity.revoke_claim(&mut store, &c).await.unwrap();
        assert_ne!(after.revocation_root, before.revocation_root);
        assert_ne!(after.state, before.state);
        assert!(identity.is_revoked(&mut store, 42).await.unwrap());

        let proof = identity.non_revocation_proof(&mut store, 42).await.unwrap();
        assert!(proof.existence);

        let err = identity.revoke_nonce(&mut store, 42).await.unwrap_err();
        assert_eq!(err, IdentityError::AlreadyRevoked(42));
    }

    #[tokio::test]
    async fn test_restore_matches_original() {
        let mut store = MemoryNodeStore::new();
        let mut identity = IdentityState::create(&mut store, key(), 32).await.unwrap();
        identity.add_claim(&mut store, &claim(5)).await.unwrap();

        let restored = IdentityState::restore(&mut store, key(), identity.handles()).await.unwrap();
        assert_eq!(restored, identity);
    }

    #[test]
    fn test_tree_state_json() {
        let ts = TreeState::new(Fr::from(1u64), Fr::zero(), Fr::from(2u64)).unwrap();
        let json = serde_json::to_value(ts).unwrap();
        assert_eq!(json["claimsRoot"], "1");
        assert_eq!(json["revocationRoot"], "0");
        assert_eq!(json["rootOfRoots"], "2");
        assert!(ts.is_consistent());
        assert!(TreeState::zero().state.is_zero());
    }
}
