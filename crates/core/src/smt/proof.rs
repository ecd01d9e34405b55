//! Merkle proofs of inclusion and non-inclusion.
//!
//! Siblings are stored root-first and padded with zeros to the tree depth,
//! which is the layout the identity circuits consume. The level at which the
//! walk stopped is kept alongside; on decode it is recovered from the last
//! non-zero sibling since a compact tree never ends a path on an empty
//! sibling.

use ark_ff::Zero;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::node::leaf_hash;
use crate::error::MerkleError;
use crate::field::{self, fr_to_le_bytes, test_bit};
use crate::poseidon::hash_two;
use crate::Fr;

/// The leaf that occupies a queried key's slot in a non-inclusion proof.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAux {
    #[serde(with = "field::decimal")]
    pub key: Fr,
    #[serde(with = "field::decimal")]
    pub value: Fr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proof {
    pub existence: bool,
    /// Level of the node the walk ended on.
    pub depth: usize,
    /// Root-first sibling digests, `len() == tree depth`.
    pub siblings: Vec<Fr>,
    pub node_aux: Option<NodeAux>,
}

impl Proof {
    /// Proof against an empty tree: no siblings, no aux leaf.
    pub fn empty(levels: usize) -> Self {
        Self {
            existence: false,
            depth: 0,
            siblings: vec![Fr::zero(); levels],
            node_aux: None,
        }
    }

    pub fn levels(&self) -> usize {
        self.siblings.len()
    }

    /// Siblings padded or cut to `levels` entries.
    pub fn siblings_padded(&self, levels: usize) -> Vec<Fr> {
        let mut out = self.siblings.clone();
        out.resize(levels, Fr::zero());
        out
    }

    /// Replay the path from `(key, value)` to the root it commits to.
    ///
    /// For existence proofs the leaf is `(key, value)`; otherwise it is the
    /// aux leaf, or the empty subtree when there is none.
    pub fn root(&self, key: &Fr, value: &Fr) -> Result<Fr, MerkleError> {
        if self.depth > self.siblings.len() {
            return Err(MerkleError::InvalidDepth(self.depth));
        }
        let mut mid = if self.existence {
            leaf_hash(*key, *value)?
        } else {
            match &self.node_aux {
                None => Fr::zero(),
                Some(aux) => {
                    if aux.key == *key {
                        return Err(MerkleError::KeyExists);
                    }
                    leaf_hash(aux.key, aux.value)?
                }
            }
        };

        let path = fr_to_le_bytes(key);
        for lvl in (0..self.depth).rev() {
            let sibling = self.siblings[lvl];
            mid = if test_bit(&path, lvl) {
                hash_two(sibling, mid)?
            } else {
                hash_two(mid, sibling)?
            };
        }
        Ok(mid)
    }

    /// Check the proof against `root`.
    ///
    /// A non-inclusion proof with an aux leaf is only accepted when the aux
    /// key follows the same path as `key` down to the stopping level.
    pub fn verify(&self, root: &Fr, key: &Fr, value: &Fr) -> Result<bool, MerkleError> {
        if !self.existence {
            if let Some(aux) = &self.node_aux {
                if aux.key == *key {
                    return Ok(false);
                }
                let (a, b) = (fr_to_le_bytes(&aux.key), fr_to_le_bytes(key));
                if (0..self.depth).any(|lvl| test_bit(&a, lvl) != test_bit(&b, lvl)) {
                    return Ok(false);
                }
            }
        }
        Ok(self.root(key, value)? == *root)
    }
}

/// Wire form: `{existence, siblings, nodeAux}` with decimal strings.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProofRepr {
    existence: bool,
    #[serde(with = "field::decimal_vec")]
    siblings: Vec<Fr>,
    node_aux: Option<NodeAux>,
}

impl Serialize for Proof {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ProofRepr {
            existence: self.existence,
            siblings: self.siblings.clone(),
            node_aux: self.node_aux,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Proof {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = ProofRepr::deserialize(deserializer)?;
        let depth = repr
            .siblings
            .iter()
            .rposition(|s| !s.is_zero())
            .map(|i| i + 1)
            .unwrap_or(0);
        Ok(Proof {
            existence: repr.existence,
            depth,
            siblings: repr.siblings,
            node_aux: repr.node_aux,
        })
    }
}

#[cfg(test)]
mod proof_tests {
    use super::*;

    #[test]
    fn test_empty_proof_commits_to_zero_root() {
        let proof = Proof::empty(8);
        assert_eq!(proof.levels(), 8);
        assert_eq!(proof.root(&Fr::from(5u64), &Fr::zero()).unwrap(), Fr::zero());
        assert!(proof.verify(&Fr::zero(), &Fr::from(5u64), &Fr::zero()).unwrap());
    }

    #[test]
    fn test_single_leaf_existence() {
        let (k, v) = (Fr::from(1u64), Fr::from(2u64));
        let proof = Proof {
            existence: true,
            depth: 0,
            siblings: vec![Fr::zero(); 4],
            node_aux: None,
        };
        let root = leaf_hash(k, v).unwrap();
        assert!(proof.verify(&root, &k, &v).unwrap());
        assert!(!proof.verify(&root, &k, &Fr::from(3u64)).unwrap());
    }

    #[test]
    fn test_aux_with_same_key_rejected() {
        let k = Fr::from(1u64);
        let proof = Proof {
            existence: false,
            depth: 0,
            siblings: vec![Fr::zero(); 4],
            node_aux: Some(NodeAux { key: k, value: Fr::from(2u64) }),
        };
        assert!(proof.root(&k, &Fr::zero()).is_err());
        assert!(!proof.verify(&Fr::zero(), &k, &Fr::zero()).unwrap());
    }

    #[test]
    fn test_json_shape_and_depth_recovery() {
        let mut siblings = vec![Fr::zero(); 6];
        siblings[2] = Fr::from(77u64);
        let proof = Proof {
            existence: false,
            depth: 3,
            siblings,
            node_aux: Some(NodeAux { key: Fr::from(4u64), value: Fr::from(5u64) }),
        };

        let json = serde_json::to_value(&proof).unwrap();
        assert_eq!(json["existence"], false);
        assert_eq!(json["siblings"].as_array().unwrap().len(), 6);
        assert_eq!(json["siblings"][2], "77");
        assert_eq!(json["nodeAux"]["key"], "4");

        let back: Proof = serde_json::from_value(json).unwrap();
        assert_eq!(back, proof);
    }
}
