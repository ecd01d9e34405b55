//! Poseidon hash over BN254 with the circom / Iden3 parameter set.
//!
//! Every tree node, claim digest and identity state in this crate is built
//! from these functions, so the parameter set must stay bit-compatible with
//! the circuits that consume the values.
//!
//! Up to 12 inputs use the constants bundled with the hashing backend.
//! Wider states (13..=16 inputs) derive theirs once, on first use, from the
//! Grain LFSR of the Poseidon reference script, which is how the circomlib
//! tables were produced.

use std::sync::OnceLock;

use ark_crypto_primitives::sponge::poseidon::find_poseidon_ark_and_mds;
use ark_ff::Zero;
use light_poseidon::{Poseidon, PoseidonHasher, PoseidonParameters};

use crate::error::CryptoError;
use crate::Fr;

/// Largest arity with Iden3 parameters.
pub const MAX_INPUTS: usize = 16;

/// Largest arity the backend ships round constants for.
const BUNDLED_INPUTS: usize = 12;

const FULL_ROUNDS: usize = 8;

/// circomlib partial rounds for 13, 14, 15 and 16 inputs.
const WIDE_PARTIAL_ROUNDS: [usize; MAX_INPUTS - BUNDLED_INPUTS] = [70, 60, 64, 68];

const ALPHA: u64 = 5;

/// Bit size of the BN254 scalar field, an input of the Grain LFSR.
const PRIME_BITS: u64 = 254;

/// Bytes packed into one field element by [`hash_bytes`].
const BYTES_PER_ELEMENT: usize = 31;

struct WideParameters {
    /// Round constants, row-major by round.
    ark: Vec<Fr>,
    mds: Vec<Vec<Fr>>,
    partial_rounds: usize,
}

fn wide_parameters(nr_inputs: usize) -> &'static WideParameters {
    static CACHE: [OnceLock<WideParameters>; MAX_INPUTS - BUNDLED_INPUTS] =
        [OnceLock::new(), OnceLock::new(), OnceLock::new(), OnceLock::new()];

    let slot = nr_inputs - BUNDLED_INPUTS - 1;
    CACHE[slot].get_or_init(|| {
        let partial_rounds = WIDE_PARTIAL_ROUNDS[slot];
        let (ark, mds) =
            find_poseidon_ark_and_mds::<Fr>(PRIME_BITS, nr_inputs, FULL_ROUNDS as u64, partial_rounds as u64, 0);
        WideParameters {
            ark: ark.into_iter().flatten().collect(),
            mds,
            partial_rounds,
        }
    })
}

fn hasher(nr_inputs: usize) -> Result<Poseidon<Fr>, CryptoError> {
    if nr_inputs <= BUNDLED_INPUTS {
        return Poseidon::<Fr>::new_circom(nr_inputs).map_err(|e| CryptoError::Poseidon(e.to_string()));
    }
    let wide = wide_parameters(nr_inputs);
    Ok(Poseidon::new(PoseidonParameters::new(
        wide.ark.clone(),
        wide.mds.clone(),
        FULL_ROUNDS,
        wide.partial_rounds,
        nr_inputs + 1,
        ALPHA,
    )))
}

/// Hash `1..=MAX_INPUTS` field elements.
pub fn poseidon(inputs: &[Fr]) -> Result<Fr, CryptoError> {
    if inputs.is_empty() || inputs.len() > MAX_INPUTS {
        return Err(CryptoError::PoseidonArity {
            got: inputs.len(),
            max: MAX_INPUTS,
        });
    }
    hasher(inputs.len())?
        .hash(inputs)
        .map_err(|e| CryptoError::Poseidon(e.to_string()))
}

/// `Poseidon(a, b)`: middle-node digest and claim-hash composition.
pub fn hash_two(a: Fr, b: Fr) -> Result<Fr, CryptoError> {
    poseidon(&[a, b])
}

/// `Poseidon(a, b, c)`: identity-state composition and leaf digests.
pub fn hash_elems(a: Fr, b: Fr, c: Fr) -> Result<Fr, CryptoError> {
    poseidon(&[a, b, c])
}

/// Fold an arbitrary number of inputs through `frame_size`-wide Poseidon
/// frames. Each full frame is hashed and its digest becomes the first
/// element of the next frame; unused positions stay zero.
pub fn sponge_hash(inputs: &[Fr], frame_size: usize) -> Result<Fr, CryptoError> {
    if !(2..=MAX_INPUTS).contains(&frame_size) {
        return Err(CryptoError::PoseidonArity {
            got: frame_size,
            max: MAX_INPUTS,
        });
    }

    let mut frame = vec![Fr::zero(); frame_size];
    let mut hash = Fr::zero();
    let mut dirty = false;
    let mut k = 0;
    for input in inputs {
        dirty = true;
        frame[k] = *input;
        if k == frame_size - 1 {
            hash = poseidon(&frame)?;
            dirty = false;
            frame = vec![Fr::zero(); frame_size];
            frame[0] = hash;
            k = 1;
        } else {
            k += 1;
        }
    }
    if dirty {
        hash = poseidon(&frame)?;
    }
    Ok(hash)
}

/// Hash an arbitrary byte string: 31-byte little-endian chunks fed through
/// [`sponge_hash`] with 16-wide frames, as Iden3 does.
pub fn hash_bytes(bytes: &[u8]) -> Result<Fr, CryptoError> {
    use ark_ff::PrimeField;

    let elements: Vec<Fr> = bytes
        .chunks(BYTES_PER_ELEMENT)
        .map(Fr::from_le_bytes_mod_order)
        .collect();
    if elements.is_empty() {
        return poseidon(&[Fr::zero()]);
    }
    sponge_hash(&elements, MAX_INPUTS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{fr_from_decimal, modulus, fr_to_biguint};
    use ark_ff::One;

    #[test]
    fn test_hash_deterministic() {
        let a = Fr::from(42u64);
        let b = Fr::from(123u64);

        assert_eq!(hash_two(a, b).unwrap(), hash_two(a, b).unwrap());
        assert_ne!(hash_two(a, b).unwrap(), hash_two(b, a).unwrap());
    }

    #[test]
    fn test_known_vector_two_inputs() {
        // circomlib poseidon([1, 2])
        let expected = fr_from_decimal(
            "7853200120776062878684798364095072458815029376092732009249414926327459813530",
        )
        .unwrap();
        assert_eq!(hash_two(Fr::one(), Fr::from(2u64)).unwrap(), expected);
    }

    fn one_to(n: u64) -> Vec<Fr> {
        (1..=n).map(Fr::from).collect()
    }

    #[test]
    fn test_known_vector_six_inputs() {
        // circomlib poseidon([1..=6])
        let expected = fr_from_decimal(
            "20400040500897583745843009878988256314335038853985262692600694741116813247201",
        )
        .unwrap();
        assert_eq!(poseidon(&one_to(6)).unwrap(), expected);
    }

    #[test]
    fn test_known_vector_sixteen_inputs() {
        // go-iden3-crypto poseidon.Hash([1..=16])
        let expected = fr_from_decimal(
            "9989051620750914585850546081941653841776809718687451684622678807385399211877",
        )
        .unwrap();
        assert_eq!(poseidon(&one_to(16)).unwrap(), expected);
    }

    #[test]
    fn test_known_vectors_wide_arities() {
        let cases = [
            (13, "7041832639553862712666971417715061873827921493498355005117622707743491651590"),
            (14, "8354478399926161176778659061636406690034081872658507739535256090879947077494"),
            (15, "4203130618016961831408770638653325366880478848856764494148034853759773445968"),
        ];
        for (n, expected) in cases {
            assert_eq!(poseidon(&one_to(n)).unwrap(), fr_from_decimal(expected).unwrap(), "{n} inputs");
        }
    }

    #[test]
    fn test_grain_derivation_matches_bundled_constants() {
        // The wide-state derivation reproduces the bundled table for width 3.
        let bundled = light_poseidon::parameters::bn254_x5::get_poseidon_parameters::<Fr>(3).unwrap();
        let (ark, mds) = find_poseidon_ark_and_mds::<Fr>(PRIME_BITS, 2, FULL_ROUNDS as u64, 57, 0);
        assert_eq!(ark.into_iter().flatten().collect::<Vec<_>>(), bundled.ark);
        assert_eq!(mds, bundled.mds);
    }

    #[test]
    fn test_arity_bounds() {
        assert!(matches!(
            poseidon(&[]),
            Err(CryptoError::PoseidonArity { got: 0, .. })
        ));
        let too_many = vec![Fr::one(); MAX_INPUTS + 1];
        assert!(poseidon(&too_many).is_err());
        let widest = vec![Fr::one(); MAX_INPUTS];
        assert!(poseidon(&widest).is_ok());
    }

    #[test]
    fn test_hash_elems_matches_poseidon() {
        let (a, b, c) = (Fr::from(1u64), Fr::from(2u64), Fr::from(3u64));
        assert_eq!(hash_elems(a, b, c).unwrap(), poseidon(&[a, b, c]).unwrap());
    }

    #[test]
    fn test_sponge_single_frame_equals_poseidon() {
        let inputs: Vec<Fr> = (1..=5u64).map(Fr::from).collect();
        let mut padded = inputs.clone();
        padded.resize(6, Fr::zero());
        assert_eq!(sponge_hash(&inputs, 6).unwrap(), poseidon(&padded).unwrap());
    }

    #[test]
    fn test_hash_bytes_distinguishes_inputs() {
        let a = hash_bytes(b"Alice").unwrap();
        let b = hash_bytes(b"Bob").unwrap();
        assert_ne!(a, b);
        let long = vec![7u8; 31 * 30];
        assert!(hash_bytes(&long).is_ok());
        assert!(fr_to_biguint(&a) < modulus());
    }
}
