//! Baby Jubjub EdDSA-Poseidon signatures with Iden3 key derivation.
//!
//! Group arithmetic runs on `ark-ed-on-bn254`, which models the curve as
//! `x² + y² = 1 + d'·x²·y²`. Iden3 uses the isomorphic form
//! `168700·x² + y² = 1 + 168696·x²·y²`; points move between the two by
//! scaling `x` with `√168700`. Everything visible outside this module
//! (coordinates, compression, signatures) is in the Iden3 form so that
//! signatures verify inside the identity circuits.

use ark_ec::{AffineRepr, CurveGroup};
use ark_ed_on_bn254::{EdwardsAffine, Fr as SubgroupScalar};
use ark_ff::{MontFp, One, PrimeField, Zero};
use ark_std::rand::{CryptoRng, RngCore};
use blake_hash::{Blake512, Digest};
use num_bigint::BigUint;

use crate::error::CryptoError;
use crate::field::{fr_from_le_bytes, fr_to_biguint, fr_to_le_bytes, modulus, FIELD_BYTES};
use crate::poseidon::poseidon;
use crate::Fr;

/// `√168700`, the x-scaling from Iden3 coordinates to the arkworks model.
const SQRT_A: Fr =
    MontFp!("7214280148105020021932206872019688659210616427216992810330019057549499971851");
const SQRT_A_INV: Fr =
    MontFp!("2957874849018779266517920829765869116077630550401372566248359756137677864698");

const B8_X: Fr =
    MontFp!("5299619240641551281634865583518297030282874472190772894086521144482721001553");
const B8_Y: Fr =
    MontFp!("16950150798460657717958625567821834550301663161624707787222815936182638968203");

/// Byte length of a compressed signature (`R8 ‖ S`).
pub const SIGNATURE_BYTES: usize = 64;

/// Order of the prime subgroup generated by `B8`.
pub fn sub_order() -> BigUint {
    SubgroupScalar::MODULUS.into()
}

fn to_subgroup_scalar(value: &BigUint) -> SubgroupScalar {
    SubgroupScalar::from_le_bytes_mod_order(&value.to_bytes_le())
}

/// An affine point on Baby Jubjub, in Iden3 coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: Fr,
    pub y: Fr,
}

impl Point {
    /// The neutral element `(0, 1)`.
    pub fn identity() -> Self {
        Self { x: Fr::zero(), y: Fr::one() }
    }

    /// Base point of the prime-order subgroup.
    pub fn base8() -> Self {
        Self { x: B8_X, y: B8_Y }
    }

    fn edwards(&self) -> EdwardsAffine {
        EdwardsAffine::new_unchecked(self.x * SQRT_A, self.y)
    }

    fn from_edwards(p: EdwardsAffine) -> Self {
        Self { x: p.x * SQRT_A_INV, y: p.y }
    }

    pub fn is_on_curve(&self) -> bool {
        self.edwards().is_on_curve()
    }

    pub fn in_subgroup(&self) -> bool {
        let p = self.edwards();
        p.is_on_curve() && p.is_in_correct_subgroup_assuming_on_curve()
    }

    pub fn add(&self, other: &Self) -> Self {
        Self::from_edwards((self.edwards() + other.edwards()).into_affine())
    }

    pub fn double(&self) -> Self {
        self.add(self)
    }

    pub fn mul_scalar(&self, k: &BigUint) -> Self {
        Self::from_edwards(self.edwards().mul_bigint(k.to_u64_digits()).into_affine())
    }

    /// 32-byte compressed form: `y` little-endian, top bit set when `x` is
    /// in the upper half of the field.
    pub fn compress(&self) -> [u8; FIELD_BYTES] {
        let mut buf = fr_to_le_bytes(&self.y);
        if coordinate_sign(&self.x) {
            buf[FIELD_BYTES - 1] |= 0x80;
        }
        buf
    }

    pub fn decompress(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != FIELD_BYTES {
            return Err(CryptoError::InvalidEncoding(format!(
                "compressed point must be {FIELD_BYTES} bytes, got {}",
                bytes.len()
            )));
        }
        let mut buf = [0u8; FIELD_BYTES];
        buf.copy_from_slice(bytes);
        let sign = buf[FIELD_BYTES - 1] & 0x80 != 0;
        buf[FIELD_BYTES - 1] &= 0x7f;

        let y = fr_from_le_bytes(&buf)?;
        let (x0, x1) = EdwardsAffine::get_xs_from_y_unchecked(y).ok_or(CryptoError::NotOnCurve)?;
        let x = [x0, x1]
            .into_iter()
            .map(|x| x * SQRT_A_INV)
            .find(|x| coordinate_sign(x) == sign)
            .ok_or(CryptoError::NotOnCurve)?;
        let point = Self { x, y };
        if !point.is_on_curve() {
            return Err(CryptoError::NotOnCurve);
        }
        Ok(point)
    }
}

/// `true` when `c > (q - 1) / 2`.
fn coordinate_sign(c: &Fr) -> bool {
    fr_to_biguint(c) > (modulus() >> 1u32)
}

fn blake512(parts: &[&[u8]]) -> [u8; 64] {
    let mut hasher = Blake512::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 64];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// A 32-byte EdDSA seed.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey([u8; 32]);

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

impl PrivateKey {
    pub fn from_seed(seed: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; 32] = seed
            .try_into()
            .map_err(|_| CryptoError::InvalidSeedLength(seed.len()))?;
        Ok(Self(bytes))
    }

    /// Parse a hex seed, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let raw = s.trim().trim_start_matches("0x");
        let bytes = hex::decode(raw)
            .map_err(|e| CryptoError::InvalidEncoding(format!("seed is not hex: {e}")))?;
        Self::from_seed(&bytes)
    }

    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Secret scalar: pruned first half of `blake512(seed)`, shifted right by 3.
    pub fn scalar(&self) -> BigUint {
        let h = blake512(&[&self.0]);
        let mut buf = [0u8; 32];
        buf.copy_from_slice(&h[..32]);
        buf[0] &= 0xf8;
        buf[31] &= 0x7f;
        buf[31] |= 0x40;
        BigUint::from_bytes_le(&buf) >> 3u32
    }

    pub fn public(&self) -> PublicKey {
        PublicKey(Point::base8().mul_scalar(&self.scalar()))
    }

    /// Sign a field element with EdDSA-Poseidon.
    pub fn sign_poseidon(&self, msg: Fr) -> Result<Signature, CryptoError> {
        let h = blake512(&[&self.0]);
        let msg_bytes = fr_to_le_bytes(&msg);
        let r = SubgroupScalar::from_le_bytes_mod_order(&blake512(&[&h[32..], &msg_bytes]));

        let r_big: BigUint = r.into_bigint().into();
        let r8 = Point::base8().mul_scalar(&r_big);
        let a = self.public().0;
        let hm = poseidon(&[r8.x, r8.y, a.x, a.y, msg])?;

        let s = r + to_subgroup_scalar(&fr_to_biguint(&hm)) * to_subgroup_scalar(&(self.scalar() << 3u32));
        Ok(Signature { r8, s: s.into_bigint().into() })
    }
}

/// A Baby Jubjub public key `(X, Y)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PublicKey(Point);

impl PublicKey {
    /// Accept a point only if it lies in the prime-order subgroup.
    pub fn from_point(point: Point) -> Result<Self, CryptoError> {
        if !point.in_subgroup() {
            return Err(CryptoError::NotOnCurve);
        }
        Ok(Self(point))
    }

    pub fn from_coordinates(x: Fr, y: Fr) -> Result<Self, CryptoError> {
        Self::from_point(Point { x, y })
    }

    pub fn point(&self) -> &Point {
        &self.0
    }

    pub fn x(&self) -> Fr {
        self.0.x
    }

    pub fn y(&self) -> Fr {
        self.0.y
    }

    pub fn compress(&self) -> [u8; FIELD_BYTES] {
        self.0.compress()
    }

    pub fn decompress(bytes: &[u8]) -> Result<Self, CryptoError> {
        Self::from_point(Point::decompress(bytes)?)
    }

    /// `B8·S == R8 + A·(8·hm)`.
    pub fn verify_poseidon(&self, msg: Fr, sig: &Signature) -> bool {
        if !sig.r8.is_on_curve() || sig.s >= sub_order() {
            return false;
        }
        let hm = match poseidon(&[sig.r8.x, sig.r8.y, self.0.x, self.0.y, msg]) {
            Ok(hm) => hm,
            Err(_) => return false,
        };
        let left = Point::base8().mul_scalar(&sig.s);
        let right = self
            .0
            .mul_scalar(&(fr_to_biguint(&hm) * 8u32))
            .add(&sig.r8);
        left == right
    }
}

/// An EdDSA-Poseidon signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub r8: Point,
    pub s: BigUint,
}

impl Signature {
    /// `compress(R8) ‖ S` with `S` as 32 little-endian bytes.
    pub fn compress(&self) -> [u8; SIGNATURE_BYTES] {
        let mut out = [0u8; SIGNATURE_BYTES];
        out[..32].copy_from_slice(&self.r8.compress());
        let s = self.s.to_bytes_le();
        out[32..32 + s.len()].copy_from_slice(&s);
        out
    }

    pub fn decompress(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != SIGNATURE_BYTES {
            return Err(CryptoError::MalformedSignature(format!(
                "expected {SIGNATURE_BYTES} bytes, got {}",
                bytes.len()
            )));
        }
        let r8 = Point::decompress(&bytes[..32])
            .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
        let s = BigUint::from_bytes_le(&bytes[32..]);
        if s >= sub_order() {
            return Err(CryptoError::ScalarOverflow);
        }
        Ok(Self { r8, s })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.compress())
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s.trim().trim_start_matches("0x"))
            .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
        Self::decompress(&bytes)
    }

    /// `S` as a field element, for circuit inputs.
    pub fn s_field(&self) -> Fr {
        Fr::from_le_bytes_mod_order(&self.s.to_bytes_le())
    }
}
