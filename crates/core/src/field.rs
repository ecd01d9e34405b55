//! BN254 scalar-field helpers.
//!
//! Field elements travel as decimal strings in circuit inputs and as 32-byte
//! little-endian buffers in storage. Both decoders reject values at or above
//! the modulus instead of silently reducing them.

use ark_ff::{BigInteger, PrimeField};
use num_bigint::BigUint;

use crate::error::CryptoError;
use crate::Fr;

/// Byte width of a serialized field element.
pub const FIELD_BYTES: usize = 32;

/// The field modulus as a big integer.
pub fn modulus() -> BigUint {
    BigUint::from(Fr::MODULUS)
}

/// Convert a big integer into a field element, failing on overflow.
pub fn fr_from_biguint(value: &BigUint) -> Result<Fr, CryptoError> {
    if *value >= modulus() {
        return Err(CryptoError::FieldOverflow);
    }
    Ok(Fr::from_le_bytes_mod_order(&value.to_bytes_le()))
}

/// Canonical integer value of a field element.
pub fn fr_to_biguint(value: &Fr) -> BigUint {
    BigUint::from(value.into_bigint())
}

/// Parse a base-10 string into a field element.
pub fn fr_from_decimal(s: &str) -> Result<Fr, CryptoError> {
    let trimmed = s.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CryptoError::InvalidEncoding(format!("not a decimal integer: {s:?}")));
    }
    let value = BigUint::parse_bytes(trimmed.as_bytes(), 10)
        .ok_or_else(|| CryptoError::InvalidEncoding(format!("not a decimal integer: {s:?}")))?;
    fr_from_biguint(&value)
}

/// Render a field element as a base-10 string (`"0"` for zero).
pub fn fr_to_decimal(value: &Fr) -> String {
    fr_to_biguint(value).to_string()
}

/// Decode 32 little-endian bytes.
pub fn fr_from_le_bytes(bytes: &[u8]) -> Result<Fr, CryptoError> {
    if bytes.len() != FIELD_BYTES {
        return Err(CryptoError::InvalidEncoding(format!(
            "field element must be {FIELD_BYTES} bytes, got {}",
            bytes.len()
        )));
    }
    fr_from_biguint(&BigUint::from_bytes_le(bytes))
}

/// Encode as exactly 32 little-endian bytes.
pub fn fr_to_le_bytes(value: &Fr) -> [u8; FIELD_BYTES] {
    let mut out = [0u8; FIELD_BYTES];
    let bytes = value.into_bigint().to_bytes_le();
    out[..bytes.len()].copy_from_slice(&bytes);
    out
}

/// Hex rendering of the little-endian encoding, used for log fields and
/// error messages.
pub fn fr_to_hex(value: &Fr) -> String {
    hex::encode(fr_to_le_bytes(value))
}

/// Test bit `i` of the little-endian encoding.
pub fn test_bit(bytes: &[u8], i: usize) -> bool {
    bytes
        .get(i / 8)
        .map(|b| (b >> (i % 8)) & 1 == 1)
        .unwrap_or(false)
}

/// Serde adapter rendering `Fr` as a decimal string.
pub mod decimal {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    use super::{fr_from_decimal, fr_to_decimal};
    use crate::Fr;

    pub fn serialize<S: Serializer>(value: &Fr, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&fr_to_decimal(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Fr, D::Error> {
        let s = String::deserialize(deserializer)?;
        fr_from_decimal(&s).map_err(D::Error::custom)
    }
}

/// Serde adapter for sequences of `Fr` rendered as decimal strings.
pub mod decimal_vec {
    use serde::{de::Error as _, ser::SerializeSeq, Deserialize, Deserializer, Serializer};

    use super::{fr_from_decimal, fr_to_decimal};
    use crate::Fr;

    pub fn serialize<S: Serializer>(values: &[Fr], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&fr_to_decimal(value))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Fr>, D::Error> {
        let raw = Vec::<String>::deserialize(deserializer)?;
        raw.iter()
            .map(|s| fr_from_decimal(s).map_err(D::Error::custom))
            .collect()
    }
}
