//! The 8-slot claim codec.
//!
//! | slot | contents |
//! |---|---|
//! | 0 | schema hash (bytes 0..16), flags (16..20), version (20..24) |
//! | 1 | subject id |
//! | 2, 3 | index data A, B |
//! | 4 | revocation nonce (bytes 0..8), expiration (8..16) |
//! | 5, 6 | value data A, B |
//! | 7 | reserved |
//!
//! Flags byte (byte 16 of slot 0): bits 0..3 subject position, bit 3
//! expirable, bit 4 updatable, bits 5..8 merklized-root position.

use std::fmt;
use std::str::FromStr;

use ark_ff::Zero;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::did::Id;
use crate::error::ClaimError;
use crate::field::{fr_from_le_bytes, fr_to_le_bytes, FIELD_BYTES};
use crate::poseidon::{hash_two, poseidon};
use crate::Fr;

pub const SLOTS: usize = 8;

const SLOT_HEADER: usize = 0;
const SLOT_SUBJECT: usize = 1;
const SLOT_INDEX_A: usize = 2;
const SLOT_INDEX_B: usize = 3;
const SLOT_REVOCATION: usize = 4;
const SLOT_VALUE_A: usize = 5;
const SLOT_VALUE_B: usize = 6;

const FLAGS_BYTE: usize = 16;
const VERSION_RANGE: std::ops::Range<usize> = 20..24;

const SUBJECT_MASK: u8 = 0b0000_0111;
const FLAG_EXPIRABLE: u8 = 0b0000_1000;
const FLAG_UPDATABLE: u8 = 0b0001_0000;
const MERKLIZED_MASK: u8 = 0b1110_0000;

const SUBJECT_SELF: u8 = 0b000;
const SUBJECT_OTHER_INDEX: u8 = 0b010;
const MERKLIZED_NONE: u8 = 0b000;
const MERKLIZED_INDEX: u8 = 0b001 << 5;

/// 128-bit schema hash binding a claim to its schema.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SchemaHash(pub [u8; 16]);

impl SchemaHash {
    pub fn from_hex(s: &str) -> Result<Self, ClaimError> {
        let bytes = hex::decode(s.trim().trim_start_matches("0x"))
            .map_err(|e| ClaimError::Encoding(format!("schema hash is not hex: {e}")))?;
        let arr: [u8; 16] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ClaimError::Encoding(format!("schema hash must be 16 bytes, got {}", bytes.len())))?;
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Hash of the self-authentication (`AuthBJJCredential`) schema.
    pub fn auth() -> Self {
        Self([
            0x01, 0x3f, 0xd3, 0xf6, 0x23, 0x55, 0x9d, 0x85, 0x0f, 0xb5, 0xb0, 0x2f, 0xf0, 0x12, 0xd0, 0xe2,
        ])
    }
}

impl fmt::Display for SchemaHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for SchemaHash {
    type Err = ClaimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for SchemaHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SchemaHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Where the subject of a claim is recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubjectPosition {
    /// The claim is about its issuer; no subject id.
    SelfSubject,
    /// Subject id lives in slot 1, part of the index.
    Index,
}

/// One builder step. Options may be given in any order; setting the same
/// field twice or combining incompatible fields is an encoding error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimOption {
    SchemaHash(SchemaHash),
    SubjectId(Id),
    IndexDataInts(Fr, Fr),
    ValueDataInts(Fr, Fr),
    RevocationNonce(u64),
    /// Unix seconds; also sets the expirable flag.
    ExpirationDate(u64),
    Version(u32),
    FlagUpdatable,
    FlagMerklized,
    /// Merklized root in index slot A; implies `FlagMerklized`.
    MerklizedRoot(Fr),
}

#[derive(Default)]
struct Seen {
    schema: bool,
    subject: bool,
    index: bool,
    value: bool,
    nonce: bool,
    expiration: bool,
    version: bool,
    updatable: bool,
    merklized: bool,
    merklized_root: bool,
}

fn once(flag: &mut bool, what: &str) -> Result<(), ClaimError> {
    if *flag {
        return Err(ClaimError::Encoding(format!("{what} set more than once")));
    }
    *flag = true;
    Ok(())
}

/// A claim: eight field-element slots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Claim {
    slots: [Fr; SLOTS],
}

impl Claim {
    /// Build a claim from builder options.
    pub fn new<I: IntoIterator<Item = ClaimOption>>(options: I) -> Result<Self, ClaimError> {
        let mut claim = Self { slots: [Fr::zero(); SLOTS] };
        let mut seen = Seen::default();

        for option in options {
            match option {
                ClaimOption::SchemaHash(sh) => {
                    once(&mut seen.schema, "schema hash")?;
                    claim.write_bytes(SLOT_HEADER, 0, &sh.0)?;
                }
                ClaimOption::SubjectId(id) => {
                    once(&mut seen.subject, "subject id")?;
                    claim.slots[SLOT_SUBJECT] = id.to_field();
                    claim.update_flags(|f| (f & !SUBJECT_MASK) | SUBJECT_OTHER_INDEX)?;
                }
                ClaimOption::IndexDataInts(a, b) => {
                    once(&mut seen.index, "index data")?;
                    claim.slots[SLOT_INDEX_A] = a;
                    claim.slots[SLOT_INDEX_B] = b;
                }
                ClaimOption::ValueDataInts(a, b) => {
                    once(&mut seen.value, "value data")?;
                    claim.slots[SLOT_VALUE_A] = a;
                    claim.slots[SLOT_VALUE_B] = b;
                }
                ClaimOption::RevocationNonce(nonce) => {
                    once(&mut seen.nonce, "revocation nonce")?;
                    claim.write_bytes(SLOT_REVOCATION, 0, &nonce.to_le_bytes())?;
                }
                ClaimOption::ExpirationDate(ts) => {
                    once(&mut seen.expiration, "expiration")?;
                    claim.write_bytes(SLOT_REVOCATION, 8, &ts.to_le_bytes())?;
                    claim.update_flags(|f| f | FLAG_EXPIRABLE)?;
                }
                ClaimOption::Version(v) => {
                    once(&mut seen.version, "version")?;
                    claim.write_bytes(SLOT_HEADER, VERSION_RANGE.start, &v.to_le_bytes())?;
                }
                ClaimOption::FlagUpdatable => {
                    once(&mut seen.updatable, "updatable flag")?;
                    claim.update_flags(|f| f | FLAG_UPDATABLE)?;
                }
                ClaimOption::FlagMerklized => {
                    once(&mut seen.merklized, "merklized flag")?;
                    claim.update_flags(|f| (f & !MERKLIZED_MASK) | MERKLIZED_INDEX)?;
                }
                ClaimOption::MerklizedRoot(root) => {
                    once(&mut seen.merklized_root, "merklized root")?;
                    claim.slots[SLOT_INDEX_A] = root;
                    claim.update_flags(|f| (f & !MERKLIZED_MASK) | MERKLIZED_INDEX)?;
                }
            }
        }

        if seen.merklized_root && seen.index {
            return Err(ClaimError::Encoding(
                "merklized root and index data both claim index slot A".into(),
            ));
        }
        if seen.merklized && seen.index && !claim.slots[SLOT_INDEX_A].is_zero() {
            return Err(ClaimError::Encoding(
                "merklized claims keep index slot A for the root".into(),
            ));
        }
        Ok(claim)
    }

    /// Rebuild a claim from raw slots, rejecting malformed headers.
    pub fn from_slots(slots: [Fr; SLOTS]) -> Result<Self, ClaimError> {
        let claim = Self { slots };
        let header = fr_to_le_bytes(&slots[SLOT_HEADER]);
        if header[VERSION_RANGE.end..].iter().any(|b| *b != 0) {
            return Err(ClaimError::Encoding("reserved header bytes are set".into()));
        }
        if header[FLAGS_BYTE + 1..VERSION_RANGE.start].iter().any(|b| *b != 0) {
            return Err(ClaimError::Encoding("unknown flag bits are set".into()));
        }
        let flags = header[FLAGS_BYTE];
        match flags & SUBJECT_MASK {
            SUBJECT_SELF | SUBJECT_OTHER_INDEX => {}
            other => {
                return Err(ClaimError::Encoding(format!("unsupported subject position {other:#05b}")))
            }
        }
        match flags & MERKLIZED_MASK {
            MERKLIZED_NONE | MERKLIZED_INDEX => {}
            other => {
                return Err(ClaimError::Encoding(format!("unsupported merklized position {:#05b}", other >> 5)))
            }
        }
        let revocation = fr_to_le_bytes(&slots[SLOT_REVOCATION]);
        if revocation[16..].iter().any(|b| *b != 0) {
            return Err(ClaimError::Encoding("reserved revocation bytes are set".into()));
        }
        if !slots[7].is_zero() {
            return Err(ClaimError::Encoding("reserved slot 7 is set".into()));
        }
        Ok(claim)
    }

    /// Parse the decimal-string form used in circuit inputs.
    pub fn from_decimal_strings(values: &[String]) -> Result<Self, ClaimError> {
        if values.len() != SLOTS {
            return Err(ClaimError::Encoding(format!("claim has {} slots, expected {SLOTS}", values.len())));
        }
        let mut slots = [Fr::zero(); SLOTS];
        for (slot, value) in slots.iter_mut().zip(values) {
            *slot = crate::field::fr_from_decimal(value)?;
        }
        Self::from_slots(slots)
    }

    pub fn slots(&self) -> &[Fr; SLOTS] {
        &self.slots
    }

    pub fn to_decimal_strings(&self) -> Vec<String> {
        self.slots.iter().map(crate::field::fr_to_decimal).collect()
    }

    fn write_bytes(&mut self, slot: usize, offset: usize, data: &[u8]) -> Result<(), ClaimError> {
        let mut bytes = fr_to_le_bytes(&self.slots[slot]);
        if offset + data.len() > FIELD_BYTES {
            return Err(ClaimError::Encoding(format!("write past end of slot {slot}")));
        }
        bytes[offset..offset + data.len()].copy_from_slice(data);
        self.slots[slot] = fr_from_le_bytes(&bytes)?;
        Ok(())
    }

    fn read_bytes<const N: usize>(&self, slot: usize, offset: usize) -> [u8; N] {
        let bytes = fr_to_le_bytes(&self.slots[slot]);
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes[offset..offset + N]);
        out
    }

    fn flags(&self) -> u8 {
        fr_to_le_bytes(&self.slots[SLOT_HEADER])[FLAGS_BYTE]
    }

    fn update_flags(&mut self, f: impl FnOnce(u8) -> u8) -> Result<(), ClaimError> {
        let flags = f(self.flags());
        self.write_bytes(SLOT_HEADER, FLAGS_BYTE, &[flags])
    }

    pub fn schema_hash(&self) -> SchemaHash {
        SchemaHash(self.read_bytes::<16>(SLOT_HEADER, 0))
    }

    pub fn version(&self) -> u32 {
        u32::from_le_bytes(self.read_bytes::<4>(SLOT_HEADER, VERSION_RANGE.start))
    }

    pub fn subject_position(&self) -> SubjectPosition {
        if self.flags() & SUBJECT_MASK == SUBJECT_OTHER_INDEX {
            SubjectPosition::Index
        } else {
            SubjectPosition::SelfSubject
        }
    }

    /// Subject id when the claim is about another identity.
    pub fn subject_id(&self) -> Option<Fr> {
        match self.subject_position() {
            SubjectPosition::Index => Some(self.slots[SLOT_SUBJECT]),
            SubjectPosition::SelfSubject => None,
        }
    }

    pub fn index_data(&self) -> (Fr, Fr) {
        (self.slots[SLOT_INDEX_A], self.slots[SLOT_INDEX_B])
    }

    pub fn value_data(&self) -> (Fr, Fr) {
        (self.slots[SLOT_VALUE_A], self.slots[SLOT_VALUE_B])
    }

    pub fn revocation_nonce(&self) -> u64 {
        u64::from_le_bytes(self.read_bytes::<8>(SLOT_REVOCATION, 0))
    }

    /// Expiration in unix seconds, if the claim is expirable.
    pub fn expiration(&self) -> Option<u64> {
        if self.flags() & FLAG_EXPIRABLE == 0 {
            return None;
        }
        Some(u64::from_le_bytes(self.read_bytes::<8>(SLOT_REVOCATION, 8)))
    }

    pub fn is_expired(&self, now_unix: u64) -> bool {
        self.expiration().map(|exp| now_unix >= exp).unwrap_or(false)
    }

    pub fn is_updatable(&self) -> bool {
        self.flags() & FLAG_UPDATABLE != 0
    }

    pub fn is_merklized(&self) -> bool {
        self.flags() & MERKLIZED_MASK == MERKLIZED_INDEX
    }

    pub fn merklized_root(&self) -> Option<Fr> {
        self.is_merklized().then(|| self.slots[SLOT_INDEX_A])
    }

    pub fn index_slots(&self) -> &[Fr] {
        &self.slots[..4]
    }

    pub fn value_slots(&self) -> &[Fr] {
        &self.slots[4..]
    }

    /// `Poseidon(slots[0..4])`.
    pub fn hash_index(&self) -> Result<Fr, ClaimError> {
        Ok(poseidon(self.index_slots())?)
    }

    /// `Poseidon(slots[4..8])`.
    pub fn hash_value(&self) -> Result<Fr, ClaimError> {
        Ok(poseidon(self.value_slots())?)
    }

    /// Both digests: the claim's key and value in the claims tree.
    pub fn hi_hv(&self) -> Result<(Fr, Fr), ClaimError> {
        Ok((self.hash_index()?, self.hash_value()?))
    }

    /// `Poseidon(hash_index, hash_value)`, the signing target.
    pub fn hash(&self) -> Result<Fr, ClaimError> {
        let (hi, hv) = self.hi_hv()?;
        Ok(hash_two(hi, hv)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::did::{Blockchain, DidMethod, Network};

    fn schema() -> SchemaHash {
        SchemaHash::from_hex("e500b653ca82273b7bfad8045d85a470").unwrap()
    }

    #[test]
    fn test_layout_of_built_claim() {
        let claim = Claim::new([
            ClaimOption::SchemaHash(schema()),
            ClaimOption::IndexDataInts(Fr::from(19900101u64), Fr::zero()),
            ClaimOption::ValueDataInts(Fr::from(7u64), Fr::from(8u64)),
            ClaimOption::RevocationNonce(42),
            ClaimOption::ExpirationDate(1_900_000_000),
            ClaimOption::Version(3),
            ClaimOption::FlagUpdatable,
        ])
        .unwrap();

        assert_eq!(claim.schema_hash(), schema());
        assert_eq!(claim.slots()[2], Fr::from(19900101u64));
        assert_eq!(claim.value_data(), (Fr::from(7u64), Fr::from(8u64)));
        assert_eq!(claim.revocation_nonce(), 42);
        assert_eq!(claim.expiration(), Some(1_900_000_000));
        assert_eq!(claim.version(), 3);
        assert!(claim.is_updatable());
        assert!(!claim.is_merklized());
        assert_eq!(claim.subject_position(), SubjectPosition::SelfSubject);
        assert!(claim.is_expired(1_900_000_000));
        assert!(!claim.is_expired(1_899_999_999));
    }

    #[test]
    fn test_hashes_are_stable() {
        let build = || {
            Claim::new([
                ClaimOption::SchemaHash(schema()),
                ClaimOption::IndexDataInts(Fr::from(1u64), Fr::from(2u64)),
                ClaimOption::RevocationNonce(9),
            ])
            .unwrap()
        };
        let (a, b) = (build(), build());
        assert_eq!(a.hash_index().unwrap(), b.hash_index().unwrap());
        assert_eq!(a.hash_value().unwrap(), b.hash_value().unwrap());
        assert_eq!(a.hash_index().unwrap(), poseidon(&a.slots()[..4]).unwrap());
        assert_eq!(
            a.hash().unwrap(),
            hash_two(a.hash_index().unwrap(), a.hash_value().unwrap()).unwrap()
        );
    }

    #[test]
    fn test_nonce_changes_value_hash_only() {
        let a = Claim::new([ClaimOption::SchemaHash(schema()), ClaimOption::RevocationNonce(1)]).unwrap();
        let b = Claim::new([ClaimOption::SchemaHash(schema()), ClaimOption::RevocationNonce(2)]).unwrap();
        assert_eq!(a.hash_index().unwrap(), b.hash_index().unwrap());
        assert_ne!(a.hash_value().unwrap(), b.hash_value().unwrap());
    }

    #[test]
    fn test_subject_id_sets_flag() {
        let id = Id::from_state(DidMethod::PolygonId, Blockchain::Polygon, Network::Amoy, &Fr::from(5u64)).unwrap();
        let claim = Claim::new([ClaimOption::SubjectId(id)]).unwrap();
        assert_eq!(claim.subject_position(), SubjectPosition::Index);
        assert_eq!(claim.subject_id(), Some(id.to_field()));
    }

    #[test]
    fn test_conflicting_options_rejected() {
        let twice = Claim::new([ClaimOption::RevocationNonce(1), ClaimOption::RevocationNonce(2)]);
        assert!(matches!(twice, Err(ClaimError::Encoding(_))));

        let root_and_index = Claim::new([
            ClaimOption::MerklizedRoot(Fr::from(3u64)),
            ClaimOption::IndexDataInts(Fr::from(1u64), Fr::zero()),
        ]);
        assert!(matches!(root_and_index, Err(ClaimError::Encoding(_))));
    }

    #[test]
    fn test_merklized_root_position() {
        let claim = Claim::new([ClaimOption::MerklizedRoot(Fr::from(77u64))]).unwrap();
        assert!(claim.is_merklized());
        assert_eq!(claim.merklized_root(), Some(Fr::from(77u64)));
    }

    #[test]
    fn test_from_slots_round_trip_and_validation() {
        let claim = Claim::new([
            ClaimOption::SchemaHash(SchemaHash::auth()),
            ClaimOption::IndexDataInts(Fr::from(10u64), Fr::from(11u64)),
            ClaimOption::RevocationNonce(1),
        ])
        .unwrap();
        let back = Claim::from_decimal_strings(&claim.to_decimal_strings()).unwrap();
        assert_eq!(back, claim);

        let mut slots = *claim.slots();
        slots[7] = Fr::from(1u64);
        assert!(Claim::from_slots(slots).is_err());
    }

    #[test]
    fn test_schema_hash_parsing() {
        assert_eq!(SchemaHash::auth().to_hex(), "013fd3f623559d850fb5b02ff012d0e2");
        assert!(SchemaHash::from_hex("abcd").is_err());
        assert!(SchemaHash::from_hex("zz").is_err());
    }
}
