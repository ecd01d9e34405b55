//! Identifiers and DIDs derived from identity state.
//!
//! An [`Id`] is 31 bytes: a 2-byte type (method byte, blockchain/network
//! byte), the last 27 bytes of the state's 32-byte little-endian encoding,
//! and a 2-byte little-endian checksum (byte sum of the first 29 bytes).
//! Any state can be turned into an identifier, not just the genesis one.

use std::fmt;
use std::str::FromStr;

use ark_ff::PrimeField;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::IdentityError;
use crate::field::{fr_to_biguint, fr_to_le_bytes};
use crate::Fr;

pub const ID_BYTES: usize = 31;
const GENESIS_BYTES: usize = 27;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DidMethod {
    Iden3,
    PolygonId,
}

impl DidMethod {
    pub fn byte(self) -> u8 {
        match self {
            DidMethod::Iden3 => 0x01,
            DidMethod::PolygonId => 0x02,
        }
    }

    fn from_byte(b: u8) -> Result<Self, IdentityError> {
        match b {
            0x01 => Ok(DidMethod::Iden3),
            0x02 => Ok(DidMethod::PolygonId),
            other => Err(IdentityError::InvalidDid(format!("unknown method byte {other:#04x}"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DidMethod::Iden3 => "iden3",
            DidMethod::PolygonId => "polygonid",
        }
    }
}

impl FromStr for DidMethod {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "iden3" => Ok(DidMethod::Iden3),
            "polygonid" => Ok(DidMethod::PolygonId),
            other => Err(IdentityError::InvalidDid(format!("unknown method {other:?}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Blockchain {
    Polygon,
    Ethereum,
    ReadOnly,
}

impl Blockchain {
    pub fn as_str(self) -> &'static str {
        match self {
            Blockchain::Polygon => "polygon",
            Blockchain::Ethereum => "eth",
            Blockchain::ReadOnly => "readonly",
        }
    }
}

impl FromStr for Blockchain {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "polygon" => Ok(Blockchain::Polygon),
            "eth" | "ethereum" => Ok(Blockchain::Ethereum),
            "readonly" => Ok(Blockchain::ReadOnly),
            other => Err(IdentityError::InvalidDid(format!("unknown blockchain {other:?}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Network {
    Main,
    Mumbai,
    Amoy,
    Goerli,
    Sepolia,
    NoNetwork,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Main => "main",
            Network::Mumbai => "mumbai",
            Network::Amoy => "amoy",
            Network::Goerli => "goerli",
            Network::Sepolia => "sepolia",
            Network::NoNetwork => "",
        }
    }
}

impl FromStr for Network {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(Network::Main),
            "mumbai" => Ok(Network::Mumbai),
            "amoy" => Ok(Network::Amoy),
            "goerli" => Ok(Network::Goerli),
            "sepolia" => Ok(Network::Sepolia),
            "" => Ok(Network::NoNetwork),
            other => Err(IdentityError::InvalidDid(format!("unknown network {other:?}"))),
        }
    }
}

const NETWORKS: [(Blockchain, Network, u8); 7] = [
    (Blockchain::ReadOnly, Network::NoNetwork, 0x00),
    (Blockchain::Polygon, Network::Main, 0x11),
    (Blockchain::Polygon, Network::Mumbai, 0x12),
    (Blockchain::Polygon, Network::Amoy, 0x13),
    (Blockchain::Ethereum, Network::Main, 0x21),
    (Blockchain::Ethereum, Network::Goerli, 0x22),
    (Blockchain::Ethereum, Network::Sepolia, 0x23),
];

fn network_byte(blockchain: Blockchain, network: Network) -> Result<u8, IdentityError> {
    NETWORKS
        .iter()
        .find(|(b, n, _)| *b == blockchain && *n == network)
        .map(|(_, _, byte)| *byte)
        .ok_or_else(|| {
            IdentityError::InvalidDid(format!(
                "unsupported network {}:{}",
                blockchain.as_str(),
                network.as_str()
            ))
        })
}

fn network_from_byte(byte: u8) -> Result<(Blockchain, Network), IdentityError> {
    NETWORKS
        .iter()
        .find(|(_, _, b)| *b == byte)
        .map(|(b, n, _)| (*b, *n))
        .ok_or_else(|| IdentityError::InvalidDid(format!("unknown network byte {byte:#04x}")))
}

fn checksum(body: &[u8]) -> [u8; 2] {
    let sum = body.iter().fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)));
    sum.to_le_bytes()
}

/// A 31-byte identity identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id([u8; ID_BYTES]);

impl Id {
    /// Identifier for `state` under the given method and network.
    pub fn from_state(
        method: DidMethod,
        blockchain: Blockchain,
        network: Network,
        state: &Fr,
    ) -> Result<Self, IdentityError> {
        let typ = [method.byte(), network_byte(blockchain, network)?];
        let state_bytes = fr_to_le_bytes(state);
        let mut bytes = [0u8; ID_BYTES];
        bytes[..2].copy_from_slice(&typ);
        bytes[2..2 + GENESIS_BYTES].copy_from_slice(&state_bytes[state_bytes.len() - GENESIS_BYTES..]);
        let sum = checksum(&bytes[..2 + GENESIS_BYTES]);
        bytes[2 + GENESIS_BYTES..].copy_from_slice(&sum);
        Ok(Self(bytes))
    }

    /// Decode raw bytes, verifying the checksum.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        let arr: [u8; ID_BYTES] = bytes
            .try_into()
            .map_err(|_| IdentityError::InvalidDid(format!("id must be {ID_BYTES} bytes, got {}", bytes.len())))?;
        if checksum(&arr[..2 + GENESIS_BYTES]) != arr[2 + GENESIS_BYTES..] {
            return Err(IdentityError::InvalidDid("id checksum mismatch".into()));
        }
        Ok(Self(arr))
    }

    pub fn from_base58(s: &str) -> Result<Self, IdentityError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| IdentityError::InvalidDid(format!("bad base58: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Inverse of [`Id::to_field`].
    pub fn from_field(value: &Fr) -> Result<Self, IdentityError> {
        let le = fr_to_biguint(value).to_bytes_le();
        if le.len() > ID_BYTES {
            return Err(IdentityError::InvalidDid("field element wider than an id".into()));
        }
        let mut bytes = [0u8; ID_BYTES];
        bytes[..le.len()].copy_from_slice(&le);
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    pub fn method(&self) -> Result<DidMethod, IdentityError> {
        DidMethod::from_byte(self.0[0])
    }

    pub fn network(&self) -> Result<(Blockchain, Network), IdentityError> {
        network_from_byte(self.0[1])
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    /// Little-endian integer value of the 31 bytes; how circuits see ids.
    pub fn to_field(&self) -> Fr {
        Fr::from_le_bytes_mod_order(&self.0)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.to_base58())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

/// `did:<method>:<blockchain>:<network>:<base58 id>`; read-only ids render
/// as `did:<method>:<base58 id>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Did {
    pub method: DidMethod,
    pub blockchain: Blockchain,
    pub network: Network,
    pub id: Id,
}

impl Did {
    pub fn from_state(
        method: DidMethod,
        blockchain: Blockchain,
        network: Network,
        state: &Fr,
    ) -> Result<Self, IdentityError> {
        let id = Id::from_state(method, blockchain, network, state)?;
        Ok(Self { method, blockchain, network, id })
    }

    pub fn from_id(id: Id) -> Result<Self, IdentityError> {
        let method = id.method()?;
        let (blockchain, network) = id.network()?;
        Ok(Self { method, blockchain, network, id })
    }

    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        let parts: Vec<&str> = s.split(':').collect();
        let did = match parts.as_slice() {
            ["did", method, id] => {
                let method = DidMethod::from_str(method)?;
                Self {
                    method,
                    blockchain: Blockchain::ReadOnly,
                    network: Network::NoNetwork,
                    id: Id::from_base58(id)?,
                }
            }
            ["did", method, blockchain, network, id] => Self {
                method: DidMethod::from_str(method)?,
                blockchain: Blockchain::from_str(blockchain)?,
                network: Network::from_str(network)?,
                id: Id::from_base58(id)?,
            },
            _ => return Err(IdentityError::InvalidDid(format!("malformed DID {s:?}"))),
        };

        // The id's type bytes must agree with the textual method and network.
        let expected = [did.method.byte(), network_byte(did.blockchain, did.network)?];
        if did.id.0[..2] != expected {
            return Err(IdentityError::InvalidDid(format!(
                "id type does not match {}:{}:{}",
                did.method.as_str(),
                did.blockchain.as_str(),
                did.network.as_str()
            )));
        }
        Ok(did)
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.blockchain == Blockchain::ReadOnly {
            return write!(f, "did:{}:{}", self.method.as_str(), self.id);
        }
        write!(
            f,
            "did:{}:{}:{}:{}",
            self.method.as_str(),
            self.blockchain.as_str(),
            self.network.as_str(),
            self.id
        )
    }
}

impl FromStr for Did {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Did {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
