//! Building claims from a schema record and a JSON credential subject.
//!
//! Non-merklized schemas place each attribute in its resolved slot.
//! Merklized schemas commit the whole subject to a sparse Merkle tree and
//! store the root in index slot A. A member's key is the Poseidon hash of
//! its path `credentialSubject IRI / attribute IRI`, both expanded through
//! the JSON-LD contexts.

use ark_ff::Zero;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use idenstate_core::field::fr_from_decimal;
use idenstate_core::poseidon::{hash_bytes, hash_two};
use idenstate_core::smt::DEFAULT_DEPTH;
use idenstate_core::{Claim, ClaimOption, Fr, Id, MemoryNodeStore, SparseMerkleTree};

use crate::contexts::{expand_term, DocumentCache};
use crate::error::SchemaError;
use crate::model::{Attribute, AttributeType, SchemaRecord, SlotTag};

/// Per-credential claim settings that do not come from the subject.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CredentialOptions {
    /// Holder identity; `None` for self-claims.
    pub subject: Option<Id>,
    pub revocation_nonce: u64,
    pub expiration: Option<DateTime<Utc>>,
    pub version: u32,
    pub updatable: bool,
}

/// Build the claim for `subject` under `record`.
///
/// `subject` is the `credentialSubject` object; its optional `id` member is
/// ignored here (the holder comes from `options.subject`).
pub async fn build_claim(
    record: &SchemaRecord,
    subject: &Map<String, Value>,
    options: &CredentialOptions,
    contexts: &DocumentCache,
) -> Result<Claim, SchemaError> {
    if !record.is_active() {
        return Err(SchemaError::validation("schema", format!("schema {} is revoked", record.id)));
    }
    let values = subject_values(record, subject)?;

    let mut claim_options = vec![
        ClaimOption::SchemaHash(record.hash),
        ClaimOption::RevocationNonce(options.revocation_nonce),
    ];
    if let Some(id) = options.subject {
        claim_options.push(ClaimOption::SubjectId(id));
    }
    if let Some(exp) = options.expiration {
        let ts = u64::try_from(exp.timestamp())
            .map_err(|_| SchemaError::validation("expiration", "must not precede the unix epoch"))?;
        claim_options.push(ClaimOption::ExpirationDate(ts));
    }
    if options.version != 0 {
        claim_options.push(ClaimOption::Version(options.version));
    }
    if options.updatable {
        claim_options.push(ClaimOption::FlagUpdatable);
    }

    if record.is_merklized {
        let root = merklize(contexts, record, &values).await?;
        claim_options.push(ClaimOption::MerklizedRoot(root));
    } else {
        let mut slots = [Fr::zero(); 4];
        for (attr, value) in &values {
            let Some(tag) = attr.slot else {
                return Err(SchemaError::validation(
                    "schema",
                    format!("attribute {:?} has no claim slot", attr.name),
                ));
            };
            let pos = SlotTag::ALL.iter().position(|s| *s == tag).unwrap_or_default();
            slots[pos] = *value;
        }
        claim_options.push(ClaimOption::IndexDataInts(slots[0], slots[1]));
        claim_options.push(ClaimOption::ValueDataInts(slots[2], slots[3]));
    }

    Ok(Claim::new(claim_options)?)
}

/// Pair every present attribute with its field value, checking required
/// attributes and rejecting unknown members.
fn subject_values<'a>(
    record: &'a SchemaRecord,
    subject: &Map<String, Value>,
) -> Result<Vec<(&'a Attribute, Fr)>, SchemaError> {
    if let Some(unknown) = subject.keys().find(|k| k.as_str() != "id" && record.attribute(k).is_none()) {
        return Err(SchemaError::validation(
            unknown.clone(),
            format!("not an attribute of {}", record.type_name),
        ));
    }

    let mut values = Vec::with_capacity(record.attributes.len());
    for attr in &record.attributes {
        match subject.get(&attr.name) {
            Some(Value::Null) | None if attr.required => {
                return Err(SchemaError::validation(attr.name.clone(), "is required"));
            }
            Some(Value::Null) | None => {}
            Some(value) => values.push((attr, attribute_value(attr, value)?)),
        }
    }
    Ok(values)
}

/// Field-element encoding of one attribute value.
///
/// `number` attributes take any JSON number: non-negative integers encode
/// as themselves, other numbers as the hash of their shortest decimal form.
pub fn attribute_value(attr: &Attribute, value: &Value) -> Result<Fr, SchemaError> {
    let invalid = |reason: &str| SchemaError::validation(attr.name.clone(), reason.to_string());
    match (attr.kind, value) {
        (AttributeType::Boolean, Value::Bool(b)) => Ok(Fr::from(u64::from(*b))),
        (AttributeType::Boolean, _) => Err(invalid("expected a boolean")),
        (AttributeType::Integer, Value::Number(n)) => n
            .as_u64()
            .map(Fr::from)
            .ok_or_else(|| invalid("expected a non-negative integer")),
        (AttributeType::Number, Value::Number(n)) => match n.as_u64() {
            Some(v) => Ok(Fr::from(v)),
            None => Ok(hash_bytes(n.to_string().as_bytes())?),
        },
        (AttributeType::Integer | AttributeType::Number, Value::String(s)) => {
            fr_from_decimal(s).map_err(|e| invalid(&e.to_string()))
        }
        (AttributeType::String, Value::Number(n)) => n
            .as_u64()
            .map(Fr::from)
            .ok_or_else(|| invalid("expected a string or a non-negative integer")),
        (AttributeType::String, Value::String(s)) => Ok(hash_bytes(s.as_bytes())?),
        (AttributeType::DateTime, Value::Number(n)) => n
            .as_u64()
            .map(Fr::from)
            .ok_or_else(|| invalid("expected unix seconds")),
        (AttributeType::DateTime, Value::String(s)) => {
            let ts = DateTime::parse_from_rfc3339(s)
                .map_err(|e| invalid(&format!("expected an RFC 3339 timestamp: {e}")))?
                .timestamp();
            u64::try_from(ts)
                .map(Fr::from)
                .map_err(|_| invalid("must not precede the unix epoch"))
        }
        _ => Err(invalid(&format!("unsupported value for a {} attribute", attr.kind.as_str()))),
    }
}

/// Key of attribute `name` in the merklized subject tree of `record`.
pub fn merklized_path(contexts: &DocumentCache, record: &SchemaRecord, name: &str) -> Result<Fr, SchemaError> {
    let subject_iri = contexts.credential_subject_iri()?;
    let attribute_iri = expand_term(&record.jsonld_context, &[record.type_name.as_str()], name)
        .ok_or_else(|| SchemaError::Context(format!("{name} is not defined for {}", record.type_name)))?;
    Ok(hash_two(hash_bytes(subject_iri.as_bytes())?, hash_bytes(attribute_iri.as_bytes())?)?)
}

async fn merklize(
    contexts: &DocumentCache,
    record: &SchemaRecord,
    values: &[(&Attribute, Fr)],
) -> Result<Fr, SchemaError> {
    let mut store = MemoryNodeStore::new();
    let mut tree = SparseMerkleTree::create(&mut store, DEFAULT_DEPTH).await?;
    for (attr, value) in values {
        tree.add(&mut store, merklized_path(contexts, record, &attr.name)?, *value).await?;
    }
    Ok(tree.root())
}
