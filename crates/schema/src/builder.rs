//! Declarative schema builder and its validation rules.
//!
//! A [`SchemaBuilder`] collects the issuer, type, version and an ordered
//! attribute list. [`SchemaBuilder::build`] checks them and produces a
//! [`SchemaDraft`] in which every attribute of a non-merklized schema has a
//! concrete claim slot.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use idenstate_core::Did;

use crate::error::SchemaError;
use crate::model::{Attribute, SlotTag};

/// Non-merklized schemas fit their attributes in the four data slots.
pub const MAX_SLOT_ATTRIBUTES: usize = SlotTag::ALL.len();

/// Attribute names taken by the credential envelope.
const RESERVED_NAMES: [&str; 2] = ["id", "type"];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchemaBuilder {
    pub issuer_did: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub version: String,
    pub title: String,
    pub description: String,
    pub is_merklized: bool,
    pub attributes: Vec<Attribute>,
}

/// A validated schema, ready for document generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaDraft {
    pub issuer_did: Did,
    pub type_name: String,
    pub version: String,
    pub title: String,
    pub description: String,
    pub is_merklized: bool,
    pub attributes: Vec<Attribute>,
}

impl SchemaDraft {
    /// Attributes in slot order, for non-merklized schemas.
    pub fn slot_attributes(&self) -> Vec<(SlotTag, &Attribute)> {
        let mut slotted: Vec<_> = self
            .attributes
            .iter()
            .filter_map(|a| a.slot.map(|s| (s, a)))
            .collect();
        slotted.sort_by_key(|(s, _)| *s);
        slotted
    }
}

impl SchemaBuilder {
    pub fn new(issuer_did: impl Into<String>, type_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            issuer_did: issuer_did.into(),
            type_name: type_name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn merklized(mut self, is_merklized: bool) -> Self {
        self.is_merklized = is_merklized;
        self
    }

    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn build(self) -> Result<SchemaDraft, SchemaError> {
        let issuer_did = validate_issuer(&self.issuer_did)?;
        validate_identifier("type", &self.type_name)?;
        validate_version(&self.version)?;

        let mut names = HashSet::new();
        for attr in &self.attributes {
            validate_identifier("attribute name", &attr.name)?;
            if RESERVED_NAMES.contains(&attr.name.as_str()) {
                return Err(SchemaError::validation(
                    "attribute name",
                    format!("{:?} is reserved by the credential envelope", attr.name),
                ));
            }
            if !names.insert(attr.name.as_str()) {
                return Err(SchemaError::validation(
                    "attribute name",
                    format!("duplicate attribute {:?}", attr.name),
                ));
            }
        }

        let attributes = if self.is_merklized {
            self.attributes
                .into_iter()
                .map(|a| Attribute { slot: None, ..a })
                .collect()
        } else {
            assign_slots(self.attributes)?
        };

        let title = if self.title.is_empty() { self.type_name.clone() } else { self.title };
        Ok(SchemaDraft {
            issuer_did,
            type_name: self.type_name,
            version: self.version,
            title,
            description: self.description,
            is_merklized: self.is_merklized,
            attributes,
        })
    }
}

fn validate_issuer(raw: &str) -> Result<Did, SchemaError> {
    if raw.trim().is_empty() {
        return Err(SchemaError::validation("issuer DID", "is required"));
    }
    Did::parse(raw).map_err(|e| SchemaError::validation("issuer DID", e.to_string()))
}

fn validate_identifier(field: &str, value: &str) -> Result<(), SchemaError> {
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return Err(SchemaError::validation(field, "is required"));
    };
    if !(first.is_ascii_alphabetic() || first == '_') || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SchemaError::validation(field, format!("{value:?} is not an identifier")));
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<(), SchemaError> {
    if version.is_empty() {
        return Err(SchemaError::validation("version", "is required"));
    }
    let core = version.split(['-', '+']).next().unwrap_or_default();
    let parts: Vec<&str> = core.split('.').collect();
    let numeric = |p: &&str| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit());
    if parts.len() != 3 || !parts.iter().all(numeric) {
        return Err(SchemaError::validation("version", format!("{version:?} is not a semantic version")));
    }
    Ok(())
}

/// Check explicit tags and give untagged attributes the free slots in order.
fn assign_slots(attributes: Vec<Attribute>) -> Result<Vec<Attribute>, SchemaError> {
    if attributes.len() > MAX_SLOT_ATTRIBUTES {
        return Err(SchemaError::validation(
            "attributes",
            format!(
                "non-merklized schemas allow at most {MAX_SLOT_ATTRIBUTES} attributes, got {}",
                attributes.len()
            ),
        ));
    }

    let mut taken = HashSet::new();
    for slot in attributes.iter().filter_map(|a| a.slot) {
        if !taken.insert(slot) {
            return Err(SchemaError::validation(
                "slot",
                format!("slot {} assigned more than once", slot.as_str()),
            ));
        }
    }

    let mut free = SlotTag::ALL.into_iter().filter(|s| !taken.contains(s));
    attributes
        .into_iter()
        .map(|attr| match attr.slot {
            Some(_) => Ok(attr),
            None => free
                .next()
                .map(|slot| Attribute { slot: Some(slot), ..attr })
                .ok_or_else(|| SchemaError::validation("slot", "no free claim slot left")),
        })
        .collect()
}
