//! Schema records and their attribute lists.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use idenstate_core::{Did, SchemaHash};

use crate::error::SchemaError;

/// Declared type of a credential-subject attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributeType {
    String,
    Integer,
    Number,
    Boolean,
    DateTime,
}

impl AttributeType {
    pub fn as_str(self) -> &'static str {
        match self {
            AttributeType::String => "string",
            AttributeType::Integer => "integer",
            AttributeType::Number => "number",
            AttributeType::Boolean => "boolean",
            AttributeType::DateTime => "dateTime",
        }
    }

    /// Type in the generated JSON-Schema. Everything except booleans is an
    /// integer there, since circuits only see field elements.
    pub fn json_schema_type(self) -> &'static str {
        match self {
            AttributeType::Boolean => "boolean",
            _ => "integer",
        }
    }

    /// XSD datatype used in the JSON-LD context.
    pub fn xsd_type(self) -> &'static str {
        match self {
            AttributeType::String => "xsd:string",
            AttributeType::Integer => "xsd:integer",
            AttributeType::Number => "xsd:double",
            AttributeType::Boolean => "xsd:boolean",
            AttributeType::DateTime => "xsd:dateTime",
        }
    }
}

impl FromStr for AttributeType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(AttributeType::String),
            "integer" => Ok(AttributeType::Integer),
            "number" => Ok(AttributeType::Number),
            "boolean" => Ok(AttributeType::Boolean),
            "dateTime" => Ok(AttributeType::DateTime),
            other => Err(SchemaError::validation("attribute type", format!("unknown type {other:?}"))),
        }
    }
}

/// Claim slot an attribute of a non-merklized schema is stored in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SlotTag {
    IndexSlotA,
    IndexSlotB,
    DataSlotA,
    DataSlotB,
}

impl SlotTag {
    /// Fill order for attributes declared without a tag.
    pub const ALL: [SlotTag; 4] = [
        SlotTag::IndexSlotA,
        SlotTag::IndexSlotB,
        SlotTag::DataSlotA,
        SlotTag::DataSlotB,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SlotTag::IndexSlotA => "indexSlotA",
            SlotTag::IndexSlotB => "indexSlotB",
            SlotTag::DataSlotA => "dataSlotA",
            SlotTag::DataSlotB => "dataSlotB",
        }
    }

    /// Position in the claim's eight slots.
    pub fn claim_slot(self) -> usize {
        match self {
            SlotTag::IndexSlotA => 2,
            SlotTag::IndexSlotB => 3,
            SlotTag::DataSlotA => 5,
            SlotTag::DataSlotB => 6,
        }
    }

    /// Key in the JSON-Schema `iden3Serialization` map.
    pub fn metadata_key(self) -> &'static str {
        match self {
            SlotTag::IndexSlotA => "indexDataSlotA",
            SlotTag::IndexSlotB => "indexDataSlotB",
            SlotTag::DataSlotA => "valueDataSlotA",
            SlotTag::DataSlotB => "valueDataSlotB",
        }
    }

    /// Key in the JSON-LD `iden3_serialization` string.
    pub fn serialization_key(self) -> &'static str {
        match self {
            SlotTag::IndexSlotA => "slotIndexA",
            SlotTag::IndexSlotB => "slotIndexB",
            SlotTag::DataSlotA => "slotValueA",
            SlotTag::DataSlotB => "slotValueB",
        }
    }
}

impl FromStr for SlotTag {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SlotTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| SchemaError::validation("slot", format!("unknown slot tag {s:?}")))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub name: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: AttributeType,
    pub description: String,
    pub required: bool,
    /// Resolved slot; always set on a stored non-merklized schema.
    pub slot: Option<SlotTag>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, kind: AttributeType) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            name,
            kind,
            description: String::new(),
            required: false,
            slot: None,
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

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn slot(mut self, slot: SlotTag) -> Self {
        self.slot = Some(slot);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaStatus {
    Active,
    Revoked,
}

impl SchemaStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaStatus::Active => "active",
            SchemaStatus::Revoked => "revoked",
        }
    }
}

impl fmt::Display for SchemaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaStatus {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SchemaStatus::Active),
            "revoked" => Ok(SchemaStatus::Revoked),
            other => Err(SchemaError::validation("status", format!("unknown schema status {other:?}"))),
        }
    }
}

/// A created schema. Immutable apart from its status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaRecord {
    pub id: Uuid,
    pub issuer_did: Did,
    pub title: String,
    pub description: String,
    pub version: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub is_merklized: bool,
    pub attributes: Vec<Attribute>,
    pub json_schema: serde_json::Value,
    pub jsonld_context: serde_json::Value,
    pub schema_cid: String,
    pub context_cid: String,
    pub schema_url: String,
    pub context_url: String,
    pub hash: SchemaHash,
    pub status: SchemaStatus,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl SchemaRecord {
    pub fn is_active(&self) -> bool {
        self.status == SchemaStatus::Active
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}
