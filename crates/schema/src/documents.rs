//! JSON-Schema and JSON-LD context generation.
//!
//! Both documents are derived from a validated [`SchemaDraft`] and are
//! pinned in their pretty-printed (2-space) form.

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::builder::SchemaDraft;

pub const JSON_SCHEMA_DRAFT: &str = "https://json-schema.org/draft/2020-12/schema";
pub const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema#";
const SERIALIZATION_PREFIX: &str = "iden3:v1:";

/// `slotIndexA=name&slotValueA=other` for non-merklized schemas.
pub fn iden3_serialization(draft: &SchemaDraft) -> Option<String> {
    if draft.is_merklized {
        return None;
    }
    let pairs: Vec<String> = draft
        .attributes
        .iter()
        .filter_map(|a| a.slot.map(|s| format!("{}={}", s.serialization_key(), a.name)))
        .collect();
    Some(format!("{SERIALIZATION_PREFIX}{}", pairs.join("&")))
}

/// Draft 2020-12 credential envelope whose `credentialSubject` lists the
/// schema's attributes.
///
/// String and dateTime attributes are declared `integer`: the circuits hash
/// them to field elements before use.
pub fn json_schema(draft: &SchemaDraft) -> Value {
    let mut subject_props = Map::new();
    subject_props.insert(
        "id".into(),
        json!({ "title": "Credential Subject ID", "type": "string", "format": "uri" }),
    );
    for attr in &draft.attributes {
        let mut prop = Map::new();
        prop.insert("title".into(), Value::String(attr.title.clone()));
        if !attr.description.is_empty() {
            prop.insert("description".into(), Value::String(attr.description.clone()));
        }
        prop.insert("type".into(), Value::String(attr.kind.json_schema_type().into()));
        subject_props.insert(attr.name.clone(), Value::Object(prop));
    }
    let required: Vec<&str> = draft
        .attributes
        .iter()
        .filter(|a| a.required)
        .map(|a| a.name.as_str())
        .collect();

    let mut metadata = Map::new();
    metadata.insert("version".into(), Value::String(draft.version.clone()));
    metadata.insert("type".into(), Value::String(draft.type_name.clone()));
    if !draft.is_merklized {
        let slots: Map<String, Value> = draft
            .slot_attributes()
            .into_iter()
            .map(|(s, a)| (s.metadata_key().to_string(), Value::String(a.name.clone())))
            .collect();
        metadata.insert("iden3Serialization".into(), Value::Object(slots));
    }

    json!({
        "$schema": JSON_SCHEMA_DRAFT,
        "$metadata": metadata,
        "title": draft.title,
        "description": draft.description,
        "type": "object",
        "required": [
            "@context", "id", "issuanceDate", "issuer", "type", "credentialSubject", "credentialSchema"
        ],
        "properties": {
            "@context": { "type": ["string", "array", "object"] },
            "id": { "type": "string" },
            "type": { "type": ["string", "array"], "items": { "type": "string" } },
            "issuer": {
                "type": ["string", "object"],
                "format": "uri",
                "properties": { "id": { "type": "string", "format": "uri" } },
                "required": ["id"]
            },
            "issuanceDate": { "type": "string", "format": "date-time" },
            "expirationDate": { "type": "string", "format": "date-time" },
            "credentialSchema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string", "format": "uri" },
                    "type": { "type": "string" }
                },
                "required": ["id", "type"]
            },
            "credentialSubject": {
                "type": "object",
                "properties": subject_props,
                "required": required
            }
        }
    })
}

/// JSON-LD context declaring the credential type and one term per attribute.
pub fn jsonld_context(draft: &SchemaDraft, schema_id: Uuid) -> Value {
    let mut inner = Map::new();
    inner.insert("@protected".into(), Value::Bool(true));
    inner.insert("@version".into(), json!(1.1));
    inner.insert("id".into(), json!("@id"));
    inner.insert("type".into(), json!("@type"));
    inner.insert("iden3-vocab".into(), Value::String(format!("urn:uuid:{schema_id}#")));
    inner.insert("xsd".into(), json!(XSD_NAMESPACE));
    if let Some(serialization) = iden3_serialization(draft) {
        inner.insert("iden3_serialization".into(), Value::String(serialization));
    }
    for attr in &draft.attributes {
        inner.insert(
            attr.name.clone(),
            json!({
                "@id": format!("iden3-vocab:{}", attr.name),
                "@type": attr.kind.xsd_type(),
            }),
        );
    }

    let mut outer = Map::new();
    outer.insert("@protected".into(), Value::Bool(true));
    outer.insert("@version".into(), json!(1.1));
    outer.insert("id".into(), json!("@id"));
    outer.insert("type".into(), json!("@type"));
    outer.insert(
        draft.type_name.clone(),
        json!({
            "@id": format!("urn:uuid:{schema_id}"),
            "@context": inner,
        }),
    );

    json!({ "@context": [outer] })
}

/// Bytes handed to the pinning backend.
pub fn to_pinned_bytes(doc: &Value) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec_pretty(doc)
}
