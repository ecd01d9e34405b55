//! Embedded JSON-LD context documents and term expansion.
//!
//! The W3C and Iden3 contexts referenced by every credential are compiled
//! into the binary and parsed once at startup, so claim building never
//! loads them over the network. Term expansion follows JSON-LD scoped
//! contexts far enough to turn a subject member into its full IRI.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::SchemaError;

pub const W3C_CREDENTIALS_V1: &str = "https://www.w3.org/2018/credentials/v1";
pub const IDEN3_PROOFS: &str = "https://schema.iden3.io/core/jsonld/iden3proofs.jsonld";
pub const IDEN3_DISPLAY_METHOD: &str = "https://schema.iden3.io/core/jsonld/displayMethod.jsonld";

const EMBEDDED: [(&str, &str); 3] = [
    (W3C_CREDENTIALS_V1, include_str!("../contexts/credentials-v1.jsonld")),
    (IDEN3_PROOFS, include_str!("../contexts/iden3proofs.jsonld")),
    (IDEN3_DISPLAY_METHOD, include_str!("../contexts/displayMethod-v1.jsonld")),
];

/// Read-only after construction; share it behind an `Arc`.
#[derive(Debug)]
pub struct DocumentCache {
    documents: HashMap<String, Arc<Value>>,
}

impl DocumentCache {
    pub fn embedded() -> Result<Self, SchemaError> {
        let mut documents = HashMap::with_capacity(EMBEDDED.len());
        for (url, raw) in EMBEDDED {
            let doc: Value = serde_json::from_str(raw)
                .map_err(|e| SchemaError::Context(format!("embedded context {url}: {e}")))?;
            documents.insert(url.to_string(), Arc::new(doc));
        }
        Ok(Self { documents })
    }

    /// Cached document for `url`. A trailing `#fragment` is ignored.
    pub fn get(&self, url: &str) -> Option<Arc<Value>> {
        let base = url.split_once('#').map_or(url, |(base, _)| base);
        self.documents.get(base).cloned()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// IRI of `credentialSubject` in a `VerifiableCredential`.
    pub fn credential_subject_iri(&self) -> Result<String, SchemaError> {
        let doc = self
            .get(W3C_CREDENTIALS_V1)
            .ok_or_else(|| SchemaError::Context(format!("{W3C_CREDENTIALS_V1} is not cached")))?;
        expand_term(&doc, &["VerifiableCredential"], "credentialSubject")
            .ok_or_else(|| SchemaError::Context("credentialSubject is not defined".into()))
    }
}

fn context_maps(ctx: &Value) -> Vec<&Map<String, Value>> {
    match ctx {
        Value::Object(map) => vec![map],
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    }
}

fn term_id(definition: &Value) -> Option<&str> {
    match definition {
        Value::String(iri) => Some(iri),
        Value::Object(map) => map.get("@id").and_then(Value::as_str),
        _ => None,
    }
}

fn expand_iri(contexts: &[&Map<String, Value>], iri: &str) -> String {
    if let Some((prefix, suffix)) = iri.split_once(':') {
        if !suffix.starts_with("//") {
            if let Some(base) = contexts.iter().rev().find_map(|ctx| ctx.get(prefix)).and_then(term_id) {
                return format!("{base}{suffix}");
            }
        }
    }
    iri.to_string()
}

/// Full IRI of `term` inside the type-scoped contexts named by `scope`.
///
/// Each scope entry is a type term whose `@context` is entered in turn;
/// inner definitions shadow outer ones. Compact IRIs are expanded against
/// every prefix visible at the innermost scope.
pub fn expand_term(doc: &Value, scope: &[&str], term: &str) -> Option<String> {
    let mut active = context_maps(doc.get("@context")?);
    let mut visible = active.clone();
    for name in scope {
        let definition = active.iter().rev().find_map(|ctx| ctx.get(*name))?;
        active = context_maps(definition.get("@context")?);
        visible.extend(active.iter().copied());
    }
    let id = visible.iter().rev().find_map(|ctx| ctx.get(term)).and_then(term_id)?;
    Some(expand_iri(&visible, id))
}

#[cfg(test)]
mod contexts_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_embedded_contexts_parse() {
        let cache = DocumentCache::embedded().unwrap();
        assert_eq!(cache.len(), 3);
        for url in [W3C_CREDENTIALS_V1, IDEN3_PROOFS, IDEN3_DISPLAY_METHOD] {
            let doc = cache.get(url).unwrap();
            assert!(doc.get("@context").is_some(), "{url}");
        }
    }

    #[test]
    fn test_fragment_lookup() {
        let cache = DocumentCache::embedded().unwrap();
        let a = cache.get("https://schema.iden3.io/core/jsonld/iden3proofs.jsonld#Iden3SparseMerkleTreeProof").unwrap();
        let b = cache.get(IDEN3_PROOFS).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(cache.get("https://example.com/unknown.jsonld").is_none());
    }

    #[test]
    fn test_credential_subject_iri() {
        let cache = DocumentCache::embedded().unwrap();
        assert_eq!(
            cache.credential_subject_iri().unwrap(),
            "https://www.w3.org/2018/credentials#credentialSubject"
        );
    }

    #[test]
    fn test_scoped_term_expansion() {
        let doc = json!({
            "@context": [{
                "vocab": "https://outer.example/#",
                "KYC": {
                    "@id": "urn:uuid:1234",
                    "@context": {
                        "vocab": "urn:uuid:1234#",
                        "birthday": { "@id": "vocab:birthday", "@type": "xsd:integer" },
                        "plain": "https://plain.example/term"
                    }
                }
            }]
        });
        assert_eq!(expand_term(&doc, &["KYC"], "birthday").unwrap(), "urn:uuid:1234#birthday");
        assert_eq!(expand_term(&doc, &["KYC"], "plain").unwrap(), "https://plain.example/term");
        assert!(expand_term(&doc, &["KYC"], "missing").is_none());
        assert!(expand_term(&doc, &["Other"], "birthday").is_none());
    }
}
