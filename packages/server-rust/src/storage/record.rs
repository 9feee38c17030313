//! Physical document shape held by the backing store.

use std::collections::{BTreeMap, BTreeSet};

use docstore_core::{Document, DocumentError, Value};

/// Stored representation of a [`Document`].
///
/// `body` is the searchable shape
/// `{ _id, ownerId, revision, protocolVersion, data, createdAt?, updatedAt? }`
/// where `data` keeps only indexed top-level properties. `raw` is the
/// `MsgPack` encoding of the full document, used for retrieval by id.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub body: Value,
    pub raw: Vec<u8>,
}

impl StoredDocument {
    /// Projects `document` keeping only `indexed` data properties.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Encode`] if the full document cannot be encoded.
    pub fn project(document: &Document, indexed: &BTreeSet<String>) -> Result<Self, DocumentError> {
        let data: BTreeMap<String, Value> = document
            .data
            .iter()
            .filter(|(k, _)| indexed.contains(k.as_str()))
            .map(|(k, v)| (k.clone(), Value::from_json(v)))
            .collect();

        let mut body = BTreeMap::from([
            ("_id".to_string(), Value::String(document.id.clone())),
            ("ownerId".to_string(), Value::String(document.owner_id.clone())),
            ("revision".to_string(), Value::Int(clamp_i64(document.revision))),
            (
                "protocolVersion".to_string(),
                Value::Int(i64::from(document.protocol_version)),
            ),
            ("data".to_string(), Value::Map(data)),
        ]);
        if let Some(ms) = document.created_at {
            body.insert("createdAt".to_string(), Value::DateTime(ms));
        }
        if let Some(ms) = document.updated_at {
            body.insert("updatedAt".to_string(), Value::DateTime(ms));
        }

        Ok(Self {
            id: document.id.clone(),
            body: Value::Map(body),
            raw: document.to_bytes()?,
        })
    }

    /// Decodes the full original document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Decode`] if `raw` is corrupt.
    pub fn decode(&self) -> Result<Document, DocumentError> {
        Document::from_bytes(&self.raw)
    }
}

fn clamp_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
