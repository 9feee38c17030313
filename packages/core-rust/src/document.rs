//! Document model and its `MsgPack` encoding.

use serde::{Deserialize, Serialize};

/// Errors raised while encoding or decoding a document.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("failed to encode document: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode document: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// A stored document: system fields plus user `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "$type")]
    pub document_type: String,
    #[serde(rename = "$ownerId")]
    pub owner_id: String,
    #[serde(rename = "$revision")]
    pub revision: u64,
    #[serde(rename = "$protocolVersion")]
    pub protocol_version: u32,
    #[serde(rename = "$createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(rename = "$updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl Document {
    /// Creates a revision-1 document with no timestamps and empty data.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        document_type: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            document_type: document_type.into(),
            owner_id: owner_id.into(),
            revision: 1,
            protocol_version: 1,
            created_at: None,
            updated_at: None,
            data: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Encodes to named-field `MsgPack`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Encode`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DocumentError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// # Errors
    ///
    /// Returns [`DocumentError::Decode`] if `bytes` is not an encoded document.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocumentError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> Document {
        let mut doc = Document::new("d1", "note", "owner")
            .with_data("title", json!("hello"))
            .with_data("meta", json!({ "tags": ["a", "b"], "score": 4.5 }));
        doc.created_at = Some(1_700_000_000_000);
        doc
    }

    #[test]
    fn msgpack_preserves_nested_data() {
        let doc = sample();
        let decoded = Document::from_bytes(&doc.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, doc);
    }

    #[test]
    fn json_uses_system_field_names() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["$id"], json!("d1"));
        assert_eq!(value["$type"], json!("note"));
        assert_eq!(value["$createdAt"], json!(1_700_000_000_000_i64));
        assert!(value.get("$updatedAt").is_none());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(Document::from_bytes(&[0xc1]), Err(DocumentError::Decode(_))));
    }
}
