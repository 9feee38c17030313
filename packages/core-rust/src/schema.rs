//! Document schemas and data contracts.
//!
//! Only the parts the query core consumes are typed: the declared indices
//! and the property grammar, kept opaque.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::index::{IndexCatalog, IndexDefinition};

pub const ID_FIELD: &str = "$id";
pub const OWNER_ID_FIELD: &str = "$ownerId";
pub const REVISION_FIELD: &str = "$revision";
pub const CREATED_AT_FIELD: &str = "$createdAt";
pub const UPDATED_AT_FIELD: &str = "$updatedAt";
pub const PROTOCOL_VERSION_FIELD: &str = "$protocolVersion";

#[must_use]
pub fn is_system_field(field: &str) -> bool {
    field.starts_with('$')
}

/// Errors raised while loading a schema or contract definition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("index property must have exactly one entry, got {entries}")]
    InvalidIndexProperty { entries: usize },

    #[error("index #{index} has no properties")]
    EmptyIndex { index: usize },

    #[error("index #{index} lists field '{field}' more than once")]
    DuplicateIndexField { index: usize, field: String },

    #[error("malformed schema: {0}")]
    Malformed(String),
}

/// Per-document-type definition: declared indices plus property grammar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSchema {
    #[serde(default)]
    pub indices: Vec<IndexDefinition>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl DocumentSchema {
    #[must_use]
    pub fn with_indices(indices: Vec<IndexDefinition>) -> Self {
        Self {
            indices,
            properties: serde_json::Map::new(),
        }
    }

    /// Parses and checks a schema definition.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the JSON does not have the schema shape or
    /// an index is empty or repeats a field.
    pub fn from_json(value: serde_json::Value) -> Result<Self, SchemaError> {
        let schema: Self =
            serde_json::from_value(value).map_err(|e| SchemaError::Malformed(e.to_string()))?;
        schema.check()?;
        Ok(schema)
    }

    /// Checks index invariants: non-empty, field paths unique per index.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn check(&self) -> Result<(), SchemaError> {
        for (i, index) in self.indices.iter().enumerate() {
            if index.is_empty() {
                return Err(SchemaError::EmptyIndex { index: i });
            }
            let mut seen = BTreeSet::new();
            for field in index.fields() {
                if !seen.insert(field) {
                    return Err(SchemaError::DuplicateIndexField {
                        index: i,
                        field: field.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn catalog(&self) -> IndexCatalog {
        IndexCatalog::from_schema(self)
    }

    /// Top-level data properties participating in at least one index.
    ///
    /// These are the properties projected into the stored searchable shape.
    #[must_use]
    pub fn indexed_properties(&self) -> BTreeSet<String> {
        self.indices
            .iter()
            .flat_map(IndexDefinition::fields)
            .filter(|f| !is_system_field(f))
            .filter_map(|f| f.split('.').next())
            .map(str::to_string)
            .collect()
    }
}

/// A named set of document types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataContract {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub documents: BTreeMap<String, DocumentSchema>,
}

impl DataContract {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_document(mut self, document_type: impl Into<String>, schema: DocumentSchema) -> Self {
        self.documents.insert(document_type.into(), schema);
        self
    }

    /// Parses a contract and checks every document schema.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] on shape errors or index invariant violations.
    pub fn from_json(value: serde_json::Value) -> Result<Self, SchemaError> {
        let contract: Self =
            serde_json::from_value(value).map_err(|e| SchemaError::Malformed(e.to_string()))?;
        for schema in contract.documents.values() {
            schema.check()?;
        }
        Ok(contract)
    }

    #[must_use]
    pub fn document_schema(&self, document_type: &str) -> Option<&DocumentSchema> {
        self.documents.get(document_type)
    }
}
