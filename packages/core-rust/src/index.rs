//! Index definitions and the per-document-type index catalog.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::condition::SortDirection;
use crate::schema::{DocumentSchema, SchemaError, ID_FIELD};

/// One `(fieldPath, direction)` pair of an index.
///
/// Serialized as a single-entry object, e.g. `{"a.b": "asc"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, SortDirection>",
    into = "BTreeMap<String, SortDirection>"
)]
pub struct IndexProperty {
    pub field: String,
    pub direction: SortDirection,
}

impl TryFrom<BTreeMap<String, SortDirection>> for IndexProperty {
    type Error = SchemaError;

    fn try_from(map: BTreeMap<String, SortDirection>) -> Result<Self, Self::Error> {
        if map.len() != 1 {
            return Err(SchemaError::InvalidIndexProperty { entries: map.len() });
        }
        let (field, direction) = map
            .into_iter()
            .next()
            .ok_or(SchemaError::InvalidIndexProperty { entries: 0 })?;
        Ok(Self { field, direction })
    }
}

impl From<IndexProperty> for BTreeMap<String, SortDirection> {
    fn from(p: IndexProperty) -> Self {
        BTreeMap::from([(p.field, p.direction)])
    }
}

/// Ordered list of indexed fields plus a uniqueness flag.
///
/// Field order defines both filter-field precedence and natural sort order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub properties: Vec<IndexProperty>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexDefinition {
    /// Builds a non-unique, unnamed index from `(field, direction)` pairs.
    #[must_use]
    pub fn new<S: Into<String>>(properties: impl IntoIterator<Item = (S, SortDirection)>) -> Self {
        Self {
            name: None,
            properties: properties
                .into_iter()
                .map(|(field, direction)| IndexProperty {
                    field: field.into(),
                    direction,
                })
                .collect(),
            unique: false,
        }
    }

    /// Shorthand for an all-ascending index.
    #[must_use]
    pub fn ascending(fields: &[&str]) -> Self {
        Self::new(fields.iter().map(|f| (*f, SortDirection::Asc)))
    }

    #[must_use]
    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(|p| p.field.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Position of `field` in the index, if covered.
    #[must_use]
    pub fn position(&self, field: &str) -> Option<usize> {
        self.fields().position(|f| f == field)
    }

    /// Whether the index field set is a superset of `fields`.
    #[must_use]
    pub fn covers(&self, fields: &BTreeSet<String>) -> bool {
        fields.iter().all(|f| self.position(f).is_some())
    }
}

/// Ordered candidate indices for one document type.
///
/// Declared indices come first, in declaration order; the implicit unique
/// `$id` index is appended last.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexCatalog {
    indices: Vec<IndexDefinition>,
}

impl IndexCatalog {
    #[must_use]
    pub fn from_schema(schema: &DocumentSchema) -> Self {
        Self::from_declared(schema.indices.iter().cloned())
    }

    #[must_use]
    pub fn from_declared(declared: impl IntoIterator<Item = IndexDefinition>) -> Self {
        let mut indices: Vec<IndexDefinition> = declared.into_iter().collect();
        indices.push(Self::system_index());
        Self { indices }
    }

    /// The implicit `[$id asc]` unique index.
    #[must_use]
    pub fn system_index() -> IndexDefinition {
        IndexDefinition::new([(ID_FIELD, SortDirection::Asc)]).with_unique(true)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexDefinition> {
        self.indices.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Whether any index in the catalog covers `field`.
    #[must_use]
    pub fn is_indexed(&self, field: &str) -> bool {
        self.indices.iter().any(|i| i.position(field).is_some())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn property_deserializes_from_single_entry_object() {
        let p: IndexProperty = serde_json::from_value(json!({ "a.b": "desc" })).unwrap();
        assert_eq!(p.field, "a.b");
        assert_eq!(p.direction, SortDirection::Desc);
    }

    #[test]
    fn property_rejects_multi_entry_object() {
        let err = serde_json::from_value::<IndexProperty>(json!({ "a": "asc", "b": "asc" }));
        assert!(err.is_err());
    }

    #[test]
    fn property_rejects_unknown_direction() {
        let err = serde_json::from_value::<IndexProperty>(json!({ "a": "up" }));
        assert!(err.is_err());
    }

    #[test]
    fn catalog_appends_system_index_last() {
        let catalog = IndexCatalog::from_declared([IndexDefinition::ascending(&["a"])]);
        let last = catalog.iter().last().unwrap();
        assert_eq!(last.fields().collect::<Vec<_>>(), vec!["$id"]);
        assert!(last.unique);
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn covers_checks_superset() {
        let idx = IndexDefinition::ascending(&["a", "b"]);
        let fields: BTreeSet<String> = ["b".to_string()].into();
        assert!(idx.covers(&fields));
        let fields: BTreeSet<String> = ["b".to_string(), "c".to_string()].into();
        assert!(!idx.covers(&fields));
    }
}
