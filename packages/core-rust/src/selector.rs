//! Index selection: first catalog index covering every referenced field.
//!
//! Pure functions of (conditions, catalog). Selection is rule-based and
//! deterministic; catalog order is the only tie-break.

use std::collections::BTreeSet;

use crate::condition::Condition;
use crate::error::ValidationError;
use crate::index::{IndexCatalog, IndexDefinition};

/// Distinct fields referenced by `conditions`.
///
/// `elementMatch` conditions contribute `field.nested` for each nested term.
#[must_use]
pub fn referenced_fields(conditions: &[Condition]) -> BTreeSet<String> {
    conditions
        .iter()
        .flat_map(Condition::referenced_fields)
        .collect()
}

/// Returns the first index whose field set is a superset of `fields`.
#[must_use]
pub fn select_index<'a>(
    catalog: &'a IndexCatalog,
    fields: &BTreeSet<String>,
) -> Option<&'a IndexDefinition> {
    catalog.iter().find(|index| index.covers(fields))
}

/// Explains why [`select_index`] found nothing.
///
/// Fields covered by no index at all yield `NoMatchingIndex` carrying those
/// fields; otherwise every field is indexed somewhere but no single index
/// covers them together.
#[must_use]
pub fn diagnose(catalog: &IndexCatalog, fields: &BTreeSet<String>) -> ValidationError {
    let unindexed: Vec<String> = fields
        .iter()
        .filter(|f| !catalog.is_indexed(f))
        .cloned()
        .collect();
    if unindexed.is_empty() {
        ValidationError::FieldsFromMultipleIndices {
            fields: fields.iter().cloned().collect(),
        }
    } else {
        ValidationError::NoMatchingIndex { fields: unindexed }
    }
}

/// Selects an index for `conditions`, or returns the diagnosis.
///
/// # Errors
///
/// Returns `NoMatchingIndex` or `FieldsFromMultipleIndices`.
pub fn find_index<'a>(
    catalog: &'a IndexCatalog,
    conditions: &[Condition],
) -> Result<&'a IndexDefinition, ValidationError> {
    let fields = referenced_fields(conditions);
    select_index(catalog, &fields).ok_or_else(|| diagnose(catalog, &fields))
}
