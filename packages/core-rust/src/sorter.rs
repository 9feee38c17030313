//! Reorders conditions into the field order of the selected index.

use crate::condition::{Condition, Operator};
use crate::index::IndexDefinition;

/// Position of a condition's field within `index`.
///
/// An `elementMatch` on `arr` sits at the first index field equal to or
/// nested under `arr`.
#[must_use]
pub fn index_position(condition: &Condition, index: &IndexDefinition) -> Option<usize> {
    if condition.operator == Operator::ElementMatch {
        let prefix = format!("{}.", condition.field);
        return index
            .fields()
            .position(|f| f == condition.field || f.starts_with(&prefix));
    }
    index.position(&condition.field)
}

/// Returns a copy of `conditions` ordered by index field position.
///
/// The sort is stable: conditions on the same field, or on fields absent
/// from the index, keep their relative order. Absent fields go last.
#[must_use]
pub fn sort_conditions(conditions: &[Condition], index: &IndexDefinition) -> Vec<Condition> {
    let mut sorted = conditions.to_vec();
    sorted.sort_by_key(|c| index_position(c, index).unwrap_or(usize::MAX));
    sorted
}
