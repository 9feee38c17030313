//! Query validation pipeline.
//!
//! Stages run in order over one raw query:
//!
//! 1. structural grammar ([`QueryGrammar`]); on failure later stages are skipped
//! 2. conflicting conditions
//! 3. index compatibility (selection, then operator placement over the
//!    index-ordered conditions)
//! 4. sort compatibility
//!
//! Every applicable error is collected into one [`ValidationResult`].

use std::collections::BTreeSet;

use tracing::debug;

use crate::condition::{Condition, Operator, OrderBy, Pagination, Query};
use crate::conflicts::find_conflicting_conditions;
use crate::error::{OrderByRule, PlacementRule, ValidationError, ValidationResult};
use crate::grammar::{QueryGrammar, DEFAULT_LIMIT};
use crate::index::{IndexCatalog, IndexDefinition};
use crate::schema::DocumentSchema;
use crate::selector::find_index;
use crate::sorter::sort_conditions;

/// A query that passed every validation stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedQuery {
    /// `where` conditions in index order.
    pub conditions: Vec<Condition>,
    /// Index selected for the conditions; `None` without `where`.
    pub index: Option<IndexDefinition>,
    pub order_by: Vec<OrderBy>,
    pub limit: u32,
    pub pagination: Option<Pagination>,
}

/// Validates raw queries against a document schema.
#[derive(Debug, Clone, Copy)]
pub struct QueryValidator {
    grammar: &'static QueryGrammar,
}

impl Default for QueryValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryValidator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            grammar: QueryGrammar::global(),
        }
    }

    /// Runs every stage and returns the collected errors.
    #[must_use]
    pub fn validate(&self, raw: &serde_json::Value, schema: &DocumentSchema) -> ValidationResult {
        match self.prepare(raw, schema) {
            Ok(_) => ValidationResult::new(),
            Err(result) => result,
        }
    }

    /// Validates and, on success, returns the index-ordered query.
    ///
    /// # Errors
    ///
    /// Returns the non-empty [`ValidationResult`] when any rule is violated.
    pub fn prepare(
        &self,
        raw: &serde_json::Value,
        schema: &DocumentSchema,
    ) -> Result<ValidatedQuery, ValidationResult> {
        let query = match self.grammar.parse(raw) {
            Ok(query) => query,
            Err(structural) => {
                let result = ValidationResult::from_errors(
                    structural.into_iter().map(ValidationError::from).collect(),
                );
                debug!(errors = result.errors().len(), "query failed structural validation");
                return Err(result);
            }
        };
        check_query(&query, &schema.catalog())
    }
}

/// Stages 2 to 4 over a structurally valid query.
///
/// # Errors
///
/// Returns the non-empty [`ValidationResult`] when any rule is violated.
pub fn check_query(query: &Query, catalog: &IndexCatalog) -> Result<ValidatedQuery, ValidationResult> {
    let mut result = ValidationResult::new();
    let conditions = query.conditions();
    let order_by = query.sort();

    result.merge(find_conflicting_conditions(conditions));

    let mut selected = None;
    if query.r#where.is_some() {
        match find_index(catalog, conditions) {
            Ok(index) => {
                let sorted = sort_conditions(conditions, index);
                result.merge(check_placement(&sorted, index, order_by));
                selected = Some((index.clone(), sorted));
            }
            Err(error) => result.push(error),
        }
    }

    if query.order_by.is_some() {
        let sorted = selected.as_ref().map(|(_, sorted)| sorted.as_slice());
        result.merge(check_order_by(conditions, sorted, order_by));
    }

    if !result.is_valid() {
        debug!(errors = result.errors().len(), "query failed index validation");
        return Err(result);
    }

    let (index, conditions) = match selected {
        Some((index, sorted)) => (Some(index), sorted),
        None => (None, Vec::new()),
    };
    Ok(ValidatedQuery {
        conditions,
        index,
        order_by: order_by.to_vec(),
        limit: query.limit.unwrap_or(DEFAULT_LIMIT),
        pagination: query.pagination,
    })
}

/// Operator placement rules over index-ordered conditions.
fn check_placement(
    sorted: &[Condition],
    index: &IndexDefinition,
    order_by: &[OrderBy],
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let len = sorted.len();

    for (i, condition) in sorted.iter().enumerate() {
        let op = condition.operator;
        let mut placement = |rule| {
            errors.push(ValidationError::OperatorPlacement {
                field: condition.field.clone(),
                operator: op,
                rule,
            });
        };

        if matches!(op, Operator::In | Operator::StartsWith) && i + 1 != len {
            placement(PlacementRule::LastCondition);
        }
        if op.is_comparison_range() && i + 2 < len {
            placement(PlacementRule::LastTwoConditions);
        }
        if op == Operator::In
            && index
                .position(&condition.field)
                .is_some_and(|p| p + 2 < index.len())
        {
            placement(PlacementRule::LastTwoIndexFields);
        }
        if op.requires_order_by()
            && sorted[i + 1..]
                .iter()
                .any(|later| matches!(later.operator, Operator::Eq | Operator::In))
        {
            placement(PlacementRule::BeforeEquality);
        }
    }

    let range_fields = distinct_fields(sorted, |op| op.is_range());
    if range_fields.len() > 1 {
        errors.push(ValidationError::MultipleRangeOperators {
            fields: range_fields.iter().map(|(f, _)| (*f).to_string()).collect(),
        });
    }

    for (field, operator) in distinct_fields(sorted, Operator::requires_order_by) {
        if !order_by.iter().any(|o| o.field == field) {
            errors.push(ValidationError::MissingOrderByForRange {
                field: field.to_string(),
                operator,
            });
        }
    }
    errors
}

/// Sort-specifier rules. At most one error per specifier.
fn check_order_by(
    conditions: &[Condition],
    sorted: Option<&[Condition]>,
    order_by: &[OrderBy],
) -> Vec<ValidationError> {
    if conditions.is_empty() {
        return vec![ValidationError::InvalidOrderBy {
            field: None,
            rule: OrderByRule::RequiresWhere,
        }];
    }

    let last = sorted.and_then(<[Condition]>::last);
    let mut seen = BTreeSet::new();
    let mut errors = Vec::new();
    for spec in order_by {
        let field = spec.field.as_str();
        let rule = if !seen.insert(field) {
            Some(OrderByRule::Duplicate)
        } else if !conditions
            .iter()
            .any(|c| c.field == field && c.operator.requires_order_by())
        {
            Some(OrderByRule::NotRangeField)
        } else if last.is_some_and(|c| c.field != field) {
            Some(OrderByRule::NotLastCondition)
        } else {
            None
        };
        if let Some(rule) = rule {
            errors.push(ValidationError::InvalidOrderBy {
                field: Some(spec.field.clone()),
                rule,
            });
        }
    }
    errors
}

/// Distinct fields, in order, carrying an operator accepted by `pred`,
/// paired with the first such operator.
fn distinct_fields(
    conditions: &[Condition],
    pred: impl Fn(Operator) -> bool,
) -> Vec<(&str, Operator)> {
    let mut out: Vec<(&str, Operator)> = Vec::new();
    for c in conditions {
        if pred(c.operator) && !out.iter().any(|(f, _)| *f == c.field) {
            out.push((&c.field, c.operator));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::condition::SortDirection;

    fn schema(indices: &[&[&str]]) -> DocumentSchema {
        DocumentSchema::with_indices(indices.iter().map(|f| IndexDefinition::ascending(f)).collect())
    }

    fn validate(raw: serde_json::Value, schema: &DocumentSchema) -> Vec<ValidationError> {
        QueryValidator::new().validate(&raw, schema).into_errors()
    }

    #[test]
    fn equality_on_index_prefix_is_valid() {
        let schema = schema(&[&["a", "b"]]);
        let query = QueryValidator::new()
            .prepare(&json!({ "where": [["b", "==", 2], ["a", "==", 1]] }), &schema)
            .unwrap();
        let fields: Vec<_> = query.conditions.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["a", "b"]);
        assert_eq!(query.index, Some(IndexDefinition::ascending(&["a", "b"])));
        assert_eq!(query.limit, 100);
    }

    #[test]
    fn empty_query_is_valid() {
        let query = QueryValidator::new().prepare(&json!({}), &schema(&[])).unwrap();
        assert!(query.conditions.is_empty());
        assert!(query.index.is_none());
    }

    #[test]
    fn unindexed_field_has_no_matching_index() {
        let errors = validate(json!({ "where": [["c", "==", 1]] }), &schema(&[&["a", "b"]]));
        assert_eq!(
            errors,
            vec![ValidationError::NoMatchingIndex {
                fields: vec!["c".into()]
            }]
        );
    }

    #[test]
    fn range_without_order_by() {
        let errors = validate(
            json!({ "where": [["a", "==", 1], ["c", ">", 1]] }),
            &schema(&[&["a", "b", "c"]]),
        );
        assert_eq!(
            errors,
            vec![ValidationError::MissingOrderByForRange {
                field: "c".into(),
                operator: Operator::Gt
            }]
        );
    }

    #[test]
    fn range_with_order_by_is_valid() {
        let raw = json!({
            "where": [["a", "==", 1], ["b", ">", 1], ["b", "<", 9]],
            "orderBy": [["b", "desc"]]
        });
        let query = QueryValidator::new().prepare(&raw, &schema(&[&["a", "b"]])).unwrap();
        assert_eq!(query.order_by, vec![OrderBy::new("b", SortDirection::Desc)]);
    }

    #[test]
    fn structural_failure_skips_later_stages() {
        let errors = validate(
            json!({ "where": [["c", "==", 1], ["c", "==", 2]], "limit": 0 }),
            &schema(&[]),
        );
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ValidationError::Structural(_)));
    }

    #[test]
    fn in_must_be_last() {
        let errors = validate(
            json!({ "where": [["a", "in", [1, 2]], ["b", "==", 1]], "orderBy": [["a", "asc"]] }),
            &schema(&[&["a", "b"]]),
        );
        assert_eq!(
            errors[0],
            ValidationError::OperatorPlacement {
                field: "a".into(),
                operator: Operator::In,
                rule: PlacementRule::LastCondition
            }
        );
        assert!(errors.contains(&ValidationError::OperatorPlacement {
            field: "a".into(),
            operator: Operator::In,
            rule: PlacementRule::BeforeEquality
        }));
    }

    #[test]
    fn in_must_be_on_last_two_index_fields() {
        let errors = validate(
            json!({ "where": [["a", "in", [1, 2]]], "orderBy": [["a", "asc"]] }),
            &schema(&[&["a", "b", "c"]]),
        );
        assert_eq!(
            errors,
            vec![ValidationError::OperatorPlacement {
                field: "a".into(),
                operator: Operator::In,
                rule: PlacementRule::LastTwoIndexFields
            }]
        );
    }

    #[test]
    fn comparison_range_must_be_in_last_two() {
        let errors = validate(
            json!({
                "where": [["a", ">", 1], ["b", "==", 1], ["c", "==", 1]],
                "orderBy": [["a", "asc"]]
            }),
            &schema(&[&["a", "b", "c"]]),
        );
        assert_eq!(
            errors[0],
            ValidationError::OperatorPlacement {
                field: "a".into(),
                operator: Operator::Gt,
                rule: PlacementRule::LastTwoConditions
            }
        );
    }

    #[test]
    fn ranges_on_two_fields() {
        let errors = validate(
            json!({
                "where": [["a", ">", 1], ["b", "startsWith", "x"]],
                "orderBy": [["a", "asc"], ["b", "asc"]]
            }),
            &schema(&[&["a", "b"]]),
        );
        assert!(errors.contains(&ValidationError::MultipleRangeOperators {
            fields: vec!["a".into(), "b".into()]
        }));
    }

    #[test]
    fn order_by_without_where() {
        let errors = validate(json!({ "orderBy": [["a", "asc"]] }), &schema(&[&["a"]]));
        assert_eq!(
            errors,
            vec![ValidationError::InvalidOrderBy {
                field: None,
                rule: OrderByRule::RequiresWhere
            }]
        );
    }

    #[test]
    fn order_by_on_equality_field() {
        let errors = validate(
            json!({ "where": [["a", "==", "b"]], "orderBy": [["a", "asc"]] }),
            &schema(&[&["a"]]),
        );
        assert_eq!(
            errors,
            vec![ValidationError::InvalidOrderBy {
                field: Some("a".into()),
                rule: OrderByRule::NotRangeField
            }]
        );
    }

    #[test]
    fn second_order_by_field_not_in_where() {
        let errors = validate(
            json!({ "where": [["a", ">", 1]], "orderBy": [["a", "asc"], ["b", "desc"]] }),
            &schema(&[&["a", "b"]]),
        );
        assert_eq!(
            errors,
            vec![ValidationError::InvalidOrderBy {
                field: Some("b".into()),
                rule: OrderByRule::NotRangeField
            }]
        );
    }

    #[test]
    fn duplicate_order_by_field() {
        let errors = validate(
            json!({ "where": [["a", ">", 1]], "orderBy": [["a", "asc"], ["a", "desc"]] }),
            &schema(&[&["a"]]),
        );
        assert_eq!(
            errors,
            vec![ValidationError::InvalidOrderBy {
                field: Some("a".into()),
                rule: OrderByRule::Duplicate
            }]
        );
    }

    #[test]
    fn conflicts_and_index_errors_accumulate() {
        let errors = validate(
            json!({ "where": [["c", "==", 1], ["c", "==", 2]] }),
            &schema(&[&["a"]]),
        );
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], ValidationError::ConflictingConditions { .. }));
        assert!(matches!(errors[1], ValidationError::NoMatchingIndex { .. }));
    }

    #[test]
    fn id_range_requires_order_by() {
        let errors = validate(json!({ "where": [["$id", ">", "1"]] }), &schema(&[]));
        assert_eq!(
            errors,
            vec![ValidationError::MissingOrderByForRange {
                field: "$id".into(),
                operator: Operator::Gt
            }]
        );
    }

    fn range_query() -> impl Strategy<Value = serde_json::Value> {
        let field = prop::sample::select(vec!["a", "b", "c"]);
        let op = prop::sample::select(vec!["==", ">", "<", "in", "startsWith"]);
        prop::collection::vec((field, op), 1..4).prop_flat_map(|terms| {
            let where_clause: Vec<_> = terms
                .iter()
                .map(|(f, op)| match *op {
                    "in" => json!([f, "in", [1, 2]]),
                    "startsWith" => json!([f, "startsWith", "x"]),
                    _ => json!([f, op, 1]),
                })
                .collect();
            let sort = prop::sample::subsequence(vec!["a", "b", "c"], 0..=2);
            sort.prop_map(move |fields| {
                let mut raw = json!({ "where": where_clause.clone() });
                if !fields.is_empty() {
                    raw["orderBy"] = fields.iter().map(|f| json!([f, "asc"])).collect();
                }
                raw
            })
        })
    }

    proptest! {
        /// Every accepted query ranges over at most one field, and that field
        /// carries one of the last two index-ordered conditions.
        #[test]
        fn placement_invariant(raw in range_query()) {
            let schema = schema(&[&["a", "b", "c"]]);
            if let Ok(query) = QueryValidator::new().prepare(&raw, &schema) {
                let ranged = distinct_fields(&query.conditions, Operator::is_range);
                prop_assert!(ranged.len() <= 1);
                let len = query.conditions.len();
                for (i, condition) in query.conditions.iter().enumerate() {
                    if condition.operator.is_range() {
                        prop_assert!(i + 2 >= len);
                    }
                }
            }
        }
    }
}
