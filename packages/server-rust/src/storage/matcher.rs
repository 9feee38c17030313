//! Filter and sort evaluation over stored document bodies.
//!
//! Follows the document-store semantics the compiler targets: dotted paths
//! traverse into arrays, scalar operators match an array field if any
//! element matches, and comparisons only succeed within one type bracket.

use std::cmp::Ordering;
use std::collections::HashMap;

use docstore_core::{FieldPredicate, SortDirection, SortKey, StoreOperator, Value};
use regex::Regex;

use crate::error::BackendError;

/// Values reached by a dotted `path`, descending through arrays.
#[must_use]
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![doc];
    for part in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Map(map) => next.extend(map.get(part)),
                Value::Array(items) => {
                    if let Ok(i) = part.parse::<usize>() {
                        next.extend(items.get(i));
                    } else {
                        for item in items {
                            if let Value::Map(map) = item {
                                next.extend(map.get(part));
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }
    current
}

/// A value, or each element if it is an array.
fn candidates(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().chain(std::iter::once(value)).collect(),
        other => vec![other],
    }
}

/// Predicates with their `$regex` operands compiled once.
pub struct Matcher<'a> {
    predicates: &'a [FieldPredicate],
    patterns: HashMap<&'a str, Regex>,
}

impl<'a> Matcher<'a> {
    /// # Errors
    ///
    /// Returns [`BackendError::BadPattern`] if a `$regex` operand does not compile.
    pub fn new(predicates: &'a [FieldPredicate]) -> Result<Self, BackendError> {
        let mut patterns = HashMap::new();
        collect_patterns(predicates, &mut patterns)?;
        Ok(Self {
            predicates,
            patterns,
        })
    }

    /// Whether `doc` satisfies every predicate.
    #[must_use]
    pub fn matches(&self, doc: &Value) -> bool {
        self.all(self.predicates, doc)
    }

    fn all(&self, predicates: &[FieldPredicate], doc: &Value) -> bool {
        predicates.iter().all(|p| self.predicate(p, doc))
    }

    fn predicate(&self, p: &FieldPredicate, doc: &Value) -> bool {
        let values = lookup(doc, &p.path);
        let any_candidate = |test: &dyn Fn(&Value) -> bool| {
            values.iter().any(|v| candidates(v).into_iter().any(test))
        };
        match &p.operator {
            StoreOperator::Eq(x) => any_candidate(&|v| v.store_eq(x)),
            StoreOperator::Lt(x) => any_candidate(&|v| v.compare(x) == Some(Ordering::Less)),
            StoreOperator::Lte(x) => {
                any_candidate(&|v| matches!(v.compare(x), Some(Ordering::Less | Ordering::Equal)))
            }
            StoreOperator::Gt(x) => any_candidate(&|v| v.compare(x) == Some(Ordering::Greater)),
            StoreOperator::Gte(x) => any_candidate(&|v| {
                matches!(v.compare(x), Some(Ordering::Greater | Ordering::Equal))
            }),
            StoreOperator::In(items) => any_candidate(&|v| items.iter().any(|x| v.store_eq(x))),
            StoreOperator::Regex(pattern) => match self.patterns.get(pattern.as_str()) {
                Some(re) => any_candidate(&|v| v.as_str().is_some_and(|s| re.is_match(s))),
                None => false,
            },
            StoreOperator::ElemMatch(nested) => values.iter().any(|v| {
                v.as_array()
                    .is_some_and(|items| items.iter().any(|item| self.all(nested, item)))
            }),
            StoreOperator::Size(n) => values.iter().any(|v| {
                v.as_array().is_some_and(|items| {
                    i64::try_from(items.len()).is_ok_and(|len| Value::Int(len).store_eq(n))
                })
            }),
            StoreOperator::All(required) => values.iter().any(|v| {
                let present = candidates(v);
                required
                    .iter()
                    .all(|x| present.iter().any(|p| p.store_eq(x)))
            }),
        }
    }
}

fn collect_patterns<'a>(
    predicates: &'a [FieldPredicate],
    out: &mut HashMap<&'a str, Regex>,
) -> Result<(), BackendError> {
    for p in predicates {
        match &p.operator {
            StoreOperator::Regex(pattern) => {
                let re = Regex::new(pattern).map_err(|e| BackendError::BadPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
                out.insert(pattern.as_str(), re);
            }
            StoreOperator::ElemMatch(nested) => collect_patterns(nested, out)?,
            _ => {}
        }
    }
    Ok(())
}

/// Sort value of `path`: smallest candidate ascending, largest descending.
/// Missing fields sort as `null`.
fn sort_value(doc: &Value, path: &str, direction: SortDirection) -> Value {
    let values = lookup(doc, path);
    let mut flat = values.iter().flat_map(|v| match v {
        Value::Array(items) if !items.is_empty() => items.iter().collect::<Vec<_>>(),
        other => vec![*other],
    });
    let pick = match direction {
        SortDirection::Asc => flat.min_by(|a, b| a.canonical_cmp(b)),
        SortDirection::Desc => flat.max_by(|a, b| a.canonical_cmp(b)),
    };
    pick.cloned().unwrap_or(Value::Null)
}

/// Orders two bodies by `keys`, then by `_id` ascending.
#[must_use]
pub fn compare_documents(a: &Value, b: &Value, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ord = sort_value(a, &key.path, key.direction)
            .canonical_cmp(&sort_value(b, &key.path, key.direction));
        let ord = match key.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        };
        if ord.is_ne() {
            return ord;
        }
    }
    sort_value(a, "_id", SortDirection::Asc).canonical_cmp(&sort_value(b, "_id", SortDirection::Asc))
}

#[cfg(test)]
mod tests {
    use docstore_core::compiler::compile_conditions;
    use docstore_core::{Condition, Operator};
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn body(json: serde_json::Value) -> Value {
        Value::from_json(&json)
    }

    fn matches(doc: &Value, conditions: &[Condition]) -> bool {
        let predicates = compile_conditions(conditions);
        Matcher::new(&predicates).unwrap().matches(doc)
    }

    #[test]
    fn lookup_descends_through_arrays() {
        let doc = body(json!({ "data": { "items": [{ "k": 1 }, { "k": 2 }, { "x": 3 }] } }));
        let found: Vec<_> = lookup(&doc, "data.items.k").into_iter().cloned().collect();
        assert_eq!(found, vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(lookup(&doc, "data.items.1.k"), vec![&Value::Int(2)]);
    }

    #[test]
    fn equality_matches_array_elements() {
        let doc = body(json!({ "data": { "tags": ["a", "b"] } }));
        assert!(matches(&doc, &[Condition::new("tags", Operator::Eq, json!("b"))]));
        assert!(!matches(&doc, &[Condition::new("tags", Operator::Eq, json!("c"))]));
    }

    #[test]
    fn range_stays_within_type_bracket() {
        let doc = body(json!({ "data": { "n": "10" } }));
        assert!(!matches(&doc, &[Condition::new("n", Operator::Gt, json!(1))]));
        let doc = body(json!({ "data": { "n": 10 } }));
        assert!(matches(&doc, &[Condition::new("n", Operator::Gt, json!(1))]));
        assert!(matches(&doc, &[Condition::new("n", Operator::Lte, json!(10.0))]));
    }

    #[test]
    fn starts_with_is_literal_prefix() {
        let doc = body(json!({ "data": { "s": "a.bc" } }));
        assert!(matches(&doc, &[Condition::new("s", Operator::StartsWith, json!("a."))]));
        let doc = body(json!({ "data": { "s": "axbc" } }));
        assert!(!matches(&doc, &[Condition::new("s", Operator::StartsWith, json!("a."))]));
    }

    #[test]
    fn element_match_requires_one_element_satisfying_all() {
        let doc = body(json!({ "data": { "arr": [{ "k": 1, "v": 5 }, { "k": 2, "v": 1 }] } }));
        let both = |k: i64, v: i64| {
            Condition::element_match(
                "arr",
                vec![
                    Condition::new("k", Operator::Eq, json!(k)),
                    Condition::new("v", Operator::Gt, json!(v)),
                ],
            )
        };
        assert!(matches(&doc, &[both(1, 2)]));
        assert!(!matches(&doc, &[both(2, 2)]));
    }

    #[test]
    fn size_all_and_in() {
        let doc = body(json!({ "data": { "tags": ["a", "b", "c"], "n": 3 } }));
        assert!(matches(&doc, &[Condition::new("tags", Operator::Length, json!(3))]));
        assert!(!matches(&doc, &[Condition::new("tags", Operator::Length, json!(2))]));
        assert!(matches(&doc, &[Condition::new("tags", Operator::Length, json!(3.0))]));
        assert!(!matches(&doc, &[Condition::new("tags", Operator::Length, json!(2.5))]));
        assert!(matches(&doc, &[Condition::new("tags", Operator::Contains, json!(["c", "a"]))]));
        assert!(!matches(&doc, &[Condition::new("tags", Operator::Contains, json!(["c", "z"]))]));
        assert!(matches(&doc, &[Condition::new("n", Operator::In, json!([1, 3]))]));
    }

    #[test]
    fn missing_field_never_matches() {
        let doc = body(json!({ "data": {} }));
        assert!(!matches(&doc, &[Condition::new("a", Operator::Eq, json!(1))]));
    }

    #[test]
    fn sort_by_keys_then_id() {
        let a = body(json!({ "_id": "a", "data": { "n": 2 } }));
        let b = body(json!({ "_id": "b", "data": { "n": 1 } }));
        let c = body(json!({ "_id": "c", "data": { "n": 2 } }));
        let keys = [SortKey {
            path: "data.n".into(),
            direction: SortDirection::Desc,
        }];
        let mut docs = vec![&b, &c, &a];
        docs.sort_by(|x, y| compare_documents(x, y, &keys));
        let ids: Vec<_> = docs.iter().map(|d| lookup(d, "_id")[0].clone()).collect();
        assert_eq!(
            ids,
            vec![
                Value::String("a".into()),
                Value::String("c".into()),
                Value::String("b".into())
            ]
        );
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let predicates = vec![FieldPredicate {
            path: "data.s".into(),
            operator: StoreOperator::Regex("(".into()),
        }];
        assert!(matches!(Matcher::new(&predicates), Err(BackendError::BadPattern { .. })));
    }

    proptest! {
        /// Ascending sort yields non-decreasing keys with ties broken by `_id`.
        #[test]
        fn sort_is_ordered_by_key_then_id(ranks in proptest::collection::vec(-5i64..5, 0..20)) {
            let docs: Vec<Value> = ranks
                .iter()
                .enumerate()
                .map(|(i, n)| body(json!({ "_id": format!("{i:02}"), "data": { "n": n } })))
                .collect();
            let keys = [SortKey {
                path: "data.n".into(),
                direction: SortDirection::Asc,
            }];
            let mut sorted: Vec<&Value> = docs.iter().collect();
            sorted.sort_by(|a, b| compare_documents(a, b, &keys));

            for pair in sorted.windows(2) {
                let (a, b) = (pair[0], pair[1]);
                let (na, nb) = (lookup(a, "data.n")[0], lookup(b, "data.n")[0]);
                prop_assert_ne!(na.canonical_cmp(nb), Ordering::Greater);
                if na == nb {
                    prop_assert_eq!(
                        lookup(a, "_id")[0].canonical_cmp(lookup(b, "_id")[0]),
                        Ordering::Less
                    );
                }
            }
        }
    }
}
