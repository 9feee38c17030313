//! Translation of validated queries and index definitions into the backing
//! store's query model.
//!
//! Compilation is pure: the output is a plain data structure handed to a
//! store driver.

use std::collections::BTreeSet;

use crate::condition::{Condition, ConditionValue, Operator, Pagination, SortDirection};
use crate::index::IndexDefinition;
use crate::schema::{
    CREATED_AT_FIELD, ID_FIELD, OWNER_ID_FIELD, PROTOCOL_VERSION_FIELD, REVISION_FIELD,
    UPDATED_AT_FIELD,
};
use crate::types::{integral, Value};
use crate::validator::ValidatedQuery;

/// Prefix of user data fields in the stored document.
pub const DATA_PREFIX: &str = "data.";

const FIELD_MAPPING: [(&str, &str); 6] = [
    (ID_FIELD, "_id"),
    (OWNER_ID_FIELD, "ownerId"),
    (REVISION_FIELD, "revision"),
    (CREATED_AT_FIELD, "createdAt"),
    (UPDATED_AT_FIELD, "updatedAt"),
    (PROTOCOL_VERSION_FIELD, "protocolVersion"),
];

/// Physical storage path of a logical field.
#[must_use]
pub fn physical_field(field: &str) -> String {
    FIELD_MAPPING
        .iter()
        .find(|(logical, _)| *logical == field)
        .map_or_else(|| format!("{DATA_PREFIX}{field}"), |(_, physical)| (*physical).to_string())
}

/// Inverse of [`physical_field`].
#[must_use]
pub fn logical_field(path: &str) -> String {
    if let Some(field) = path.strip_prefix(DATA_PREFIX) {
        return field.to_string();
    }
    FIELD_MAPPING
        .iter()
        .find(|(_, physical)| *physical == path)
        .map_or_else(|| path.to_string(), |(logical, _)| (*logical).to_string())
}

// ---------------------------------------------------------------------------
// Compiled model
// ---------------------------------------------------------------------------

/// Native backing-store operator with its operand.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOperator {
    Eq(Value),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    In(Vec<Value>),
    /// Anchored pattern; the prefix is already escaped.
    Regex(String),
    ElemMatch(Vec<FieldPredicate>),
    /// Array length; a non-integral operand matches nothing.
    Size(Value),
    All(Vec<Value>),
}

impl StoreOperator {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Eq(_) => "$eq",
            Self::Lt(_) => "$lt",
            Self::Lte(_) => "$lte",
            Self::Gt(_) => "$gt",
            Self::Gte(_) => "$gte",
            Self::In(_) => "$in",
            Self::Regex(_) => "$regex",
            Self::ElemMatch(_) => "$elemMatch",
            Self::Size(_) => "$size",
            Self::All(_) => "$all",
        }
    }

    fn operand_json(&self) -> serde_json::Value {
        match self {
            Self::Eq(v) | Self::Lt(v) | Self::Lte(v) | Self::Gt(v) | Self::Gte(v) | Self::Size(v) => {
                v.to_json()
            }
            Self::In(items) | Self::All(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Self::Regex(pattern) => serde_json::Value::String(pattern.clone()),
            Self::ElemMatch(nested) => render(nested),
        }
    }
}

/// One predicate on a stored document path.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPredicate {
    pub path: String,
    pub operator: StoreOperator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub path: String,
    pub direction: SortDirection,
}

/// Backing-store query: conjunction of predicates, sort keys, window.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub filter: Vec<FieldPredicate>,
    pub sort: Vec<SortKey>,
    pub skip: u64,
    pub limit: u64,
}

impl CompiledQuery {
    /// Renders the filter as a Mongo-style document.
    #[must_use]
    pub fn filter_document(&self) -> serde_json::Value {
        render(&self.filter)
    }

    /// Logical field names the filter touches.
    #[must_use]
    pub fn filter_fields(&self) -> BTreeSet<String> {
        self.filter.iter().map(|p| logical_field(&p.path)).collect()
    }
}

/// Merges predicates on the same path into one operator document. A repeated
/// operator on one path moves the whole filter into `$and`.
fn render(predicates: &[FieldPredicate]) -> serde_json::Value {
    let mut merged = serde_json::Map::new();
    for p in predicates {
        let entry = merged
            .entry(p.path.clone())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        let Some(ops) = entry.as_object_mut() else {
            continue;
        };
        if ops.contains_key(p.operator.name()) {
            let clauses: Vec<serde_json::Value> = predicates.iter().map(clause).collect();
            return serde_json::json!({ "$and": clauses });
        }
        ops.insert(p.operator.name().to_string(), p.operator.operand_json());
    }
    serde_json::Value::Object(merged)
}

fn clause(p: &FieldPredicate) -> serde_json::Value {
    let mut op = serde_json::Map::new();
    op.insert(p.operator.name().to_string(), p.operator.operand_json());
    let mut doc = serde_json::Map::new();
    doc.insert(p.path.clone(), serde_json::Value::Object(op));
    serde_json::Value::Object(doc)
}

// ---------------------------------------------------------------------------
// Query compilation
// ---------------------------------------------------------------------------

/// Compiles a validated query.
#[must_use]
pub fn compile_query(query: &ValidatedQuery) -> CompiledQuery {
    CompiledQuery {
        filter: compile_conditions(&query.conditions),
        sort: query
            .order_by
            .iter()
            .map(|o| SortKey {
                path: physical_field(&o.field),
                direction: o.direction,
            })
            .collect(),
        skip: match query.pagination {
            Some(Pagination::StartAt(n)) => u64::from(n.saturating_sub(1)),
            Some(Pagination::StartAfter(n)) => u64::from(n),
            None => 0,
        },
        limit: u64::from(query.limit),
    }
}

/// Compiles top-level conditions to predicates on physical paths.
#[must_use]
pub fn compile_conditions(conditions: &[Condition]) -> Vec<FieldPredicate> {
    conditions
        .iter()
        .map(|c| compile_condition(c, physical_field(&c.field)))
        .collect()
}

fn compile_condition(condition: &Condition, path: String) -> FieldPredicate {
    let coerce = |json: &serde_json::Value| coerce_value(&condition.field, json);
    let operator = match &condition.value {
        ConditionValue::Conditions(nested) => StoreOperator::ElemMatch(
            nested
                .iter()
                .map(|c| compile_condition(c, c.field.clone()))
                .collect(),
        ),
        ConditionValue::Literal(json) => match condition.operator {
            Operator::Eq => StoreOperator::Eq(coerce(json)),
            Operator::Lt => StoreOperator::Lt(coerce(json)),
            Operator::Lte => StoreOperator::Lte(coerce(json)),
            Operator::Gt => StoreOperator::Gt(coerce(json)),
            Operator::Gte => StoreOperator::Gte(coerce(json)),
            Operator::In => StoreOperator::In(elements(json).iter().map(coerce).collect()),
            Operator::StartsWith => StoreOperator::Regex(format!(
                "^{}",
                regex::escape(json.as_str().unwrap_or_default())
            )),
            Operator::Length => StoreOperator::Size(
                integral(json).map_or_else(|| Value::from_json(json), Value::Int),
            ),
            Operator::Contains | Operator::ElementMatch => {
                StoreOperator::All(elements(json).iter().map(coerce).collect())
            }
        },
    };
    FieldPredicate { path, operator }
}

fn elements(json: &serde_json::Value) -> Vec<serde_json::Value> {
    match json {
        serde_json::Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

/// Temporal system fields become the store's native `DateTime`.
fn coerce_value(field: &str, json: &serde_json::Value) -> Value {
    match (field, integral(json)) {
        (CREATED_AT_FIELD | UPDATED_AT_FIELD, Some(ms)) => Value::DateTime(ms),
        _ => Value::from_json(json),
    }
}

// ---------------------------------------------------------------------------
// Index compilation
// ---------------------------------------------------------------------------

/// Physical index to create for a declared index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<SortKey>,
    pub unique: bool,
}

impl IndexSpec {
    /// Paths that must exist for a document to be indexed.
    pub fn partial_filter_paths(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|k| k.path.as_str())
    }

    #[must_use]
    pub fn partial_filter_document(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.partial_filter_paths()
                .map(|p| (p.to_string(), serde_json::json!({ "$exists": true })))
                .collect(),
        )
    }
}

/// Compiles a declared index to its physical spec.
#[must_use]
pub fn compile_index(index: &IndexDefinition) -> IndexSpec {
    let keys: Vec<SortKey> = index
        .properties
        .iter()
        .map(|p| SortKey {
            path: physical_field(&p.field),
            direction: p.direction,
        })
        .collect();
    let name = index.name.clone().unwrap_or_else(|| {
        keys.iter()
            .map(|k| format!("{}_{}", k.path, k.direction.as_str()))
            .collect::<Vec<_>>()
            .join("_")
    });
    IndexSpec {
        name,
        keys,
        unique: index.unique,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::condition::OrderBy;
    use crate::schema::DocumentSchema;
    use crate::validator::QueryValidator;

    fn validated(raw: serde_json::Value, indices: &[&[&str]]) -> ValidatedQuery {
        let schema = DocumentSchema::with_indices(
            indices.iter().map(|f| IndexDefinition::ascending(f)).collect(),
        );
        QueryValidator::new().prepare(&raw, &schema).unwrap()
    }

    #[test]
    fn maps_system_and_data_fields() {
        assert_eq!(physical_field("$id"), "_id");
        assert_eq!(physical_field("$protocolVersion"), "protocolVersion");
        assert_eq!(physical_field("a.b"), "data.a.b");
        assert_eq!(logical_field("data.a.b"), "a.b");
        assert_eq!(logical_field("ownerId"), "$ownerId");
    }

    #[test]
    fn compiles_equality_and_range_into_merged_document() {
        let q = validated(
            json!({
                "where": [["a", "==", 1], ["b", ">", 1], ["b", "<=", 5]],
                "orderBy": [["b", "desc"]],
                "limit": 10,
                "startAt": 3
            }),
            &[&["a", "b"]],
        );
        let compiled = compile_query(&q);
        assert_eq!(
            compiled.filter_document(),
            json!({ "data.a": { "$eq": 1 }, "data.b": { "$gt": 1, "$lte": 5 } })
        );
        assert_eq!(
            compiled.sort,
            vec![SortKey {
                path: "data.b".into(),
                direction: SortDirection::Desc
            }]
        );
        assert_eq!(compiled.skip, 2);
        assert_eq!(compiled.limit, 10);
    }

    #[test]
    fn start_after_skips_n() {
        let q = validated(json!({ "startAfter": 7 }), &[]);
        assert_eq!(compile_query(&q).skip, 7);
        assert_eq!(compile_query(&q).limit, 100);
    }

    #[test]
    fn starts_with_is_escaped_anchored_regex() {
        let q = validated(
            json!({ "where": [["a", "startsWith", "a.b*"]], "orderBy": [["a", "asc"]] }),
            &[&["a"]],
        );
        assert_eq!(
            compile_query(&q).filter,
            vec![FieldPredicate {
                path: "data.a".into(),
                operator: StoreOperator::Regex(r"^a\.b\*".into())
            }]
        );
    }

    #[test]
    fn timestamps_become_datetime() {
        let q = validated(
            json!({ "where": [["$createdAt", ">", 1000]], "orderBy": [["$createdAt", "asc"]] }),
            &[&["$createdAt"]],
        );
        let compiled = compile_query(&q);
        assert_eq!(compiled.filter[0].operator, StoreOperator::Gt(Value::DateTime(1000)));
        assert_eq!(compiled.sort[0].path, "createdAt");
    }

    #[test]
    fn integral_float_operands_compile_like_integers() {
        let q = validated(
            json!({
                "where": [["$createdAt", ">", 1000.0]],
                "orderBy": [["$createdAt", "asc"]],
                "limit": 5.0,
                "startAt": 3.0
            }),
            &[&["$createdAt"]],
        );
        let compiled = compile_query(&q);
        assert_eq!(compiled.filter[0].operator, StoreOperator::Gt(Value::DateTime(1000)));
        assert_eq!((compiled.skip, compiled.limit), (2, 5));

        let q = validated(json!({ "where": [["arr", "length", 2.0]] }), &[&["arr"]]);
        assert_eq!(compile_query(&q).filter[0].operator, StoreOperator::Size(Value::Int(2)));
    }

    #[test]
    fn hand_built_timestamps_coerce_integral_floats() {
        let filter = compile_conditions(&[
            Condition::new("$updatedAt", Operator::Lte, json!(2000.0)),
            Condition::new("n", Operator::Length, json!(3.0)),
        ]);
        assert_eq!(filter[0].operator, StoreOperator::Lte(Value::DateTime(2000)));
        assert_eq!(filter[1].operator, StoreOperator::Size(Value::Int(3)));
    }

    #[test]
    fn element_match_uses_relative_paths() {
        let q = validated(
            json!({ "where": [["arr", "elementMatch", [["k", "==", 1], ["v", ">", 2]]]] }),
            &[&["arr.k", "arr.v"]],
        );
        assert_eq!(
            compile_query(&q).filter_document(),
            json!({ "data.arr": { "$elemMatch": { "k": { "$eq": 1 }, "v": { "$gt": 2 } } } })
        );
    }

    #[test]
    fn contains_and_length() {
        let q = validated(
            json!({ "where": [["tags", "contains", ["x", "y"]], ["n", "length", 2]] }),
            &[&["tags", "n"]],
        );
        assert_eq!(
            compile_query(&q).filter_document(),
            json!({ "data.tags": { "$all": ["x", "y"] }, "data.n": { "$size": 2 } })
        );
        let q = validated(json!({ "where": [["tags", "contains", "x"]] }), &[&["tags"]]);
        assert_eq!(
            compile_query(&q).filter[0].operator,
            StoreOperator::All(vec![Value::String("x".into())])
        );
    }

    #[test]
    fn repeated_operator_renders_as_and() {
        let compiled = CompiledQuery {
            filter: compile_conditions(&[
                Condition::new("a", Operator::Gt, json!(1)),
                Condition::new("a", Operator::Gt, json!(2)),
            ]),
            sort: Vec::new(),
            skip: 0,
            limit: 100,
        };
        assert_eq!(
            compiled.filter_document(),
            json!({ "$and": [{ "data.a": { "$gt": 1 } }, { "data.a": { "$gt": 2 } }] })
        );
    }

    #[test]
    fn index_spec_has_name_and_partial_filter() {
        let index = IndexDefinition::new([("$ownerId", SortDirection::Asc), ("a", SortDirection::Desc)])
            .with_unique(true);
        let spec = compile_index(&index);
        assert_eq!(spec.name, "ownerId_asc_data.a_desc");
        assert!(spec.unique);
        assert_eq!(
            spec.partial_filter_document(),
            json!({ "ownerId": { "$exists": true }, "data.a": { "$exists": true } })
        );
        assert_eq!(compile_index(&index.with_name("byOwner")).name, "byOwner");
    }

    #[test]
    fn order_by_maps_to_physical_keys() {
        let q = ValidatedQuery {
            conditions: Vec::new(),
            index: None,
            order_by: vec![OrderBy::new("$updatedAt", SortDirection::Asc)],
            limit: 5,
            pagination: None,
        };
        assert_eq!(compile_query(&q).sort[0].path, "updatedAt");
    }

    proptest! {
        /// Compiling a valid query and mapping the filter paths back yields
        /// exactly the fields of its `where` clause.
        #[test]
        fn filter_fields_round_trip(
            fields in prop::sample::subsequence(vec!["$id", "$ownerId", "a", "b.c", "d"], 1..=5)
        ) {
            let conditions: Vec<_> = fields.iter().map(|f| json!([f, "==", "v"])).collect();
            let q = validated(json!({ "where": conditions }), &[&["$id", "$ownerId", "a", "b.c", "d"]]);
            let expected: BTreeSet<String> = fields.iter().map(|f| (*f).to_string()).collect();
            prop_assert_eq!(compile_query(&q).filter_fields(), expected);
        }
    }
}
