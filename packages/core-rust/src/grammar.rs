//! Structural query grammar.
//!
//! The grammar is compiled once per process ([`QueryGrammar::global`]) and
//! parses a raw JSON query into a typed [`Query`], collecting every
//! violation as a [`StructuralError`] with a JSON-pointer path.

use std::sync::LazyLock;

use regex::Regex;

use crate::condition::{Condition, ConditionValue, Operator, OrderBy, Pagination, Query, SortDirection};
use crate::error::{Constraint, StructuralError};
use crate::schema::{CREATED_AT_FIELD, UPDATED_AT_FIELD};
use crate::types::integral;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

pub const MAX_WHERE_CONDITIONS: usize = 10;
pub const MAX_ORDER_BY: usize = 2;
pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: i64 = 100;
pub const MAX_START: i64 = 20_000;
pub const MAX_FIELD_LENGTH: usize = 255;
pub const MAX_STRING_VALUE_LENGTH: usize = 1024;
pub const MAX_PREFIX_LENGTH: usize = 255;
pub const MAX_SET_ITEMS: usize = 100;
pub const MIN_ELEMENT_MATCH_CONDITIONS: usize = 2;

pub const FIELD_PATTERN: &str =
    r"^(\$id|\$ownerId|\$createdAt|\$updatedAt|[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)*)$";
pub const NESTED_FIELD_PATTERN: &str = r"^[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)*$";

const QUERY_PROPERTIES: [&str; 5] = ["where", "orderBy", "limit", "startAt", "startAfter"];
const OPERATORS: &[&str] = &[
    "<", "<=", "==", ">", ">=", "in", "startsWith", "elementMatch", "length", "contains",
];
const NESTED_OPERATORS: &[&str] = &[
    "<", "<=", "==", ">", ">=", "in", "startsWith", "length", "contains",
];
const DIRECTIONS: &[&str] = &["asc", "desc"];

static GRAMMAR: LazyLock<QueryGrammar> = LazyLock::new(QueryGrammar::compile);

// ---------------------------------------------------------------------------
// QueryGrammar
// ---------------------------------------------------------------------------

/// Precompiled structural validator for raw queries.
#[derive(Debug)]
pub struct QueryGrammar {
    field: Regex,
    nested_field: Regex,
}

impl QueryGrammar {
    /// Process-wide grammar instance.
    #[must_use]
    pub fn global() -> &'static Self {
        &GRAMMAR
    }

    #[allow(clippy::expect_used)]
    fn compile() -> Self {
        Self {
            field: Regex::new(FIELD_PATTERN).expect("field pattern compiles"),
            nested_field: Regex::new(NESTED_FIELD_PATTERN).expect("nested field pattern compiles"),
        }
    }

    /// Parses a raw query.
    ///
    /// # Errors
    ///
    /// Returns every structural violation found, in document order.
    pub fn parse(&self, raw: &serde_json::Value) -> Result<Query, Vec<StructuralError>> {
        let mut errors = Vec::new();
        let Some(object) = raw.as_object() else {
            return Err(vec![StructuralError::new("", Constraint::Type { expected: "object" })]);
        };

        for key in object.keys() {
            if !QUERY_PROPERTIES.contains(&key.as_str()) {
                errors.push(StructuralError::new(
                    "",
                    Constraint::AdditionalProperty { name: key.clone() },
                ));
            }
        }

        let r#where = object
            .get("where")
            .and_then(|v| self.parse_where(v, &mut errors));
        let order_by = object
            .get("orderBy")
            .and_then(|v| self.parse_order_by(v, &mut errors));
        let limit = object
            .get("limit")
            .and_then(|v| bounded_u32(v, "/limit", MAX_LIMIT, &mut errors));
        let start_at = object
            .get("startAt")
            .and_then(|v| bounded_u32(v, "/startAt", MAX_START, &mut errors));
        let start_after = object
            .get("startAfter")
            .and_then(|v| bounded_u32(v, "/startAfter", MAX_START, &mut errors));

        if object.contains_key("startAt") && object.contains_key("startAfter") {
            errors.push(StructuralError::new(
                "",
                Constraint::MutuallyExclusive {
                    fields: ["startAt", "startAfter"],
                },
            ));
        }

        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(Query {
            r#where,
            order_by,
            limit,
            pagination: start_at
                .map(Pagination::StartAt)
                .or(start_after.map(Pagination::StartAfter)),
        })
    }

    fn parse_where(
        &self,
        value: &serde_json::Value,
        errors: &mut Vec<StructuralError>,
    ) -> Option<Vec<Condition>> {
        let items = expect_array(value, "/where", errors)?;
        check_count(items.len(), "/where", 1, MAX_WHERE_CONDITIONS, errors);
        let conditions: Vec<Condition> = items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| self.parse_condition(item, &format!("/where/{i}"), false, errors))
            .collect();
        (conditions.len() == items.len()).then_some(conditions)
    }

    fn parse_condition(
        &self,
        item: &serde_json::Value,
        path: &str,
        nested: bool,
        errors: &mut Vec<StructuralError>,
    ) -> Option<Condition> {
        let tuple = expect_array(item, path, errors)?;
        check_count(tuple.len(), path, 3, 3, errors);
        let [field, operator, value] = tuple.as_slice() else {
            return None;
        };

        let field = self.parse_field(field, &format!("{path}/0"), nested, errors);
        let allowed = if nested { NESTED_OPERATORS } else { OPERATORS };
        let operator = parse_enum(operator, &format!("{path}/1"), allowed, errors)
            .and_then(Operator::parse)?;
        let value = self.parse_value(
            field.as_deref(),
            operator,
            value,
            &format!("{path}/2"),
            errors,
        )?;

        Some(Condition {
            field: field?,
            operator,
            value,
        })
    }

    fn parse_field(
        &self,
        value: &serde_json::Value,
        path: &str,
        nested: bool,
        errors: &mut Vec<StructuralError>,
    ) -> Option<String> {
        let Some(s) = value.as_str() else {
            errors.push(StructuralError::new(path, Constraint::Type { expected: "string" }));
            return None;
        };
        let before = errors.len();
        let len = s.chars().count();
        if len < 1 {
            errors.push(StructuralError::new(path, Constraint::MinLength { limit: 1 }));
        }
        if len > MAX_FIELD_LENGTH {
            errors.push(StructuralError::new(
                path,
                Constraint::MaxLength {
                    limit: MAX_FIELD_LENGTH,
                },
            ));
        }
        let (re, pattern) = if nested {
            (&self.nested_field, NESTED_FIELD_PATTERN)
        } else {
            (&self.field, FIELD_PATTERN)
        };
        if !re.is_match(s) {
            errors.push(StructuralError::new(path, Constraint::Pattern { pattern }));
        }
        (errors.len() == before).then(|| s.to_string())
    }

    fn parse_value(
        &self,
        field: Option<&str>,
        operator: Operator,
        value: &serde_json::Value,
        path: &str,
        errors: &mut Vec<StructuralError>,
    ) -> Option<ConditionValue> {
        let before = errors.len();
        // Integer operands are carried in normalized form, so `2.0` becomes `2`.
        let mut normalized = None;
        match operator {
            Operator::Lt | Operator::Lte | Operator::Eq | Operator::Gt | Operator::Gte => {
                if matches!(field, Some(CREATED_AT_FIELD | UPDATED_AT_FIELD)) {
                    normalized = integer(value, path, errors);
                } else {
                    check_scalar(value, path, errors);
                }
            }
            Operator::In => check_scalar_set(value, path, errors),
            Operator::StartsWith => match value.as_str() {
                Some(s) => check_length(s, path, 1, MAX_PREFIX_LENGTH, errors),
                None => errors.push(StructuralError::new(path, Constraint::Type { expected: "string" })),
            },
            Operator::ElementMatch => {
                let items = expect_array(value, path, errors)?;
                check_count(
                    items.len(),
                    path,
                    MIN_ELEMENT_MATCH_CONDITIONS,
                    MAX_WHERE_CONDITIONS,
                    errors,
                );
                let nested: Vec<Condition> = items
                    .iter()
                    .enumerate()
                    .filter_map(|(i, item)| self.parse_condition(item, &format!("{path}/{i}"), true, errors))
                    .collect();
                return (errors.len() == before).then_some(ConditionValue::Conditions(nested));
            }
            Operator::Length => {
                normalized = integer(value, path, errors);
                if normalized.is_some_and(|n| n < 0) {
                    errors.push(StructuralError::new(path, Constraint::Minimum { limit: 0 }));
                }
            }
            Operator::Contains => {
                if value.is_array() {
                    check_scalar_set(value, path, errors);
                } else {
                    check_scalar(value, path, errors);
                }
            }
        }
        (errors.len() == before).then(|| {
            ConditionValue::Literal(normalized.map_or_else(|| value.clone(), serde_json::Value::from))
        })
    }

    fn parse_order_by(
        &self,
        value: &serde_json::Value,
        errors: &mut Vec<StructuralError>,
    ) -> Option<Vec<OrderBy>> {
        let items = expect_array(value, "/orderBy", errors)?;
        check_count(items.len(), "/orderBy", 1, MAX_ORDER_BY, errors);
        let mut order_by = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let path = format!("/orderBy/{i}");
            let Some(pair) = expect_array(item, &path, errors) else {
                continue;
            };
            check_count(pair.len(), &path, 2, 2, errors);
            let [field, direction] = pair.as_slice() else {
                continue;
            };
            let field = self.parse_field(field, &format!("{path}/0"), false, errors);
            let direction = parse_enum(direction, &format!("{path}/1"), DIRECTIONS, errors)
                .and_then(SortDirection::parse);
            if let (Some(field), Some(direction)) = (field, direction) {
                order_by.push(OrderBy { field, direction });
            }
        }
        (order_by.len() == items.len()).then_some(order_by)
    }
}

// ---------------------------------------------------------------------------
// Primitive checks
// ---------------------------------------------------------------------------

fn expect_array<'a>(
    value: &'a serde_json::Value,
    path: &str,
    errors: &mut Vec<StructuralError>,
) -> Option<&'a Vec<serde_json::Value>> {
    let array = value.as_array();
    if array.is_none() {
        errors.push(StructuralError::new(path, Constraint::Type { expected: "array" }));
    }
    array
}

fn check_count(len: usize, path: &str, min: usize, max: usize, errors: &mut Vec<StructuralError>) {
    if len < min {
        errors.push(StructuralError::new(path, Constraint::MinItems { limit: min }));
    }
    if len > max {
        errors.push(StructuralError::new(path, Constraint::MaxItems { limit: max }));
    }
}

fn check_length(s: &str, path: &str, min: usize, max: usize, errors: &mut Vec<StructuralError>) {
    let len = s.chars().count();
    if len < min {
        errors.push(StructuralError::new(path, Constraint::MinLength { limit: min }));
    }
    if len > max {
        errors.push(StructuralError::new(path, Constraint::MaxLength { limit: max }));
    }
}

fn parse_enum<'a>(
    value: &'a serde_json::Value,
    path: &str,
    allowed: &'static [&'static str],
    errors: &mut Vec<StructuralError>,
) -> Option<&'a str> {
    match value.as_str() {
        Some(s) if allowed.contains(&s) => Some(s),
        _ => {
            errors.push(StructuralError::new(path, Constraint::Enum { allowed }));
            None
        }
    }
}

fn check_scalar(value: &serde_json::Value, path: &str, errors: &mut Vec<StructuralError>) {
    match value {
        serde_json::Value::String(s) => check_length(s, path, 0, MAX_STRING_VALUE_LENGTH, errors),
        serde_json::Value::Number(_) | serde_json::Value::Bool(_) => {}
        _ => errors.push(StructuralError::new(
            path,
            Constraint::Type {
                expected: "string, number or boolean",
            },
        )),
    }
}

/// Non-empty, duplicate-free array of at most 100 scalars.
fn check_scalar_set(value: &serde_json::Value, path: &str, errors: &mut Vec<StructuralError>) {
    let Some(items) = expect_array(value, path, errors) else {
        return;
    };
    check_count(items.len(), path, 1, MAX_SET_ITEMS, errors);
    for (i, item) in items.iter().enumerate() {
        check_scalar(item, &format!("{path}/{i}"), errors);
    }
    let duplicate = items
        .iter()
        .enumerate()
        .find_map(|(j, b)| items[..j].iter().position(|a| a == b).map(|i| (i, j)));
    if let Some((first, second)) = duplicate {
        errors.push(StructuralError::new(path, Constraint::UniqueItems { first, second }));
    }
}

fn integer(value: &serde_json::Value, path: &str, errors: &mut Vec<StructuralError>) -> Option<i64> {
    if !value.is_number() {
        errors.push(StructuralError::new(path, Constraint::Type { expected: "integer" }));
        return None;
    }
    let n = integral(value);
    if n.is_none() {
        errors.push(StructuralError::new(path, Constraint::Integer));
    }
    n
}

fn bounded_u32(
    value: &serde_json::Value,
    path: &str,
    max: i64,
    errors: &mut Vec<StructuralError>,
) -> Option<u32> {
    let n = integer(value, path, errors)?;
    if n < 1 {
        errors.push(StructuralError::new(path, Constraint::Minimum { limit: 1 }));
        return None;
    }
    if n > max {
        errors.push(StructuralError::new(path, Constraint::Maximum { limit: max }));
        return None;
    }
    u32::try_from(n).ok()
}
