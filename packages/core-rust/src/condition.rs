//! Typed query model: conditions, sort specifiers, pagination.
//!
//! A raw query is parsed into these types by
//! [`QueryGrammar`](crate::grammar::QueryGrammar); everything downstream
//! (selection, sorting, validation, compilation) works on them.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Condition operator as written in a `where` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "startsWith")]
    StartsWith,
    #[serde(rename = "elementMatch")]
    ElementMatch,
    #[serde(rename = "length")]
    Length,
    #[serde(rename = "contains")]
    Contains,
}

impl Operator {
    /// Every operator, in grammar order.
    pub const ALL: [Operator; 10] = [
        Self::Lt,
        Self::Lte,
        Self::Eq,
        Self::Gt,
        Self::Gte,
        Self::In,
        Self::StartsWith,
        Self::ElementMatch,
        Self::Length,
        Self::Contains,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Eq => "==",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::In => "in",
            Self::StartsWith => "startsWith",
            Self::ElementMatch => "elementMatch",
            Self::Length => "length",
            Self::Contains => "contains",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == s)
    }

    /// `<`, `<=`, `>`, `>=`.
    #[must_use]
    pub fn is_comparison_range(self) -> bool {
        matches!(self, Self::Lt | Self::Lte | Self::Gt | Self::Gte)
    }

    /// Range-class operators: the comparison ranges plus `startsWith`.
    #[must_use]
    pub fn is_range(self) -> bool {
        self.is_comparison_range() || self == Self::StartsWith
    }

    /// Operators that require a sort specifier on their field.
    #[must_use]
    pub fn requires_order_by(self) -> bool {
        self.is_range() || self == Self::In
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort direction for `orderBy` entries and index properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Structs
// ---------------------------------------------------------------------------

/// Right-hand side of a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionValue {
    /// Literal JSON value (scalar or array, depending on the operator).
    Literal(serde_json::Value),
    /// Nested conditions of an `elementMatch`.
    Conditions(Vec<Condition>),
}

/// One `(field, operator, value)` filter term.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: ConditionValue,
}

impl Condition {
    #[must_use]
    pub fn new(field: impl Into<String>, operator: Operator, value: serde_json::Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value: ConditionValue::Literal(value),
        }
    }

    #[must_use]
    pub fn element_match(field: impl Into<String>, nested: Vec<Condition>) -> Self {
        Self {
            field: field.into(),
            operator: Operator::ElementMatch,
            value: ConditionValue::Conditions(nested),
        }
    }

    #[must_use]
    pub fn literal(&self) -> Option<&serde_json::Value> {
        match &self.value {
            ConditionValue::Literal(v) => Some(v),
            ConditionValue::Conditions(_) => None,
        }
    }

    #[must_use]
    pub fn nested(&self) -> Option<&[Condition]> {
        match &self.value {
            ConditionValue::Conditions(c) => Some(c),
            ConditionValue::Literal(_) => None,
        }
    }

    /// Fields this condition touches for index selection.
    ///
    /// An `elementMatch` contributes `field.nested` for each nested condition.
    #[must_use]
    pub fn referenced_fields(&self) -> Vec<String> {
        match &self.value {
            ConditionValue::Conditions(nested) => nested
                .iter()
                .map(|c| format!("{}.{}", self.field, c.field))
                .collect(),
            ConditionValue::Literal(_) => vec![self.field.clone()],
        }
    }
}

/// One `[field, direction]` sort specifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderBy {
    #[must_use]
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }
}

/// Result-window start. `startAt` and `startAfter` are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// 1-based position of the first returned document.
    StartAt(u32),
    /// Number of documents to skip.
    StartAfter(u32),
}

/// Structurally valid query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    /// `where` is a Rust keyword, so we use raw identifier syntax.
    pub r#where: Option<Vec<Condition>>,
    pub order_by: Option<Vec<OrderBy>>,
    pub limit: Option<u32>,
    pub pagination: Option<Pagination>,
}

impl Query {
    /// Conditions of the `where` clause, empty when absent.
    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        self.r#where.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn sort(&self) -> &[OrderBy] {
        self.order_by.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn operator_parse_covers_all_names() {
        for op in Operator::ALL {
            assert_eq!(Operator::parse(op.as_str()), Some(op));
        }
        assert_eq!(Operator::parse("!="), None);
    }

    #[test]
    fn operator_classes() {
        assert!(Operator::StartsWith.is_range());
        assert!(!Operator::StartsWith.is_comparison_range());
        assert!(!Operator::In.is_range());
        assert!(Operator::In.requires_order_by());
        assert!(!Operator::Eq.requires_order_by());
    }

    #[test]
    fn element_match_references_nested_paths() {
        let cond = Condition::element_match(
            "arr",
            vec![
                Condition::new("x", Operator::Eq, json!(1)),
                Condition::new("y", Operator::Gt, json!(2)),
            ],
        );
        assert_eq!(cond.referenced_fields(), vec!["arr.x", "arr.y"]);
    }
}
