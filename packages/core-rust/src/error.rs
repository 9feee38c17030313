//! Validation error taxonomy and the accumulated [`ValidationResult`].

use std::fmt;

use crate::condition::Operator;

// ---------------------------------------------------------------------------
// Structural errors
// ---------------------------------------------------------------------------

/// Grammar constraint violated by a raw query value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Constraint {
    #[error("must be {expected}")]
    Type { expected: &'static str },

    #[error("must have at least {limit} items")]
    MinItems { limit: usize },

    #[error("must have at most {limit} items")]
    MaxItems { limit: usize },

    #[error("must be at least {limit} characters")]
    MinLength { limit: usize },

    #[error("must be at most {limit} characters")]
    MaxLength { limit: usize },

    #[error("must match pattern \"{pattern}\"")]
    Pattern { pattern: &'static str },

    #[error("must be >= {limit}")]
    Minimum { limit: i64 },

    #[error("must be <= {limit}")]
    Maximum { limit: i64 },

    #[error("must be integer")]
    Integer,

    #[error("items #{first} and #{second} are identical")]
    UniqueItems { first: usize, second: usize },

    #[error("must be one of {allowed:?}")]
    Enum { allowed: &'static [&'static str] },

    #[error("must not have additional property '{name}'")]
    AdditionalProperty { name: String },

    #[error("'{}' and '{}' are mutually exclusive", .fields[0], .fields[1])]
    MutuallyExclusive { fields: [&'static str; 2] },
}

/// A grammar violation at a JSON-pointer path (e.g. `/where/0/2`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{path} {constraint}")]
pub struct StructuralError {
    pub path: String,
    pub constraint: Constraint,
}

impl StructuralError {
    #[must_use]
    pub fn new(path: impl Into<String>, constraint: Constraint) -> Self {
        Self {
            path: path.into(),
            constraint,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// Which placement rule an operator broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementRule {
    /// `in` / `startsWith` must be the last condition.
    LastCondition,
    /// Comparison ranges must be within the last two conditions.
    LastTwoConditions,
    /// `in` must be on one of the index's last two fields.
    LastTwoIndexFields,
    /// Range / `in` must not precede an equality or `in` condition.
    BeforeEquality,
}

impl fmt::Display for PlacementRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LastCondition => "may only be used in the last condition",
            Self::LastTwoConditions => "may only be used in the last two conditions",
            Self::LastTwoIndexFields => "may only be used on the last two indexed properties",
            Self::BeforeEquality => "may not be used before '==' or 'in'",
        })
    }
}

/// Why an `orderBy` entry was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderByRule {
    RequiresWhere,
    Duplicate,
    /// The field has no range-class or `in` condition in `where`.
    NotRangeField,
    /// The field does not carry the last (index-ordered) condition.
    NotLastCondition,
}

impl fmt::Display for OrderByRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RequiresWhere => "'orderBy' requires 'where'",
            Self::Duplicate => "duplicate sort field",
            Self::NotRangeField => "sort field must be used with a range or 'in' operator",
            Self::NotLastCondition => "sort field must carry the last condition",
        })
    }
}

/// One violated query rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error("conflicting conditions on '{field}': '{}' and '{}'", .operators[0], .operators[1])]
    ConflictingConditions {
        field: String,
        operators: [Operator; 2],
    },

    #[error("no index covers {fields:?}")]
    NoMatchingIndex { fields: Vec<String> },

    #[error("fields {fields:?} span more than one index")]
    FieldsFromMultipleIndices { fields: Vec<String> },

    #[error("'{operator}' on '{field}' {rule}")]
    OperatorPlacement {
        field: String,
        operator: Operator,
        rule: PlacementRule,
    },

    #[error("multiple range clauses: all ranges must be on same field, got {fields:?}")]
    MultipleRangeOperators { fields: Vec<String> },

    #[error("missing orderBy for '{operator}' on '{field}'")]
    MissingOrderByForRange { field: String, operator: Operator },

    #[error("invalid orderBy{}: {rule}", quoted(.field.as_deref()))]
    InvalidOrderBy {
        field: Option<String>,
        rule: OrderByRule,
    },
}

fn quoted(field: Option<&str>) -> String {
    field.map(|f| format!(" '{f}'")).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// ValidationResult
// ---------------------------------------------------------------------------

/// Ordered list of validation errors; empty means valid.
///
/// Built by one validation pass and immutable afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    errors: Vec<ValidationError>,
}

impl ValidationResult {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self { errors }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    #[must_use]
    pub fn into_errors(self) -> Vec<ValidationError> {
        self.errors
    }

    pub(crate) fn push(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub(crate) fn merge(&mut self, other: impl IntoIterator<Item = ValidationError>) {
        self.errors.extend(other);
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return f.write_str("valid");
        }
        write!(f, "{} validation error(s)", self.errors.len())?;
        for (i, e) in self.errors.iter().enumerate() {
            write!(f, "{} {e}", if i == 0 { ":" } else { ";" })?;
        }
        Ok(())
    }
}
