//! Detection of condition pairs that cannot both hold on one value.

use std::cmp::Ordering;

use crate::condition::{Condition, Operator};
use crate::error::ValidationError;
use crate::types::Value;

/// Finds fields carrying two mutually exclusive conditions.
///
/// Reports one error per field (the first conflicting pair, in condition
/// order), then recurses into every `elementMatch` value.
#[must_use]
pub fn find_conflicting_conditions(conditions: &[Condition]) -> Vec<ValidationError> {
    let mut groups: Vec<(&str, Vec<&Condition>)> = Vec::new();
    for condition in conditions {
        match groups.iter_mut().find(|(f, _)| *f == condition.field) {
            Some((_, group)) => group.push(condition),
            None => groups.push((&condition.field, vec![condition])),
        }
    }

    let mut errors = Vec::new();
    for (field, group) in &groups {
        let pair = group.iter().enumerate().find_map(|(i, a)| {
            group[i + 1..]
                .iter()
                .find(|b| conflicts(a, b))
                .map(|b| [a.operator, b.operator])
        });
        if let Some(operators) = pair {
            errors.push(ValidationError::ConflictingConditions {
                field: (*field).to_string(),
                operators,
            });
        }
    }

    for condition in conditions {
        if let Some(nested) = condition.nested() {
            errors.extend(find_conflicting_conditions(nested));
        }
    }
    errors
}

/// A lowered condition literal.
enum Term {
    Eq(Value),
    Lower { bound: Value, inclusive: bool },
    Upper { bound: Value, inclusive: bool },
    In(Vec<Value>),
    Prefix(String),
    Length(Value),
    /// `elementMatch` / `contains`: never conflicts.
    Opaque,
}

fn lower(condition: &Condition) -> Term {
    let Some(literal) = condition.literal() else {
        return Term::Opaque;
    };
    let value = Value::from_json(literal);
    match condition.operator {
        Operator::Eq => Term::Eq(value),
        Operator::Gt => Term::Lower { bound: value, inclusive: false },
        Operator::Gte => Term::Lower { bound: value, inclusive: true },
        Operator::Lt => Term::Upper { bound: value, inclusive: false },
        Operator::Lte => Term::Upper { bound: value, inclusive: true },
        Operator::In => match value {
            Value::Array(items) => Term::In(items),
            other => Term::In(vec![other]),
        },
        Operator::StartsWith => match value {
            Value::String(prefix) => Term::Prefix(prefix),
            _ => Term::Opaque,
        },
        Operator::Length => Term::Length(value),
        Operator::ElementMatch | Operator::Contains => Term::Opaque,
    }
}

fn conflicts(a: &Condition, b: &Condition) -> bool {
    let (a, b) = (lower(a), lower(b));
    disjoint(&a, &b) || disjoint(&b, &a)
}

/// Whether no single value satisfies both terms. Checked in both argument
/// orders, so each pair only needs to be handled once.
fn disjoint(a: &Term, b: &Term) -> bool {
    match (a, b) {
        (Term::Eq(x), Term::Eq(y)) => !x.store_eq(y),
        (Term::Eq(x), other) => !satisfies(x, other),
        (Term::In(xs), Term::In(ys)) => !xs.iter().any(|x| ys.iter().any(|y| x.store_eq(y))),
        (Term::In(xs), other @ (Term::Lower { .. } | Term::Upper { .. } | Term::Prefix(_))) => {
            !xs.iter().any(|x| satisfies(x, other))
        }
        (
            Term::Lower { bound: lo, inclusive: lo_inc },
            Term::Upper { bound: hi, inclusive: hi_inc },
        ) => match lo.compare(hi) {
            None | Some(Ordering::Greater) => true,
            Some(Ordering::Equal) => !(*lo_inc && *hi_inc),
            Some(Ordering::Less) => false,
        },
        (Term::Lower { bound: x, .. }, Term::Lower { bound: y, .. })
        | (Term::Upper { bound: x, .. }, Term::Upper { bound: y, .. }) => x.compare(y).is_none(),
        (Term::Prefix(p), Term::Prefix(q)) => !p.starts_with(q.as_str()) && !q.starts_with(p.as_str()),
        (Term::Prefix(p), Term::Upper { bound, inclusive }) => match bound.as_str() {
            None => true,
            Some(hi) => match p.as_str().cmp(hi) {
                Ordering::Less => false,
                Ordering::Equal => !inclusive,
                Ordering::Greater => true,
            },
        },
        (Term::Prefix(p), Term::Lower { bound, .. }) => match bound.as_str() {
            None => true,
            // Strings with prefix `p` are unbounded above unless `lo` already
            // sorts past every one of them.
            Some(lo) => lo > p.as_str() && !lo.starts_with(p.as_str()),
        },
        (Term::Length(x), Term::Length(y)) => !x.store_eq(y),
        _ => false,
    }
}

fn satisfies(value: &Value, term: &Term) -> bool {
    match term {
        Term::Eq(x) => value.store_eq(x),
        Term::Lower { bound, inclusive } => match value.compare(bound) {
            Some(Ordering::Greater) => true,
            Some(Ordering::Equal) => *inclusive,
            _ => false,
        },
        Term::Upper { bound, inclusive } => match value.compare(bound) {
            Some(Ordering::Less) => true,
            Some(Ordering::Equal) => *inclusive,
            _ => false,
        },
        Term::In(items) => items.iter().any(|x| value.store_eq(x)),
        Term::Prefix(p) => value.as_str().is_some_and(|s| s.starts_with(p.as_str())),
        Term::Length(_) | Term::Opaque => true,
    }
}
