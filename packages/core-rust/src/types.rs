//! Backing-store value model.
//!
//! [`Value`] is the typed value compiled filters and stored document shapes
//! are expressed in. It follows the JSON data model and adds a native
//! [`Value::DateTime`] variant for the temporal system fields.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Generic runtime value held by the backing store.
///
/// Numbers compare across `Int` and `Float`; every other comparison only
/// succeeds between values of the same [`TypeBracket`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// JSON null.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON integer (signed 64-bit).
    Int(i64),
    /// JSON floating-point (64-bit IEEE 754).
    Float(f64),
    /// JSON string (UTF-8).
    String(String),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
    /// JSON array (ordered sequence of values).
    Array(Vec<Value>),
    /// JSON object. Uses `BTreeMap` for deterministic iteration order.
    Map(BTreeMap<String, Value>),
}

/// Comparison bracket of a [`Value`], in canonical sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TypeBracket {
    Null,
    Number,
    String,
    Object,
    Array,
    Bool,
    DateTime,
}

impl Value {
    /// Converts a JSON value. Integers that fit `i64` stay integral.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => {
                Self::Array(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Renders the value as JSON. `DateTime` renders as `{"$date": millis}`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::DateTime(ms) => serde_json::json!({ "$date": ms }),
            Self::Array(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            Self::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    #[must_use]
    pub fn bracket(&self) -> TypeBracket {
        match self {
            Self::Null => TypeBracket::Null,
            Self::Int(_) | Self::Float(_) => TypeBracket::Number,
            Self::String(_) => TypeBracket::String,
            Self::Map(_) => TypeBracket::Object,
            Self::Array(_) => TypeBracket::Array,
            Self::Bool(_) => TypeBracket::Bool,
            Self::DateTime(_) => TypeBracket::DateTime,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Compares two values of the same bracket. Returns `None` when the
    /// brackets differ, which range predicates treat as "no match".
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        if self.bracket() != other.bracket() {
            return None;
        }
        Some(self.canonical_cmp(other))
    }

    /// Total order used for sorting: bracket first, then value.
    #[must_use]
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => {
                self.as_f64().total_cmp(&other.as_f64())
            }
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::DateTime(a), Self::DateTime(b)) => a.cmp(b),
            (Self::Array(a), Self::Array(b)) => cmp_sequence(a.iter(), b.iter()),
            (Self::Map(a), Self::Map(b)) => a
                .iter()
                .zip(b.iter())
                .map(|((ka, va), (kb, vb))| ka.cmp(kb).then_with(|| va.canonical_cmp(vb)))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            _ => self.bracket().cmp(&other.bracket()),
        }
    }

    /// Equality as the store sees it: `1` and `1.0` are equal.
    #[must_use]
    pub fn store_eq(&self, other: &Self) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    #[allow(clippy::cast_precision_loss)]
    fn as_f64(&self) -> f64 {
        match self {
            Self::Int(i) => *i as f64,
            Self::Float(f) => *f,
            _ => f64::NAN,
        }
    }
}

/// Integer held by a JSON number, accepting integral floats such as `2.0`.
///
/// Floats beyond the `i64` range saturate.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn integral(json: &serde_json::Value) -> Option<i64> {
    let serde_json::Value::Number(number) = json else {
        return None;
    };
    number.as_i64().or_else(|| {
        number
            .as_f64()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

fn cmp_sequence<'a>(
    mut a: impl Iterator<Item = &'a Value>,
    mut b: impl Iterator<Item = &'a Value>,
) -> Ordering {
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = x.canonical_cmp(y);
                if ord.is_ne() {
                    return ord;
                }
            }
        }
    }
}
