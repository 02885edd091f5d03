//! Canonical tree model shared by all configuration sources.

use std::fmt;

use indexmap::IndexMap;

/// Map of configuration values, ordered by insertion.
pub type Map = IndexMap<String, Value>;

/// Configuration value.
///
/// Arrays are *scalars* as far as the layering logic is concerned: only
/// [`Value::Object`] forms a subtree that sources and views descend into.
#[derive(Clone, Default, PartialEq)]
pub enum Value {
    /// `null`.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Numeric value.
    Number(serde_json::Number),
    /// String value.
    String(String),
    /// Array of values; opaque to the merge engine.
    Array(Vec<Value>),
    /// Object / map of values.
    Object(Map),
}

impl fmt::Debug for Value {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => formatter.write_str("null"),
            Self::Bool(value) => fmt::Display::fmt(value, formatter),
            Self::Number(value) => fmt::Display::fmt(value, formatter),
            Self::String(value) => fmt::Debug::fmt(value, formatter),
            Self::Array(array) => formatter.debug_list().entries(array).finish(),
            Self::Object(map) => formatter.debug_map().entries(map).finish(),
        }
    }
}

/// Renders scalars bare (strings unquoted) and compound values as JSON. This is
/// the stringification applied when writing to untyped backends.
impl fmt::Display for Value {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => formatter.write_str("null"),
            Self::Bool(value) => fmt::Display::fmt(value, formatter),
            Self::Number(value) => fmt::Display::fmt(value, formatter),
            Self::String(value) => formatter.write_str(value),
            compound => {
                let json = serde_json::Value::from(compound.clone());
                fmt::Display::fmt(&json, formatter)
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        serde_json::Number::from_f64(value).map_or(Self::Null, Self::Number)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(array: Vec<Value>) -> Self {
        Self::Array(array)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Self::Object(map)
    }
}

impl PartialEq<bool> for Value {
    fn eq(&self, other: &bool) -> bool {
        matches!(self, Self::Bool(value) if value == other)
    }
}

impl PartialEq<u64> for Value {
    fn eq(&self, other: &u64) -> bool {
        matches!(self, Self::Number(num) if *num == serde_json::Number::from(*other))
    }
}

impl PartialEq<i64> for Value {
    fn eq(&self, other: &i64) -> bool {
        matches!(self, Self::Number(num) if *num == serde_json::Number::from(*other))
    }
}

impl PartialEq<str> for Value {
    fn eq(&self, other: &str) -> bool {
        match self {
            Self::String(value) => value == other,
            _ => false,
        }
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        *self == **other
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(value) => Self::Bool(value),
            serde_json::Value::Number(value) => Self::Number(value),
            serde_json::Value::String(value) => Self::String(value),
            serde_json::Value::Array(values) => {
                Self::Array(values.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(values) => Self::Object(
                values
                    .into_iter()
                    .map(|(key, value)| (key, Self::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(value) => Self::Bool(value),
            Value::Number(value) => Self::Number(value),
            Value::String(value) => Self::String(value),
            Value::Array(values) => Self::Array(values.into_iter().map(Self::from).collect()),
            Value::Object(values) => Self::Object(
                values
                    .into_iter()
                    .map(|(key, value)| (key, Self::from(value)))
                    .collect(),
            ),
        }
    }
}

impl Value {
    /// Attempts to view this value as an object.
    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Checks whether this value forms a subtree.
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    /// Deep-merges `overrides` into this value. Only objects are meaningfully
    /// merged; all other values are replaced.
    pub fn deep_merge(&mut self, overrides: Self) {
        match (self, overrides) {
            (Self::Object(this), Self::Object(other)) => {
                deep_merge_into_map(this, other);
            }
            (this, value) => {
                *this = value;
            }
        }
    }
}

/// Converts a JSON value into a [`Map`].
///
/// # Errors
///
/// Fails if `json` is not an object.
pub fn map_from_json(json: serde_json::Value) -> anyhow::Result<Map> {
    match Value::from(json) {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("expected a JSON object, got {other:?}"),
    }
}

pub(crate) fn deep_merge_into_map(dest: &mut Map, source: Map) {
    for (key, value) in source {
        if let Some(existing_value) = dest.get_mut(&key) {
            existing_value.deep_merge(value);
        } else {
            dest.insert(key, value);
        }
    }
}
