//! YAML file backend.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context as _;

use crate::value::{Map, Value};

use super::Backend;

/// Backend reading and writing a YAML file.
///
/// The input must conform to the string-keyed object model; mappings with
/// array or object keys are rejected.
#[derive(Debug, Clone)]
pub struct Yaml {
    path: PathBuf,
}

impl Yaml {
    /// Creates a backend for the file at `path`. The file is not touched
    /// until the first read or write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn join_path(path: &str, segment: &str) -> String {
        if path.is_empty() {
            segment.to_owned()
        } else {
            format!("{path}.{segment}")
        }
    }

    /// Stringifies a mapping key; the tree model only has string keys.
    fn map_key(key: serde_yaml::Value, parent: &str) -> anyhow::Result<String> {
        match key {
            serde_yaml::Value::String(key) => Ok(key),
            serde_yaml::Value::Bool(key) => Ok(key.to_string()),
            serde_yaml::Value::Number(key) => Ok(key.to_string()),
            serde_yaml::Value::Null => Ok("null".to_owned()),
            other => {
                anyhow::bail!("mapping key under {parent:?} must be a scalar, got {other:?}")
            }
        }
    }

    fn map_number(number: serde_yaml::Number, path: &str) -> anyhow::Result<serde_json::Number> {
        number
            .as_u64()
            .map(serde_json::Number::from)
            .or_else(|| number.as_i64().map(serde_json::Number::from))
            .or_else(|| number.as_f64().and_then(serde_json::Number::from_f64))
            .with_context(|| format!("number {number} at {path:?} has no JSON representation"))
    }

    fn map_value(value: serde_yaml::Value, path: &str) -> anyhow::Result<Value> {
        Ok(match value {
            serde_yaml::Value::Null => Value::Null,
            serde_yaml::Value::Bool(value) => Value::Bool(value),
            serde_yaml::Value::Number(value) => Value::Number(Self::map_number(value, path)?),
            serde_yaml::Value::String(value) => Value::String(value),
            serde_yaml::Value::Sequence(items) => Value::Array(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, value)| {
                        let child_path = Self::join_path(path, &i.to_string());
                        Self::map_value(value, &child_path)
                    })
                    .collect::<anyhow::Result<_>>()?,
            ),
            serde_yaml::Value::Mapping(items) => Value::Object(
                items
                    .into_iter()
                    .map(|(key, value)| {
                        let key = Self::map_key(key, path)?;
                        let child_path = Self::join_path(path, &key);
                        anyhow::Ok((key, Self::map_value(value, &child_path)?))
                    })
                    .collect::<anyhow::Result<_>>()?,
            ),
            serde_yaml::Value::Tagged(tagged) => {
                return Self::map_value(tagged.value, path);
            }
        })
    }

    fn to_yaml(value: Value) -> serde_yaml::Value {
        match value {
            Value::Null => serde_yaml::Value::Null,
            Value::Bool(value) => serde_yaml::Value::Bool(value),
            Value::Number(value) => {
                if let Some(value) = value.as_u64() {
                    serde_yaml::Value::Number(value.into())
                } else if let Some(value) = value.as_i64() {
                    serde_yaml::Value::Number(value.into())
                } else {
                    serde_yaml::Value::Number(value.as_f64().unwrap_or(f64::NAN).into())
                }
            }
            Value::String(value) => serde_yaml::Value::String(value),
            Value::Array(values) => {
                serde_yaml::Value::Sequence(values.into_iter().map(Self::to_yaml).collect())
            }
            Value::Object(values) => serde_yaml::Value::Mapping(
                values
                    .into_iter()
                    .map(|(key, value)| (serde_yaml::Value::String(key), Self::to_yaml(value)))
                    .collect(),
            ),
        }
    }
}

impl Backend for Yaml {
    fn source_name(&self) -> &str {
        "yaml"
    }

    fn load(&mut self) -> anyhow::Result<Map> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("failed reading {:?}", self.path))?;
        let yaml: serde_yaml::Value = serde_yaml::from_str(&text)
            .with_context(|| format!("failed parsing {:?}", self.path))?;
        match Self::map_value(yaml, "")? {
            Value::Object(map) => Ok(map),
            _ => anyhow::bail!("{:?} does not contain a top-level mapping", self.path),
        }
    }

    fn store(&mut self, data: &Map) -> anyhow::Result<()> {
        let yaml = Self::to_yaml(Value::Object(data.clone()));
        let text = serde_yaml::to_string(&yaml).context("failed serializing tree")?;
        fs::write(&self.path, text).with_context(|| format!("failed writing {:?}", self.path))
    }

    fn writable(&self) -> bool {
        true
    }
}
