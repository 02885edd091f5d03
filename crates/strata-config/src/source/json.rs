//! JSON file backend.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context as _;

use crate::value::{Map, Value};

use super::Backend;

/// Backend reading and writing a JSON file.
///
/// The file is re-parsed on every uncached read, so each read reflects the
/// file's current contents. The root of the document must be an object.
#[derive(Debug, Clone)]
pub struct Json {
    path: PathBuf,
}

impl Json {
    /// Creates a backend for the file at `path`. The file is not touched
    /// until the first read or write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Backend for Json {
    fn source_name(&self) -> &str {
        "json"
    }

    fn load(&mut self) -> anyhow::Result<Map> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("failed reading {:?}", self.path))?;
        let json: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("failed parsing {:?}", self.path))?;
        match Value::from(json) {
            Value::Object(map) => Ok(map),
            _ => anyhow::bail!("{:?} does not contain a top-level object", self.path),
        }
    }

    fn store(&mut self, data: &Map) -> anyhow::Result<()> {
        let json = serde_json::Value::from(Value::Object(data.clone()));
        let text = serde_json::to_string_pretty(&json).context("failed serializing tree")?;
        fs::write(&self.path, text).with_context(|| format!("failed writing {:?}", self.path))
    }

    fn writable(&self) -> bool {
        true
    }
}
