//! INI backend mapping flat sections onto the nested tree model.

use std::io::Read;

use anyhow::Context as _;
use ini::Properties;

use crate::{
    error::ConfigError,
    value::{Map, Value, deep_merge_into_map},
};

use super::Backend;

/// Name of the section whose keys are merged into the top level.
const ROOT_SECTION: &str = "__root__";

/// Untyped, read-only backend over an INI document.
///
/// The input is parsed once at construction; reads return the already-built
/// tree. Section bodies become maps, all leaf values are strings:
///
/// - a section literally named `__root__` merges its pairs into the top
///   level;
/// - with a subsection token configured, a section name containing the token
///   is split into a nested path, intermediate maps created on demand;
/// - otherwise the section name is a single top-level key, and same-named
///   sections merge their bodies (later wins per key).
///
/// A section whose name or nested path collides with an already-inserted
/// plain value fails construction with [`ConfigError::Structure`].
#[derive(Debug, Clone)]
pub struct Ini {
    data: Map,
}

impl Ini {
    /// Parses an INI document from a byte stream.
    pub fn from_reader(reader: impl Read) -> Result<Self, ConfigError> {
        Self::from_reader_inner(reader, None)
    }

    /// Parses an INI document from a byte stream, splitting section names on
    /// `token` into nested paths.
    pub fn from_reader_with_subsections(
        reader: impl Read,
        token: impl AsRef<str>,
    ) -> Result<Self, ConfigError> {
        Self::from_reader_inner(reader, Some(token.as_ref()))
    }

    fn from_reader_inner(mut reader: impl Read, token: Option<&str>) -> Result<Self, ConfigError> {
        let mut text = String::new();
        reader
            .read_to_string(&mut text)
            .context("failed reading INI stream")
            .map_err(|err| ConfigError::backend("ini", err))?;
        Self::parse(&text, token)
    }

    fn parse(text: &str, token: Option<&str>) -> Result<Self, ConfigError> {
        let parsed = ini::Ini::load_from_str(text)
            .context("failed parsing INI document")
            .map_err(|err| ConfigError::backend("ini", err))?;

        let mut data = Map::new();
        for (section, properties) in parsed.iter() {
            match section {
                // Keys outside all sections behave like `__root__` keys.
                None | Some(ROOT_SECTION) => Self::insert_root(&mut data, properties)?,
                Some(section) => {
                    let body = Self::section_body(properties);
                    match token.filter(|token| section.contains(*token)) {
                        Some(token) => Self::insert_at_path(&mut data, section, token, body)?,
                        None => Self::insert_section(&mut data, section, body)?,
                    }
                }
            }
        }
        Ok(Self { data })
    }

    fn section_body(properties: &Properties) -> Map {
        properties
            .iter()
            .map(|(key, value)| (key.to_owned(), Value::String(value.to_owned())))
            .collect()
    }

    fn insert_root(data: &mut Map, properties: &Properties) -> Result<(), ConfigError> {
        for (key, value) in properties.iter() {
            if data.get(key).is_some_and(Value::is_object) {
                let message =
                    format!("top-level key '{key}' would overwrite the section of the same name");
                return Err(ConfigError::Structure(message));
            }
            data.insert(key.to_owned(), Value::String(value.to_owned()));
        }
        Ok(())
    }

    fn insert_section(data: &mut Map, section: &str, body: Map) -> Result<(), ConfigError> {
        let entry = data
            .entry(section.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(existing) = entry else {
            let message =
                format!("section '{section}' collides with a plain value of the same name");
            return Err(ConfigError::Structure(message));
        };
        deep_merge_into_map(existing, body);
        Ok(())
    }

    fn insert_at_path(
        data: &mut Map,
        section: &str,
        token: &str,
        body: Map,
    ) -> Result<(), ConfigError> {
        let mut subdata = data;
        for component in section.split(token) {
            let entry = subdata
                .entry(component.to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            let Value::Object(map) = entry else {
                let message = format!(
                    "section '{section}' nests under '{component}', which holds a plain value"
                );
                return Err(ConfigError::Structure(message));
            };
            subdata = map;
        }
        deep_merge_into_map(subdata, body);
        Ok(())
    }
}

impl Backend for Ini {
    fn source_name(&self) -> &str {
        "ini"
    }

    fn load(&mut self) -> anyhow::Result<Map> {
        Ok(self.data.clone())
    }

    fn typed(&self) -> bool {
        false
    }
}
