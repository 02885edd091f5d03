//! Environment variable backend.

use std::{cell::RefCell, collections::BTreeMap, env};

use crate::value::{Map, Value};

use super::Backend;

const DEFAULT_TOKEN: &str = "_";

#[derive(Debug, Clone)]
enum Vars {
    /// Scan the process environment on every read.
    Process,
    /// Fixed snapshot of raw variable names to values; supports writes.
    Captured(RefCell<BTreeMap<String, String>>),
}

/// Untyped backend mapping environment variables to a nested tree.
///
/// On every read, variables whose names start with the prefix are stripped of
/// it, lowercased and split on the token (`_` by default); the resulting path
/// determines where the string value lands, with intermediate maps created on
/// demand. Variable names are visited in sorted order so the tree shape is
/// deterministic.
#[derive(Debug, Clone)]
pub struct Environment {
    prefix: String,
    token: String,
    vars: Vars,
}

impl Environment {
    /// Creates a backend scanning the process environment. This mode is
    /// read-only; use [`Self::from_iter()`] for a writable snapshot.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            token: DEFAULT_TOKEN.to_owned(),
            vars: Vars::Process,
        }
    }

    /// Creates a backend over an explicit variable snapshot instead of the
    /// process environment. Unlike [`Self::new()`], the snapshot is owned and
    /// the backend is writable.
    pub fn from_iter<K, V>(
        prefix: impl Into<String>,
        vars: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let vars = vars
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        Self {
            prefix: prefix.into(),
            token: DEFAULT_TOKEN.to_owned(),
            vars: Vars::Captured(RefCell::new(vars)),
        }
    }

    /// Overrides the token separating path components in variable names.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    fn insert_var(&self, data: &mut Map, name: &str, value: &str) {
        let Some(stripped) = name.strip_prefix(&self.prefix) else {
            return;
        };
        let path = stripped.to_lowercase();
        let mut components = path.split(self.token.as_str()).collect::<Vec<_>>();
        let last = components.pop().unwrap_or(path.as_str());

        let mut subdata = data;
        for component in components {
            let entry = subdata
                .entry(component.to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                // A shorter variable already claimed this path as a value;
                // later, longer variables win.
                *entry = Value::Object(Map::new());
            }
            let Value::Object(map) = entry else {
                unreachable!(); // just ensured above
            };
            subdata = map;
        }
        subdata.insert(last.to_owned(), Value::String(value.to_owned()));
    }

    /// Joins path components back into a raw variable name.
    fn var_name(&self, path: &[String]) -> String {
        let mut name = self.prefix.clone();
        name.push_str(&path.join(&self.token).to_uppercase());
        name
    }

    fn flatten(&self, data: &Map, path: &mut Vec<String>, out: &mut BTreeMap<String, String>) {
        for (key, value) in data {
            path.push(key.clone());
            match value {
                Value::Object(sub) => self.flatten(sub, path, out),
                scalar => {
                    out.insert(self.var_name(path), scalar.to_string());
                }
            }
            path.pop();
        }
    }
}

impl Backend for Environment {
    fn source_name(&self) -> &str {
        "environment"
    }

    fn load(&mut self) -> anyhow::Result<Map> {
        let mut data = Map::new();
        match &self.vars {
            Vars::Process => {
                let mut vars: Vec<_> = env::vars().collect();
                vars.sort();
                for (name, value) in &vars {
                    self.insert_var(&mut data, name, value);
                }
            }
            Vars::Captured(vars) => {
                for (name, value) in &*vars.borrow() {
                    self.insert_var(&mut data, name, value);
                }
            }
        }
        Ok(data)
    }

    fn store(&mut self, data: &Map) -> anyhow::Result<()> {
        let Vars::Captured(vars) = &self.vars else {
            anyhow::bail!("the process environment cannot be written to");
        };
        let mut flat = BTreeMap::new();
        self.flatten(data, &mut Vec::new(), &mut flat);
        *vars.borrow_mut() = flat;
        Ok(())
    }

    fn writable(&self) -> bool {
        matches!(self.vars, Vars::Captured(_))
    }

    fn typed(&self) -> bool {
        false
    }
}
