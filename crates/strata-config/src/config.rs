//! Layered view presenting a prioritized list of sources as one tree.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::{
    error::ConfigError,
    source::{Item, Source},
    strategy::StrategyMap,
    value::{Map, Value},
};

/// Result of looking a key up in a [`LayeredConfig`]: either a plain value or
/// a sub-view over the sources that hold a subsection under the key.
#[derive(Debug, Clone)]
pub enum Entry {
    /// Plain value.
    Value(Value),
    /// Sub-view of a nested section.
    Section(LayeredConfig),
}

impl Entry {
    /// Returns the contained plain value, if any.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Section(_) => None,
        }
    }

    /// Converts into the contained plain value, if any.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Section(_) => None,
        }
    }

    /// Converts into the contained sub-view, if any.
    pub fn into_section(self) -> Option<LayeredConfig> {
        match self {
            Self::Value(_) => None,
            Self::Section(config) => Some(config),
        }
    }
}

impl<T> PartialEq<T> for Entry
where
    Value: PartialEq<T>,
{
    fn eq(&self, other: &T) -> bool {
        matches!(self, Self::Value(value) if value == other)
    }
}

/// Multi-layer configuration view.
///
/// Presents an ordered list of [`Source`]s as a single tree. Later sources
/// have higher priority: lookups walk the list back to front and the first
/// plain value wins, while subsections union across all sources that carry
/// them. Per-key [strategies](crate::strategy) replace "first wins" with a
/// user-supplied combiner.
///
/// Untyped sources borrow typing: a string produced by an untyped source is
/// re-parsed with the type of the same key in the highest-prioritized typed
/// source that has it, falling back to the raw string when no typed source
/// does (or parsing fails).
///
/// ```
/// use strata_config::{value, LayeredConfig, Memory, Source};
///
/// let defaults = serde_json::json!({ "port": 8080, "host": "localhost" });
/// let overrides = serde_json::json!({ "port": 9000 });
/// let config = LayeredConfig::new([
///     Source::new(Memory::new(value::map_from_json(defaults)?)),
///     Source::new(Memory::new(value::map_from_json(overrides)?)),
/// ]);
/// assert_eq!(config.get("port")?, 9000_u64);
/// assert_eq!(config.get("host")?, "localhost");
/// # anyhow::Ok(())
/// ```
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    sources: Vec<Source>,
    strategies: Rc<StrategyMap>,
    keychain: Vec<String>,
}

impl LayeredConfig {
    /// Creates a view over `sources`; lower index means lower priority.
    pub fn new(sources: impl IntoIterator<Item = Source>) -> Self {
        Self {
            sources: sources.into_iter().collect(),
            strategies: Rc::default(),
            keychain: Vec::new(),
        }
    }

    /// Attaches per-key merge strategies. The map is immutable afterwards and
    /// shared with all sub-views.
    #[must_use]
    pub fn with_strategies(mut self, strategies: StrategyMap) -> Self {
        self.strategies = Rc::new(strategies);
        self
    }

    /// Roots the view at the given key path instead of the sources' roots.
    #[must_use]
    pub fn with_keychain<S: Into<String>>(mut self, keychain: impl IntoIterator<Item = S>) -> Self {
        self.keychain = keychain.into_iter().map(Into::into).collect();
        self
    }

    /// Key path from the sources' roots to this view.
    pub fn keychain(&self) -> &[String] {
        &self.keychain
    }

    /// Walks `source` down the keychain. Whether the chain still resolves is
    /// only decided when the returned handle is accessed.
    fn walked(&self, source: &Source) -> Source {
        let mut walked = source.clone();
        for key in &self.keychain {
            walked = walked.descend(key);
        }
        walked
    }

    fn subview(&self, sources: Vec<Source>, key: &str) -> Self {
        let mut keychain = self.keychain.clone();
        keychain.push(key.to_owned());
        Self {
            sources,
            strategies: self.strategies.clone(),
            keychain,
        }
    }

    /// Re-parses a string from an untyped source with the type of the same
    /// key in the highest-prioritized typed source that has it.
    fn coerced(&self, key: &str, value: Value) -> Result<Value, ConfigError> {
        let Value::String(raw) = value else {
            return Ok(value);
        };
        for source in self.sources.iter().rev() {
            if !source.is_typed() {
                continue;
            }
            match self.walked(source).get(key) {
                Ok(Item::Value(peer)) => return Ok(Self::coerce_like(&peer, raw)),
                // Subsections don't supply a scalar type.
                Ok(Item::Section(_)) | Err(ConfigError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(Value::String(raw))
    }

    /// Parses `raw` as the type of `peer`; if parsing fails (or the peer's
    /// type gives nothing to parse into), the raw string is kept.
    fn coerce_like(peer: &Value, raw: String) -> Value {
        match peer {
            Value::Bool(_) => match raw.parse::<bool>() {
                Ok(value) => Value::Bool(value),
                Err(_) => Value::String(raw),
            },
            Value::Number(number) if number.is_f64() => match raw.parse::<f64>() {
                Ok(value) => Value::from(value),
                Err(_) => Value::String(raw),
            },
            Value::Number(_) => match raw.parse::<i64>() {
                Ok(value) => Value::from(value),
                Err(_) => match raw.parse::<u64>() {
                    Ok(value) => Value::from(value),
                    Err(_) => Value::String(raw),
                },
            },
            _ => Value::String(raw),
        }
    }

    /// Looks up `key` at the current level.
    ///
    /// Sources are walked highest priority first. The first plain value wins
    /// and is returned immediately; sources holding a subsection under the
    /// key are gathered, and if no plain value preempted them, together form
    /// the returned sub-view. A key covered by a strategy instead feeds every
    /// encountered plain value into the strategy and returns the accumulator.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if no walked source has the key.
    pub fn get(&self, key: &str) -> Result<Entry, ConfigError> {
        let strategy = self.strategies.get(key);
        let mut accumulator = None;
        let mut subqueue = Vec::new();

        for source in self.sources.iter().rev() {
            let item = match self.walked(source).get(key) {
                Ok(item) => item,
                Err(ConfigError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            };
            match item {
                Item::Section(_) => subqueue.push(source.clone()),
                Item::Value(value) => {
                    let value = if source.is_typed() {
                        value
                    } else {
                        self.coerced(key, value)?
                    };
                    if let Some(strategy) = strategy {
                        let next = strategy(value, accumulator.take()).map_err(|inner| {
                            ConfigError::Strategy {
                                key: key.to_owned(),
                                inner,
                            }
                        })?;
                        accumulator = Some(next);
                    } else {
                        return Ok(Entry::Value(value));
                    }
                }
            }
        }

        if let Some(value) = accumulator {
            Ok(Entry::Value(value))
        } else if subqueue.is_empty() {
            Err(ConfigError::not_found(key))
        } else {
            // Restore construction order: the subqueue was gathered highest
            // priority first.
            subqueue.reverse();
            Ok(Entry::Section(self.subview(subqueue, key)))
        }
    }

    /// Looks up `key`, substituting `default` if it is absent everywhere.
    pub fn get_or(&self, key: &str, default: impl Into<Value>) -> Result<Entry, ConfigError> {
        match self.get(key) {
            Err(ConfigError::NotFound(_)) => Ok(Entry::Value(default.into())),
            other => other,
        }
    }

    /// Checks whether any walked source has `key` at the current level.
    pub fn contains(&self, key: &str) -> Result<bool, ConfigError> {
        for source in self.sources.iter().rev() {
            if self.walked(source).contains(key)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Keys at the current level across all walked sources, once each, in
    /// first-seen order of the priority walk.
    pub fn keys(&self) -> Result<Vec<String>, ConfigError> {
        let mut keys: Vec<String> = Vec::new();
        for source in self.sources.iter().rev() {
            let source_keys = match self.walked(source).keys() {
                Ok(keys) => keys,
                Err(ConfigError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            };
            for key in source_keys {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    /// Number of distinct keys at the current level.
    pub fn len(&self) -> Result<usize, ConfigError> {
        Ok(self.keys()?.len())
    }

    /// Whether no walked source has keys at the current level.
    pub fn is_empty(&self) -> Result<bool, ConfigError> {
        Ok(self.keys()?.is_empty())
    }

    /// Resolves every key at the current level, sorted lexicographically.
    ///
    /// Unlike point lookups, bulk enumeration must commit to a single shape
    /// per key: a key that is a plain value in one source and a subsection in
    /// another fails with [`ConfigError::Conflict`] unless a strategy covers
    /// it (in which case the strategy accumulator wins and subsection
    /// contributions are discarded, as in [`Self::get()`]).
    pub fn items(&self) -> Result<Vec<(String, Entry)>, ConfigError> {
        let mut scalars = Map::new();
        let mut accumulators = Map::new();
        let mut subqueues: IndexMap<String, Vec<Source>> = IndexMap::new();

        for source in self.sources.iter().rev() {
            let items = match self.walked(source).items() {
                Ok(items) => items,
                Err(ConfigError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            };
            for (key, item) in items {
                let strategy = self.strategies.get(&key);
                match item {
                    Item::Section(_) => {
                        if scalars.contains_key(&key) && strategy.is_none() {
                            return Err(ConfigError::Conflict {
                                key,
                                source: source.source_name().to_owned(),
                            });
                        }
                        subqueues.entry(key).or_default().push(source.clone());
                    }
                    Item::Value(value) => {
                        if subqueues.contains_key(&key) && strategy.is_none() {
                            return Err(ConfigError::Conflict {
                                key,
                                source: source.source_name().to_owned(),
                            });
                        }
                        let value = if source.is_typed() {
                            value
                        } else {
                            self.coerced(&key, value)?
                        };
                        if let Some(strategy) = strategy {
                            let previous = accumulators.swap_remove(&key);
                            let next = strategy(value, previous).map_err(|inner| {
                                ConfigError::Strategy {
                                    key: key.clone(),
                                    inner,
                                }
                            })?;
                            accumulators.insert(key, next);
                        } else if !scalars.contains_key(&key) {
                            scalars.insert(key, value);
                        }
                    }
                }
            }
        }

        let mut entries: Vec<(String, Entry)> = Vec::new();
        for (key, value) in scalars {
            entries.push((key, Entry::Value(value)));
        }
        for (key, value) in accumulators {
            entries.push((key, Entry::Value(value)));
        }
        for (key, mut subqueue) in subqueues {
            if entries.iter().any(|(existing, _)| *existing == key) {
                // A strategy accumulator preempted the subsections.
                continue;
            }
            subqueue.reverse();
            let view = self.subview(subqueue, &key);
            entries.push((key, Entry::Section(view)));
        }
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(entries)
    }

    /// Recursively materializes the view into a plain nested map.
    pub fn dump(&self) -> Result<Map, ConfigError> {
        let mut map = Map::new();
        for (key, entry) in self.items()? {
            let value = match entry {
                Entry::Value(value) => value,
                Entry::Section(view) => Value::Object(view.dump()?),
            };
            map.insert(key, value);
        }
        Ok(map)
    }

    /// Sets `key` at the current level.
    ///
    /// The write goes to the highest-prioritized source that already contains
    /// the key, preserving the key's home (and surfacing that source's
    /// refusal if it is not writable); a new key goes to the
    /// highest-prioritized writable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoWritableSource`] if the key is new and every
    /// walked source is read-only or locked.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<(), ConfigError> {
        let value = value.into();
        let mut sink = None;

        for source in self.sources.iter().rev() {
            let walked = self.walked(source);
            if sink.is_none() && source.is_writable() {
                sink = Some(walked.clone());
            }
            if walked.contains(key)? {
                tracing::trace!(
                    key,
                    source = source.source_name(),
                    "writing key to its current home"
                );
                return walked.set(key, value);
            }
        }

        match sink {
            Some(sink) => {
                tracing::trace!(
                    key,
                    source = sink.source_name(),
                    "writing new key to first writable source"
                );
                sink.set(key, value)
            }
            None => Err(ConfigError::NoWritableSource),
        }
    }

    /// Returns the value of `key`, setting it to `value` first if absent.
    pub fn setdefault(&mut self, key: &str, value: impl Into<Value>) -> Result<Entry, ConfigError> {
        match self.get(key) {
            Ok(entry) => Ok(entry),
            Err(ConfigError::NotFound(_)) => {
                let value = value.into();
                self.set(key, value.clone())?;
                Ok(Entry::Value(value))
            }
            Err(err) => Err(err),
        }
    }

    /// Sets every top-level entry of `other` on this view.
    pub fn update(&mut self, other: Map) -> Result<(), ConfigError> {
        for (key, value) in other {
            self.set(&key, value)?;
        }
        Ok(())
    }

    /// Removes `key` from every walked source that contains it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if no source contained the key.
    pub fn remove(&mut self, key: &str) -> Result<(), ConfigError> {
        let mut removed = false;
        for source in self.sources.iter().rev() {
            let walked = self.walked(source);
            if walked.contains(key)? {
                walked.remove(key)?;
                removed = true;
            }
        }
        if removed {
            Ok(())
        } else {
            Err(ConfigError::not_found(key))
        }
    }
}

impl PartialEq for LayeredConfig {
    fn eq(&self, other: &Self) -> bool {
        match (self.dump(), other.dump()) {
            (Ok(this), Ok(that)) => this == that,
            _ => false,
        }
    }
}

impl PartialEq<Map> for LayeredConfig {
    fn eq(&self, other: &Map) -> bool {
        self.dump().is_ok_and(|map| map == *other)
    }
}
