//! Configuration sources and the backend contract they are built on.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    fmt,
    rc::Rc,
};

pub use self::{
    env::Environment,
    etcd::{Connector, EtcdConnector, EtcdStore},
    ini::Ini,
    json::Json,
    memory::Memory,
    yaml::Yaml,
};
use crate::{
    error::ConfigError,
    value::{Map, Value, deep_merge_into_map},
};

mod env;
mod etcd;
mod ini;
mod json;
mod memory;
#[cfg(test)]
mod tests;
mod yaml;

/// Storage layer of a configuration source.
///
/// `load` is the only required operation; a backend that does not override
/// [`store`](Self::store) and [`writable`](Self::writable) is read-only.
/// Failures returned from here are surfaced as [`ConfigError::Backend`] with
/// the source name attached.
pub trait Backend: fmt::Debug + 'static {
    /// Diagnostic name used in error messages.
    fn source_name(&self) -> &str;

    /// Produces the current full tree held by the backing storage.
    fn load(&mut self) -> anyhow::Result<Map>;

    /// Replaces the full tree in the backing storage.
    fn store(&mut self, data: &Map) -> anyhow::Result<()> {
        let _ = data;
        anyhow::bail!("'{}' does not support writing", self.source_name());
    }

    /// Whether [`store`](Self::store) is supported.
    fn writable(&self) -> bool {
        false
    }

    /// Whether scalars produced by [`load`](Self::load) carry their original
    /// type. Untyped backends produce strings only.
    fn typed(&self) -> bool {
        true
    }

    /// Whether sources over this backend cache reads unless configured
    /// otherwise.
    fn cached_by_default(&self) -> bool {
        false
    }
}

/// Per-key value transform applied by a [`Source`].
///
/// `encode` maps the raw stored value to the user-facing one on reads;
/// `decode` maps it back on writes. The two must round-trip:
/// `decode(encode(x)) == x`.
#[derive(Clone)]
pub struct CustomType {
    encode: Rc<dyn Fn(Value) -> Value>,
    decode: Rc<dyn Fn(Value) -> Value>,
}

impl fmt::Debug for CustomType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("CustomType").finish_non_exhaustive()
    }
}

impl CustomType {
    /// Creates a transform from an encode / decode pair.
    pub fn new(
        encode: impl Fn(Value) -> Value + 'static,
        decode: impl Fn(Value) -> Value + 'static,
    ) -> Self {
        Self {
            encode: Rc::new(encode),
            decode: Rc::new(decode),
        }
    }

    fn encode(&self, value: Value) -> Value {
        (self.encode)(value)
    }

    fn decode(&self, value: Value) -> Value {
        (self.decode)(value)
    }
}

/// Static metadata of a [`Source`].
#[derive(Debug, Clone)]
pub struct SourceMeta {
    /// Diagnostic name.
    pub name: String,
    /// Whether the backend lacks a write operation.
    pub read_only: bool,
    /// Whether scalars carry their original type.
    pub typed: bool,
}

/// Result of looking a key up in a [`Source`]: either a plain value or a
/// sub-source rooted at a map-valued key.
#[derive(Debug, Clone)]
pub enum Item {
    /// Plain value.
    Value(Value),
    /// Sub-source view of a nested map.
    Section(Source),
}

impl Item {
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

    /// Converts into the contained sub-source, if any.
    pub fn into_section(self) -> Option<Source> {
        match self {
            Self::Value(_) => None,
            Self::Section(source) => Some(source),
        }
    }
}

impl<T> PartialEq<T> for Item
where
    Value: PartialEq<T>,
{
    fn eq(&self, other: &T) -> bool {
        matches!(self, Self::Value(value) if value == other)
    }
}

#[derive(Debug)]
struct SourceInner {
    backend: RefCell<Box<dyn Backend>>,
    meta: SourceMeta,
    cached: bool,
    locked: Cell<bool>,
    cache: RefCell<Option<Map>>,
    custom_types: HashMap<String, CustomType>,
}

/// Builder for [`Source`]s, configuring the orthogonal source modifiers.
#[derive(Debug)]
pub struct SourceBuilder {
    backend: Box<dyn Backend>,
    cached: Option<bool>,
    locked: bool,
    custom_types: HashMap<String, CustomType>,
}

impl SourceBuilder {
    /// Enables or disables read caching, overriding the backend default.
    #[must_use]
    pub fn cached(mut self, cached: bool) -> Self {
        self.cached = Some(cached);
        self
    }

    /// Sets the user write lock.
    #[must_use]
    pub fn locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }

    /// Registers a custom type transform for `key` at any nesting level.
    #[must_use]
    pub fn custom_type(mut self, key: impl Into<String>, custom: CustomType) -> Self {
        self.custom_types.insert(key.into(), custom);
        self
    }

    /// Finishes building the source.
    pub fn build(self) -> Source {
        let meta = SourceMeta {
            name: self.backend.source_name().to_owned(),
            read_only: !self.backend.writable(),
            typed: self.backend.typed(),
        };
        let cached = self.cached.unwrap_or_else(|| self.backend.cached_by_default());
        Source {
            inner: Rc::new(SourceInner {
                backend: RefCell::new(self.backend),
                meta,
                cached,
                locked: Cell::new(self.locked),
                cache: RefCell::new(None),
                custom_types: self.custom_types,
            }),
            path: Vec::new(),
        }
    }
}

/// One supplier of configuration data: a [`Backend`] plus the lock, cache and
/// custom-type modifiers.
///
/// `Source` is a cheap handle; clones share the same backing storage.
/// Indexing a map-valued key via [`get`](Self::get) yields a *sub-source*
/// whose reads and writes are resolved by a round trip through the root, so
/// the root storage remains the single source of truth. A sub-source stays
/// valid only while its key path still resolves to maps; afterwards accesses
/// fail with [`ConfigError::NotFound`].
#[derive(Debug, Clone)]
pub struct Source {
    inner: Rc<SourceInner>,
    path: Vec<String>,
}

impl Source {
    /// Wraps a backend with default modifiers.
    pub fn new(backend: impl Backend) -> Self {
        Self::builder(backend).build()
    }

    /// Starts building a source over the given backend.
    pub fn builder(backend: impl Backend) -> SourceBuilder {
        SourceBuilder {
            backend: Box::new(backend),
            cached: None,
            locked: false,
            custom_types: HashMap::new(),
        }
    }

    /// Diagnostic name of the source.
    pub fn source_name(&self) -> &str {
        &self.inner.meta.name
    }

    /// Static metadata of the source.
    pub fn meta(&self) -> SourceMeta {
        self.inner.meta.clone()
    }

    /// Whether the backend lacks a write operation.
    pub fn is_read_only(&self) -> bool {
        self.inner.meta.read_only
    }

    /// Whether scalars carry their original type.
    pub fn is_typed(&self) -> bool {
        self.inner.meta.typed
    }

    /// Whether the user write lock is set.
    pub fn is_locked(&self) -> bool {
        self.inner.locked.get()
    }

    /// Sets or clears the user write lock. Affects all handles to this
    /// source, including sub-sources.
    pub fn set_locked(&self, locked: bool) {
        self.inner.locked.set(locked);
    }

    /// Whether writes can currently succeed.
    pub fn is_writable(&self) -> bool {
        !self.is_read_only() && !self.is_locked()
    }

    fn check_writable(&self) -> Result<(), ConfigError> {
        if self.is_read_only() {
            Err(ConfigError::NotWritable(self.source_name().to_owned()))
        } else if self.is_locked() {
            Err(ConfigError::Locked(self.source_name().to_owned()))
        } else {
            Ok(())
        }
    }

    fn load_backend(&self) -> Result<Map, ConfigError> {
        self.inner
            .backend
            .borrow_mut()
            .load()
            .map_err(|err| ConfigError::backend(self.source_name(), err))
    }

    fn store_backend(&self, data: &Map) -> Result<(), ConfigError> {
        self.inner
            .backend
            .borrow_mut()
            .store(data)
            .map_err(|err| ConfigError::backend(self.source_name(), err))
    }

    fn load_root(&self) -> Result<Map, ConfigError> {
        if self.inner.cached {
            let mut cache = self.inner.cache.borrow_mut();
            if let Some(snapshot) = &*cache {
                return Ok(snapshot.clone());
            }
            tracing::debug!(source = self.source_name(), "populating source cache");
            let snapshot = self.load_backend()?;
            *cache = Some(snapshot.clone());
            Ok(snapshot)
        } else {
            self.load_backend()
        }
    }

    fn store_root(&self, data: Map) -> Result<(), ConfigError> {
        self.check_writable()?;
        if self.inner.cached {
            *self.inner.cache.borrow_mut() = Some(data);
            Ok(())
        } else {
            self.store_backend(&data)
        }
    }

    /// Loads the root tree and applies `action` to the subtree this handle is
    /// rooted at, storing the root tree back afterwards.
    fn with_subtree<R>(
        &self,
        action: impl FnOnce(&mut Map) -> Result<R, ConfigError>,
    ) -> Result<R, ConfigError> {
        let mut root = self.load_root()?;
        let mut subtree = &mut root;
        for key in &self.path {
            match subtree.get_mut(key) {
                Some(Value::Object(map)) => subtree = map,
                _ => return Err(ConfigError::not_found(key.as_str())),
            }
        }
        let result = action(subtree)?;
        self.store_root(root)?;
        Ok(result)
    }

    fn encoded(&self, key: &str, value: Value) -> Value {
        match self.inner.custom_types.get(key) {
            Some(custom) => custom.encode(value),
            None => value,
        }
    }

    fn decoded(&self, key: &str, value: Value) -> Value {
        match self.inner.custom_types.get(key) {
            Some(custom) => custom.decode(value),
            None => value,
        }
    }

    pub(crate) fn descend(&self, key: &str) -> Self {
        let mut path = self.path.clone();
        path.push(key.to_owned());
        Self {
            inner: self.inner.clone(),
            path,
        }
    }

    /// Produces the current tree under this (sub-)source. Lazy unless the
    /// source is cached: each call reflects the current backing storage.
    pub fn read(&self) -> Result<Map, ConfigError> {
        let mut map = self.load_root()?;
        for key in &self.path {
            match map.swap_remove(key) {
                Some(Value::Object(sub)) => map = sub,
                _ => return Err(ConfigError::not_found(key.as_str())),
            }
        }
        Ok(map)
    }

    /// Replaces the tree under this (sub-)source.
    pub fn write(&self, data: Map) -> Result<(), ConfigError> {
        self.check_writable()?;
        self.with_subtree(|subtree| {
            *subtree = data;
            Ok(())
        })
    }

    /// Looks up `key` at the current level. Map values materialize as
    /// sub-sources; scalars under a custom-typed key are encoded.
    pub fn get(&self, key: &str) -> Result<Item, ConfigError> {
        let current = self.read()?;
        match current.get(key) {
            None => Err(ConfigError::not_found(key)),
            Some(Value::Object(_)) => Ok(Item::Section(self.descend(key))),
            Some(value) => Ok(Item::Value(self.encoded(key, value.clone()))),
        }
    }

    /// Looks up `key`, substituting `default` if it is absent.
    pub fn get_or(&self, key: &str, default: impl Into<Value>) -> Result<Item, ConfigError> {
        match self.get(key) {
            Err(ConfigError::NotFound(_)) => Ok(Item::Value(default.into())),
            other => other,
        }
    }

    /// Sets `key` at the current level. Values under a custom-typed key are
    /// decoded back to their raw form before storage.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), ConfigError> {
        self.check_writable()?;
        let value = self.decoded(key, value.into());
        self.with_subtree(|subtree| {
            subtree.insert(key.to_owned(), value);
            Ok(())
        })
    }

    /// Returns the value of `key`, setting it to `value` first if absent.
    pub fn setdefault(&self, key: &str, value: impl Into<Value>) -> Result<Item, ConfigError> {
        match self.get(key) {
            Ok(item) => Ok(item),
            Err(ConfigError::NotFound(_)) => {
                let value = value.into();
                self.set(key, value.clone())?;
                Ok(Item::Value(value))
            }
            Err(err) => Err(err),
        }
    }

    /// Removes `key` from the current level.
    pub fn remove(&self, key: &str) -> Result<(), ConfigError> {
        self.check_writable()?;
        self.with_subtree(|subtree| {
            subtree
                .shift_remove(key)
                .map(drop)
                .ok_or_else(|| ConfigError::not_found(key))
        })
    }

    /// Checks whether `key` exists at the current level. A sub-source whose
    /// key path no longer resolves contains nothing.
    pub fn contains(&self, key: &str) -> Result<bool, ConfigError> {
        match self.read() {
            Ok(current) => Ok(current.contains_key(key)),
            Err(ConfigError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Keys at the current level, in insertion order.
    pub fn keys(&self) -> Result<Vec<String>, ConfigError> {
        Ok(self.read()?.into_keys().collect())
    }

    /// Number of keys at the current level.
    pub fn len(&self) -> Result<usize, ConfigError> {
        Ok(self.read()?.len())
    }

    /// Whether the current level holds no keys.
    pub fn is_empty(&self) -> Result<bool, ConfigError> {
        Ok(self.read()?.is_empty())
    }

    /// Key / value pairs at the current level, in insertion order.
    pub fn items(&self) -> Result<Vec<(String, Item)>, ConfigError> {
        let current = self.read()?;
        Ok(current
            .into_iter()
            .map(|(key, value)| {
                let item = if value.is_object() {
                    Item::Section(self.descend(&key))
                } else {
                    Item::Value(self.encoded(&key, value))
                };
                (key, item)
            })
            .collect())
    }

    /// Deep-merges the given maps over the current tree; later maps win.
    pub fn update(&self, others: impl IntoIterator<Item = Map>) -> Result<(), ConfigError> {
        self.check_writable()?;
        self.with_subtree(|subtree| {
            for other in others {
                deep_merge_into_map(subtree, other);
            }
            Ok(())
        })
    }

    /// Deep copy of the current tree, scalars in the source's native typing.
    pub fn dump(&self) -> Result<Map, ConfigError> {
        self.read()
    }

    /// Deep copy of the current tree with custom-typed keys encoded to their
    /// user-facing representation.
    pub fn dump_with_custom_types(&self) -> Result<Map, ConfigError> {
        Ok(self.encode_tree(self.read()?))
    }

    fn encode_tree(&self, map: Map) -> Map {
        map.into_iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::Object(sub) => Value::Object(self.encode_tree(sub)),
                    scalar => self.encoded(&key, scalar),
                };
                (key, value)
            })
            .collect()
    }

    /// Pushes the cache snapshot through the backend's uncached write path.
    /// A no-op if the source is not cached or nothing has been read yet.
    pub fn flush_cache(&self) -> Result<(), ConfigError> {
        let snapshot = self.inner.cache.borrow().clone();
        if let Some(snapshot) = snapshot {
            self.check_writable()?;
            tracing::debug!(source = self.source_name(), "flushing source cache");
            self.store_backend(&snapshot)?;
        }
        Ok(())
    }
}

impl PartialEq for Source {
    fn eq(&self, other: &Self) -> bool {
        match (self.read(), other.read()) {
            (Ok(this), Ok(that)) => this == that,
            _ => false,
        }
    }
}

impl PartialEq<Map> for Source {
    fn eq(&self, other: &Map) -> bool {
        self.read().is_ok_and(|map| map == *other)
    }
}
