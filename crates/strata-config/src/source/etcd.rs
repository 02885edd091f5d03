//! Etcd-style key-value store backend and its wire connector.

use std::fmt;

use anyhow::Context as _;
use serde::Deserialize;

use crate::{
    error::ConfigError,
    value::{Map, Value},
};

use super::Backend;

const DEFAULT_URL: &str = "http://127.0.0.1:2379/v2";

/// Node of the remote key space: either a directory with child nodes or a
/// leaf carrying a string value.
#[derive(Debug, Clone, Deserialize)]
pub struct Node {
    /// Absolute key of the node.
    pub key: String,
    /// Whether the node is a directory.
    #[serde(default)]
    pub dir: bool,
    /// Leaf value; absent on directories.
    #[serde(default)]
    pub value: Option<String>,
    /// Child nodes; empty on leaves.
    #[serde(default)]
    pub nodes: Vec<Node>,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(default)]
    node: Option<ResponseNode>,
}

#[derive(Debug, Deserialize)]
struct ResponseNode {
    #[serde(default)]
    nodes: Vec<Node>,
}

/// Transport used by [`EtcdStore`]. An alternate wire can be substituted by
/// providing another implementation to [`EtcdStore::with_connector()`].
pub trait Connector: fmt::Debug + 'static {
    /// Fetches the subtree rooted at `path`. Fetching single values is
    /// unsupported by the store, so `recursive` is `true` in practice.
    fn get(&mut self, path: &str, recursive: bool) -> anyhow::Result<Vec<Node>>;

    /// Writes `(absolute_path, value)` pairs one by one.
    fn set(&mut self, items: &[(String, String)]) -> anyhow::Result<()>;

    /// Deletes all keys under the root. Used only by tests.
    fn flush(&mut self) -> anyhow::Result<()>;
}

/// HTTP connector speaking the etcd v2 key-value protocol under
/// `<base>/keys/<path>`.
#[derive(Debug)]
pub struct EtcdConnector {
    agent: ureq::Agent,
    base: String,
}

impl EtcdConnector {
    /// Creates a connector for the given base URL, e.g.
    /// `http://127.0.0.1:2379/v2`.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigError::MissingDependency`] if no transport is
    /// available for the URL scheme.
    pub fn new(url: impl Into<String>) -> Result<Self, ConfigError> {
        let url = url.into();
        let scheme = url.split_once("://").map(|(scheme, _)| scheme);
        if !matches!(scheme, Some("http" | "https")) {
            let scheme = scheme.unwrap_or("<none>");
            return Err(ConfigError::MissingDependency(format!(
                "'{scheme}' URLs; the connector only speaks http(s)"
            )));
        }
        Ok(Self {
            agent: ureq::AgentBuilder::new().build(),
            base: format!("{url}/keys"),
        })
    }

    /// Joins URL parts with `/`, collapsing duplicate separators in the path
    /// while leaving the scheme and authority untouched.
    fn make_url(&self, path: &str) -> String {
        let full = format!("{}/{path}", self.base);
        let (scheme, rest) = match full.split_once("://") {
            Some((scheme, rest)) => (Some(scheme), rest),
            None => (None, full.as_str()),
        };
        let normalized = Self::normalize_path(rest);
        match scheme {
            Some(scheme) => format!("{scheme}://{normalized}"),
            None => normalized,
        }
    }

    /// Collapses consecutive separators, preserving the first and last
    /// segments (so leading and trailing slashes survive).
    fn normalize_path(path: &str) -> String {
        let parts: Vec<_> = path.split('/').collect();
        let [first, middle @ .., last] = parts.as_slice() else {
            return path.to_owned();
        };
        let mut segments = vec![*first];
        segments.extend(middle.iter().copied().filter(|part| !part.is_empty()));
        segments.push(last);
        segments.join("/")
    }

    fn request_nodes(&self, path: &str, recursive: bool) -> anyhow::Result<Vec<Node>> {
        let url = self.make_url(path);
        tracing::trace!(url, recursive, "fetching etcd nodes");
        let response = self
            .agent
            .get(&url)
            .query("recursive", if recursive { "true" } else { "false" })
            .call();
        let response = match response {
            Ok(response) => response,
            // An empty key space reports 404 rather than an empty payload.
            Err(ureq::Error::Status(404, _)) => return Ok(vec![]),
            Err(err) => return Err(err).with_context(|| format!("GET {url}")),
        };
        let payload: GetResponse = response
            .into_json()
            .with_context(|| format!("malformed response for GET {url}"))?;
        Ok(payload.node.map(|node| node.nodes).unwrap_or_default())
    }
}

impl Connector for EtcdConnector {
    fn get(&mut self, path: &str, recursive: bool) -> anyhow::Result<Vec<Node>> {
        self.request_nodes(path, recursive)
    }

    fn set(&mut self, items: &[(String, String)]) -> anyhow::Result<()> {
        for (key, value) in items {
            let url = self.make_url(key);
            tracing::trace!(url, "writing etcd key");
            self.agent
                .put(&url)
                .send_form(&[("value", value.as_str())])
                .with_context(|| format!("PUT {url}"))?;
        }
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        for node in self.request_nodes("/", false)? {
            let url = self.make_url(&node.key);
            tracing::debug!(url, "deleting etcd key");
            let mut request = self.agent.delete(&url).query("recursive", "true");
            if node.dir {
                request = request.query("dir", "true");
            }
            match request.call() {
                Ok(_) | Err(ureq::Error::Status(404, _)) => {}
                Err(err) => return Err(err).with_context(|| format!("DELETE {url}")),
            }
        }
        Ok(())
    }
}

/// Untyped backend over an etcd-like store. Cached by default: the first read
/// fetches the whole key space, mutations update the snapshot, and
/// `flush_cache` pushes it back over the wire.
#[derive(Debug)]
pub struct EtcdStore {
    connector: Box<dyn Connector>,
}

impl EtcdStore {
    /// Creates a store over an HTTP connector for `url`; `None` selects the
    /// conventional local etcd endpoint.
    pub fn new(url: Option<&str>) -> Result<Self, ConfigError> {
        let connector = EtcdConnector::new(url.unwrap_or(DEFAULT_URL))?;
        Ok(Self::with_connector(connector))
    }

    /// Creates a store over a custom connector.
    pub fn with_connector(connector: impl Connector) -> Self {
        Self {
            connector: Box::new(connector),
        }
    }

    /// Converts a node tree into the canonical map form, stripping the
    /// directory key prefix from child keys.
    fn translate_payload(nodes: Vec<Node>, root: &str) -> Map {
        let mut result = Map::new();
        for node in nodes {
            let key = node
                .key
                .strip_prefix(root)
                .unwrap_or(&node.key)
                .trim_start_matches('/')
                .to_owned();
            if node.dir {
                let subtree = Self::translate_payload(node.nodes, &node.key);
                result.insert(key, Value::Object(subtree));
            } else {
                result.insert(key, Value::String(node.value.unwrap_or_default()));
            }
        }
        result
    }

    /// Flattens a tree into `(absolute_path, stringified_value)` pairs by
    /// depth-first traversal; maps become path prefixes.
    fn translate_tree(data: &Map, root: &str, items: &mut Vec<(String, String)>) {
        for (key, value) in data {
            let path = format!("{root}/{key}");
            match value {
                Value::Object(subtree) => Self::translate_tree(subtree, &path, items),
                scalar => items.push((path.clone(), scalar.to_string())),
            }
        }
    }
}

impl Backend for EtcdStore {
    fn source_name(&self) -> &str {
        "etcd"
    }

    fn load(&mut self) -> anyhow::Result<Map> {
        // Getting a single value is unsupported, so always fetch the full
        // key space from the root.
        let nodes = self.connector.get("/", true)?;
        Ok(Self::translate_payload(nodes, "/"))
    }

    fn store(&mut self, data: &Map) -> anyhow::Result<()> {
        let mut items = vec![];
        Self::translate_tree(data, "", &mut items);
        self.connector.set(&items)
    }

    fn writable(&self) -> bool {
        true
    }

    fn typed(&self) -> bool {
        false
    }

    fn cached_by_default(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use assert_matches::assert_matches;

    use super::*;
    use crate::source::Source;

    fn sample_nodes() -> Vec<Node> {
        let payload = serde_json::json!([
            { "key": "/a", "value": "1" },
            {
                "key": "/b",
                "dir": true,
                "nodes": [
                    { "key": "/b/c", "value": "2" },
                    {
                        "key": "/b/d",
                        "dir": true,
                        "nodes": [{ "key": "/b/d/e", "value": "3" }],
                    },
                ],
            },
        ]);
        serde_json::from_value(payload).unwrap()
    }

    /// In-memory stand-in for the HTTP connector.
    #[derive(Debug, Default)]
    struct FakeConnector {
        nodes: Vec<Node>,
        stats: Rc<ConnectorStats>,
    }

    #[derive(Debug, Default)]
    struct ConnectorStats {
        gets: RefCell<usize>,
        sets: RefCell<Vec<(String, String)>>,
    }

    impl Connector for FakeConnector {
        fn get(&mut self, path: &str, recursive: bool) -> anyhow::Result<Vec<Node>> {
            assert_eq!(path, "/");
            assert!(recursive);
            *self.stats.gets.borrow_mut() += 1;
            Ok(self.nodes.clone())
        }

        fn set(&mut self, items: &[(String, String)]) -> anyhow::Result<()> {
            self.stats.sets.borrow_mut().extend_from_slice(items);
            Ok(())
        }

        fn flush(&mut self) -> anyhow::Result<()> {
            self.nodes.clear();
            Ok(())
        }
    }

    fn fake_source() -> (Source, Rc<ConnectorStats>) {
        let connector = FakeConnector {
            nodes: sample_nodes(),
            stats: Rc::default(),
        };
        let stats = connector.stats.clone();
        (Source::new(EtcdStore::with_connector(connector)), stats)
    }

    #[test]
    fn translating_payload() {
        let map = EtcdStore::translate_payload(sample_nodes(), "/");

        assert_eq!(map["a"], "1");
        let nested = map["b"].as_object().unwrap();
        assert_eq!(nested["c"], "2");
        assert_eq!(nested["d"].as_object().unwrap()["e"], "3");
    }

    #[test]
    fn reading_through_cache() {
        let (source, stats) = fake_source();

        // All values come back as strings.
        assert_eq!(source.get("a").unwrap(), "1");
        let section = source.get("b").unwrap().into_section().unwrap();
        assert_eq!(section.get("c").unwrap(), "2");
        assert_eq!(section.get("d").unwrap().into_section().unwrap().get("e").unwrap(), "3");

        // A single recursive fetch served all reads.
        assert_eq!(*stats.gets.borrow(), 1);
    }

    #[test]
    fn uncached_store_fetches_every_time() {
        let connector = FakeConnector {
            nodes: sample_nodes(),
            stats: Rc::default(),
        };
        let stats = connector.stats.clone();
        let source = Source::builder(EtcdStore::with_connector(connector))
            .cached(false)
            .build();

        assert_eq!(source.get("a").unwrap(), "1");
        assert_eq!(source.get("a").unwrap(), "1");
        assert_eq!(*stats.gets.borrow(), 2);
    }

    #[test]
    fn writes_flush_as_absolute_paths() {
        let (source, stats) = fake_source();

        source.set("a", "10").unwrap();
        let section = source.get("b").unwrap().into_section().unwrap();
        section.set("c", "20").unwrap();
        let nested = section.get("d").unwrap().into_section().unwrap();
        nested.set("e", "30").unwrap();

        // Mutations stay in the cache until it is flushed explicitly.
        assert!(stats.sets.borrow().is_empty());
        source.flush_cache().unwrap();

        let sets = stats.sets.borrow();
        assert_eq!(
            *sets,
            [
                ("/a".to_owned(), "10".to_owned()),
                ("/b/c".to_owned(), "20".to_owned()),
                ("/b/d/e".to_owned(), "30".to_owned()),
            ]
        );
    }

    #[test]
    fn unsupported_scheme_fails_fast() {
        let err = EtcdConnector::new("ftp://127.0.0.1:2379/v2").unwrap_err();
        assert_matches!(err, ConfigError::MissingDependency(message) if message.contains("ftp"));
    }

    #[test]
    fn composing_urls() {
        let connector = EtcdConnector::new("http://127.0.0.1:2379/v2").unwrap();
        assert_eq!(
            connector.make_url("/a/b"),
            "http://127.0.0.1:2379/v2/keys/a/b"
        );
        assert_eq!(
            connector.make_url("//a//b/"),
            "http://127.0.0.1:2379/v2/keys/a/b/"
        );
        assert_eq!(connector.make_url("/"), "http://127.0.0.1:2379/v2/keys/");
    }
}
