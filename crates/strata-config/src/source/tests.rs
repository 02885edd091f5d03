//! Tests for the source contract shared by all backends.

use std::{cell::RefCell, rc::Rc};

use assert_matches::assert_matches;

use super::*;
use crate::value::map_from_json;

fn memory_source(json: serde_json::Value) -> Source {
    Source::new(Memory::new(map_from_json(json).unwrap()))
}

/// Backend wrapper counting how often the inner backend is actually hit.
#[derive(Debug)]
struct Counting<B> {
    inner: B,
    loads: Rc<RefCell<usize>>,
    stores: Rc<RefCell<usize>>,
}

impl<B> Counting<B> {
    fn new(inner: B) -> Self {
        Self {
            inner,
            loads: Rc::default(),
            stores: Rc::default(),
        }
    }
}

impl<B: Backend> Backend for Counting<B> {
    fn source_name(&self) -> &str {
        self.inner.source_name()
    }

    fn load(&mut self) -> anyhow::Result<Map> {
        *self.loads.borrow_mut() += 1;
        self.inner.load()
    }

    fn store(&mut self, data: &Map) -> anyhow::Result<()> {
        *self.stores.borrow_mut() += 1;
        self.inner.store(data)
    }

    fn writable(&self) -> bool {
        self.inner.writable()
    }

    fn typed(&self) -> bool {
        self.inner.typed()
    }
}

#[test]
fn reading_a_source() {
    let source = memory_source(serde_json::json!({
        "a": 1,
        "b": { "c": 2, "d": { "e": 3 } },
    }));

    assert_eq!(source.get("a").unwrap(), 1_u64);
    let section = source.get("b").unwrap().into_section().unwrap();
    assert_eq!(section.get("c").unwrap(), 2_u64);
    let nested = section.get("d").unwrap().into_section().unwrap();
    assert_eq!(nested.get("e").unwrap(), 3_u64);

    let expected = map_from_json(serde_json::json!({ "e": 3 })).unwrap();
    assert_eq!(nested, expected);
}

#[test]
fn dump_round_trips() {
    let json = serde_json::json!({ "a": 1, "b": { "c": 2 } });
    let source = memory_source(json.clone());
    assert_eq!(source.dump().unwrap(), map_from_json(json).unwrap());
}

#[test]
fn get_with_default() {
    let source = memory_source(serde_json::json!({ "a": 1 }));

    assert_eq!(source.get_or("a", Value::Null).unwrap(), 1_u64);
    assert_eq!(source.get_or("nonexisting", Value::Null).unwrap(), Value::Null);
    assert_eq!(source.get_or("nonexisting", "default").unwrap(), "default");
}

#[test]
fn setting_a_default() {
    let source = memory_source(serde_json::json!({ "a": 1 }));

    assert_eq!(source.setdefault("a", 10_u64).unwrap(), 1_u64);
    assert_eq!(source.setdefault("nonexisting", 10_u64).unwrap(), 10_u64);
    assert_eq!(source.get("nonexisting").unwrap(), 10_u64);
}

#[test]
fn updating_a_subsection() {
    let source = memory_source(serde_json::json!({ "a": { "b": 1 } }));
    let section = source.get("a").unwrap().into_section().unwrap();

    let update1 = map_from_json(serde_json::json!({ "x": 4 })).unwrap();
    let update2 = map_from_json(serde_json::json!({ "y": 5 })).unwrap();
    section.update([update1, update2]).unwrap();

    let expected = map_from_json(serde_json::json!({ "a": { "b": 1, "x": 4, "y": 5 } })).unwrap();
    assert_eq!(source, expected);
}

#[test]
fn updating_deep_merges() {
    let source = memory_source(serde_json::json!({ "a": { "b": 1 }, "c": 2 }));

    let update = map_from_json(serde_json::json!({ "a": { "x": 4 }, "c": 20 })).unwrap();
    source.update([update]).unwrap();

    let expected = map_from_json(serde_json::json!({ "a": { "b": 1, "x": 4 }, "c": 20 })).unwrap();
    assert_eq!(source, expected);
}

#[test]
fn iterating_items() {
    let source = memory_source(serde_json::json!({ "a": { "b": 1 } }));
    let section = source.get("a").unwrap().into_section().unwrap();

    let items = section.items().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].0, "b");
    assert_eq!(items[0].1, 1_u64);
}

#[test]
fn items_preserve_insertion_order() {
    let source = memory_source(serde_json::json!({ "z": 1, "a": 2, "m": 3 }));
    let keys = source.keys().unwrap();
    assert_eq!(keys, ["z", "a", "m"]);
}

#[test]
fn writes_travel_through_the_parent() {
    let source = memory_source(serde_json::json!({ "a": 1, "b": { "c": 2 } }));
    let section = source.get("b").unwrap().into_section().unwrap();

    section.set("c", 20_u64).unwrap();
    section.set("m", "n").unwrap();

    // The parent sees the mutation: its storage is the single source of truth.
    let expected = map_from_json(serde_json::json!({
        "a": 1,
        "b": { "c": 20, "m": "n" },
    }))
    .unwrap();
    assert_eq!(source, expected);
}

#[test]
fn removing_keys() {
    let source = memory_source(serde_json::json!({ "a": 1, "b": { "c": 2 } }));

    source.remove("a").unwrap();
    assert!(!source.contains("a").unwrap());
    assert_matches!(source.remove("a").unwrap_err(), ConfigError::NotFound(_));

    let section = source.get("b").unwrap().into_section().unwrap();
    section.remove("c").unwrap();
    assert!(section.is_empty().unwrap());
}

#[test]
fn sub_source_invalidation() {
    let source = memory_source(serde_json::json!({ "b": { "c": 2 } }));
    let section = source.get("b").unwrap().into_section().unwrap();

    // Replacing the subsection with a plain value invalidates the sub-source.
    source.set("b", 1_u64).unwrap();
    assert_matches!(section.get("c").unwrap_err(), ConfigError::NotFound(_));
    assert_matches!(section.read().unwrap_err(), ConfigError::NotFound(_));
    assert!(!section.contains("c").unwrap());

    source.remove("b").unwrap();
    assert_matches!(section.read().unwrap_err(), ConfigError::NotFound(_));
}

#[test]
fn locking_a_source() {
    let source = memory_source(serde_json::json!({ "a": 1 }));
    source.set_locked(true);

    assert!(!source.is_writable());
    assert!(!source.is_read_only());
    assert_matches!(
        source.set("a", 2_u64).unwrap_err(),
        ConfigError::Locked(name) if name == "memory"
    );

    // Locks are user-settable per instance; unlocking restores writes.
    source.set_locked(false);
    source.set("a", 2_u64).unwrap();
    assert_eq!(source.get("a").unwrap(), 2_u64);
}

#[test]
fn locking_applies_to_sub_sources() {
    let source = memory_source(serde_json::json!({ "b": { "c": 2 } }));
    let section = source.get("b").unwrap().into_section().unwrap();
    source.set_locked(true);

    assert_matches!(section.set("c", 3_u64).unwrap_err(), ConfigError::Locked(_));
}

#[test]
fn locked_at_construction() {
    let data = map_from_json(serde_json::json!({ "a": 1 })).unwrap();
    let source = Source::builder(Memory::new(data)).locked(true).build();

    assert_matches!(source.set("a", 2_u64).unwrap_err(), ConfigError::Locked(_));
    assert_eq!(source.get("a").unwrap(), 1_u64);
}

#[test]
fn read_only_wins_over_locked() {
    let source = Source::builder(Ini::from_reader("[b]\nc=2\n".as_bytes()).unwrap())
        .locked(true)
        .build();
    // Intrinsic read-onlyness is reported, not the user lock.
    assert_matches!(
        source.set("a", 1_u64).unwrap_err(),
        ConfigError::NotWritable(name) if name == "ini"
    );
}

#[test]
fn cached_source_reads_once() {
    let backend = Counting::new(Memory::new(
        map_from_json(serde_json::json!({ "a": 1 })).unwrap(),
    ));
    let loads = backend.loads.clone();
    let stores = backend.stores.clone();
    let source = Source::builder(backend).cached(true).build();

    assert_eq!(source.get("a").unwrap(), 1_u64);
    assert_eq!(source.get("a").unwrap(), 1_u64);
    assert_eq!(*loads.borrow(), 1);

    // Writes mutate the snapshot without touching the backend.
    source.set("a", 2_u64).unwrap();
    assert_eq!(source.get("a").unwrap(), 2_u64);
    assert_eq!(*stores.borrow(), 0);

    source.flush_cache().unwrap();
    assert_eq!(*stores.borrow(), 1);
}

#[test]
fn uncached_source_reads_lazily() {
    let backend = Counting::new(Memory::new(
        map_from_json(serde_json::json!({ "a": 1 })).unwrap(),
    ));
    let loads = backend.loads.clone();
    let source = Source::new(backend);

    assert_eq!(source.get("a").unwrap(), 1_u64);
    assert_eq!(source.get("a").unwrap(), 1_u64);
    assert_eq!(*loads.borrow(), 2);
}

#[test]
fn flushing_without_reads_is_a_no_op() {
    let backend = Counting::new(Memory::new(Map::new()));
    let stores = backend.stores.clone();
    let source = Source::builder(backend).cached(true).build();

    source.flush_cache().unwrap();
    assert_eq!(*stores.borrow(), 0);
}

#[test]
fn custom_types_encode_and_decode() {
    let data = map_from_json(serde_json::json!({ "a": 1, "b": { "c": 2 } })).unwrap();
    let double = CustomType::new(
        |raw| match raw {
            Value::Number(num) => Value::from(num.as_i64().unwrap() * 2),
            other => other,
        },
        |user| match user {
            Value::Number(num) => Value::from(num.as_i64().unwrap() / 2),
            other => other,
        },
    );
    let stringify = CustomType::new(
        |raw| Value::String(raw.to_string()),
        |user| match user {
            Value::String(s) => s.parse::<i64>().map(Value::from).unwrap_or(Value::String(s)),
            other => other,
        },
    );
    let source = Source::builder(Memory::new(data.clone()))
        .custom_type("a", stringify)
        .custom_type("c", double)
        .build();

    // Encoding applies at any nesting level.
    assert_eq!(source.get("a").unwrap(), "1");
    let section = source.get("b").unwrap().into_section().unwrap();
    assert_eq!(section.get("c").unwrap(), 4_u64);

    // The raw dump is unaffected; the flagged dump shows the encoded view.
    assert_eq!(source.dump().unwrap(), data);
    let encoded = map_from_json(serde_json::json!({ "a": "1", "b": { "c": 4 } })).unwrap();
    assert_eq!(source.dump_with_custom_types().unwrap(), encoded);

    // Writes decode back to the raw representation.
    source.set("a", "10").unwrap();
    assert_eq!(source.read().unwrap()["a"], 10_i64);
    assert_eq!(source.get("a").unwrap(), "10");
}

#[test]
fn sources_compare_by_content() {
    let left = memory_source(serde_json::json!({ "a": 1, "b": { "c": 2 } }));
    let right = memory_source(serde_json::json!({ "a": 1, "b": { "c": 2 } }));
    let other = memory_source(serde_json::json!({ "a": 2 }));

    assert_eq!(left, right);
    assert_ne!(left, other);
}

#[test]
fn source_metadata() {
    let source = memory_source(serde_json::json!({}));
    let meta = source.meta();
    assert_eq!(meta.name, "memory");
    assert!(!meta.read_only);
    assert!(meta.typed);
}
