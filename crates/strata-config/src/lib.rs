//! Layered configuration over independent backends.
//!
//! A [`LayeredConfig`] composes a single logical configuration view out of
//! several prioritized [`Source`]s (in-memory maps, JSON / YAML files, INI
//! streams, environment variables, an etcd-like remote store) and navigates
//! the merged tree by chained key lookups. Later sources override earlier
//! ones per key, subsections union across sources, untyped sources borrow
//! typing from typed ones, and per-key [strategies](strategy) replace the
//! default "first wins" merge.

pub use self::{
    config::{Entry, LayeredConfig},
    error::ConfigError,
    source::{
        Backend, Connector, CustomType, EtcdConnector, EtcdStore, Environment, Ini, Item, Json,
        Memory, Source, SourceBuilder, SourceMeta, Yaml,
    },
    strategy::StrategyMap,
    value::{Map, Value},
};

mod config;
mod error;
mod source;
pub mod strategy;
pub mod value;
