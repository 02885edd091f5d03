//! Error type shared by sources and the merge engine.

/// Errors produced by configuration sources and [`LayeredConfig`](crate::LayeredConfig) views.
///
/// The variants are deliberately coarse so that callers can branch on the
/// failure kind without inspecting messages.
///
/// `Display`/`Error` are implemented by hand rather than via `#[derive(Error)]`:
/// the `Conflict`/`Backend` variants have a plain `String` field named
/// `source` (the name of a configuration source, not a causal error), which
/// collides with `thiserror`'s convention of treating any field literally
/// named `source` as the `Error::source()` cause.
#[derive(Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// The key is absent from the addressed level of every consulted source.
    /// Also raised when a sub-source is accessed after its key was removed or
    /// replaced by a plain value in the parent.
    NotFound(String),

    /// The addressed source does not support writing at all.
    NotWritable(String),

    /// The addressed source supports writing but was locked by the user.
    Locked(String),

    /// A write on a layered view found no source to place the value in.
    NoWritableSource,

    /// During bulk enumeration, a key resolves to a plain value in one source
    /// and to a subsection in another, and no strategy covers it.
    Conflict {
        /// The conflicting key.
        key: String,
        /// Name of the lower-prioritized source that lost the conflict.
        source: String,
    },

    /// Input data cannot be mapped onto the tree model, e.g. an INI section
    /// whose name collides with an already-inserted plain value.
    Structure(String),

    /// The backing store failed (file I/O, parser, network). The source name
    /// is attached for diagnostics; the cause is preserved unchanged.
    Backend {
        /// Name of the failing source.
        source: String,
        /// Underlying failure.
        inner: anyhow::Error,
    },

    /// A transport required by a backend is not available for the requested
    /// configuration, detected when the backend is constructed.
    MissingDependency(String),

    /// A user-supplied merge strategy failed; the lookup that invoked it is
    /// aborted.
    Strategy {
        /// The key the strategy is registered for.
        key: String,
        /// Error returned by the strategy.
        inner: anyhow::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(key) => write!(f, "key '{key}' was not found"),
            Self::NotWritable(source) => write!(f, "'{source}' is a read-only source"),
            Self::Locked(source) => write!(f, "'{source}' is locked and cannot be changed"),
            Self::NoWritableSource => write!(f, "no writable sources found"),
            Self::Conflict { key, source } => write!(
                f,
                "the key '{key}' from '{source}' conflicts with a higher prioritized source \
                 that assigns the same key a different shape (subsection vs. plain value)"
            ),
            Self::Structure(message) => write!(f, "{message}"),
            Self::Backend { source, .. } => write!(f, "source '{source}' failed"),
            Self::MissingDependency(dependency) => write!(f, "missing transport for {dependency}"),
            Self::Strategy { key, .. } => write!(f, "strategy for key '{key}' failed"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backend { inner, .. } | Self::Strategy { inner, .. } => {
                Some(inner.as_ref())
            }
            _ => None,
        }
    }
}

impl ConfigError {
    pub(crate) fn backend(source: impl Into<String>, inner: anyhow::Error) -> Self {
        Self::Backend {
            source: source.into(),
            inner,
        }
    }

    pub(crate) fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }
}
