//! In-memory backend, the reference backend for tests.

use crate::value::Map;

use super::Backend;

/// Backend holding its tree directly in memory.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    data: Map,
}

impl Memory {
    /// Creates a backend seeded with `data`.
    pub fn new(data: Map) -> Self {
        Self { data }
    }
}

impl Backend for Memory {
    fn source_name(&self) -> &str {
        "memory"
    }

    fn load(&mut self) -> anyhow::Result<Map> {
        // Deep copy so that later mutations of the backend cannot contaminate
        // snapshots handed out earlier.
        Ok(self.data.clone())
    }

    fn store(&mut self, data: &Map) -> anyhow::Result<()> {
        self.data = data.clone();
        Ok(())
    }

    fn writable(&self) -> bool {
        true
    }
}
