//! Maps node `kind` strings to item factories.

use std::collections::HashMap;
use std::sync::Arc;

use crate::traits::{ItemExecutor, ItemSpec};
use crate::{file_set, file_sink, mock, process, ItemError};

/// Builds one item instance for one node of one run.
pub type ItemFactory =
    Arc<dyn Fn(&ItemSpec<'_>) -> Result<Arc<dyn ItemExecutor>, ItemError> + Send + Sync>;

/// Registry of the item kinds a runtime can execute.
#[derive(Clone, Default)]
pub struct ItemRegistry {
    factories: HashMap<String, ItemFactory>,
}

impl ItemRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the reference kinds: `process`, `file-set`,
    /// `file-sink` and `mock`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        process::register(&mut registry);
        file_set::register(&mut registry);
        file_sink::register(&mut registry);
        mock::register(&mut registry);
        registry
    }

    /// Register (or replace) the factory for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&ItemSpec<'_>) -> Result<Arc<dyn ItemExecutor>, ItemError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Build the item for one node.
    ///
    /// # Errors
    /// [`ItemError::Config`] for an unknown kind or a configuration the
    /// factory rejects.
    pub fn instantiate(
        &self,
        kind: &str,
        spec: &ItemSpec<'_>,
    ) -> Result<Arc<dyn ItemExecutor>, ItemError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| ItemError::Config(format!("unknown item kind '{kind}'")))?;
        factory(spec)
    }
}

impl std::fmt::Debug for ItemRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
