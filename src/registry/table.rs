//! Component table
//!
//! Live component instances keyed by id. Sources and sinks are separate
//! namespaces; a duplex occupies the same id in both.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::component::{Component, Duplex, Role, Sink, Source};
use crate::error::{ConfigError, Result};

use super::factory::Instance;

/// Live component instances keyed by id
#[derive(Default)]
pub struct ComponentTable {
    sources: HashMap<String, Arc<dyn Source>>,
    sinks: HashMap<String, Arc<dyn Sink>>,

    /// Every distinct component once, in insertion order (init/shutdown order)
    components: Vec<(String, Arc<dyn Component>)>,
}

impl ComponentTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a constructed instance and any sinks it staged.
    ///
    /// All ids are checked before anything is inserted, so a conflict leaves
    /// the table unchanged.
    pub fn insert(&mut self, id: &str, instance: Instance) -> Result<()> {
        self.check_free(id, instance.role)?;
        let mut staged = HashSet::new();
        for (extra_id, extra) in &instance.extra_sinks {
            self.check_free(extra_id, extra.role)?;
            if extra_id == id || !staged.insert(extra_id.as_str()) {
                return Err(ConfigError::DuplicateId {
                    role: Role::Sink,
                    id: extra_id.clone(),
                }
                .into());
            }
        }

        let Instance {
            role,
            component,
            source,
            sink,
            extra_sinks,
        } = instance;

        if let Some(source) = source {
            self.sources.insert(id.to_string(), source);
        }
        if let Some(sink) = sink {
            self.sinks.insert(id.to_string(), sink);
        }
        self.components.push((id.to_string(), component));

        tracing::debug!(id = id, role = %role, "Component added");

        for (extra_id, extra) in extra_sinks {
            if let Some(sink) = extra.sink {
                self.sinks.insert(extra_id.clone(), sink);
            }
            self.components.push((extra_id.clone(), extra.component));
            tracing::debug!(id = %extra_id, parent = id, "Derived sink added");
        }

        Ok(())
    }

    fn check_free(&self, id: &str, role: Role) -> Result<()> {
        if role.is_source() && self.sources.contains_key(id) {
            return Err(ConfigError::DuplicateId {
                role: Role::Source,
                id: id.to_string(),
            }
            .into());
        }
        if role.is_sink() && self.sinks.contains_key(id) {
            return Err(ConfigError::DuplicateId {
                role: Role::Sink,
                id: id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Add a ready-made source
    pub fn add_source<T: Source + 'static>(&mut self, id: &str, source: Arc<T>) -> Result<()> {
        self.insert(id, Instance::source(source))
    }

    /// Add a ready-made sink
    pub fn add_sink<T: Sink + 'static>(&mut self, id: &str, sink: Arc<T>) -> Result<()> {
        self.insert(id, Instance::sink(sink))
    }

    /// Add a ready-made duplex under one id in both namespaces
    pub fn add_duplex<T: Duplex + 'static>(&mut self, id: &str, duplex: Arc<T>) -> Result<()> {
        self.insert(id, Instance::duplex(duplex))
    }

    /// Look up a source by id
    pub fn source(&self, id: &str) -> Option<Arc<dyn Source>> {
        self.sources.get(id).cloned()
    }

    /// Look up a sink by id
    pub fn sink(&self, id: &str) -> Option<Arc<dyn Sink>> {
        self.sinks.get(id).cloned()
    }

    /// Whether `id` is registered as a source
    pub fn contains_source(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    /// Whether `id` is registered as a sink
    pub fn contains_sink(&self, id: &str) -> bool {
        self.sinks.contains_key(id)
    }

    /// Number of distinct components
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the table holds no components
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Distinct components in insertion order
    pub fn components(&self) -> impl DoubleEndedIterator<Item = (&str, &Arc<dyn Component>)> {
        self.components.iter().map(|(id, c)| (id.as_str(), c))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::{Bytes, BytesMut};

    use super::*;
    use crate::error::Error;
    use crate::registry::{BuildContext, Factory, Registry};

    struct Echo;

    #[async_trait]
    impl Component for Echo {
        async fn init(&self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Source for Echo {
        async fn read(&self, _buf: &mut BytesMut) -> Result<usize> {
            Ok(0)
        }
    }

    #[async_trait]
    impl Sink for Echo {
        async fn write(&self, chunk: Bytes) -> Result<usize> {
            Ok(chunk.len())
        }
    }

    struct TracksFactory;

    impl Factory for TracksFactory {
        type Options = Vec<String>;
        type Output = Echo;

        fn build(&self, id: &str, tracks: Vec<String>, ctx: &mut BuildContext) -> Result<Echo> {
            for track in tracks {
                ctx.add_sink(format!("{}:{}", id, track), Arc::new(Echo));
            }
            Ok(Echo)
        }
    }

    #[test]
    fn test_duplex_occupies_both_namespaces() {
        let mut table = ComponentTable::new();
        table.add_duplex("proc", Arc::new(Echo)).unwrap();

        assert!(table.contains_source("proc"));
        assert!(table.contains_sink("proc"));
        assert_eq!(table.len(), 1);

        // Either namespace conflicts
        assert!(table.add_source("proc", Arc::new(Echo)).is_err());
        assert!(table.add_sink("proc", Arc::new(Echo)).is_err());
    }

    #[test]
    fn test_same_id_in_different_namespaces() {
        let mut table = ComponentTable::new();
        table.add_source("a", Arc::new(Echo)).unwrap();
        table.add_sink("a", Arc::new(Echo)).unwrap();
        assert_eq!(table.len(), 2);

        // A duplex needs both namespaces free
        let err = table.add_duplex("a", Arc::new(Echo)).unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::DuplicateId { role: Role::Source, .. })
        ));
    }

    #[test]
    fn test_unknown_type_leaves_table_unchanged() {
        let registry = Registry::new();
        let mut table = ComponentTable::new();

        let result = registry.instantiate(Role::Source, "srt", "in", serde_json::json!({}));
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::UnknownType { .. }))
        ));
        assert!(table.is_empty());
        assert!(!table.contains_source("in"));

        table.add_source("in", Arc::new(Echo)).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_derived_sinks_registered_with_parent() {
        let mut registry = Registry::new();
        registry.register_sink("tracks", TracksFactory);

        let mut table = ComponentTable::new();
        let instance = registry
            .instantiate(Role::Sink, "tracks", "web", serde_json::json!(["video", "audio"]))
            .unwrap();
        table.insert("web", instance).unwrap();

        assert!(table.contains_sink("web"));
        assert!(table.contains_sink("web:video"));
        assert!(table.contains_sink("web:audio"));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_conflicting_derived_sink_inserts_nothing() {
        let mut registry = Registry::new();
        registry.register_sink("tracks", TracksFactory);

        let mut table = ComponentTable::new();
        table.add_sink("web:video", Arc::new(Echo)).unwrap();

        let instance = registry
            .instantiate(Role::Sink, "tracks", "web", serde_json::json!(["audio", "video"]))
            .unwrap();
        assert!(table.insert("web", instance).is_err());

        assert!(!table.contains_sink("web"));
        assert!(!table.contains_sink("web:audio"));
        assert_eq!(table.len(), 1);
    }
}
