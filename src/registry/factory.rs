//! Typed constructor registry
//!
//! Each adapter type implements [`Factory`] with its own `Options` type. The
//! registry decodes the raw option payload into that type exactly once, at
//! construction time, so a typo in a field name fails startup instead of
//! silently defaulting.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::component::{Component, Duplex, Role, Sink, Source};
use crate::error::{ConfigError, Result};

/// Constructor for one adapter type
pub trait Factory: Send + Sync + 'static {
    /// Validated option type, decoded from the component's `options` payload
    type Options: DeserializeOwned;

    /// Component type produced by this factory
    type Output: Component + 'static;

    /// Build a component. Extra sinks may be staged on `ctx`; they are only
    /// registered if the whole construction succeeds.
    fn build(&self, id: &str, options: Self::Options, ctx: &mut BuildContext)
        -> Result<Self::Output>;
}

/// A constructed component ready to be inserted into the component table
pub struct Instance {
    pub(crate) role: Role,
    pub(crate) component: Arc<dyn Component>,
    pub(crate) source: Option<Arc<dyn Source>>,
    pub(crate) sink: Option<Arc<dyn Sink>>,
    pub(crate) extra_sinks: Vec<(String, Instance)>,
}

impl Instance {
    /// Wrap a source
    pub fn source<T: Source + 'static>(source: Arc<T>) -> Self {
        Self {
            role: Role::Source,
            component: source.clone(),
            source: Some(source),
            sink: None,
            extra_sinks: Vec::new(),
        }
    }

    /// Wrap a sink
    pub fn sink<T: Sink + 'static>(sink: Arc<T>) -> Self {
        Self {
            role: Role::Sink,
            component: sink.clone(),
            source: None,
            sink: Some(sink),
            extra_sinks: Vec::new(),
        }
    }

    /// Wrap a component that is both source and sink
    pub fn duplex<T: Duplex + 'static>(duplex: Arc<T>) -> Self {
        Self {
            role: Role::Duplex,
            component: duplex.clone(),
            source: Some(duplex.clone()),
            sink: Some(duplex),
            extra_sinks: Vec::new(),
        }
    }

    /// Role this instance registers under
    pub fn role(&self) -> Role {
        self.role
    }

    /// Ids of the additional sinks staged during construction
    pub fn extra_sink_ids(&self) -> impl Iterator<Item = &str> {
        self.extra_sinks.iter().map(|(id, _)| id.as_str())
    }
}

/// Staging area handed to [`Factory::build`]
#[derive(Default)]
pub struct BuildContext {
    extra_sinks: Vec<(String, Instance)>,
}

impl BuildContext {
    /// Stage an additional sink under its own id (e.g. `outbound:track`)
    pub fn add_sink<T: Sink + 'static>(&mut self, id: impl Into<String>, sink: Arc<T>) {
        self.extra_sinks.push((id.into(), Instance::sink(sink)));
    }
}

type Constructor = Box<dyn Fn(&str, Value) -> Result<Instance> + Send + Sync>;

/// Per-role map from type tag to constructor
#[derive(Default)]
pub struct Registry {
    constructors: HashMap<(Role, String), Constructor>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source constructor. Re-registering a tag replaces it.
    pub fn register_source<F>(&mut self, type_tag: &str, factory: F)
    where
        F: Factory,
        F::Output: Source,
    {
        self.insert(Role::Source, type_tag, factory, |c| Instance::source(Arc::new(c)));
    }

    /// Register a sink constructor. Re-registering a tag replaces it.
    pub fn register_sink<F>(&mut self, type_tag: &str, factory: F)
    where
        F: Factory,
        F::Output: Sink,
    {
        self.insert(Role::Sink, type_tag, factory, |c| Instance::sink(Arc::new(c)));
    }

    /// Register a duplex constructor. Re-registering a tag replaces it.
    pub fn register_duplex<F>(&mut self, type_tag: &str, factory: F)
    where
        F: Factory,
        F::Output: Duplex,
    {
        self.insert(Role::Duplex, type_tag, factory, |c| {
            Instance::duplex(Arc::new(c))
        });
    }

    fn insert<F, W>(&mut self, role: Role, type_tag: &str, factory: F, wrap: W)
    where
        F: Factory,
        W: Fn(F::Output) -> Instance + Send + Sync + 'static,
    {
        let tag = type_tag.to_string();
        let ctor_tag = tag.clone();

        let constructor: Constructor = Box::new(move |id: &str, raw: Value| {
            let options: F::Options =
                serde_json::from_value(raw).map_err(|e| ConfigError::InvalidOptions {
                    id: id.to_string(),
                    type_tag: ctor_tag.clone(),
                    reason: e.to_string(),
                })?;

            let mut ctx = BuildContext::default();
            let component = factory.build(id, options, &mut ctx)?;

            let mut instance = wrap(component);
            instance.extra_sinks = ctx.extra_sinks;
            Ok(instance)
        });

        if self.constructors.insert((role, tag), constructor).is_some() {
            tracing::debug!(role = %role, type_tag = type_tag, "Constructor replaced");
        }
    }

    /// Whether a constructor exists for `(role, type_tag)`
    pub fn contains(&self, role: Role, type_tag: &str) -> bool {
        self.constructors.contains_key(&(role, type_tag.to_string()))
    }

    /// Construct a component. Nothing is registered anywhere on failure.
    pub fn instantiate(
        &self,
        role: Role,
        type_tag: &str,
        id: &str,
        options: Value,
    ) -> Result<Instance> {
        let constructor = self
            .constructors
            .get(&(role, type_tag.to_string()))
            .ok_or_else(|| ConfigError::UnknownType {
                role,
                type_tag: type_tag.to_string(),
            })?;

        constructor(id, options)
    }
}
