//! Component type registry.
//!
//! Types are registered by name at process start; expansion asks the
//! registry for a fresh provisioner per instance.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use cairn_common::constants::DECLARATIVE_TYPE;
use cairn_common::error::{CairnError, Result};

use crate::builtin::{Declarative, Static};
use crate::component::Component;

/// Produces provisioners for one component type.
pub trait ComponentFactory: Send + Sync {
    /// Creates the provisioner for a new instance.
    fn create(&self) -> Arc<dyn Component>;
}

impl<F> ComponentFactory for F
where
    F: Fn() -> Arc<dyn Component> + Send + Sync,
{
    fn create(&self) -> Arc<dyn Component> {
        self()
    }
}

/// Maps type names to factories.
#[derive(Default, Clone)]
pub struct Registry {
    factories: HashMap<String, Arc<dyn ComponentFactory>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the `Declarative` and `Static` types.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(DECLARATIVE_TYPE, || -> Arc<dyn Component> {
            Arc::new(Declarative)
        });
        registry.register("Static", || -> Arc<dyn Component> { Arc::new(Static) });
        registry
    }

    /// Registers `factory` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: ComponentFactory + 'static,
    {
        let name = name.into();
        tracing::debug!(component_type = %name, "registering component type");
        if self.factories.insert(name.clone(), Arc::new(factory)).is_some() {
            tracing::warn!(component_type = %name, "component type re-registered");
        }
    }

    /// Registers one provisioner shared by every instance of `name`.
    pub fn register_shared(&mut self, name: impl Into<String>, component: Arc<dyn Component>) {
        self.register(name, move || Arc::clone(&component));
    }

    /// Instantiates the provisioner for `name`.
    ///
    /// # Errors
    ///
    /// Returns a structural error if `name` is not registered.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Component>> {
        self.factories
            .get(name)
            .map(|factory| factory.create())
            .ok_or_else(|| {
                CairnError::structural(format!(
                    "unrecognized lifecycle object: component type `{name}` is not registered"
                ))
            })
    }

    /// Returns whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered type names, sorted.
    #[must_use]
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("types", &self.type_names())
            .finish()
    }
}
