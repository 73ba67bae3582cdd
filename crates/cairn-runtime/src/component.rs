//! The lifecycle contract every component type implements.
//!
//! A component is asked to `define` its children during expansion, then to
//! `deploy` or `remove` itself during execution. Provisioners talk to
//! external systems; the engine only sees this trait.

use std::fmt;

use async_trait::async_trait;
use cairn_common::error::{CairnError, Result};
use cairn_common::types::{InstanceId, Outputs, validate_key};
use cairn_compose::spec::{ChildSpecs, ComponentSpec};
use serde_json::Value;
use thiserror::Error;

use crate::context::Context;

/// Error returned by a provisioner's `deploy` or `remove`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// The call failed; dependents of the instance are skipped.
    #[error("{0}")]
    Failed(String),
    /// The resource is already in the requested state.
    #[error("already in desired state: {0}")]
    AlreadySatisfied(String),
}

impl LifecycleError {
    /// Shorthand for [`LifecycleError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// What a provisioner knows about an instance from the previous run.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorInstance {
    /// Component type the instance was deployed with.
    pub component_type: String,
    /// Resolved inputs of the last successful deploy.
    pub inputs: Outputs,
    /// Outputs of the last successful deploy.
    pub outputs: Outputs,
}

/// A child declaration returned from [`Component::define`].
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    spec: ComponentSpec,
    declared_by: Option<InstanceId>,
}

impl Declaration {
    /// Wraps a spec that is not tied to a declaring instance.
    #[must_use]
    pub const fn new(spec: ComponentSpec) -> Self {
        Self {
            spec,
            declared_by: None,
        }
    }

    pub(crate) const fn stamped(spec: ComponentSpec, declared_by: InstanceId) -> Self {
        Self {
            spec,
            declared_by: Some(declared_by),
        }
    }

    /// The declared spec.
    #[must_use]
    pub const fn spec(&self) -> &ComponentSpec {
        &self.spec
    }

    /// Identity of the instance that created this declaration, if stamped.
    #[must_use]
    pub const fn declared_by(&self) -> Option<&InstanceId> {
        self.declared_by.as_ref()
    }

    pub(crate) fn into_spec(self) -> ComponentSpec {
        self.spec
    }
}

impl From<ComponentSpec> for Declaration {
    fn from(spec: ComponentSpec) -> Self {
        Self::new(spec)
    }
}

/// Ordered, keyed child declarations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Children {
    entries: Vec<(String, Declaration)>,
}

impl Children {
    /// No children; what a leaf returns.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Builds children from keyed declarations.
    ///
    /// # Errors
    ///
    /// Returns a structural error for invalid or duplicate keys.
    pub fn keyed<K, D>(entries: impl IntoIterator<Item = (K, D)>) -> Result<Self>
    where
        K: Into<String>,
        D: Into<Declaration>,
    {
        let mut collected: Vec<(String, Declaration)> = Vec::new();
        for (key, declaration) in entries {
            let key = key.into();
            validate_key(&key)?;
            if collected.iter().any(|(k, _)| *k == key) {
                return Err(CairnError::structural(format!(
                    "duplicate declaration key \"{key}\""
                )));
            }
            collected.push((key, declaration.into()));
        }
        Ok(Self { entries: collected })
    }

    /// Builds children keyed by position.
    pub fn sequence<D: Into<Declaration>>(declarations: impl IntoIterator<Item = D>) -> Self {
        Self {
            entries: declarations
                .into_iter()
                .enumerate()
                .map(|(i, d)| (i.to_string(), d.into()))
                .collect(),
        }
    }

    /// Parses children from a JSON mapping or sequence of declarations.
    ///
    /// # Errors
    ///
    /// Returns a structural error if `value` is neither, or an element is
    /// not a component declaration.
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(Self::from_specs(&ChildSpecs::from_value(value)?))
    }

    /// Converts declared `components` into children.
    #[must_use]
    pub fn from_specs(specs: &ChildSpecs) -> Self {
        Self {
            entries: specs
                .entries()
                .iter()
                .map(|(key, spec)| (key.clone(), Declaration::new(spec.clone())))
                .collect(),
        }
    }

    /// The keyed declarations in order.
    #[must_use]
    pub fn entries(&self) -> &[(String, Declaration)] {
        &self.entries
    }

    /// Number of children.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether there are no children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<(String, Declaration)> {
        self.entries
    }
}

/// The capability set of a component type.
///
/// `deploy` and `remove` receive fully resolved inputs. Returning
/// [`LifecycleError::AlreadySatisfied`] is treated as success.
#[async_trait]
pub trait Component: Send + Sync + fmt::Debug {
    /// Declares this instance's children.
    ///
    /// The default returns the spec's declared `components` unchanged.
    ///
    /// # Errors
    ///
    /// Returns a structural error if the declaration is unacceptable.
    async fn define(&self, spec: &ComponentSpec, _ctx: &Context) -> Result<Children> {
        Ok(spec
            .components
            .as_ref()
            .map(Children::from_specs)
            .unwrap_or_default())
    }

    /// Creates or updates the resource and returns its outputs.
    async fn deploy(
        &self,
        inputs: &Outputs,
        previous: Option<&PriorInstance>,
        ctx: &Context,
    ) -> std::result::Result<Outputs, LifecycleError>;

    /// Tears the resource down.
    async fn remove(
        &self,
        inputs: &Outputs,
        previous: Option<&PriorInstance>,
        ctx: &Context,
    ) -> std::result::Result<Option<Outputs>, LifecycleError>;
}
