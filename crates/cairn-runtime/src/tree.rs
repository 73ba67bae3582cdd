//! Component tree expansion.
//!
//! Instances live in an arena indexed by identity. A parent owns the list
//! of its children's identities; the child only records its parent's
//! identity for lookup.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use cairn_common::error::{CairnError, Result};
use cairn_common::types::{InstanceId, Outputs};
use cairn_compose::input::Inputs;
use cairn_compose::spec::{ComponentSpec, Manifest};
use serde::Serialize;

use crate::component::{Component, Declaration, PriorInstance};
use crate::context::Context;
use crate::state::StateEntry;

/// Where an instance is within the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    /// Registered in the tree, children not yet defined.
    Declared,
    /// Children defined.
    Expanded,
    /// Deployed (or confirmed unchanged) in this run.
    Deployed,
    /// Torn down in this run.
    Removed,
}

impl Lifecycle {
    /// Returns whether moving from `self` to `next` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Declared, Self::Expanded)
                | (Self::Expanded | Self::Deployed, Self::Deployed | Self::Removed)
        )
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declared => write!(f, "declared"),
            Self::Expanded => write!(f, "expanded"),
            Self::Deployed => write!(f, "deployed"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// A component instance within one run.
#[derive(Debug)]
pub struct Instance {
    /// Unique identity.
    pub id: InstanceId,
    /// Declared spec.
    pub spec: ComponentSpec,
    /// Declared inputs parsed into expression trees.
    pub inputs: Inputs,
    /// Provisioner for this instance's type.
    pub provisioner: Arc<dyn Component>,
    /// Enclosing instance, if not the root.
    pub parent: Option<InstanceId>,
    /// Children in declaration order.
    pub children: Vec<InstanceId>,
    /// Entry persisted by the previous run.
    pub prior: Option<StateEntry>,
    /// Outputs of the most recent successful lifecycle call.
    pub outputs: Option<Outputs>,
    status: Lifecycle,
}

impl Instance {
    /// Registered component type name.
    #[must_use]
    pub fn component_type(&self) -> &str {
        &self.spec.component_type
    }

    /// Current lifecycle status.
    #[must_use]
    pub const fn status(&self) -> Lifecycle {
        self.status
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns a structural error for a transition the lifecycle forbids.
    pub fn transition(&mut self, next: Lifecycle) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CairnError::structural(format!(
                "{}: illegal lifecycle transition {} -> {next}",
                self.id, self.status
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Prior state as handed to provisioners.
    #[must_use]
    pub fn prior_instance(&self) -> Option<PriorInstance> {
        self.prior.as_ref().map(StateEntry::prior)
    }
}

/// All instances of a run, in pre-order.
#[derive(Debug, Default)]
pub struct InstanceTree {
    nodes: Vec<Instance>,
    index: HashMap<InstanceId, usize>,
}

impl InstanceTree {
    fn insert(&mut self, instance: Instance) -> Result<()> {
        if self.index.contains_key(&instance.id) {
            return Err(CairnError::structural(format!(
                "duplicate instance identity {}",
                instance.id
            )));
        }
        let _ = self.index.insert(instance.id.clone(), self.nodes.len());
        self.nodes.push(instance);
        Ok(())
    }

    /// Looks up an instance.
    #[must_use]
    pub fn get(&self, id: &InstanceId) -> Option<&Instance> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Looks up an instance mutably.
    pub fn get_mut(&mut self, id: &InstanceId) -> Option<&mut Instance> {
        self.index.get(id).map(|&i| &mut self.nodes[i])
    }

    /// Returns whether `id` is part of the tree.
    #[must_use]
    pub fn contains(&self, id: &InstanceId) -> bool {
        self.index.contains_key(id)
    }

    /// The root instance.
    #[must_use]
    pub fn root(&self) -> Option<&Instance> {
        self.nodes.first()
    }

    /// Instances in pre-order, parents before children, siblings in
    /// declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.nodes.iter()
    }

    /// Number of instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns whether the tree is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

struct Pending {
    id: InstanceId,
    parent: Option<InstanceId>,
    declaration: Declaration,
}

/// Expands `manifest` into a tree of instances.
///
/// Each instance is hydrated from `prior`, then asked to `define` its
/// children; no other lifecycle call is made.
///
/// # Errors
///
/// Returns a structural error for unregistered types, invalid keys,
/// duplicate identities, or a child declared on behalf of another instance.
pub async fn expand(
    manifest: &Manifest,
    ctx: &Context,
    prior: &BTreeMap<InstanceId, StateEntry>,
) -> Result<InstanceTree> {
    let root = manifest.root_id()?;
    let mut tree = InstanceTree::default();
    let mut stack = vec![Pending {
        id: root,
        parent: None,
        declaration: Declaration::new(manifest.root.clone()),
    }];

    while let Some(Pending {
        id,
        parent,
        declaration,
    }) = stack.pop()
    {
        if let Some(owner) = declaration.declared_by() {
            if Some(owner) != parent.as_ref() {
                return Err(CairnError::structural(format!(
                    "{id} was declared by {owner} but returned by {}",
                    parent.as_ref().map_or("the manifest", InstanceId::as_str)
                )));
            }
        }

        let spec = declaration.into_spec();
        let provisioner = ctx.load_type(&spec.component_type)?;
        let inputs = Inputs::parse(&spec.inputs)?;
        let instance_ctx = ctx.for_instance(id.clone());
        let children = provisioner.define(&spec, &instance_ctx).await?;
        tracing::debug!(
            instance = %id,
            component_type = %spec.component_type,
            children = children.len(),
            "instance expanded"
        );

        let mut pending = Vec::with_capacity(children.len());
        let mut child_ids = Vec::with_capacity(children.len());
        for (key, child) in children.into_entries() {
            let child_id = id.child(&key)?;
            child_ids.push(child_id.clone());
            pending.push(Pending {
                id: child_id,
                parent: Some(id.clone()),
                declaration: child,
            });
        }
        stack.extend(pending.into_iter().rev());

        let mut instance = Instance {
            prior: prior.get(&id).cloned(),
            id,
            spec,
            inputs,
            provisioner,
            parent,
            children: child_ids,
            outputs: None,
            status: Lifecycle::Declared,
        };
        instance.transition(Lifecycle::Expanded)?;
        tree.insert(instance)?;
    }

    tracing::info!(instances = tree.len(), "component tree expanded");
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{Map, json};
    use uuid::Uuid;

    use super::*;
    use crate::component::{Children, LifecycleError};
    use crate::context::LogConfig;
    use crate::registry::Registry;

    #[derive(Debug)]
    struct Pair;

    #[async_trait]
    impl Component for Pair {
        async fn define(&self, _spec: &ComponentSpec, ctx: &Context) -> Result<Children> {
            Children::keyed([
                ("primary", ctx.declare("Static", Map::new())?),
                ("replica", ctx.declare("Static", Map::new())?),
            ])
        }

        async fn deploy(
            &self,
            inputs: &Outputs,
            _previous: Option<&PriorInstance>,
            _ctx: &Context,
        ) -> std::result::Result<Outputs, LifecycleError> {
            Ok(inputs.clone())
        }

        async fn remove(
            &self,
            _inputs: &Outputs,
            _previous: Option<&PriorInstance>,
            _ctx: &Context,
        ) -> std::result::Result<Option<Outputs>, LifecycleError> {
            Ok(None)
        }
    }

    /// Hands out a declaration stamped by someone else.
    #[derive(Debug)]
    struct Impostor;

    #[async_trait]
    impl Component for Impostor {
        async fn define(&self, _spec: &ComponentSpec, ctx: &Context) -> Result<Children> {
            let stranger = ctx.for_instance(InstanceId::root("elsewhere")?);
            Children::keyed([("stolen", stranger.declare("Static", Map::new())?)])
        }

        async fn deploy(
            &self,
            inputs: &Outputs,
            _previous: Option<&PriorInstance>,
            _ctx: &Context,
        ) -> std::result::Result<Outputs, LifecycleError> {
            Ok(inputs.clone())
        }

        async fn remove(
            &self,
            _inputs: &Outputs,
            _previous: Option<&PriorInstance>,
            _ctx: &Context,
        ) -> std::result::Result<Option<Outputs>, LifecycleError> {
            Ok(None)
        }
    }

    fn context() -> Context {
        let mut registry = Registry::with_builtins();
        registry.register("Pair", || -> Arc<dyn Component> { Arc::new(Pair) });
        registry.register("Impostor", || -> Arc<dyn Component> { Arc::new(Impostor) });
        Context::new(
            InstanceId::root("app").expect("root"),
            Uuid::new_v4(),
            LogConfig { silent: true },
            Arc::new(registry),
        )
    }

    fn manifest(value: serde_json::Value) -> Manifest {
        Manifest::from_value(value).expect("manifest")
    }

    fn ids(tree: &InstanceTree) -> Vec<&str> {
        tree.iter().map(|i| i.id.as_str()).collect()
    }

    #[tokio::test]
    async fn expands_in_pre_order() {
        let manifest = manifest(json!({
            "name": "app",
            "components": {
                "net": {"type": "Declarative", "components": {"vpc": {"type": "Static"}}},
                "db": {"type": "Pair"}
            }
        }));
        let tree = expand(&manifest, &context(), &BTreeMap::new()).await.expect("expand");
        assert_eq!(
            ids(&tree),
            vec!["app", "app.net", "app.net.vpc", "app.db", "app.db.primary", "app.db.replica"]
        );
        let db = tree.get(&InstanceId::from_persisted("app.db")).expect("db");
        assert_eq!(db.parent.as_ref().map(InstanceId::as_str), Some("app"));
        assert_eq!(db.children.len(), 2);
        assert!(tree.iter().all(|i| i.status() == Lifecycle::Expanded));
    }

    #[tokio::test]
    async fn hydrates_prior_state() {
        let manifest = manifest(json!({"name": "app", "components": {"a": {"type": "Static"}}}));
        let mut prior = BTreeMap::new();
        let _ = prior.insert(
            InstanceId::from_persisted("app.a"),
            StateEntry::new("Static", Outputs::new(), Outputs::new(), Vec::new()),
        );
        let tree = expand(&manifest, &context(), &prior).await.expect("expand");
        let a = tree.get(&InstanceId::from_persisted("app.a")).expect("a");
        assert!(a.prior.is_some());
        assert!(tree.root().expect("root").prior.is_none());
    }

    #[tokio::test]
    async fn unknown_type_is_structural() {
        let manifest = manifest(json!({"name": "app", "components": {"a": {"type": "Lambda"}}}));
        let err = expand(&manifest, &context(), &BTreeMap::new()).await.unwrap_err();
        assert!(err.to_string().contains("unrecognized lifecycle object"), "got: {err}");
    }

    #[tokio::test]
    async fn foreign_declaration_is_ambiguous_ownership() {
        let manifest = manifest(json!({"name": "app", "components": {"x": {"type": "Impostor"}}}));
        let err = expand(&manifest, &context(), &BTreeMap::new()).await.unwrap_err();
        assert!(err.to_string().contains("was declared by elsewhere"), "got: {err}");
    }

    #[tokio::test]
    async fn malformed_expression_fails_expansion() {
        let manifest = manifest(json!({
            "name": "app",
            "components": {"a": {"type": "Static", "inputs": {"x": "${broken"}}}
        }));
        let err = expand(&manifest, &context(), &BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, CairnError::Structural { .. }), "got: {err}");
    }

    #[test]
    fn removed_is_terminal() {
        assert!(Lifecycle::Deployed.can_transition_to(Lifecycle::Deployed));
        assert!(Lifecycle::Deployed.can_transition_to(Lifecycle::Removed));
        assert!(!Lifecycle::Removed.can_transition_to(Lifecycle::Deployed));
        assert!(!Lifecycle::Declared.can_transition_to(Lifecycle::Deployed));
    }
}
