//! Graph construction and lifecycle diffing.
//!
//! The declared graph comes from binding every reference in the expanded
//! tree. The persisted graph is rebuilt from the dependencies stored with
//! each state entry, which is all teardown needs.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use cairn_common::error::Result;
use cairn_common::types::{InstanceId, Outputs};
use cairn_compose::graph::DependencyGraph;
use cairn_compose::resolver::{Bindings, bind_all, resolve_inputs};

use crate::state::StateEntry;
use crate::tree::InstanceTree;

/// The declared dependency graph plus every instance's bindings.
#[derive(Debug, Default, Clone)]
pub struct BoundGraph {
    /// Producer to consumer edges between instances of the tree.
    pub graph: DependencyGraph,
    /// Bindings of each instance's references.
    pub bindings: HashMap<InstanceId, Bindings>,
}

impl BoundGraph {
    /// Bindings of `id`; empty for instances without references.
    #[must_use]
    pub fn bindings_of(&self, id: &InstanceId) -> &Bindings {
        static EMPTY: std::sync::LazyLock<Bindings> = std::sync::LazyLock::new(Bindings::new);
        self.bindings.get(id).unwrap_or(&EMPTY)
    }
}

/// Builds the dependency graph of an expanded tree.
///
/// Nodes follow tree pre-order. Only references create edges.
///
/// # Errors
///
/// Returns [`cairn_common::error::CairnError::UnknownReference`] for a
/// reference that names no instance, or
/// [`cairn_common::error::CairnError::CyclicDependency`] if the references
/// form a cycle, including an instance referencing itself.
pub fn build_graph(tree: &InstanceTree) -> Result<BoundGraph> {
    let mut bound = BoundGraph::default();
    for instance in tree.iter() {
        let _ = bound.graph.add_instance(&instance.id);
    }
    for instance in tree.iter() {
        let bindings = bind_all(&instance.id, &instance.inputs, |candidate| {
            tree.contains(candidate)
        })?;
        for binding in bindings.values() {
            bound.graph.add_dependency(&instance.id, &binding.source)?;
        }
        if !bindings.is_empty() {
            let _ = bound.bindings.insert(instance.id.clone(), bindings);
        }
    }
    bound.graph.check_acyclic()?;
    tracing::debug!(instances = bound.graph.len(), "dependency graph built");
    Ok(bound)
}

/// Rebuilds a graph from persisted dependencies.
///
/// Dependencies pointing outside `entries` are ignored.
///
/// # Errors
///
/// Returns an error if the stored dependencies form a cycle.
pub fn state_graph(entries: &BTreeMap<InstanceId, StateEntry>) -> Result<DependencyGraph> {
    let mut graph = DependencyGraph::new();
    for id in entries.keys() {
        let _ = graph.add_instance(id);
    }
    for (id, entry) in entries {
        for producer in &entry.dependencies {
            if entries.contains_key(producer) {
                graph.add_dependency(id, producer)?;
            }
        }
    }
    graph.check_acyclic()?;
    Ok(graph)
}

/// How an instance's deploy relates to its persisted state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// No prior entry.
    Create,
    /// Same type, different inputs.
    Update,
    /// The type changed; the old resource is removed first.
    Replace {
        /// Type recorded by the previous run.
        previous_type: String,
    },
    /// Same type and inputs as the previous run.
    Unchanged,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Replace { previous_type } => write!(f, "replace (was {previous_type})"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Classifies a deploy of `component_type` with resolved `inputs`.
#[must_use]
pub fn diff(component_type: &str, inputs: &Outputs, prior: Option<&StateEntry>) -> Change {
    match prior {
        None => Change::Create,
        Some(entry) if entry.component_type != component_type => Change::Replace {
            previous_type: entry.component_type.clone(),
        },
        Some(entry) if entry.inputs == *inputs => Change::Unchanged,
        Some(_) => Change::Update,
    }
}

/// One instance's predicted change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    /// Instance identity.
    pub id: InstanceId,
    /// Declared component type.
    pub component_type: String,
    /// Predicted change.
    pub change: Change,
}

/// Predicted effect of a deploy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Steps in deploy order.
    pub steps: Vec<PlannedStep>,
    /// Persisted instances no longer declared, in teardown order.
    pub orphans: Vec<InstanceId>,
}

impl Plan {
    /// Returns whether applying the plan would call any provisioner.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.orphans.is_empty() || self.steps.iter().any(|s| s.change != Change::Unchanged)
    }

    /// Number of steps with the given change.
    #[must_use]
    pub fn count(&self, predicate: impl Fn(&Change) -> bool) -> usize {
        self.steps.iter().filter(|s| predicate(&s.change)).count()
    }
}

/// Predicts a deploy of `tree` against `prior` without calling provisioners.
///
/// Inputs are resolved against the outputs the previous run persisted. An
/// input whose producer has no persisted outputs yet cannot be compared and
/// is predicted as an update.
///
/// # Errors
///
/// Returns an error if the graph cannot be ordered.
pub fn plan(
    tree: &InstanceTree,
    bound: &BoundGraph,
    prior: &BTreeMap<InstanceId, StateEntry>,
) -> Result<Plan> {
    let known: HashMap<InstanceId, Outputs> = prior
        .iter()
        .map(|(id, entry)| (id.clone(), entry.outputs.clone()))
        .collect();

    let mut steps = Vec::with_capacity(tree.len());
    for id in bound.graph.deploy_order()? {
        let Some(instance) = tree.get(&id) else {
            continue;
        };
        let component_type = instance.component_type().to_owned();
        let entry = instance.prior.as_ref();
        let change = match resolve_inputs(&id, &instance.inputs, bound.bindings_of(&id), &known) {
            Ok(resolved) if resolved.is_complete() => {
                diff(&component_type, &resolved.values, entry)
            }
            _ => match diff(&component_type, &Outputs::new(), entry) {
                Change::Unchanged => Change::Update,
                other => other,
            },
        };
        steps.push(PlannedStep {
            id,
            component_type,
            change,
        });
    }

    let orphans = orphans(tree, prior);
    let orphans = state_graph(&orphans)?.teardown_order()?;
    Ok(Plan { steps, orphans })
}

/// Persisted entries under the tree's root that the tree no longer declares.
#[must_use]
pub fn orphans(
    tree: &InstanceTree,
    prior: &BTreeMap<InstanceId, StateEntry>,
) -> BTreeMap<InstanceId, StateEntry> {
    prior
        .iter()
        .filter(|(id, _)| !tree.contains(id))
        .map(|(id, entry)| (id.clone(), entry.clone()))
        .collect()
}
