//! Runtime engine that orchestrates component lifecycles.
//!
//! A deploy expands the manifest, binds references into a dependency
//! graph, tears down persisted instances that are no longer declared, then
//! walks the graph producers first. A remove walks the persisted graph
//! consumers first. Both walks share one scheduler: a node starts once
//! everything it waits on has succeeded, and a failure skips only the
//! nodes that transitively wait on it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use cairn_common::config::CairnConfig;
use cairn_common::error::{CairnError, Result};
use cairn_common::types::{InstanceId, Outputs, RunMode};
use cairn_compose::graph::DependencyGraph;
use cairn_compose::resolver::resolve_inputs;
use cairn_compose::spec::Manifest;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::Instrument;
use uuid::Uuid;

use crate::component::{Component, LifecycleError};
use crate::context::{Context, LogConfig};
use crate::planner::{self, BoundGraph, Change, Plan};
use crate::registry::Registry;
use crate::report::{Outcome, RunReport};
use crate::state::{StateEntry, StateStore};
use crate::tree::{InstanceTree, Lifecycle, expand};

/// Execution settings for one engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum lifecycle calls in flight; `1` is strictly sequential.
    pub concurrency: usize,
    /// Suppress provisioner messages routed through [`Context`].
    pub silent: bool,
    /// Deploy instances even when their inputs are unchanged.
    pub force: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&CairnConfig::default())
    }
}

impl From<&CairnConfig> for EngineConfig {
    fn from(config: &CairnConfig) -> Self {
        Self {
            concurrency: config.effective_concurrency(),
            silent: config.silent,
            force: config.force,
        }
    }
}

/// The runtime engine that coordinates all lifecycle operations.
#[derive(Debug)]
pub struct Engine {
    registry: Arc<Registry>,
    store: Arc<dyn StateStore>,
    config: EngineConfig,
}

impl Engine {
    /// Creates an engine over a registry and a state store.
    #[must_use]
    pub fn new(registry: Registry, store: Arc<dyn StateStore>, config: EngineConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
            config,
        }
    }

    /// The registered component types.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The state store runs commit to.
    #[must_use]
    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    /// Execution settings.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn context(&self, root: InstanceId, run_id: Uuid) -> Context {
        Context::new(
            root,
            run_id,
            LogConfig {
                silent: self.config.silent,
            },
            Arc::clone(&self.registry),
        )
    }

    /// Deploys every instance declared by `manifest`.
    ///
    /// Lifecycle failures are reported per instance in the returned
    /// [`RunReport`]; they do not make this call fail.
    ///
    /// # Errors
    ///
    /// Returns an error, before any lifecycle call, if the declaration is
    /// malformed, a reference is unknown, the references form a cycle, or
    /// state cannot be loaded.
    pub async fn deploy(&self, manifest: &Manifest) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", run_id = %run_id, mode = %RunMode::Deploy, root = %manifest.name);
        self.run_deploy(manifest, run_id).instrument(span).await
    }

    async fn run_deploy(&self, manifest: &Manifest, run_id: Uuid) -> Result<RunReport> {
        let root = manifest.root_id()?;
        let prior = self.store.load()?.subtree(&root);
        let ctx = self.context(root, run_id);

        let tree = expand(manifest, &ctx, &prior).await?;
        let bound = planner::build_graph(&tree)?;
        let order = bound.graph.deploy_order()?;
        tracing::info!(instances = order.len(), "deploy started");

        let mut report = RunReport::new(run_id, RunMode::Deploy);

        let orphans = planner::orphans(&tree, &prior);
        if !orphans.is_empty() {
            let graph = planner::state_graph(&orphans)?;
            let teardown = graph.teardown_order()?;
            tracing::info!(count = teardown.len(), "removing instances no longer declared");
            let mut step = TeardownStep {
                entries: orphans,
                registry: Arc::clone(&self.registry),
                store: Arc::clone(&self.store),
                ctx: &ctx,
            };
            execute(&graph, teardown, Flow::Teardown, self.config.concurrency, &mut step, &mut report)
                .await;
        }

        let mut step = DeployStep {
            tree,
            bound: &bound,
            outputs: HashMap::new(),
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
            ctx: &ctx,
            force: self.config.force,
        };
        execute(&bound.graph, order, Flow::Deploy, self.config.concurrency, &mut step, &mut report)
            .await;

        tracing::info!(
            succeeded = report.succeeded().len(),
            failed = report.failed().len(),
            skipped = report.skipped().len(),
            "deploy finished"
        );
        Ok(report)
    }

    /// Removes every persisted instance at or below `root`.
    ///
    /// Driven by state alone: each entry is removed with the provisioner of
    /// its stored type, consumers before producers.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be loaded or the stored
    /// dependencies form a cycle.
    pub async fn remove(&self, root: &InstanceId) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", run_id = %run_id, mode = %RunMode::Remove, root = %root);
        self.run_remove(root, run_id).instrument(span).await
    }

    async fn run_remove(&self, root: &InstanceId, run_id: Uuid) -> Result<RunReport> {
        let entries = self.store.load()?.subtree(root);
        let graph = planner::state_graph(&entries)?;
        let order = graph.teardown_order()?;
        tracing::info!(instances = order.len(), "remove started");

        let mut report = RunReport::new(run_id, RunMode::Remove);
        let ctx = self.context(root.clone(), run_id);
        let mut step = TeardownStep {
            entries,
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
            ctx: &ctx,
        };
        execute(&graph, order, Flow::Teardown, self.config.concurrency, &mut step, &mut report).await;

        tracing::info!(
            removed = report.succeeded().len(),
            failed = report.failed().len(),
            skipped = report.skipped().len(),
            "remove finished"
        );
        Ok(report)
    }

    /// Predicts what [`Self::deploy`] would do without calling `deploy` or
    /// `remove` on any provisioner.
    ///
    /// # Errors
    ///
    /// Returns the same declaration and graph errors as [`Self::deploy`].
    pub async fn plan(&self, manifest: &Manifest) -> Result<Plan> {
        let root = manifest.root_id()?;
        let prior = self.store.load()?.subtree(&root);
        let ctx = self.context(root, Uuid::new_v4());
        let tree = expand(manifest, &ctx, &prior).await?;
        let bound = planner::build_graph(&tree)?;
        planner::plan(&tree, &bound, &prior)
    }
}

/// Result of one node's work.
struct Completed {
    outcome: Outcome,
    outputs: Option<Outputs>,
}

impl Completed {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Failed {
                error: error.into(),
            },
            outputs: None,
        }
    }
}

type StepFuture = BoxFuture<'static, (InstanceId, Completed)>;

enum Started {
    /// Settled without a lifecycle call.
    Done(Completed),
    Running(StepFuture),
}

/// Per-mode node handling plugged into [`execute`].
trait Step {
    fn start(&mut self, id: &InstanceId) -> Started;

    fn finish(&mut self, _id: &InstanceId, _done: &Completed) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Deploy,
    Teardown,
}

impl Flow {
    fn waits_on(self, graph: &DependencyGraph, id: &InstanceId) -> Vec<InstanceId> {
        match self {
            Self::Deploy => graph.producers(id),
            Self::Teardown => graph.consumers(id),
        }
    }

    fn unblocks(self, graph: &DependencyGraph, id: &InstanceId) -> Vec<InstanceId> {
        match self {
            Self::Deploy => graph.consumers(id),
            Self::Teardown => graph.producers(id),
        }
    }

    fn blocked_by_failure(self, graph: &DependencyGraph, id: &InstanceId) -> Vec<InstanceId> {
        match self {
            Self::Deploy => graph.descendants(id),
            Self::Teardown => graph.ancestors(id),
        }
    }
}

/// Tracks which nodes are ready, waiting, or settled.
///
/// Ready nodes are taken by their position in `order`, so with a limit of
/// one the walk reproduces `order` exactly.
struct Frontier<'g> {
    graph: &'g DependencyGraph,
    flow: Flow,
    order: Vec<InstanceId>,
    position: HashMap<InstanceId, usize>,
    waiting: Vec<usize>,
    ready: BTreeSet<usize>,
    settled: Vec<bool>,
}

impl<'g> Frontier<'g> {
    fn new(graph: &'g DependencyGraph, flow: Flow, order: Vec<InstanceId>) -> Self {
        let position: HashMap<InstanceId, usize> = order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        let waiting: Vec<usize> = order
            .iter()
            .map(|id| {
                flow.waits_on(graph, id)
                    .iter()
                    .filter(|w| position.contains_key(*w))
                    .count()
            })
            .collect();
        let ready = (0..order.len()).filter(|&i| waiting[i] == 0).collect();
        let settled = vec![false; order.len()];
        Self {
            graph,
            flow,
            order,
            position,
            waiting,
            ready,
            settled,
        }
    }

    fn next_ready(&mut self) -> Option<InstanceId> {
        while let Some(i) = self.ready.pop_first() {
            if !self.settled[i] {
                return Some(self.order[i].clone());
            }
        }
        None
    }

    fn settle(&mut self, id: InstanceId, done: Completed, report: &mut RunReport) {
        let Some(&index) = self.position.get(&id) else {
            return;
        };
        self.settled[index] = true;
        let succeeded = done.outcome.is_success();
        report.record(id.clone(), done.outcome, done.outputs);

        if !succeeded {
            for blocked in self.flow.blocked_by_failure(self.graph, &id) {
                let Some(&i) = self.position.get(&blocked) else {
                    continue;
                };
                if self.settled[i] {
                    continue;
                }
                self.settled[i] = true;
                tracing::warn!(instance = %blocked, blocked_by = %id, "skipped");
                report.record(
                    blocked,
                    Outcome::Skipped {
                        blocked_by: id.clone(),
                    },
                    None,
                );
            }
            return;
        }

        for next in self.flow.unblocks(self.graph, &id) {
            let Some(&i) = self.position.get(&next) else {
                continue;
            };
            self.waiting[i] = self.waiting[i].saturating_sub(1);
            if self.waiting[i] == 0 && !self.settled[i] {
                let _ = self.ready.insert(i);
            }
        }
    }
}

/// Walks `graph` in `flow` direction with at most `limit` calls in flight.
async fn execute<S: Step>(
    graph: &DependencyGraph,
    order: Vec<InstanceId>,
    flow: Flow,
    limit: usize,
    step: &mut S,
    report: &mut RunReport,
) {
    let limit = limit.max(1);
    let mut frontier = Frontier::new(graph, flow, order);
    let mut in_flight: FuturesUnordered<StepFuture> = FuturesUnordered::new();

    loop {
        while in_flight.len() < limit {
            let Some(id) = frontier.next_ready() else {
                break;
            };
            match step.start(&id) {
                Started::Done(done) => {
                    step.finish(&id, &done);
                    frontier.settle(id, done, report);
                }
                Started::Running(future) => in_flight.push(future),
            }
        }

        let Some((id, done)) = in_flight.next().await else {
            break;
        };
        step.finish(&id, &done);
        frontier.settle(id, done, report);
    }
}

struct DeployStep<'a> {
    tree: InstanceTree,
    bound: &'a BoundGraph,
    outputs: HashMap<InstanceId, Outputs>,
    registry: Arc<Registry>,
    store: Arc<dyn StateStore>,
    ctx: &'a Context,
    force: bool,
}

impl Step for DeployStep<'_> {
    fn start(&mut self, id: &InstanceId) -> Started {
        let Some(instance) = self.tree.get(id) else {
            return Started::Done(Completed::failed(format!("{id} is not part of the tree")));
        };

        let resolved = match resolve_inputs(
            id,
            &instance.inputs,
            self.bound.bindings_of(id),
            &self.outputs,
        ) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::error!(instance = %id, error = %e, "input resolution failed");
                return Started::Done(Completed::failed(e.to_string()));
            }
        };
        if !resolved.is_complete() {
            let message = format!(
                "inputs of {id} could not be resolved: {}",
                resolved.pending.join(", ")
            );
            tracing::error!(instance = %id, "{message}");
            return Started::Done(Completed::failed(message));
        }

        let change = planner::diff(instance.component_type(), &resolved.values, instance.prior.as_ref());
        tracing::debug!(instance = %id, change = %change, "diffed against state");

        if change == Change::Unchanged && !self.force {
            if let Some(entry) = &instance.prior {
                let dependencies = self.bound.graph.producers(id);
                if entry.dependencies != dependencies {
                    let refreshed = StateEntry::new(
                        entry.component_type.clone(),
                        entry.inputs.clone(),
                        entry.outputs.clone(),
                        dependencies,
                    );
                    if let Err(e) = self.store.commit(id, Some(refreshed)) {
                        tracing::error!(instance = %id, error = %e, "state commit failed");
                        return Started::Done(Completed::failed(e.to_string()));
                    }
                    tracing::debug!(instance = %id, "stored dependencies refreshed");
                }
            }
            let outputs = instance
                .prior
                .as_ref()
                .map(|entry| entry.outputs.clone())
                .unwrap_or_default();
            return Started::Done(Completed {
                outcome: Outcome::Unchanged,
                outputs: Some(outputs),
            });
        }

        let replaced = match &change {
            Change::Replace { previous_type } => match self.registry.get(previous_type) {
                Ok(provisioner) => Some(provisioner),
                Err(e) => return Started::Done(Completed::failed(e.to_string())),
            },
            _ => None,
        };

        let job = DeployJob {
            id: id.clone(),
            component_type: instance.component_type().to_owned(),
            change,
            inputs: resolved.values,
            prior: instance.prior.clone(),
            dependencies: self.bound.graph.producers(id),
            provisioner: Arc::clone(&instance.provisioner),
            replaced,
            ctx: self.ctx.for_instance(id.clone()),
            store: Arc::clone(&self.store),
        };
        let id = id.clone();
        Started::Running(async move { (id, job.run().await) }.boxed())
    }

    fn finish(&mut self, id: &InstanceId, done: &Completed) {
        if !done.outcome.is_success() {
            return;
        }
        let Some(outputs) = &done.outputs else {
            return;
        };
        let _ = self.outputs.insert(id.clone(), outputs.clone());
        if let Some(instance) = self.tree.get_mut(id) {
            instance.outputs = Some(outputs.clone());
            if let Err(e) = instance.transition(Lifecycle::Deployed) {
                tracing::error!(instance = %id, error = %e, "lifecycle status not updated");
            }
        }
    }
}

struct DeployJob {
    id: InstanceId,
    component_type: String,
    change: Change,
    inputs: Outputs,
    prior: Option<StateEntry>,
    dependencies: Vec<InstanceId>,
    provisioner: Arc<dyn Component>,
    replaced: Option<Arc<dyn Component>>,
    ctx: Context,
    store: Arc<dyn StateStore>,
}

impl DeployJob {
    async fn run(self) -> Completed {
        let prior = self.prior.as_ref().map(StateEntry::prior);

        if let (Some(old), Some(previous)) = (&self.replaced, &prior) {
            tracing::info!(
                instance = %self.id,
                from = %previous.component_type,
                to = %self.component_type,
                "replacing instance"
            );
            match old.remove(&previous.inputs, Some(previous), &self.ctx).await {
                Ok(Some(removed)) => {
                    tracing::info!(
                        instance = %self.id,
                        outputs = %serde_json::Value::Object(removed),
                        "old resource removed"
                    );
                }
                Ok(None) => {}
                Err(LifecycleError::AlreadySatisfied(message)) => {
                    tracing::warn!(instance = %self.id, %message, "old resource already gone");
                }
                Err(LifecycleError::Failed(message)) => return self.failure("remove", message),
            }
            if let Err(e) = self.store.commit(&self.id, None) {
                return self.store_failure(&e);
            }
        }

        let previous = if self.replaced.is_some() {
            None
        } else {
            prior.as_ref()
        };
        let outputs = match self.provisioner.deploy(&self.inputs, previous, &self.ctx).await {
            Ok(outputs) => outputs,
            Err(LifecycleError::AlreadySatisfied(message)) => {
                tracing::warn!(instance = %self.id, %message, "deploy already satisfied");
                previous.map(|p| p.outputs.clone()).unwrap_or_default()
            }
            Err(LifecycleError::Failed(message)) => return self.failure("deploy", message),
        };

        let entry = StateEntry::new(
            self.component_type.clone(),
            self.inputs.clone(),
            outputs.clone(),
            self.dependencies.clone(),
        );
        if let Err(e) = self.store.commit(&self.id, Some(entry)) {
            return self.store_failure(&e);
        }

        let outcome = match self.change {
            Change::Create => Outcome::Created,
            Change::Replace { .. } => Outcome::Replaced,
            Change::Update | Change::Unchanged => Outcome::Updated,
        };
        tracing::info!(instance = %self.id, outcome = outcome.label(), "instance deployed");
        Completed {
            outcome,
            outputs: Some(outputs),
        }
    }

    fn failure(&self, operation: &'static str, message: String) -> Completed {
        lifecycle_failure(&self.id, operation, message)
    }

    fn store_failure(&self, error: &CairnError) -> Completed {
        tracing::error!(instance = %self.id, error = %error, "state commit failed");
        Completed::failed(error.to_string())
    }
}

fn lifecycle_failure(id: &InstanceId, operation: &'static str, message: String) -> Completed {
    let error = CairnError::Lifecycle {
        instance: id.to_string(),
        operation,
        message,
    };
    tracing::error!(instance = %id, error = %error, "lifecycle call failed");
    Completed::failed(error.to_string())
}

struct TeardownStep<'a> {
    entries: BTreeMap<InstanceId, StateEntry>,
    registry: Arc<Registry>,
    store: Arc<dyn StateStore>,
    ctx: &'a Context,
}

impl Step for TeardownStep<'_> {
    fn start(&mut self, id: &InstanceId) -> Started {
        let Some(entry) = self.entries.get(id) else {
            return Started::Done(Completed::failed(format!("{id} has no persisted state")));
        };
        let provisioner = match self.registry.get(&entry.component_type) {
            Ok(provisioner) => provisioner,
            Err(e) => {
                tracing::error!(instance = %id, error = %e, "cannot remove instance");
                return Started::Done(Completed::failed(e.to_string()));
            }
        };
        let job = TeardownJob {
            id: id.clone(),
            entry: entry.clone(),
            provisioner,
            ctx: self.ctx.for_instance(id.clone()),
            store: Arc::clone(&self.store),
        };
        let id = id.clone();
        Started::Running(async move { (id, job.run().await) }.boxed())
    }
}

struct TeardownJob {
    id: InstanceId,
    entry: StateEntry,
    provisioner: Arc<dyn Component>,
    ctx: Context,
    store: Arc<dyn StateStore>,
}

impl TeardownJob {
    async fn run(self) -> Completed {
        let prior = self.entry.prior();
        let outputs = match self
            .provisioner
            .remove(&self.entry.inputs, Some(&prior), &self.ctx)
            .await
        {
            Ok(outputs) => outputs,
            Err(LifecycleError::AlreadySatisfied(message)) => {
                tracing::warn!(instance = %self.id, %message, "already removed");
                None
            }
            Err(LifecycleError::Failed(message)) => {
                return lifecycle_failure(&self.id, "remove", message);
            }
        };
        if let Err(e) = self.store.commit(&self.id, None) {
            tracing::error!(instance = %self.id, error = %e, "state commit failed");
            return Completed::failed(e.to_string());
        }
        tracing::info!(instance = %self.id, "instance removed");
        Completed {
            outcome: Outcome::Removed,
            outputs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> InstanceId {
        InstanceId::from_persisted(s)
    }

    /// Settles every started node immediately, recording the start order.
    struct Scripted {
        started: Vec<InstanceId>,
        fail: Option<InstanceId>,
    }

    impl Step for Scripted {
        fn start(&mut self, id: &InstanceId) -> Started {
            self.started.push(id.clone());
            if self.fail.as_ref() == Some(id) {
                Started::Done(Completed::failed("boom"))
            } else {
                let id = id.clone();
                Started::Running(
                    async move {
                        (
                            id,
                            Completed {
                                outcome: Outcome::Created,
                                outputs: Some(Outputs::new()),
                            },
                        )
                    }
                    .boxed(),
                )
            }
        }
    }

    fn chain_with_island() -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for n in ["a", "b", "c", "island"] {
            let _ = graph.add_instance(&id(n));
        }
        graph.add_dependency(&id("b"), &id("a")).expect("edge");
        graph.add_dependency(&id("c"), &id("b")).expect("edge");
        graph
    }

    #[tokio::test]
    async fn sequential_walk_matches_deploy_order() {
        let graph = chain_with_island();
        let order = graph.deploy_order().expect("order");
        let mut step = Scripted {
            started: Vec::new(),
            fail: None,
        };
        let mut report = RunReport::new(Uuid::new_v4(), RunMode::Deploy);
        execute(&graph, order.clone(), Flow::Deploy, 1, &mut step, &mut report).await;
        assert_eq!(step.started, order);
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn teardown_walk_matches_teardown_order() {
        let graph = chain_with_island();
        let order = graph.teardown_order().expect("order");
        let mut step = Scripted {
            started: Vec::new(),
            fail: None,
        };
        let mut report = RunReport::new(Uuid::new_v4(), RunMode::Remove);
        execute(&graph, order.clone(), Flow::Teardown, 1, &mut step, &mut report).await;
        assert_eq!(step.started, order);
    }

    #[tokio::test]
    async fn failure_skips_only_dependents() {
        let graph = chain_with_island();
        let order = graph.deploy_order().expect("order");
        let mut step = Scripted {
            started: Vec::new(),
            fail: Some(id("a")),
        };
        let mut report = RunReport::new(Uuid::new_v4(), RunMode::Deploy);
        execute(&graph, order, Flow::Deploy, 2, &mut step, &mut report).await;

        assert_eq!(step.started, vec![id("a"), id("island")]);
        assert_eq!(report.outcome(&id("island")), Some(&Outcome::Created));
        assert_eq!(
            report.outcome(&id("c")),
            Some(&Outcome::Skipped {
                blocked_by: id("a")
            })
        );
        assert_eq!(report.skipped().len(), 2);
    }

    #[tokio::test]
    async fn teardown_failure_skips_producers() {
        let graph = chain_with_island();
        let order = graph.teardown_order().expect("order");
        let mut step = Scripted {
            started: Vec::new(),
            fail: Some(id("c")),
        };
        let mut report = RunReport::new(Uuid::new_v4(), RunMode::Remove);
        execute(&graph, order, Flow::Teardown, 1, &mut step, &mut report).await;
        assert_eq!(step.started, vec![id("island"), id("c")]);
        assert_eq!(
            report.outcome(&id("a")),
            Some(&Outcome::Skipped {
                blocked_by: id("c")
            })
        );
    }

    #[test]
    fn config_derives_from_cairn_config() {
        let config = EngineConfig::from(&CairnConfig {
            concurrency: 0,
            force: true,
            ..CairnConfig::default()
        });
        assert_eq!(config.concurrency, 1);
        assert!(config.force);
    }
}
