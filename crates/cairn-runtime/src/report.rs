//! Per-run outcome reporting.

use std::collections::BTreeMap;
use std::fmt;

use cairn_common::types::{InstanceId, Outputs, RunMode};
use uuid::Uuid;

/// What happened to one instance during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Deployed for the first time.
    Created,
    /// Redeployed with changed inputs.
    Updated,
    /// Removed under its old type and created under its new one.
    Replaced,
    /// Inputs matched the previous run; the provisioner was not called.
    Unchanged,
    /// Torn down.
    Removed,
    /// The lifecycle call, or input resolution, failed.
    Failed {
        /// Failure description.
        error: String,
    },
    /// Never attempted because something it waited on failed.
    Skipped {
        /// The failed instance that blocked this one.
        blocked_by: InstanceId,
    },
}

impl Outcome {
    /// Returns whether the instance reached its requested state.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. } | Self::Skipped { .. })
    }

    /// Short lowercase label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Replaced => "replaced",
            Self::Unchanged => "unchanged",
            Self::Removed => "removed",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { error } => write!(f, "failed: {error}"),
            Self::Skipped { blocked_by } => write!(f, "skipped (blocked by {blocked_by})"),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// Outcome of one instance, in the order outcomes were decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReport {
    /// Instance identity.
    pub id: InstanceId,
    /// What happened.
    pub outcome: Outcome,
}

/// Summary of a deploy or remove run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Identifier attached to every log line of the run.
    pub run_id: Uuid,
    /// Which lifecycle path ran.
    pub mode: RunMode,
    /// Per-instance outcomes.
    pub nodes: Vec<NodeReport>,
    /// Outputs of every instance that ended in a deployed state.
    pub outputs: BTreeMap<InstanceId, Outputs>,
}

impl RunReport {
    /// Creates an empty report.
    #[must_use]
    pub const fn new(run_id: Uuid, mode: RunMode) -> Self {
        Self {
            run_id,
            mode,
            nodes: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Records an outcome, plus any outputs its lifecycle call returned.
    pub fn record(&mut self, id: InstanceId, outcome: Outcome, outputs: Option<Outputs>) {
        if let Some(outputs) = outputs {
            let _ = self.outputs.insert(id.clone(), outputs);
        }
        self.nodes.push(NodeReport { id, outcome });
    }

    /// Outcome recorded for `id`, if any.
    #[must_use]
    pub fn outcome(&self, id: &InstanceId) -> Option<&Outcome> {
        self.nodes.iter().find(|n| n.id == *id).map(|n| &n.outcome)
    }

    /// Returns whether any instance failed or was skipped.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.nodes.iter().any(|n| !n.outcome.is_success())
    }

    /// Identities that reached their requested state.
    #[must_use]
    pub fn succeeded(&self) -> Vec<&InstanceId> {
        self.nodes
            .iter()
            .filter(|n| n.outcome.is_success())
            .map(|n| &n.id)
            .collect()
    }

    /// Failed identities with their error messages.
    #[must_use]
    pub fn failed(&self) -> Vec<(&InstanceId, &str)> {
        self.nodes
            .iter()
            .filter_map(|n| match &n.outcome {
                Outcome::Failed { error } => Some((&n.id, error.as_str())),
                _ => None,
            })
            .collect()
    }

    /// Skipped identities with the failure that blocked them.
    #[must_use]
    pub fn skipped(&self) -> Vec<(&InstanceId, &InstanceId)> {
        self.nodes
            .iter()
            .filter_map(|n| match &n.outcome {
                Outcome::Skipped { blocked_by } => Some((&n.id, blocked_by)),
                _ => None,
            })
            .collect()
    }

    /// Outputs recorded for `id`.
    #[must_use]
    pub fn outputs_of(&self, id: &InstanceId) -> Option<&Outputs> {
        self.outputs.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> InstanceId {
        InstanceId::from_persisted(s)
    }

    #[test]
    fn failures_and_skips_are_reported() {
        let mut report = RunReport::new(Uuid::new_v4(), RunMode::Deploy);
        report.record(id("app.a"), Outcome::Created, Some(Outputs::new()));
        report.record(
            id("app.b"),
            Outcome::Failed {
                error: "quota exceeded".into(),
            },
            None,
        );
        report.record(
            id("app.c"),
            Outcome::Skipped {
                blocked_by: id("app.b"),
            },
            None,
        );

        assert!(report.has_failures());
        assert_eq!(report.succeeded(), vec![&id("app.a")]);
        assert_eq!(report.failed(), vec![(&id("app.b"), "quota exceeded")]);
        assert_eq!(report.skipped(), vec![(&id("app.c"), &id("app.b"))]);
        assert!(report.outputs_of(&id("app.a")).is_some());
        assert!(report.outputs_of(&id("app.b")).is_none());
    }

    #[test]
    fn outcome_display() {
        assert_eq!(Outcome::Unchanged.to_string(), "unchanged");
        assert_eq!(
            Outcome::Skipped {
                blocked_by: id("app.a")
            }
            .to_string(),
            "skipped (blocked by app.a)"
        );
    }
}
