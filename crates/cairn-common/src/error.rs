//! Unified error types for the cairn workspace.
//!
//! Declaration and graph problems (`Structural`, `UnknownReference`,
//! `CyclicDependency`) abort a run before any lifecycle call is made.
//! `Lifecycle` errors are reported per instance and only halt the
//! instances that depend on the failed one.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum CairnError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A component declaration is malformed.
    #[error("structural error: {message}")]
    Structural {
        /// Description of the malformed declaration.
        message: String,
    },

    /// A variable expression addresses an identity or output that does not exist.
    #[error("unknown reference `{expression}` in {consumer}: {reason}")]
    UnknownReference {
        /// Identity of the instance holding the expression.
        consumer: String,
        /// The expression text, including `${` and `}`.
        expression: String,
        /// What could not be found.
        reason: String,
    },

    /// The dependency graph contains a cycle.
    #[error("cyclic dependency detected between: {}", members.join(" -> "))]
    CyclicDependency {
        /// Identities taking part in the cycle.
        members: Vec<String>,
    },

    /// A provisioner's lifecycle call failed.
    #[error("{operation} failed for {instance}: {message}")]
    Lifecycle {
        /// Identity of the failing instance.
        instance: String,
        /// Lifecycle operation (`deploy`, `remove`).
        operation: &'static str,
        /// Provisioner-supplied failure description.
        message: String,
    },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// YAML deserialization failed.
    #[error("yaml error: {source}")]
    Yaml {
        /// Underlying YAML error.
        #[from]
        source: serde_yaml::Error,
    },
}

impl CairnError {
    /// Shorthand for a [`CairnError::Structural`] error.
    pub fn structural(message: impl Into<String>) -> Self {
        Self::Structural {
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CairnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_members_in_order() {
        let err = CairnError::CyclicDependency {
            members: vec!["app.a".into(), "app.b".into()],
        };
        assert_eq!(
            err.to_string(),
            "cyclic dependency detected between: app.a -> app.b"
        );
    }

    #[test]
    fn lifecycle_message_names_instance_and_operation() {
        let err = CairnError::Lifecycle {
            instance: "app.role".into(),
            operation: "deploy",
            message: "throttled".into(),
        };
        assert_eq!(err.to_string(), "deploy failed for app.role: throttled");
    }
}
