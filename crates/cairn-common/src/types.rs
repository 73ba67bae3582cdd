//! Domain primitive types used across the cairn workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::IDENTITY_SEPARATOR;
use crate::error::{CairnError, Result};

/// Output set produced by a lifecycle call: an ordered JSON object.
pub type Outputs = serde_json::Map<String, serde_json::Value>;

/// Hierarchical identity of a component instance.
///
/// Declaration keys from the root down, joined by `.`. Identities are
/// unique across a run and stable across runs for the same declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Creates a root identity from a single declaration key.
    ///
    /// # Errors
    ///
    /// Returns a structural error if `key` is not a valid declaration key.
    pub fn root(key: &str) -> Result<Self> {
        validate_key(key)?;
        Ok(Self(key.to_owned()))
    }

    /// Wraps an already-joined identity string without validation.
    ///
    /// Used for identities read back from persisted state.
    #[must_use]
    pub fn from_persisted(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Extends this identity with a child's declaration key.
    ///
    /// # Errors
    ///
    /// Returns a structural error if `key` is not a valid declaration key.
    pub fn child(&self, key: &str) -> Result<Self> {
        validate_key(key)?;
        Ok(Self(format!("{}{IDENTITY_SEPARATOR}{key}", self.0)))
    }

    /// Returns the identity of the enclosing instance, if any.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rsplit_once(IDENTITY_SEPARATOR)
            .map(|(parent, _)| Self(parent.to_owned()))
    }

    /// Returns the last declaration key.
    #[must_use]
    pub fn key(&self) -> &str {
        self.0
            .rsplit_once(IDENTITY_SEPARATOR)
            .map_or(self.0.as_str(), |(_, key)| key)
    }

    /// Iterates over the declaration keys from the root down.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(IDENTITY_SEPARATOR)
    }

    /// Returns whether this identity equals `ancestor` or lies below it.
    #[must_use]
    pub fn is_within(&self, ancestor: &Self) -> bool {
        self.0 == ancestor.0
            || self
                .0
                .strip_prefix(ancestor.0.as_str())
                .is_some_and(|rest| rest.starts_with(IDENTITY_SEPARATOR))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Characters allowed in a declaration key: ASCII letters, digits, `_`
/// and `-`. Variable expressions address keys with the same set.
#[must_use]
pub const fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Checks that a declaration key can be embedded in an identity and
/// addressed by a variable expression.
///
/// # Errors
///
/// Returns a structural error for empty keys or keys with any character
/// outside [`is_key_char`].
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CairnError::structural("declaration key must not be empty"));
    }
    if let Some(bad) = key.chars().find(|&c| !is_key_char(c)) {
        return Err(CairnError::structural(format!(
            "declaration key \"{key}\" contains reserved character {bad:?}"
        )));
    }
    Ok(())
}

/// Which lifecycle path a run drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Create or update every declared instance.
    Deploy,
    /// Tear down every persisted instance.
    Remove,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deploy => write!(f, "deploy"),
            Self::Remove => write!(f, "remove"),
        }
    }
}
