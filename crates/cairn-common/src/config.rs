//! Global configuration model for a cairn run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for a cairn run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CairnConfig {
    /// Path to the JSON state file.
    pub state_file: PathBuf,
    /// Maximum number of lifecycle calls in flight at once.
    pub concurrency: usize,
    /// Suppress provisioner log output routed through the run context.
    pub silent: bool,
    /// Call `deploy` even when inputs match the persisted state.
    pub force: bool,
}

impl CairnConfig {
    /// Returns the concurrency limit, never below one.
    #[must_use]
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}

impl Default for CairnConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from(crate::constants::DEFAULT_STATE_FILE),
            concurrency: crate::constants::DEFAULT_CONCURRENCY,
            silent: false,
            force: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sequential_and_verbose() {
        let config = CairnConfig::default();
        assert_eq!(config.concurrency, 1);
        assert!(!config.silent);
        assert!(!config.force);
        assert_eq!(config.state_file, PathBuf::from(".cairn/state.json"));
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        let config = CairnConfig {
            concurrency: 0,
            ..CairnConfig::default()
        };
        assert_eq!(config.effective_concurrency(), 1);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: CairnConfig =
            serde_json::from_str(r#"{"concurrency": 4}"#).expect("deserialize");
        assert_eq!(config.concurrency, 4);
        assert!(!config.force);
    }
}
