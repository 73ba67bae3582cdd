//! Persistent state management.
//!
//! Every successfully deployed instance has one [`StateEntry`], keyed by
//! identity. Entries are committed one identity at a time as nodes finish,
//! so a run that fails halfway leaves everything it completed on record.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use cairn_common::constants::STATE_FORMAT_VERSION;
use cairn_common::error::{CairnError, Result};
use cairn_common::types::{InstanceId, Outputs};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::component::PriorInstance;

/// Persistent record of one deployed instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    /// Component type used for the deploy.
    pub component_type: String,
    /// Resolved inputs of the last successful deploy.
    pub inputs: Outputs,
    /// Outputs of the last successful deploy.
    pub outputs: Outputs,
    /// Producers this instance consumed at deploy time.
    #[serde(default)]
    pub dependencies: Vec<InstanceId>,
    /// When the entry was written.
    pub updated_at: DateTime<Utc>,
}

impl StateEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(
        component_type: impl Into<String>,
        inputs: Outputs,
        outputs: Outputs,
        dependencies: Vec<InstanceId>,
    ) -> Self {
        Self {
            component_type: component_type.into(),
            inputs,
            outputs,
            dependencies,
            updated_at: Utc::now(),
        }
    }

    /// The view of this entry handed to provisioners.
    #[must_use]
    pub fn prior(&self) -> PriorInstance {
        PriorInstance {
            component_type: self.component_type.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
        }
    }
}

/// The whole state file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// On-disk format version.
    pub version: u32,
    /// Entries keyed by identity.
    #[serde(default)]
    pub instances: BTreeMap<InstanceId, StateEntry>,
}

impl Default for StateRecord {
    fn default() -> Self {
        Self {
            version: STATE_FORMAT_VERSION,
            instances: BTreeMap::new(),
        }
    }
}

impl StateRecord {
    /// Returns the entry for `id`.
    #[must_use]
    pub fn get(&self, id: &InstanceId) -> Option<&StateEntry> {
        self.instances.get(id)
    }

    /// Entries at or below `root`.
    #[must_use]
    pub fn subtree(&self, root: &InstanceId) -> BTreeMap<InstanceId, StateEntry> {
        self.instances
            .iter()
            .filter(|(id, _)| id.is_within(root))
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns whether no instance is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn check_version(&self) -> Result<()> {
        if self.version == STATE_FORMAT_VERSION {
            Ok(())
        } else {
            Err(CairnError::Config {
                message: format!(
                    "unsupported state format version {} (expected {STATE_FORMAT_VERSION})",
                    self.version
                ),
            })
        }
    }
}

/// Storage backend for [`StateRecord`]s.
///
/// `commit` must be atomic per identity; implementations serialize
/// concurrent commits internally.
pub trait StateStore: Send + Sync + fmt::Debug {
    /// Loads the full record; a store with nothing saved yields an empty one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read or parsed.
    fn load(&self) -> Result<StateRecord>;

    /// Loads the entries for the given identities that exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read or parsed.
    fn load_identities(&self, ids: &[InstanceId]) -> Result<BTreeMap<InstanceId, StateEntry>> {
        let mut record = self.load()?;
        Ok(ids
            .iter()
            .filter_map(|id| record.instances.remove(id).map(|entry| (id.clone(), entry)))
            .collect())
    }

    /// Replaces the full record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn save(&self, record: &StateRecord) -> Result<()>;

    /// Upserts (`Some`) or deletes (`None`) the entry for `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or written.
    fn commit(&self, id: &InstanceId, entry: Option<StateEntry>) -> Result<()>;
}

fn apply(record: &mut StateRecord, id: &InstanceId, entry: Option<StateEntry>) {
    match entry {
        Some(entry) => {
            let _ = record.instances.insert(id.clone(), entry);
        }
        None => {
            let _ = record.instances.remove(id);
        }
    }
}

/// Keeps state in process memory.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    record: Mutex<StateRecord>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<StateRecord> {
        Ok(self
            .record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, record: &StateRecord) -> Result<()> {
        record.check_version()?;
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = record.clone();
        Ok(())
    }

    fn commit(&self, id: &InstanceId, entry: Option<StateEntry>) -> Result<()> {
        let mut record = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut record, id, entry);
        Ok(())
    }
}

/// Keeps state in a JSON file.
///
/// Writes go to a temporary file in the same directory that then replaces
/// the state file, so a crash never leaves a truncated record behind.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStateStore {
    /// Creates a store backed by `path`. The file need not exist yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> CairnError {
        CairnError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn read(&self) -> Result<StateRecord> {
        tracing::debug!(path = %self.path.display(), "loading state");
        if !self.path.exists() {
            return Ok(StateRecord::default());
        }
        let text = std::fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        let record: StateRecord = serde_json::from_str(&text)?;
        record.check_version()?;
        Ok(record)
    }

    fn write(&self, record: &StateRecord) -> Result<()> {
        record.check_version()?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;

        let mut file = tempfile::NamedTempFile::new_in(dir).map_err(|e| self.io_error(e))?;
        serde_json::to_writer_pretty(&mut file, record)?;
        file.write_all(b"\n").map_err(|e| self.io_error(e))?;
        file.as_file().sync_all().map_err(|e| self.io_error(e))?;
        let _ = file.persist(&self.path).map_err(|e| self.io_error(e.error))?;
        tracing::debug!(path = %self.path.display(), entries = record.len(), "state saved");
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<StateRecord> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read()
    }

    fn save(&self, record: &StateRecord) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write(record)
    }

    fn commit(&self, id: &InstanceId, entry: Option<StateEntry>) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut record = self.read()?;
        apply(&mut record, id, entry);
        self.write(&record)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn id(s: &str) -> InstanceId {
        InstanceId::from_persisted(s)
    }

    fn entry(component_type: &str, deps: &[&str]) -> StateEntry {
        StateEntry::new(
            component_type,
            Outputs::new(),
            json!({"id": "x1"}).as_object().cloned().expect("object"),
            deps.iter().map(|d| id(d)).collect(),
        )
    }

    #[test]
    fn subtree_respects_identity_boundaries() {
        let mut record = StateRecord::default();
        let _ = record.instances.insert(id("app"), entry("Declarative", &[]));
        let _ = record.instances.insert(id("app.db"), entry("Static", &[]));
        let _ = record.instances.insert(id("application"), entry("Static", &[]));
        let subtree = record.subtree(&id("app"));
        assert_eq!(subtree.keys().collect::<Vec<_>>(), vec![&id("app"), &id("app.db")]);
    }

    #[test]
    fn memory_store_commits_and_deletes() {
        let store = MemoryStateStore::new();
        store.commit(&id("app.a"), Some(entry("Static", &[]))).expect("commit");
        store.commit(&id("app.b"), Some(entry("Static", &["app.a"]))).expect("commit");
        store.commit(&id("app.a"), None).expect("delete");
        let record = store.load().expect("load");
        assert_eq!(record.len(), 1);
        assert_eq!(record.get(&id("app.b")).expect("b").dependencies, vec![id("app.a")]);
    }

    #[test]
    fn load_identities_skips_missing() {
        let store = MemoryStateStore::new();
        store.commit(&id("app.a"), Some(entry("Static", &[]))).expect("commit");
        let found = store
            .load_identities(&[id("app.a"), id("app.ghost")])
            .expect("load");
        assert_eq!(found.len(), 1);
        assert!(found.contains_key(&id("app.a")));
    }

    #[test]
    fn missing_file_is_empty_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStateStore::new(dir.path().join("state.json"));
        assert!(store.load().expect("load").is_empty());
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("state.json");
        FileStateStore::new(&path)
            .commit(&id("app.a"), Some(entry("Static", &[])))
            .expect("commit");

        let reopened = FileStateStore::new(&path);
        let record = reopened.load().expect("load");
        assert_eq!(record.version, STATE_FORMAT_VERSION);
        assert_eq!(
            record.get(&id("app.a")).expect("entry").outputs.get("id"),
            Some(&json!("x1"))
        );

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert!(raw["instances"]["app.a"]["updated_at"].is_string());
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"version": 7, "instances": {}}"#).expect("write");
        let err = FileStateStore::new(&path).load().unwrap_err();
        assert!(matches!(err, CairnError::Config { .. }), "got: {err}");
    }
}
