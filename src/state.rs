//! Run state persistence
//!
//! The orchestrator overwrites the whole [`SessionSnapshot`] after every
//! transition, so an interrupted run can be inspected, paused, resumed or
//! restarted from the last checkpoint. Absence of a snapshot means there is
//! no active orchestration.

use crate::error::{ConductorError, Result};
use crate::reconcile::ExpectedItemResult;
use crate::session::{AgentSummary, SessionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Persisted state of the active run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub epic_id: String,
    #[serde(default)]
    pub epic_name: String,
    /// One entry per worker slot, in slot order
    #[serde(default)]
    pub agents: Vec<AgentSummary>,
    /// Identifiers of items that finished successfully
    #[serde(default)]
    pub completed: Vec<String>,
    /// Claimed outcome of every finished item
    #[serde(default)]
    pub outcomes: Vec<ExpectedItemResult>,
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,
    /// Every worker was paused: no new assignments until a resume of all
    #[serde(default)]
    pub global_pause: bool,
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn new(epic_id: impl Into<String>, epic_name: impl Into<String>) -> Self {
        Self {
            epic_id: epic_id.into(),
            epic_name: epic_name.into(),
            agents: Vec::new(),
            completed: Vec::new(),
            outcomes: Vec::new(),
            paused_at: None,
            global_pause: false,
            updated_at: Utc::now(),
        }
    }

    pub fn agent(&self, worker_id: &str) -> Option<&AgentSummary> {
        self.agents.iter().find(|a| a.id == worker_id)
    }

    pub fn worker_ids(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.id.clone()).collect()
    }

    /// Count of agents in each status
    pub fn count(&self, status: SessionStatus) -> usize {
        self.agents.iter().filter(|a| a.status == status).count()
    }
}

/// Storage for the active run's snapshot
pub trait StateStore: Send + Sync {
    /// Load the snapshot, `None` when no run is recorded
    fn load(&self) -> Result<Option<SessionSnapshot>>;

    /// Overwrite the snapshot
    fn save(&self, snapshot: &SessionSnapshot) -> Result<()>;

    /// Forget the active run
    fn clear(&self) -> Result<()>;
}

/// JSON file-based state store
///
/// Atomic writes via temp file + rename to prevent corruption.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Option<SessionSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let json = std::fs::read_to_string(&self.path)
            .map_err(|e| io_error("read state file", &self.path, e))?;

        let snapshot: SessionSnapshot = serde_json::from_str(&json).map_err(|e| {
            ConductorError::invalid(format!(
                "Failed to parse state file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        tracing::debug!(
            path = %self.path.display(),
            epic = %snapshot.epic_id,
            agents = snapshot.agents.len(),
            "State loaded"
        );
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot)?;
        let tmp_path = self.path.with_extension("tmp");

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| io_error("create state directory", parent, e))?;
        }

        std::fs::write(&tmp_path, json)
            .map_err(|e| io_error("write state file", &tmp_path, e))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| io_error("replace state file", &self.path, e))?;

        tracing::debug!(path = %self.path.display(), "State saved");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "State cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove state file", &self.path, e)),
        }
    }
}

/// Keep the I/O kind, add the action and path to the message
fn io_error(action: &str, path: &Path, e: std::io::Error) -> ConductorError {
    ConductorError::Io(std::io::Error::new(
        e.kind(),
        format!("Failed to {} {}: {}", action, path.display(), e),
    ))
}

/// In-memory state store for testing
#[derive(Default)]
pub struct MemoryStateStore {
    state: std::sync::RwLock<Option<SessionSnapshot>>,
    saves: std::sync::atomic::AtomicUsize,
}

impl MemoryStateStore {
    /// Store pre-seeded with a snapshot
    pub fn with_snapshot(snapshot: SessionSnapshot) -> Self {
        Self {
            state: std::sync::RwLock::new(Some(snapshot)),
            saves: Default::default(),
        }
    }

    /// Number of `save` calls so far
    pub fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<SessionSnapshot>> {
        let state = self
            .state
            .read()
            .map_err(|e| ConductorError::invalid(format!("Failed to acquire state lock: {}", e)))?;
        Ok(state.clone())
    }

    fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|e| ConductorError::invalid(format!("Failed to acquire state lock: {}", e)))?;
        *state = Some(snapshot.clone());
        self.saves
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|e| ConductorError::invalid(format!("Failed to acquire state lock: {}", e)))?;
        *state = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> SessionSnapshot {
        let mut snapshot = SessionSnapshot::new("ENG", "Engine");
        let mut working = AgentSummary::idle("worker-1");
        working.status = SessionStatus::Working;
        working.task_id = Some("ENG-1-1".to_string());
        working.progress = 40;
        snapshot.agents.push(working);
        snapshot.agents.push(AgentSummary::idle("worker-2"));
        snapshot.completed.push("ENG-1-0".to_string());
        snapshot.outcomes.push(ExpectedItemResult {
            identifier: "ENG-1-0".to_string(),
            success: true,
        });
        snapshot
    }

    #[test]
    fn test_memory_store_save_load() {
        let store = MemoryStateStore::default();
        assert!(store.load().unwrap().is_none());

        store.save(&sample_snapshot()).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.epic_id, "ENG");
        assert_eq!(loaded.agents.len(), 2);
        assert_eq!(loaded.agent("worker-1").unwrap().progress, 40);
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn test_memory_store_clear() {
        let store = MemoryStateStore::with_snapshot(sample_snapshot());
        assert!(store.load().unwrap().is_some());
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn test_file_store_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStateStore::new(&path);

        store.save(&sample_snapshot()).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, sample_snapshot_with_time(&loaded));
        assert_eq!(loaded.worker_ids(), vec!["worker-1", "worker-2"]);
        assert_eq!(loaded.count(SessionStatus::Working), 1);
    }

    fn sample_snapshot_with_time(loaded: &SessionSnapshot) -> SessionSnapshot {
        let mut expected = sample_snapshot();
        expected.updated_at = loaded.updated_at;
        expected
    }

    #[test]
    fn test_file_store_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("nonexistent.json"));
        assert!(store.load().unwrap().is_none());
        assert!(store.clear().is_ok());
    }

    #[test]
    fn test_file_store_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("state.json");
        let store = FileStateStore::new(&path);
        store.save(&sample_snapshot()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_file_store_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStateStore::new(&path);
        store.save(&sample_snapshot()).unwrap();
        store.clear().unwrap();
        assert!(!path.exists());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_file_store_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not valid json").unwrap();

        let store = FileStateStore::new(&path);
        let result = store.load();
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");
        assert!(err.to_string().contains("Failed to parse state file"));
    }

    #[test]
    fn test_file_store_write_failure_is_io() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let store = FileStateStore::new(blocker.join("state.json"));
        let err = store.save(&sample_snapshot()).unwrap_err();
        assert_eq!(err.code(), "IO_ERROR");
        assert!(err.to_string().contains("create state directory"));
    }

    #[test]
    fn test_file_store_read_failure_is_io() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::create_dir(&path).unwrap();

        let err = FileStateStore::new(&path).load().unwrap_err();
        assert_eq!(err.code(), "IO_ERROR");
        assert!(err.to_string().contains("read state file"));
    }
}
