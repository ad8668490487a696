//! Durable workflow state store.
//!
//! `FileStore` keeps one pretty-printed JSON record per workflow under
//! `{root}/{workflow_id}/adw_state.json`. Writes go through a temp file and a
//! rename so a record is either fully replaced or untouched. Each workflow
//! directory carries a `.lock` file; `save` takes it non-blocking and fails
//! with `ConcurrentModification` when another writer holds it or has
//! committed a newer revision since the caller loaded the record.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use tracing::{debug, warn};

use super::{HistoryEntry, IssueNumber, WorkflowId, WorkflowState};
use crate::errors::StoreError;

pub const STATE_FILE: &str = "adw_state.json";
const LOCK_FILE: &str = ".lock";
const ISSUE_INDEX_DIR: &str = "issues";

/// Persistence contract for workflow records.
pub trait WorkflowStore: Send + Sync {
    /// Create a fresh PLAN-phase record. Fails with `DuplicateWorkflow` while
    /// the issue already has a non-terminal workflow.
    fn create(&self, issue: IssueNumber) -> Result<WorkflowState, StoreError>;

    fn load(&self, workflow_id: &WorkflowId) -> Result<WorkflowState, StoreError>;

    /// Persist `state` with `entry` appended to its history. On success the
    /// caller's copy is replaced by what was written (new revision included);
    /// on failure both the store and `state` are left unchanged.
    fn save(&self, state: &mut WorkflowState, entry: HistoryEntry) -> Result<(), StoreError>;

    /// Non-terminal workflows, oldest first.
    fn list_active(&self) -> Result<Vec<WorkflowState>, StoreError>;

    /// Every record, oldest first.
    fn list_all(&self) -> Result<Vec<WorkflowState>, StoreError>;

    fn find_active(&self, issue: IssueNumber) -> Result<Option<WorkflowState>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let index = root.join(ISSUE_INDEX_DIR);
        fs::create_dir_all(&index).map_err(|e| StoreError::io(&index, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workflow_dir(&self, workflow_id: &WorkflowId) -> PathBuf {
        self.root.join(workflow_id.as_str())
    }

    fn state_path(&self, workflow_id: &WorkflowId) -> PathBuf {
        self.workflow_dir(workflow_id).join(STATE_FILE)
    }

    fn active_pointer(&self, issue: IssueNumber) -> PathBuf {
        self.root
            .join(ISSUE_INDEX_DIR)
            .join(format!("{}.active", issue.0))
    }

    fn read_record(path: &Path) -> Result<Option<WorkflowState>, StoreError> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            })
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let tmp = path.with_extension("tmp");
        let mut file = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
        file.write_all(bytes).map_err(|e| StoreError::io(&tmp, e))?;
        file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
        drop(file);
        fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
    }

    fn write_record(path: &Path, state: &WorkflowState) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(state).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        Self::write_atomic(path, &json)
    }

    fn open_lock_file(path: &Path) -> Result<File, StoreError> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| StoreError::io(path, e))
    }

    fn check_immutable(current: &WorkflowState, next: &WorkflowState) -> Result<(), StoreError> {
        let violated = |field: &'static str| StoreError::ImmutableField {
            workflow_id: current.workflow_id.clone(),
            field,
        };
        if next.workflow_id != current.workflow_id {
            return Err(violated("workflow_id"));
        }
        if next.issue_reference != current.issue_reference {
            return Err(violated("issue_reference"));
        }
        if current.classification != super::IssueClass::Unclassified
            && next.classification != current.classification
        {
            return Err(violated("classification"));
        }
        if current.branch_name.is_some() && next.branch_name != current.branch_name {
            return Err(violated("branch_name"));
        }
        Ok(())
    }
}

impl WorkflowStore for FileStore {
    fn create(&self, issue: IssueNumber) -> Result<WorkflowState, StoreError> {
        // Serialise creations for the same issue across processes.
        let index_lock_path = self
            .root
            .join(ISSUE_INDEX_DIR)
            .join(format!("{}.lock", issue.0));
        let index_lock = Self::open_lock_file(&index_lock_path)?;
        FileExt::lock_exclusive(&index_lock).map_err(|e| StoreError::io(&index_lock_path, e))?;

        if let Some(active) = self.find_active(issue)? {
            return Err(StoreError::DuplicateWorkflow {
                issue,
                workflow_id: active.workflow_id,
            });
        }

        let workflow_id = loop {
            let candidate = WorkflowId::generate();
            let dir = self.workflow_dir(&candidate);
            match fs::create_dir(&dir) {
                Ok(()) => break candidate,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(workflow_id = %candidate, "workflow id collision, regenerating");
                    continue;
                }
                Err(e) => return Err(StoreError::io(&dir, e)),
            }
        };

        let state = WorkflowState::new(workflow_id, issue);
        Self::write_record(&self.state_path(&state.workflow_id), &state)?;
        Self::write_atomic(
            &self.active_pointer(issue),
            state.workflow_id.as_str().as_bytes(),
        )?;

        debug!(workflow_id = %state.workflow_id, issue = %issue, "created workflow");
        Ok(state)
    }

    fn load(&self, workflow_id: &WorkflowId) -> Result<WorkflowState, StoreError> {
        Self::read_record(&self.state_path(workflow_id))?.ok_or_else(|| StoreError::NotFound {
            workflow_id: workflow_id.to_string(),
        })
    }

    fn save(&self, state: &mut WorkflowState, entry: HistoryEntry) -> Result<(), StoreError> {
        let dir = self.workflow_dir(&state.workflow_id);
        if !dir.is_dir() {
            return Err(StoreError::NotFound {
                workflow_id: state.workflow_id.to_string(),
            });
        }

        let lock_path = dir.join(LOCK_FILE);
        let lock = Self::open_lock_file(&lock_path)?;
        if let Err(e) = FileExt::try_lock_exclusive(&lock) {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(StoreError::ConcurrentModification {
                    workflow_id: state.workflow_id.clone(),
                });
            }
            return Err(StoreError::io(&lock_path, e));
        }

        let path = self.state_path(&state.workflow_id);
        let current = Self::read_record(&path)?.ok_or_else(|| StoreError::NotFound {
            workflow_id: state.workflow_id.to_string(),
        })?;

        if current.revision != state.revision {
            return Err(StoreError::ConcurrentModification {
                workflow_id: state.workflow_id.clone(),
            });
        }
        if !current.current_phase.can_transition_to(state.current_phase) {
            return Err(StoreError::InvalidTransition {
                workflow_id: state.workflow_id.clone(),
                from: current.current_phase,
                to: state.current_phase,
            });
        }
        Self::check_immutable(&current, state)?;

        let mut next = state.clone();
        next.phase_history.push(entry);
        next.revision = current.revision + 1;
        next.updated_at = Utc::now();
        Self::write_record(&path, &next)?;

        *state = next;
        Ok(())
    }

    fn list_active(&self) -> Result<Vec<WorkflowState>, StoreError> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|s| !s.is_terminal())
            .collect())
    }

    fn list_all(&self) -> Result<Vec<WorkflowState>, StoreError> {
        let entries = fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        let mut states = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            let path = entry.path().join(STATE_FILE);
            match Self::read_record(&path) {
                Ok(Some(state)) => states.push(state),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable workflow record"),
            }
        }
        states.sort_by_key(|s| s.created_at);
        Ok(states)
    }

    fn find_active(&self, issue: IssueNumber) -> Result<Option<WorkflowState>, StoreError> {
        let pointer = self.active_pointer(issue);
        let raw = match fs::read_to_string(&pointer) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&pointer, e)),
        };
        let Ok(workflow_id) = raw.parse::<WorkflowId>() else {
            warn!(path = %pointer.display(), "ignoring malformed active-workflow pointer");
            return Ok(None);
        };
        match self.load(&workflow_id) {
            Ok(state) if !state.is_terminal() => Ok(Some(state)),
            Ok(_) | Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
