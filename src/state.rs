use crate::config::ConvsearchDirs;
use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Indexing progress for a single log file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileProgress {
    /// Byte offset up to which ingestion has durably completed. Overwritten
    /// on every update, never rolled back.
    #[serde(default)]
    pub last_byte_offset: u64,
    /// Cumulative count of indexed messages; accumulates across runs.
    #[serde(default)]
    pub indexed_count: u64,
    /// ISO-8601 timestamp of the last successful update.
    #[serde(default)]
    pub last_indexed: String,
}

/// Per-project indexing state, persisted as one JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectState {
    /// Vector store addressing key. Assigned once from the project name and
    /// never regenerated afterwards.
    pub collection_name: String,
    #[serde(default)]
    pub files: BTreeMap<String, FileProgress>,
}

/// Aggregate view over a project's tracked files.
#[derive(Debug, Clone, Serialize)]
pub struct StateSummary {
    pub project: String,
    pub collection_name: String,
    pub files_tracked: usize,
    pub total_indexed: u64,
}

/// Manages per-project state files under the configured state directory.
///
/// Every update is a read-modify-write of the whole project document, so
/// concurrent writers to the same project need external serialization.
pub struct StateStore {
    base_dir: PathBuf,
}

impl StateStore {
    /// Creates a store rooted at the configured state directory.
    pub fn new() -> Self {
        StateStore {
            base_dir: ConvsearchDirs::new().state_dir(),
        }
    }

    /// Creates a store rooted at an explicit directory.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        StateStore {
            base_dir: base_dir.into(),
        }
    }

    fn project_dir(&self, project: &str) -> PathBuf {
        self.base_dir.join(safe_project_name(project))
    }

    fn state_file(&self, project: &str) -> PathBuf {
        self.project_dir(project).join("state.json")
    }

    /// Path of the embedded backend's vector database for a project.
    pub fn db_path(&self, project: &str) -> PathBuf {
        self.project_dir(project).join("vectors.db")
    }

    /// Loads a project's state, or a fresh default with a newly derived
    /// collection name when none has been persisted yet.
    pub fn load(&self, project: &str) -> Result<ProjectState> {
        let state_file = self.state_file(project);
        if !state_file.exists() {
            return Ok(ProjectState {
                collection_name: collection_name_for(project),
                files: BTreeMap::new(),
            });
        }

        let data = std::fs::read_to_string(&state_file)
            .with_context(|| format!("Failed to read state file {:?}", state_file))?;
        serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse state file {:?}", state_file))
    }

    /// Persists a project's state document.
    pub fn save(&self, project: &str, state: &ProjectState) -> Result<()> {
        let state_file = self.state_file(project);
        if let Some(parent) = state_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&state_file, serde_json::to_string_pretty(state)?)
            .with_context(|| format!("Failed to write state file {:?}", state_file))?;
        debug!("Saved state for project {} to {:?}", project, state_file);
        Ok(())
    }

    /// Last durably indexed byte offset for a file; 0 for an untracked file,
    /// meaning "start from the beginning".
    pub fn offset(&self, project: &str, filename: &str) -> Result<u64> {
        let state = self.load(project)?;
        Ok(state
            .files
            .get(filename)
            .map(|f| f.last_byte_offset)
            .unwrap_or(0))
    }

    /// Records progress for a file after a successful store write: the offset
    /// is overwritten with the scan's end-of-data position and `added` is
    /// merged into the running count.
    pub fn record_progress(
        &self,
        project: &str,
        filename: &str,
        new_offset: u64,
        added: u64,
    ) -> Result<()> {
        let mut state = self.load(project)?;
        let file_state = state.files.entry(filename.to_string()).or_default();
        file_state.last_byte_offset = new_offset;
        file_state.indexed_count += added;
        file_state.last_indexed = Utc::now().to_rfc3339();
        self.save(project, &state)?;
        info!(
            "Recorded progress for {}/{}: offset={} (+{} indexed)",
            project, filename, new_offset, added
        );
        Ok(())
    }

    /// Lists all projects with a persisted state file, sorted.
    pub fn list_projects(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.base_dir) else {
            return Vec::new();
        };
        let mut projects: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir() && path.join("state.json").is_file())
            .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        projects.sort();
        projects
    }

    /// Aggregate statistics for a project.
    pub fn summary(&self, project: &str) -> Result<StateSummary> {
        let state = self.load(project)?;
        Ok(StateSummary {
            project: project.to_string(),
            collection_name: state.collection_name,
            files_tracked: state.files.len(),
            total_indexed: state.files.values().map(|f| f.indexed_count).sum(),
        })
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Filesystem-safe form of a project name.
fn safe_project_name(project: &str) -> String {
    project.replace('/', "-").trim_start_matches('-').to_string()
}

/// Derives the vector collection name for a project. Deterministic, so the
/// assignment is stable across runs.
pub fn collection_name_for(project: &str) -> String {
    let safe = project.replace('/', "-").replace('-', "_");
    format!("convsearch_{}", safe.trim_start_matches('_'))
}
