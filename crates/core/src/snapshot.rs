//! Persisted run artifacts.
//!
//! After a run reaches a terminal state, the full `ConversationState`
//! (including the hop and validation logs) is written as a JSON snapshot
//! so the run can be inspected and replayed offline.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::{ConversationState, RunOutcome};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub state: ConversationState,
}

impl RunSnapshot {
    pub fn new(run_id: impl Into<String>, state: ConversationState) -> Self {
        Self { run_id: run_id.into(), created_at: Utc::now(), state }
    }

    pub fn outcome_kind(&self) -> &'static str {
        match self.state.outcome() {
            Some(RunOutcome::Delivered { .. }) => "delivered",
            Some(RunOutcome::Escalated { .. }) => "escalated",
            None => "incomplete",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub run_id: String,
    pub conversation_id: String,
    pub outcome: String,
    pub hops: usize,
    pub validation_attempts: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io failure at `{path}`: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("snapshot encoding failed: {0}")]
    Encode(String),
    #[error("snapshot `{path}` could not be decoded: {message}")]
    Decode { path: PathBuf, message: String },
    #[error("no snapshot found for run `{run_id}`")]
    NotFound { run_id: String },
}

#[derive(Clone, Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&self, snapshot: &RunSnapshot) -> Result<PathBuf, SnapshotError> {
        fs::create_dir_all(&self.dir)
            .map_err(|source| SnapshotError::Io { path: self.dir.clone(), source })?;

        let path = self.path_for(&snapshot.run_id);
        let encoded = serde_json::to_string_pretty(snapshot)
            .map_err(|error| SnapshotError::Encode(error.to_string()))?;
        fs::write(&path, encoded)
            .map_err(|source| SnapshotError::Io { path: path.clone(), source })?;
        Ok(path)
    }

    pub fn load(&self, run_id: &str) -> Result<RunSnapshot, SnapshotError> {
        let path = self.path_for(run_id);
        if !path.exists() {
            return Err(SnapshotError::NotFound { run_id: run_id.to_string() });
        }
        let raw =
            fs::read_to_string(&path).map_err(|source| SnapshotError::Io { path: path.clone(), source })?;
        serde_json::from_str(&raw)
            .map_err(|error| SnapshotError::Decode { path, message: error.to_string() })
    }

    /// Summaries of every snapshot in the store, newest first.
    pub fn list(&self) -> Result<Vec<SnapshotSummary>, SnapshotError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir)
            .map_err(|source| SnapshotError::Io { path: self.dir.clone(), source })?;

        let mut summaries = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|source| SnapshotError::Io { path: self.dir.clone(), source })?;
            let path = entry.path();
            if path.extension().and_then(|extension| extension.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read_to_string(&path)
                .map_err(|source| SnapshotError::Io { path: path.clone(), source })?;
            let snapshot: RunSnapshot = serde_json::from_str(&raw)
                .map_err(|error| SnapshotError::Decode { path, message: error.to_string() })?;
            summaries.push(SnapshotSummary {
                run_id: snapshot.run_id.clone(),
                conversation_id: snapshot.state.conversation_id.0.clone(),
                outcome: snapshot.outcome_kind().to_string(),
                hops: snapshot.state.hops().len(),
                validation_attempts: snapshot.state.validation_attempts().len(),
                created_at: snapshot.created_at,
            });
        }

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }
}
