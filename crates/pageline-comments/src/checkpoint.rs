//! Durable record of completed identifiers

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use pageline_core::write_json_atomic;
use serde::{Deserialize, Serialize};

use crate::state::ItemId;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    #[serde(rename = "completed_post_ids", default)]
    pub completed: BTreeSet<String>,
    #[serde(rename = "total_comments_downloaded", default)]
    pub total_records: u64,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl CheckpointState {
    pub fn is_completed(&self, id: &ItemId) -> bool {
        self.completed.contains(&id.key())
    }

    /// Mark `id` done and add its record count.
    pub fn record(&mut self, id: &ItemId, count: u64, at: DateTime<Utc>) {
        self.completed.insert(id.key());
        self.total_records += count;
        self.last_updated = Some(at);
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }
}

/// Checkpoint file location plus load/save/reset
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Empty state when no checkpoint exists; corrupt content is an error.
    pub fn load(&self) -> anyhow::Result<CheckpointState> {
        if !self.path.exists() {
            return Ok(CheckpointState::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Cannot read checkpoint {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Corrupt checkpoint {}", self.path.display()))
    }

    pub fn save(&self, state: &CheckpointState) -> anyhow::Result<()> {
        write_json_atomic(&self.path, state)
            .with_context(|| format!("Cannot save checkpoint {}", self.path.display()))
    }

    pub fn reset(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Cannot remove checkpoint {}", self.path.display())),
        }
    }
}
