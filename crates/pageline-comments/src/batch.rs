//! Group files and the pending-group journal

use std::path::{Path, PathBuf};

use anyhow::Context;
use pageline_core::write_json_atomic;
use serde::{Deserialize, Serialize};

use crate::state::FetchOutcome;

const GROUP_PREFIX: &str = "batch_";
const GROUP_SUFFIX: &str = ".json";

/// `batch_00007.json`
pub fn group_file_name(sequence: u32) -> String {
    format!("{GROUP_PREFIX}{sequence:05}{GROUP_SUFFIX}")
}

/// Parse the sequence number back out of a group file path
pub fn sequence_of(path: &Path) -> Option<u32> {
    path.file_name()?
        .to_str()?
        .strip_prefix(GROUP_PREFIX)?
        .strip_suffix(GROUP_SUFFIX)?
        .parse()
        .ok()
}

/// First group number of a resumed run: `completed / group_size + 1`.
pub fn starting_sequence(completed: usize, group_size: usize) -> u32 {
    let groups = completed / group_size.max(1);
    u32::try_from(groups).unwrap_or(u32::MAX - 1) + 1
}

/// Read one group file
pub fn read_group(path: &Path) -> anyhow::Result<Vec<FetchOutcome>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read group file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Malformed group file {}", path.display()))
}

/// Writes numbered group files under one directory
#[derive(Debug, Clone)]
pub struct BatchWriter {
    dir: PathBuf,
    overwrite: bool,
}

impl BatchWriter {
    pub fn new(dir: impl Into<PathBuf>, overwrite: bool) -> Self {
        Self {
            dir: dir.into(),
            overwrite,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn path_for(&self, sequence: u32) -> PathBuf {
        self.dir.join(group_file_name(sequence))
    }

    pub fn exists(&self, sequence: u32) -> bool {
        self.path_for(sequence).exists()
    }

    /// Persist a new group. Refuses to clobber an existing file unless
    /// overwrite was enabled.
    pub fn write(&self, sequence: u32, outcomes: &[FetchOutcome]) -> anyhow::Result<PathBuf> {
        let path = self.path_for(sequence);
        anyhow::ensure!(
            self.overwrite || !path.exists(),
            "Group file {} already exists (use --overwrite to replace)",
            path.display()
        );
        self.persist(path, outcomes)
    }

    /// Rewrite a group that was reopened as the run's initial buffer.
    pub fn replace(&self, sequence: u32, outcomes: &[FetchOutcome]) -> anyhow::Result<PathBuf> {
        self.persist(self.path_for(sequence), outcomes)
    }

    fn persist(&self, path: PathBuf, outcomes: &[FetchOutcome]) -> anyhow::Result<PathBuf> {
        write_json_atomic(&path, outcomes)
            .with_context(|| format!("Cannot write group file {}", path.display()))?;
        log::debug!("Wrote {} ({} outcomes)", path.display(), outcomes.len());
        Ok(path)
    }

    /// Existing group files, sorted by name
    pub fn list(&self) -> anyhow::Result<Vec<PathBuf>> {
        list_groups(&self.dir)
    }
}

/// `batch_*.json` under `dir`, sorted by name. Missing dir is empty.
pub fn list_groups(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let pattern = dir.join(format!("{GROUP_PREFIX}*{GROUP_SUFFIX}"));
    let pattern = pattern
        .to_str()
        .with_context(|| format!("Non UTF-8 batch directory {}", dir.display()))?;
    let mut paths: Vec<PathBuf> = glob::glob(pattern)
        .context("Invalid group glob pattern")?
        .filter_map(Result::ok)
        .filter(|p| sequence_of(p).is_some())
        .collect();
    paths.sort();
    Ok(paths)
}

/// Snapshot of the group being accumulated
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingGroup {
    pub sequence: u32,
    pub outcomes: Vec<FetchOutcome>,
}

/// Durable copy of the in-memory group buffer
#[derive(Debug, Clone)]
pub struct PendingJournal {
    path: PathBuf,
}

impl PendingJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> anyhow::Result<Option<PendingGroup>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Cannot read pending journal {}", self.path.display()))?;
        let pending = serde_json::from_str(&content)
            .with_context(|| format!("Corrupt pending journal {}", self.path.display()))?;
        Ok(Some(pending))
    }

    pub fn save(&self, sequence: u32, outcomes: &[FetchOutcome]) -> anyhow::Result<()> {
        #[derive(Serialize)]
        struct PendingRef<'a> {
            sequence: u32,
            outcomes: &'a [FetchOutcome],
        }
        write_json_atomic(&self.path, &PendingRef { sequence, outcomes })
            .with_context(|| format!("Cannot save pending journal {}", self.path.display()))
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Cannot remove pending journal {}", self.path.display())),
        }
    }
}
