//! Consolidate every group file into one document

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use pageline_core::write_json_atomic;
use serde::{Deserialize, Serialize};

use crate::batch::{list_groups, read_group};
use crate::state::FetchOutcome;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedDocument {
    pub total_posts: usize,
    pub total_comments: u64,
    /// Outcome count per status tag
    pub status_summary: BTreeMap<String, usize>,
    pub posts: Vec<FetchOutcome>,
}

/// Concatenate group files in name order. `None` when there are none.
pub fn merge_groups(batch_dir: &Path) -> anyhow::Result<Option<(MergedDocument, usize)>> {
    let files = list_groups(batch_dir)?;
    if files.is_empty() {
        return Ok(None);
    }
    let mut doc = MergedDocument::default();
    for path in &files {
        for outcome in read_group(path)? {
            doc.total_comments += outcome.actual_count;
            *doc.status_summary.entry(outcome.status.tag()).or_default() += 1;
            doc.posts.push(outcome);
        }
    }
    doc.total_posts = doc.posts.len();
    Ok(Some((doc, files.len())))
}

pub fn write_merged(path: &Path, doc: &MergedDocument) -> anyhow::Result<()> {
    write_json_atomic(path, doc)
        .with_context(|| format!("Cannot write merged output {}", path.display()))
}
