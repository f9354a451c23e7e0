//! Input document loader

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::state::WorkItem;

#[derive(Debug, Deserialize)]
struct InputDocument {
    posts: Vec<WorkItem>,
}

/// Read `{"posts": [{"post_id", "comment_count"}, ...]}` in input order.
pub fn load_work_items(path: &Path) -> anyhow::Result<Vec<WorkItem>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read input file {}", path.display()))?;
    let doc: InputDocument = serde_json::from_str(&content)
        .with_context(|| format!("Malformed input file {}", path.display()))?;
    Ok(doc.posts)
}
