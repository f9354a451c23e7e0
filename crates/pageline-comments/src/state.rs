//! Work items and fetch outcomes

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier as it appears in the input: number or string.
///
/// The input representation is written back unchanged; the checkpoint
/// keys on the string form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemId {
    Num(u64),
    Text(String),
}

impl ItemId {
    /// String form used as the checkpoint key
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for ItemId {
    fn from(n: u64) -> Self {
        Self::Num(n)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// One identifier to fetch plus its advisory record count
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    #[serde(rename = "post_id")]
    pub id: ItemId,
    #[serde(rename = "comment_count", default)]
    pub expected_count: u64,
}

impl WorkItem {
    pub fn new(id: impl Into<ItemId>, expected_count: u64) -> Self {
        Self {
            id: id.into(),
            expected_count,
        }
    }
}

/// Terminal status of one identifier's fetch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum FetchStatus {
    Ok,
    NotFound,
    /// Retries exhausted on this 1-based page
    FailedAtPage(u32),
}

impl FetchStatus {
    /// Tag written to group files
    pub fn tag(&self) -> String {
        match self {
            Self::Ok => "ok".to_string(),
            Self::NotFound => "404_not_found".to_string(),
            Self::FailedAtPage(n) => format!("failed_page_{n}"),
        }
    }

    /// Only exhausted retries count as errors; not-found is a normal answer.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::FailedAtPage(_))
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

impl From<FetchStatus> for String {
    fn from(status: FetchStatus) -> Self {
        status.tag()
    }
}

impl TryFrom<String> for FetchStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "ok" => Ok(Self::Ok),
            "404_not_found" => Ok(Self::NotFound),
            other => other
                .strip_prefix("failed_page_")
                .and_then(|n| n.parse().ok())
                .map(Self::FailedAtPage)
                .ok_or_else(|| format!("unknown fetch status: {other}")),
        }
    }
}

/// Terminal result for one work item. Records keep server order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FetchOutcome {
    #[serde(rename = "post_id")]
    pub id: ItemId,
    #[serde(rename = "expected_comment_count", default)]
    pub expected_count: u64,
    #[serde(rename = "actual_comment_count")]
    pub actual_count: u64,
    pub status: FetchStatus,
    #[serde(rename = "comments", default)]
    pub records: Vec<Value>,
}

impl FetchOutcome {
    pub fn new(item: &WorkItem, status: FetchStatus, records: Vec<Value>) -> Self {
        Self {
            id: item.id.clone(),
            expected_count: item.expected_count,
            actual_count: records.len() as u64,
            status,
            records,
        }
    }
}
