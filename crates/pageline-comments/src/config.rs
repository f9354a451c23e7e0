//! Runtime configuration for a fetch run

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use pageline_core::{BackoffPolicy, HttpSettings};

use crate::api::{DEFAULT_BASE_URL, DEFAULT_USER_AGENT, PER_PAGE};
use crate::fetcher::FetchPolicy;

/// Everything the coordinator needs, resolved from file and flags
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub input: PathBuf,
    /// Holds `batches/` and the pending journal
    pub output_dir: PathBuf,
    pub checkpoint: PathBuf,
    pub error_log: PathBuf,
    pub batch_size: usize,
    /// Between pages of one item and between items
    pub delay: Duration,
    /// Between groups
    pub batch_delay: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub timeout: Duration,
    pub base_url: String,
    pub user_agent: String,
    /// Clear checkpoint and journal before starting
    pub reset: bool,
    /// Allow replacing existing group files
    pub overwrite: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: PathBuf::from("posts_with_comments.json"),
            output_dir: PathBuf::from("comments_data"),
            checkpoint: PathBuf::from("checkpoint.json"),
            error_log: PathBuf::from("errors.log"),
            batch_size: 25,
            delay: Duration::from_millis(400),
            batch_delay: Duration::from_secs(5),
            max_retries: 5,
            backoff_base: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            reset: false,
            overwrite: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.batch_size > 0, "batch size must be positive");
        anyhow::ensure!(!self.backoff_base.is_zero(), "backoff base must be positive");
        anyhow::ensure!(!self.timeout.is_zero(), "timeout must be positive");
        let base = url::Url::parse(&self.base_url)
            .with_context(|| format!("invalid base URL {:?}", self.base_url))?;
        anyhow::ensure!(!base.cannot_be_a_base(), "base URL {} cannot hold a path", self.base_url);
        Ok(())
    }

    pub fn batch_dir(&self) -> PathBuf {
        self.output_dir.join("batches")
    }

    pub fn pending_path(&self) -> PathBuf {
        self.output_dir.join("pending.json")
    }

    /// Default merge target
    pub fn merged_path(&self) -> PathBuf {
        self.output_dir.join("all_comments.json")
    }

    /// Overwrite is implied by reset: old groups belong to a discarded run.
    pub fn overwrite_groups(&self) -> bool {
        self.overwrite || self.reset
    }

    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            inter_request_delay: self.delay,
            max_retries: self.max_retries,
            backoff: BackoffPolicy::new(self.backoff_base),
            base_url: self.base_url.clone(),
            per_page: PER_PAGE,
        }
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            user_agent: self.user_agent.clone(),
            timeout: self.timeout,
            ..HttpSettings::default()
        }
    }
}
