//! Pageline Comments - resumable comment fetcher for community posts
//!
//! Walks each post's paginated comment listing with classified retries,
//! checkpoints after every post and persists results in fixed-size groups.

pub mod api;
pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod error_log;
pub mod fetcher;
pub mod input;
pub mod merge;
pub mod runner;
pub mod state;

// Re-exports
pub use api::{HttpPageSource, PageReply, PageSource};
pub use batch::{BatchWriter, PendingJournal};
pub use checkpoint::{CheckpointState, CheckpointStore};
pub use config::Config;
pub use fetcher::{FetchPolicy, Fetcher, PageWalk, Step};
pub use runner::{RunSummary, Runner, run};
pub use state::{FetchOutcome, FetchStatus, ItemId, WorkItem};
