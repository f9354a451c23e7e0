//! Pageline Core - Common infrastructure for resumable fetch pipelines
//!
//! This crate provides the reusable pieces of a sequential, crash-safe
//! bulk fetcher: failure classification and backoff, a shared HTTP
//! runtime, atomic file writes, pacing, progress and logging.

pub mod backoff;
pub mod error;
pub mod http;
pub mod logging;
pub mod pacing;
pub mod progress;
pub mod shutdown;
pub mod sink;

// Re-exports for convenience
pub use backoff::BackoffPolicy;
pub use error::{FailureClass, TransportError};
pub use http::{HttpReply, HttpSettings, SHARED_RUNTIME, build_client, get_text};
pub use logging::{IndicatifLogger, Verbosity, init_logging};
pub use pacing::{RecordingSleeper, Sleeper, ThreadSleeper};
pub use progress::{ProgressContext, SharedProgress};
pub use shutdown::{install_signal_handlers, is_shutdown_requested, request_shutdown};
pub use sink::{cleanup_tmp_files, ensure_writable_dir, write_json_atomic};
