//! Paginated fetcher: walks one identifier's pages with classified retries.
//!
//! [`PageWalk`] is the pure state machine; [`Fetcher`] drives it, doing the
//! requests and the waiting through injected [`PageSource`] and [`Sleeper`].

use std::time::Duration;

use pageline_core::{BackoffPolicy, FailureClass, Sleeper, is_shutdown_requested};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::Value;

use crate::api::{DEFAULT_BASE_URL, PER_PAGE, PageReply, PageSource, comments_url};
use crate::error_log::ErrorLog;
use crate::state::{FetchOutcome, FetchStatus, WorkItem};

/// Per-item retrieval knobs
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPolicy {
    /// Pause between consecutive pages of one identifier
    pub inter_request_delay: Duration,
    /// Attempts per page; 0 behaves as 1
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    pub base_url: String,
    pub per_page: u32,
}

impl FetchPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            inter_request_delay: Duration::from_millis(400),
            max_retries: 5,
            backoff: BackoffPolicy::default(),
            base_url: DEFAULT_BASE_URL.to_string(),
            per_page: PER_PAGE,
        }
    }
}

/// What the driver does next
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Page accepted, cursor followed; pause before requesting it
    NextPage { delay: Duration },
    /// Attempt `attempt` on the current page failed; wait then re-request
    Retry {
        class: FailureClass,
        attempt: u32,
        wait: Duration,
    },
    Finished(FetchStatus),
}

/// Retrieval state of one identifier
#[derive(Debug, Clone)]
pub struct PageWalk {
    url: String,
    page: u32,
    attempt: u32,
    records: Vec<Value>,
}

impl PageWalk {
    pub fn new(start_url: impl Into<String>) -> Self {
        Self {
            url: start_url.into(),
            page: 1,
            attempt: 0,
            records: Vec::new(),
        }
    }

    /// URL of the page to request next
    pub fn url(&self) -> &str {
        &self.url
    }

    /// 1-based index of the current page
    pub fn page(&self) -> u32 {
        self.page
    }

    /// Failed attempts so far on the current page
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn records(&self) -> &[Value] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Value> {
        self.records
    }

    /// Feed the reply for the current page and get the next step.
    ///
    /// After `Finished` the walk must not be advanced again.
    pub fn advance(&mut self, reply: PageReply, policy: &FetchPolicy, rng: &mut impl Rng) -> Step {
        let class = match reply {
            PageReply::Page(page) => {
                let next = page.next_url().map(str::to_string);
                self.records.extend(page.comments);
                return match next {
                    Some(url) => {
                        self.url = url;
                        self.page += 1;
                        self.attempt = 0;
                        Step::NextPage {
                            delay: policy.inter_request_delay,
                        }
                    }
                    None => Step::Finished(FetchStatus::Ok),
                };
            }
            PageReply::NotFound => return Step::Finished(FetchStatus::NotFound),
            other => match other.failure_class() {
                Some(class) => class,
                None => FailureClass::Unexpected,
            },
        };

        self.attempt += 1;
        if self.attempt >= policy.attempts() {
            return Step::Finished(FetchStatus::FailedAtPage(self.page));
        }
        Step::Retry {
            class,
            attempt: self.attempt,
            wait: policy.backoff.wait(class, self.attempt, rng),
        }
    }
}

/// Drives [`PageWalk`] against a page source.
pub struct Fetcher<S, Z> {
    source: S,
    sleeper: Z,
    policy: FetchPolicy,
    error_log: Option<ErrorLog>,
    rng: StdRng,
}

impl<S: PageSource, Z: Sleeper> Fetcher<S, Z> {
    pub fn new(source: S, sleeper: Z, policy: FetchPolicy) -> Self {
        Self {
            source,
            sleeper,
            policy,
            error_log: None,
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn with_error_log(mut self, error_log: ErrorLog) -> Self {
        self.error_log = Some(error_log);
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn sleeper(&self) -> &Z {
        &self.sleeper
    }

    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Retrieve every page for `item`. Never fails: exhaustion becomes
    /// `failed_page_N` with the records gathered so far.
    pub fn fetch(&mut self, item: &WorkItem) -> FetchOutcome {
        let start = match comments_url(&self.policy.base_url, &item.id, self.policy.per_page) {
            Ok(url) => url,
            Err(e) => {
                let message = format!("Cannot build request URL: {e}");
                self.give_up(item, &message, "no request sent");
                return FetchOutcome::new(item, FetchStatus::FailedAtPage(1), Vec::new());
            }
        };
        let mut walk = PageWalk::new(start);
        let attempts = self.policy.attempts();

        loop {
            let reply = self.source.get_page(walk.url());
            let detail = reply.describe();
            match walk.advance(reply, &self.policy, &mut self.rng) {
                Step::NextPage { delay } => {
                    log::debug!("{} page {} fetched, next", item.id, walk.page() - 1);
                    self.sleeper.sleep(delay);
                }
                Step::Retry {
                    class,
                    attempt,
                    wait,
                } => {
                    log::warn!(
                        "[{class}] post {} page {}, attempt {attempt}/{attempts}, waiting {:.1}s ({detail})",
                        item.id,
                        walk.page(),
                        wait.as_secs_f64()
                    );
                    self.sleeper.sleep(wait);
                }
                Step::Finished(status) => {
                    match status {
                        FetchStatus::NotFound => {
                            log::info!("[404] post {} not found, skipping", item.id)
                        }
                        FetchStatus::FailedAtPage(page) => self.record_failure(item, page, &detail),
                        FetchStatus::Ok => {}
                    }
                    return FetchOutcome::new(item, status, walk.into_records());
                }
            }

            if is_shutdown_requested() {
                log::debug!("{} abandoned at page {}: shutdown", item.id, walk.page());
                return FetchOutcome::new(
                    item,
                    FetchStatus::FailedAtPage(walk.page()),
                    walk.into_records(),
                );
            }
        }
    }

    fn record_failure(&self, item: &WorkItem, page: u32, detail: &str) {
        let message = format!(
            "Failed after {} attempts on page {page}",
            self.policy.attempts()
        );
        self.give_up(item, &message, detail);
    }

    fn give_up(&self, item: &WorkItem, message: &str, detail: &str) {
        log::error!("post {}: {message} ({detail})", item.id);
        if let Some(error_log) = &self.error_log {
            if let Err(e) = error_log.append(&item.id, message) {
                log::warn!("Cannot append to error log: {e:#}");
            }
        }
    }
}
