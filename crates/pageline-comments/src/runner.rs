//! Run coordinator: remaining work, checkpointing, grouping, pacing

use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Utc;
use indicatif::ProgressBar;
use pageline_core::pacing::jittered;
use pageline_core::progress::{fmt_duration, fmt_num};
use pageline_core::{
    SharedProgress, Sleeper, ThreadSleeper, cleanup_tmp_files, ensure_writable_dir,
    is_shutdown_requested,
};
use rand::rngs::StdRng;

use crate::api::{HttpPageSource, PageSource};
use crate::batch::{BatchWriter, PendingJournal, read_group, sequence_of, starting_sequence};
use crate::checkpoint::{CheckpointState, CheckpointStore};
use crate::config::Config;
use crate::error_log::ErrorLog;
use crate::fetcher::Fetcher;
use crate::input::load_work_items;
use crate::state::{FetchOutcome, FetchStatus, WorkItem};

const ITEM_JITTER: Duration = Duration::from_millis(200);
const GROUP_JITTER: Duration = Duration::from_secs(2);

/// Counters for one invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub input_items: usize,
    pub previously_completed: usize,
    pub remaining: usize,
    pub processed: usize,
    pub ok: usize,
    pub not_found: usize,
    pub failed: usize,
    /// Records retrieved by this invocation
    pub records_fetched: u64,
    /// Cumulative records across all runs
    pub total_records: u64,
    pub groups_written: usize,
    pub first_sequence: u32,
    /// Sequence the next group will take
    pub next_sequence: u32,
    pub elapsed: Duration,
    pub interrupted: bool,
}

impl RunSummary {
    fn tally(&mut self, outcome: &FetchOutcome) {
        self.processed += 1;
        self.records_fetched += outcome.actual_count;
        match outcome.status {
            FetchStatus::Ok => self.ok += 1,
            FetchStatus::NotFound => self.not_found += 1,
            FetchStatus::FailedAtPage(_) => self.failed += 1,
        }
    }

    pub fn log(&self) {
        let head = if self.interrupted {
            "Run interrupted"
        } else {
            "Run complete"
        };
        log::info!(
            "{head}: {} processed (ok {}, not found {}, failed {}), +{} records (total {}), {} groups written, next group {} [{}]",
            fmt_num(self.processed as u64),
            fmt_num(self.ok as u64),
            fmt_num(self.not_found as u64),
            fmt_num(self.failed as u64),
            fmt_num(self.records_fetched),
            fmt_num(self.total_records),
            self.groups_written,
            self.next_sequence,
            fmt_duration(self.elapsed)
        );
    }
}

/// In-memory group being accumulated
#[derive(Debug, Default)]
struct GroupBuffer {
    sequence: u32,
    outcomes: Vec<FetchOutcome>,
    /// Group file already on disk that this buffer extends
    replaces_file: bool,
    /// Holds outcomes not yet in any group file
    dirty: bool,
}

/// Drives a whole run over a list of work items.
pub struct Runner<S, Z> {
    config: Config,
    fetcher: Fetcher<S, Z>,
    checkpoint: CheckpointStore,
    writer: BatchWriter,
    journal: PendingJournal,
    progress: Option<SharedProgress>,
    stop: Box<dyn Fn() -> bool>,
}

impl<S: PageSource, Z: Sleeper> Runner<S, Z> {
    pub fn new(config: Config, source: S, sleeper: Z) -> Self {
        let fetcher = Fetcher::new(source, sleeper, config.fetch_policy())
            .with_error_log(ErrorLog::new(&config.error_log));
        Self {
            checkpoint: CheckpointStore::new(&config.checkpoint),
            writer: BatchWriter::new(config.batch_dir(), config.overwrite_groups()),
            journal: PendingJournal::new(config.pending_path()),
            fetcher,
            config,
            progress: None,
            stop: Box::new(is_shutdown_requested),
        }
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.fetcher = self.fetcher.with_rng(rng);
        self
    }

    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Replace the shutdown check polled before and after each item.
    pub fn with_stop_check(mut self, stop: impl Fn() -> bool + 'static) -> Self {
        self.stop = Box::new(stop);
        self
    }

    pub fn run(&mut self, items: &[WorkItem]) -> anyhow::Result<RunSummary> {
        let started = Instant::now();
        self.config.validate()?;

        if self.config.reset {
            self.checkpoint.reset()?;
            self.journal.clear()?;
            log::info!("Checkpoint and pending journal cleared");
        }

        let mut state = self.checkpoint.load()?;
        self.prepare_storage(&state)?;

        let remaining = remaining_items(items, &state);
        let mut summary = RunSummary {
            input_items: items.len(),
            previously_completed: state.completed_count(),
            remaining: remaining.len(),
            total_records: state.total_records,
            ..RunSummary::default()
        };

        let sequence = starting_sequence(state.completed_count(), self.config.batch_size);
        let mut buffer = self.recover_buffer(&state, sequence, &mut summary)?;
        self.resolve_conflicts(&buffer)?;
        summary.first_sequence = buffer.sequence;

        log::info!(
            "Loaded {} items: {} already completed, {} remaining, starting at group {}",
            fmt_num(items.len() as u64),
            fmt_num(summary.previously_completed as u64),
            fmt_num(remaining.len() as u64),
            buffer.sequence
        );
        if remaining.is_empty() {
            log::info!("All items already completed");
        }

        let bar = self.item_bar(remaining.len());
        let loop_started = Instant::now();

        for (idx, item) in remaining.iter().enumerate() {
            if (self.stop)() {
                summary.interrupted = true;
                break;
            }

            let outcome = self.fetcher.fetch(item);
            if (self.stop)() {
                log::warn!("Shutdown requested, discarding in-flight result for {}", item.id);
                summary.interrupted = true;
                break;
            }

            summary.tally(&outcome);
            state.record(&outcome.id, outcome.actual_count, Utc::now());
            summary.total_records = state.total_records;
            buffer.outcomes.push(outcome);
            buffer.dirty = true;
            self.journal.save(buffer.sequence, &buffer.outcomes)?;
            self.checkpoint.save(&state)?;

            self.report(&bar, &summary, remaining.len(), loop_started.elapsed());

            let more = idx + 1 < remaining.len();
            if more {
                self.pause(self.config.delay, ITEM_JITTER);
            }
            if buffer.outcomes.len() >= self.config.batch_size {
                self.flush(&mut buffer, &mut summary)?;
                if more {
                    log::info!("Group complete, pausing before group {}", buffer.sequence);
                    self.pause(self.config.batch_delay, GROUP_JITTER);
                }
            }
        }
        bar.finish_and_clear();

        if !summary.interrupted && buffer.dirty {
            self.flush(&mut buffer, &mut summary)?;
        }
        if summary.interrupted && buffer.dirty {
            log::info!(
                "{} outcomes kept in {} for group {}",
                buffer.outcomes.len(),
                self.journal.path().display(),
                buffer.sequence
            );
        }

        summary.next_sequence = buffer.sequence;
        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    /// Fail before any request when a durable location cannot be written.
    fn prepare_storage(&self, state: &CheckpointState) -> anyhow::Result<()> {
        let batch_dir = self.writer.dir();
        let journal_dir = parent_dir(self.journal.path());
        let error_log_dir = parent_dir(&self.config.error_log);
        for dir in [batch_dir, journal_dir, error_log_dir] {
            ensure_writable_dir(dir)
                .with_context(|| format!("Cannot write to directory {}", dir.display()))?;
        }
        self.checkpoint.save(state)?;

        cleanup_tmp_files(&self.config.output_dir).context("Failed to clean stale tmp files")?;
        cleanup_tmp_files(batch_dir).context("Failed to clean stale tmp files")?;
        Ok(())
    }

    /// Rebuild the group buffer from the journal or a partial group file.
    fn recover_buffer(
        &self,
        state: &CheckpointState,
        sequence: u32,
        summary: &mut RunSummary,
    ) -> anyhow::Result<GroupBuffer> {
        let mut buffer = GroupBuffer {
            sequence,
            ..GroupBuffer::default()
        };

        if let Some(mut pending) = self.journal.load()? {
            let before = pending.outcomes.len();
            pending.outcomes.retain(|o| state.is_completed(&o.id));
            if pending.outcomes.len() < before {
                log::warn!(
                    "Dropped {} journal entries missing from checkpoint",
                    before - pending.outcomes.len()
                );
            }
            if pending.outcomes.is_empty() {
                self.journal.clear()?;
                return self.reopen_partial(state, buffer);
            }

            let existing = if self.writer.exists(pending.sequence) {
                Some(read_group(&self.writer.path_for(pending.sequence))?)
            } else {
                None
            };
            let pending_ids: HashSet<String> =
                pending.outcomes.iter().map(|o| o.id.key()).collect();

            match existing {
                Some(group) if pending_ids.iter().all(|id| group.iter().any(|o| &o.id.key() == id)) => {
                    log::debug!("Pending journal already persisted as group {}", pending.sequence);
                    self.journal.clear()?;
                }
                Some(group) if !group.iter().all(|o| pending_ids.contains(&o.id.key())) => {
                    log::warn!(
                        "Pending journal disagrees with group file {}, discarding it",
                        self.writer.path_for(pending.sequence).display()
                    );
                    self.journal.clear()?;
                }
                existing => {
                    let replaces_file = existing.is_some();
                    if pending.outcomes.len() >= self.config.batch_size {
                        let mut full = GroupBuffer {
                            sequence: pending.sequence,
                            outcomes: pending.outcomes,
                            replaces_file,
                            dirty: true,
                        };
                        log::info!("Writing group {} recovered from journal", full.sequence);
                        self.persist(&mut full, summary)?;
                    } else if pending.sequence == sequence {
                        log::info!(
                            "Resuming group {} with {} journaled outcomes",
                            sequence,
                            pending.outcomes.len()
                        );
                        buffer.dirty = true;
                        buffer.outcomes = pending.outcomes;
                        buffer.replaces_file = replaces_file;
                        return Ok(buffer);
                    } else {
                        anyhow::bail!(
                            "Pending journal {} holds {} checkpointed outcomes for group {}, but the run resumes at group {} \
                             (was the group size changed?). Rerun with the previous group size, or use --reset",
                            self.journal.path().display(),
                            pending.outcomes.len(),
                            pending.sequence,
                            sequence
                        );
                    }
                }
            }
        }

        self.reopen_partial(state, buffer)
    }

    /// Take over the resume group's file when it is a checkpointed partial group.
    fn reopen_partial(
        &self,
        state: &CheckpointState,
        mut buffer: GroupBuffer,
    ) -> anyhow::Result<GroupBuffer> {
        let sequence = buffer.sequence;
        if self.writer.exists(sequence) {
            let group = read_group(&self.writer.path_for(sequence))?;
            let reopenable = !group.is_empty()
                && group.len() < self.config.batch_size
                && group.iter().all(|o| state.is_completed(&o.id));
            if reopenable {
                log::info!(
                    "Reopening partial group {} ({} outcomes)",
                    sequence,
                    group.len()
                );
                buffer.outcomes = group;
                buffer.replaces_file = true;
            }
        }
        Ok(buffer)
    }

    /// Group files at or after the resume group that this run does not own.
    ///
    /// Without overwrite they stop the run. With it they are deleted, so the
    /// files from the resume group on are exactly the ones this run writes.
    fn resolve_conflicts(&self, buffer: &GroupBuffer) -> anyhow::Result<()> {
        let conflicts: Vec<_> = self
            .writer
            .list()?
            .into_iter()
            .filter(|p| {
                sequence_of(p).is_some_and(|seq| {
                    seq >= buffer.sequence && !(buffer.replaces_file && seq == buffer.sequence)
                })
            })
            .collect();
        if conflicts.is_empty() {
            return Ok(());
        }
        if self.writer.overwrite() {
            log::warn!(
                "Removing {} group files from group {} on left by an earlier run",
                conflicts.len(),
                buffer.sequence
            );
            for path in &conflicts {
                std::fs::remove_file(path)
                    .with_context(|| format!("Cannot remove group file {}", path.display()))?;
            }
            return Ok(());
        }
        anyhow::bail!(
            "Group file {} conflicts with resume group {} (use --overwrite or --reset)",
            conflicts[0].display(),
            buffer.sequence
        )
    }

    /// Write the buffer as its group file, clear the journal, advance.
    fn flush(&self, buffer: &mut GroupBuffer, summary: &mut RunSummary) -> anyhow::Result<()> {
        self.persist(buffer, summary)?;
        buffer.sequence += 1;
        buffer.outcomes.clear();
        buffer.replaces_file = false;
        Ok(())
    }

    fn persist(&self, buffer: &mut GroupBuffer, summary: &mut RunSummary) -> anyhow::Result<()> {
        let path = if buffer.replaces_file {
            self.writer.replace(buffer.sequence, &buffer.outcomes)?
        } else {
            self.writer.write(buffer.sequence, &buffer.outcomes)?
        };
        self.journal.clear()?;
        buffer.dirty = false;
        summary.groups_written += 1;

        let records: u64 = buffer.outcomes.iter().map(|o| o.actual_count).sum();
        let msg = format!(
            "Saved {} ({} records from {} items)",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            fmt_num(records),
            buffer.outcomes.len()
        );
        match &self.progress {
            Some(p) if p.is_tty() => p.println(format!("  -> {msg}")),
            _ => log::info!("{msg}"),
        }
        Ok(())
    }

    fn pause(&mut self, base: Duration, max_jitter: Duration) {
        let wait = jittered(base, max_jitter, self.fetcher.rng_mut());
        log::debug!("Pausing {:.1}s", wait.as_secs_f64());
        self.fetcher.sleeper().sleep(wait);
    }

    fn item_bar(&self, total: usize) -> ProgressBar {
        match &self.progress {
            Some(p) => p.item_bar("fetch", total as u64),
            None => ProgressBar::hidden(),
        }
    }

    fn report(&self, bar: &ProgressBar, summary: &RunSummary, total: usize, elapsed: Duration) {
        let done = summary.processed;
        bar.inc(1);
        bar.set_message(format!(
            "{} records, {} errors",
            fmt_num(summary.records_fetched),
            summary.failed
        ));
        if bar.is_hidden() {
            let pct = done as f64 / total.max(1) as f64 * 100.0;
            let eta = elapsed.mul_f64((total - done) as f64 / done.max(1) as f64);
            log::info!(
                "Progress: {}/{} ({pct:.1}%) | records: {} | errors: {} | ETA {}",
                fmt_num(done as u64),
                fmt_num(total as u64),
                fmt_num(summary.records_fetched),
                summary.failed,
                fmt_duration(eta)
            );
        }
    }
}

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}

/// Input items not yet checkpointed, first occurrence of each id, input order.
pub fn remaining_items(items: &[WorkItem], state: &CheckpointState) -> Vec<WorkItem> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| !state.is_completed(&item.id))
        .filter(|item| seen.insert(item.id.key()))
        .cloned()
        .collect()
}

/// Fetch run against the live API with real sleeps and signal-aware shutdown.
pub fn run(config: &Config, progress: SharedProgress) -> anyhow::Result<RunSummary> {
    let items = load_work_items(&config.input)?;
    let source = HttpPageSource::new(&config.http_settings()).context("Cannot build HTTP client")?;
    let mut runner = Runner::new(config.clone(), source, ThreadSleeper).with_progress(progress);
    runner.run(&items)
}
