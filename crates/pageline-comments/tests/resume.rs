//! End-to-end runs against a scripted page source

use std::cell::Cell;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::rc::Rc;
use std::sync::Mutex;
use std::time::Duration;

use pageline_comments::api::{CommentsPage, comments_url};
use pageline_comments::batch::{BatchWriter, list_groups, read_group, sequence_of};
use pageline_comments::{
    CheckpointStore, Config, FetchOutcome, FetchStatus, ItemId, PageReply, PageSource, Runner,
    WorkItem,
};
use pageline_core::RecordingSleeper;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::json;

const BASE: &str = "http://api.test";

/// Replies queued per URL; unscripted URLs get an empty final page.
#[derive(Default)]
struct ScriptedSource {
    replies: Mutex<HashMap<String, VecDeque<PageReply>>>,
    requested: Mutex<Vec<String>>,
}

impl ScriptedSource {
    fn push(&self, url: &str, reply: PageReply) {
        self.replies
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Single-page item with `n` records
    fn item(&self, id: u64, n: u64) {
        self.push(&first_url(id), page(id, 0..n, None));
    }

    fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl PageSource for ScriptedSource {
    fn get_page(&self, url: &str) -> PageReply {
        self.requested.lock().unwrap().push(url.to_string());
        self.replies
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| PageReply::Page(CommentsPage::default()))
    }
}

fn first_url(id: u64) -> String {
    comments_url(BASE, &ItemId::Num(id), 100).unwrap()
}

fn page(id: u64, range: std::ops::Range<u64>, next: Option<&str>) -> PageReply {
    PageReply::Page(CommentsPage {
        comments: range.map(|i| json!({"post": id, "n": i})).collect(),
        next_page: next.map(str::to_string),
    })
}

fn config(root: &Path) -> Config {
    Config {
        input: root.join("posts.json"),
        output_dir: root.join("out"),
        checkpoint: root.join("checkpoint.json"),
        error_log: root.join("errors.log"),
        batch_size: 2,
        delay: Duration::ZERO,
        batch_delay: Duration::ZERO,
        max_retries: 3,
        backoff_base: Duration::from_secs(1),
        base_url: BASE.to_string(),
        ..Config::default()
    }
}

fn runner<'a>(
    config: &Config,
    source: &'a ScriptedSource,
    sleeper: &'a RecordingSleeper,
) -> Runner<&'a ScriptedSource, &'a RecordingSleeper> {
    Runner::new(config.clone(), source, sleeper)
        .with_rng(StdRng::seed_from_u64(7))
        .with_stop_check(|| false)
}

fn items(ids: &[u64]) -> Vec<WorkItem> {
    ids.iter().map(|&id| WorkItem::new(id, 0)).collect()
}

fn groups(config: &Config) -> Vec<(u32, Vec<FetchOutcome>)> {
    list_groups(&config.batch_dir())
        .unwrap()
        .into_iter()
        .map(|p| (sequence_of(&p).unwrap(), read_group(&p).unwrap()))
        .collect()
}

fn group_ids(group: &[FetchOutcome]) -> Vec<String> {
    group.iter().map(|o| o.id.key()).collect()
}

#[test]
fn groups_follow_input_and_statuses() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let source = ScriptedSource::default();
    let next = format!("{BASE}/posts/1/page2");
    source.push(&first_url(1), page(1, 0..6, Some(&next)));
    source.push(&next, page(1, 6..10, None));
    source.push(&first_url(2), PageReply::NotFound);
    source.item(3, 5);
    let sleeper = RecordingSleeper::new();

    let input = vec![WorkItem::new(1, 10), WorkItem::new(2, 0), WorkItem::new(3, 5)];
    let summary = runner(&config, &source, &sleeper).run(&input).unwrap();

    let written = groups(&config);
    assert_eq!(written.len(), 2);
    let (seq1, g1) = &written[0];
    assert_eq!(*seq1, 1);
    assert_eq!(group_ids(g1), vec!["1", "2"]);
    assert_eq!((g1[0].status, g1[0].actual_count), (FetchStatus::Ok, 10));
    assert_eq!(g1[0].records[6], json!({"post": 1, "n": 6}));
    assert_eq!((g1[1].status, g1[1].actual_count), (FetchStatus::NotFound, 0));
    let (seq2, g2) = &written[1];
    assert_eq!(*seq2, 2);
    assert_eq!(group_ids(g2), vec!["3"]);
    assert_eq!(g2[0].actual_count, 5);

    let state = CheckpointStore::new(&config.checkpoint).load().unwrap();
    let expected: BTreeSet<String> = ["1", "2", "3"].iter().map(|s| s.to_string()).collect();
    assert_eq!(state.completed, expected);
    assert_eq!(state.total_records, 15);

    assert_eq!((summary.ok, summary.not_found, summary.failed), (2, 1, 0));
    assert_eq!(summary.groups_written, 2);
    assert_eq!(summary.next_sequence, 3);
    assert!(!summary.interrupted);
    assert!(!config.pending_path().exists());
}

#[test]
fn resume_fetches_only_remaining() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let sleeper = RecordingSleeper::new();

    let first = ScriptedSource::default();
    runner(&config, &first, &sleeper).run(&items(&[1, 2])).unwrap();

    let second = ScriptedSource::default();
    second.item(3, 1);
    let summary = runner(&config, &second, &sleeper)
        .run(&items(&[1, 2, 3]))
        .unwrap();

    assert_eq!(second.requested(), vec![first_url(3)]);
    assert_eq!(summary.previously_completed, 2);
    assert_eq!(summary.first_sequence, 2);
    let seqs: Vec<u32> = groups(&config).iter().map(|(s, _)| *s).collect();
    assert_eq!(seqs, vec![1, 2]);
}

#[test]
fn interrupted_run_keeps_pending_group() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let sleeper = RecordingSleeper::new();

    // polls: before 1, after 1, before 2 -> stop
    let polls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&polls);
    let source = ScriptedSource::default();
    source.item(1, 3);
    let summary = Runner::new(config.clone(), &source, &sleeper)
        .with_stop_check(move || {
            counter.set(counter.get() + 1);
            counter.get() >= 3
        })
        .run(&items(&[1, 2, 3]))
        .unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.processed, 1);
    assert!(groups(&config).is_empty());
    assert!(config.pending_path().exists());

    let resumed = ScriptedSource::default();
    resumed.item(2, 1);
    resumed.item(3, 1);
    runner(&config, &resumed, &sleeper)
        .run(&items(&[1, 2, 3]))
        .unwrap();

    assert_eq!(resumed.requested(), vec![first_url(2), first_url(3)]);
    let written = groups(&config);
    assert_eq!(group_ids(&written[0].1), vec!["1", "2"]);
    assert_eq!(written[0].1[0].actual_count, 3);
    assert_eq!(group_ids(&written[1].1), vec!["3"]);
    assert!(!config.pending_path().exists());
}

#[test]
fn outcome_fetched_during_shutdown_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let sleeper = RecordingSleeper::new();
    let source = ScriptedSource::default();

    // polls: before 1, after 1 -> stop
    let polls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&polls);
    let summary = Runner::new(config.clone(), &source, &sleeper)
        .with_stop_check(move || {
            counter.set(counter.get() + 1);
            counter.get() >= 2
        })
        .run(&items(&[1, 2]))
        .unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.processed, 0);
    let state = CheckpointStore::new(&config.checkpoint).load().unwrap();
    assert!(!state.is_completed(&ItemId::Num(1)));
}

#[test]
fn lost_journal_regroups_from_next_item() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let sleeper = RecordingSleeper::new();

    let polls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&polls);
    let source = ScriptedSource::default();
    Runner::new(config.clone(), &source, &sleeper)
        .with_stop_check(move || {
            counter.set(counter.get() + 1);
            counter.get() >= 3
        })
        .run(&items(&[1, 2, 3]))
        .unwrap();
    std::fs::remove_file(config.pending_path()).unwrap();

    let resumed = ScriptedSource::default();
    let summary = runner(&config, &resumed, &sleeper)
        .run(&items(&[1, 2, 3]))
        .unwrap();

    assert_eq!(summary.first_sequence, 1);
    let written = groups(&config);
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].0, 1);
    assert_eq!(group_ids(&written[0].1), vec!["2", "3"]);
}

#[test]
fn failed_item_does_not_abort_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let sleeper = RecordingSleeper::new();
    let source = ScriptedSource::default();
    let next = format!("{BASE}/posts/1/page2");
    source.push(&first_url(1), page(1, 0..4, Some(&next)));
    for _ in 0..3 {
        source.push(&next, PageReply::Status(500));
    }
    source.item(2, 2);

    let summary = runner(&config, &source, &sleeper)
        .run(&items(&[1, 2]))
        .unwrap();

    assert_eq!((summary.ok, summary.failed), (1, 1));
    let written = groups(&config);
    let g1 = &written[0].1;
    assert_eq!(g1[0].status, FetchStatus::FailedAtPage(2));
    assert_eq!(g1[0].actual_count, 4);
    assert_eq!(g1[1].status, FetchStatus::Ok);

    let state = CheckpointStore::new(&config.checkpoint).load().unwrap();
    assert!(state.is_completed(&ItemId::Num(1)));
    let log = std::fs::read_to_string(&config.error_log).unwrap();
    assert_eq!(log.lines().count(), 1);
    assert!(log.contains("post_id=1 | Failed after 3 attempts on page 2"));
}

#[test]
fn checkpoint_matches_union_of_groups() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let sleeper = RecordingSleeper::new();
    let source = ScriptedSource::default();
    for id in 1..=5 {
        source.item(id, id);
    }

    runner(&config, &source, &sleeper)
        .run(&items(&[1, 2, 3, 4, 5]))
        .unwrap();

    let written = groups(&config);
    let seqs: Vec<u32> = written.iter().map(|(s, _)| *s).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
    let union: BTreeSet<String> = written.iter().flat_map(|(_, g)| group_ids(g)).collect();
    let state = CheckpointStore::new(&config.checkpoint).load().unwrap();
    assert_eq!(union, state.completed);
    assert_eq!(state.total_records, 15);
}

#[test]
fn duplicate_ids_fetched_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let sleeper = RecordingSleeper::new();
    let source = ScriptedSource::default();

    let input = vec![WorkItem::new(1, 0), WorkItem::new(2, 0), WorkItem::new(1, 0)];
    let summary = runner(&config, &source, &sleeper).run(&input).unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(source.requested(), vec![first_url(1), first_url(2)]);
}

#[test]
fn conflicting_group_file_fails_before_requests() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let stray = FetchOutcome::new(&WorkItem::new(99, 0), FetchStatus::Ok, vec![]);
    BatchWriter::new(config.batch_dir(), false)
        .write(1, &[stray])
        .unwrap();
    let sleeper = RecordingSleeper::new();
    let source = ScriptedSource::default();

    let err = runner(&config, &source, &sleeper)
        .run(&items(&[1, 2]))
        .unwrap_err();

    assert!(err.to_string().contains("conflicts"));
    assert!(source.requested().is_empty());
}

#[test]
fn overwrite_replaces_conflicting_group() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        overwrite: true,
        ..config(dir.path())
    };
    let stray = FetchOutcome::new(&WorkItem::new(99, 0), FetchStatus::Ok, vec![]);
    BatchWriter::new(config.batch_dir(), false)
        .write(1, &[stray])
        .unwrap();
    let sleeper = RecordingSleeper::new();
    let source = ScriptedSource::default();

    runner(&config, &source, &sleeper)
        .run(&items(&[1, 2]))
        .unwrap();

    assert_eq!(group_ids(&groups(&config)[0].1), vec!["1", "2"]);
}

#[test]
fn partial_group_is_reopened_and_extended() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let sleeper = RecordingSleeper::new();

    let first = ScriptedSource::default();
    runner(&config, &first, &sleeper).run(&items(&[1])).unwrap();
    assert_eq!(group_ids(&groups(&config)[0].1), vec!["1"]);

    let second = ScriptedSource::default();
    let summary = runner(&config, &second, &sleeper)
        .run(&items(&[1, 2, 3]))
        .unwrap();

    assert_eq!(summary.first_sequence, 1);
    assert_eq!(second.requested(), vec![first_url(2), first_url(3)]);
    let written = groups(&config);
    assert_eq!(written.len(), 2);
    assert_eq!(group_ids(&written[0].1), vec!["1", "2"]);
    assert_eq!(group_ids(&written[1].1), vec!["3"]);
}

#[test]
fn full_journal_is_written_on_startup() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let sleeper = RecordingSleeper::new();

    let first = ScriptedSource::default();
    first.item(1, 1);
    first.item(2, 1);
    runner(&config, &first, &sleeper).run(&items(&[1, 2])).unwrap();

    // crash after the last checkpoint save, before the group file landed
    let group_path = BatchWriter::new(config.batch_dir(), false).path_for(1);
    let outcomes = read_group(&group_path).unwrap();
    std::fs::remove_file(&group_path).unwrap();
    std::fs::write(
        config.pending_path(),
        serde_json::to_string(&json!({"sequence": 1, "outcomes": outcomes})).unwrap(),
    )
    .unwrap();

    let second = ScriptedSource::default();
    let summary = runner(&config, &second, &sleeper)
        .run(&items(&[1, 2, 3]))
        .unwrap();

    assert_eq!(second.requested(), vec![first_url(3)]);
    assert_eq!(summary.groups_written, 2);
    let written = groups(&config);
    assert_eq!(group_ids(&written[0].1), vec!["1", "2"]);
    assert_eq!(group_ids(&written[1].1), vec!["3"]);
    assert!(!config.pending_path().exists());
}

#[test]
fn reset_starts_over() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let sleeper = RecordingSleeper::new();

    let first = ScriptedSource::default();
    runner(&config, &first, &sleeper).run(&items(&[1, 2])).unwrap();

    let again = ScriptedSource::default();
    let reset = Config {
        reset: true,
        ..config.clone()
    };
    let summary = runner(&reset, &again, &sleeper)
        .run(&items(&[1, 2]))
        .unwrap();

    assert_eq!(summary.previously_completed, 0);
    assert_eq!(again.requested(), vec![first_url(1), first_url(2)]);
    assert_eq!(groups(&config).len(), 1);
}

#[test]
fn nothing_remaining_is_a_clean_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let sleeper = RecordingSleeper::new();

    let first = ScriptedSource::default();
    runner(&config, &first, &sleeper).run(&items(&[1, 2])).unwrap();

    let second = ScriptedSource::default();
    let summary = runner(&config, &second, &sleeper)
        .run(&items(&[1, 2]))
        .unwrap();
    assert_eq!(summary.remaining, 0);
    assert_eq!(summary.groups_written, 0);
    assert!(second.requested().is_empty());
}

#[test]
fn unwritable_checkpoint_fails_before_requests() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("afile");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let config = Config {
        checkpoint: blocker.join("checkpoint.json"),
        ..config(dir.path())
    };
    let sleeper = RecordingSleeper::new();
    let source = ScriptedSource::default();

    let err = runner(&config, &source, &sleeper)
        .run(&items(&[1, 2]))
        .unwrap_err();

    assert!(format!("{err:#}").contains("checkpoint"));
    assert!(source.requested().is_empty());
}

#[test]
fn unwritable_output_dir_fails_before_requests() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("afile");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let config = Config {
        output_dir: blocker.join("out"),
        ..config(dir.path())
    };
    let sleeper = RecordingSleeper::new();
    let source = ScriptedSource::default();

    assert!(runner(&config, &source, &sleeper).run(&items(&[1])).is_err());
    assert!(source.requested().is_empty());
}

#[test]
fn reset_removes_groups_of_abandoned_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let sleeper = RecordingSleeper::new();

    let first = ScriptedSource::default();
    runner(&config, &first, &sleeper)
        .run(&items(&[1, 2, 3, 4]))
        .unwrap();
    assert_eq!(groups(&config).len(), 2);

    let reset = Config {
        reset: true,
        ..config.clone()
    };
    let again = ScriptedSource::default();
    runner(&reset, &again, &sleeper).run(&items(&[1])).unwrap();

    let written = groups(&config);
    assert_eq!(written.len(), 1);
    let union: BTreeSet<String> = written.iter().flat_map(|(_, g)| group_ids(g)).collect();
    let state = CheckpointStore::new(&config.checkpoint).load().unwrap();
    assert_eq!(union, state.completed);
}

#[test]
fn pauses_between_items_and_after_full_groups() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        delay: Duration::from_secs(1),
        batch_delay: Duration::from_secs(5),
        ..config(dir.path())
    };
    let sleeper = RecordingSleeper::new();
    let source = ScriptedSource::default();

    runner(&config, &source, &sleeper)
        .run(&items(&[1, 2, 3]))
        .unwrap();

    // item, item + group, nothing after the last item
    let calls = sleeper.calls();
    assert_eq!(calls.len(), 3, "{calls:?}");
    for pause in &calls[..2] {
        assert!(*pause >= Duration::from_secs(1) && *pause <= Duration::from_millis(1200));
    }
    assert!(calls[2] >= Duration::from_secs(5) && calls[2] <= Duration::from_secs(7));
}

#[test]
fn no_group_pause_when_last_item_fills_group() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        delay: Duration::from_secs(1),
        batch_delay: Duration::from_secs(5),
        ..config(dir.path())
    };
    let sleeper = RecordingSleeper::new();
    let source = ScriptedSource::default();

    runner(&config, &source, &sleeper)
        .run(&items(&[1, 2]))
        .unwrap();

    let calls = sleeper.calls();
    assert_eq!(calls.len(), 1, "{calls:?}");
    assert!(calls[0] < Duration::from_secs(5));
}

#[test]
fn journal_from_other_group_size_stops_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let sleeper = RecordingSleeper::new();

    // polls: b1 a1 b2 a2 b3 a3 b4 -> stop with item 3 journaled in group 2
    let polls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&polls);
    let source = ScriptedSource::default();
    Runner::new(config.clone(), &source, &sleeper)
        .with_stop_check(move || {
            counter.set(counter.get() + 1);
            counter.get() >= 7
        })
        .run(&items(&[1, 2, 3, 4]))
        .unwrap();
    assert!(config.pending_path().exists());

    let wider = Config {
        batch_size: 5,
        ..config.clone()
    };
    let resumed = ScriptedSource::default();
    let err = runner(&wider, &resumed, &sleeper)
        .run(&items(&[1, 2, 3, 4]))
        .unwrap_err();

    assert!(err.to_string().contains("--reset"));
    assert!(resumed.requested().is_empty());
    assert!(config.pending_path().exists());
}
