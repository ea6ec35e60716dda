//! Match engine: bounded worker pool for forward and count modes, a
//! sequential pass for invert mode.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use regex::Regex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::discover::CandidateFile;
use super::scan::{BoundedSink, CountSink, MatchRecord, ScanOptions, ScanSkip, scan_file};
use crate::ToolError;

/// Records from one file, ascending by line number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMatchSet {
    pub path: PathBuf,
    pub records: Vec<MatchRecord>,
}

/// Per-file tally for count-only mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileCount {
    pub path: PathBuf,
    pub count: usize,
}

pub(crate) fn log_skip(path: &Path, skip: &ScanSkip) {
    match skip {
        ScanSkip::Binary => {
            tracing::debug!(path = %path.display(), "Skipping binary content");
        }
        ScanSkip::Io(err) => {
            tracing::debug!(path = %path.display(), error = %err, "Skipping unreadable file");
        }
    }
}

fn cancelled() -> ToolError {
    ToolError::Cancelled {
        tool: "Grep".to_string(),
    }
}

/// Scan one file into at most `limit` records.
fn collect_records(
    path: &Path,
    matcher: &Regex,
    options: ScanOptions,
    limit: usize,
) -> Option<FileMatchSet> {
    let mut sink = BoundedSink::new(limit);
    if let Err(skip) = scan_file(path, matcher, options, &mut sink) {
        log_skip(path, &skip);
        return None;
    }
    (!sink.records.is_empty()).then(|| FileMatchSet {
        path: path.to_path_buf(),
        records: sink.records,
    })
}

fn count_records(path: &Path, matcher: &Regex, options: ScanOptions) -> Option<FileCount> {
    let mut sink = CountSink::default();
    if let Err(skip) = scan_file(path, matcher, options, &mut sink) {
        log_skip(path, &skip);
        return None;
    }
    (sink.count > 0).then(|| FileCount {
        path: path.to_path_buf(),
        count: sink.count,
    })
}

/// Where pool workers deposit their results.
trait Collector: Send + 'static {
    type Item: Send + 'static;
    type Output;

    /// Whether a result for `path` could still be kept.
    fn wants(&self, _path: &Path) -> bool {
        true
    }

    fn add(&mut self, item: Self::Item);

    fn finish(&mut self) -> Self::Output;
}

impl<T: Send + 'static> Collector for Vec<T> {
    type Item = T;
    type Output = Vec<T>;

    fn add(&mut self, item: T) {
        self.push(item);
    }

    fn finish(&mut self) -> Vec<T> {
        std::mem::take(self)
    }
}

/// Forward-mode results keyed by path, holding at most `budget` records.
///
/// Once the smallest paths hold `budget` records, `cutoff` is the last path
/// that still contributes. Later paths are dropped and never scanned.
#[derive(Debug)]
struct ForwardWindow {
    sets: BTreeMap<PathBuf, Vec<MatchRecord>>,
    budget: usize,
    cutoff: Option<PathBuf>,
}

impl ForwardWindow {
    fn new(budget: usize) -> Self {
        Self {
            sets: BTreeMap::new(),
            budget,
            cutoff: None,
        }
    }

    fn trim(&mut self) {
        let mut held = 0usize;
        let mut cutoff = None;
        for (path, records) in &mut self.sets {
            let room = self.budget.saturating_sub(held);
            if records.len() >= room {
                records.truncate(room);
                cutoff = Some(path.clone());
                break;
            }
            held += records.len();
        }
        let Some(cutoff) = cutoff else {
            return;
        };
        let mut tail = self.sets.split_off(&cutoff);
        if let Some((path, records)) = tail.pop_first() {
            self.sets.insert(path, records);
        }
        self.cutoff = Some(cutoff);
    }
}

impl Collector for ForwardWindow {
    type Item = FileMatchSet;
    type Output = Vec<FileMatchSet>;

    fn wants(&self, path: &Path) -> bool {
        self.cutoff.as_deref().is_none_or(|cutoff| path <= cutoff)
    }

    fn add(&mut self, set: FileMatchSet) {
        if !self.wants(&set.path) {
            return;
        }
        self.sets.insert(set.path, set.records);
        self.trim();
    }

    fn finish(&mut self) -> Vec<FileMatchSet> {
        std::mem::take(&mut self.sets)
            .into_iter()
            .map(|(path, records)| FileMatchSet { path, records })
            .collect()
    }
}

/// Run `scan` over `files` with at most `workers` files open at once.
///
/// Cancellation stops dispatch; files already handed to a worker finish and
/// the call then reports [`ToolError::Cancelled`]. Files the collector no
/// longer wants are skipped, both at dispatch and when a worker picks them up.
async fn run_pool<C, F>(
    files: Vec<CandidateFile>,
    workers: usize,
    cancel: &CancellationToken,
    collector: C,
    scan: F,
) -> Result<C::Output, ToolError>
where
    C: Collector,
    F: Fn(&Path) -> Option<C::Item> + Send + Sync + 'static,
{
    let limiter = Arc::new(Semaphore::new(workers.max(1)));
    let results = Arc::new(Mutex::new(collector));
    let scan = Arc::new(scan);
    let mut tasks = JoinSet::new();
    let mut interrupted = false;

    for file in files {
        if cancel.is_cancelled() {
            interrupted = true;
            break;
        }
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                interrupted = true;
                break;
            }
            permit = Arc::clone(&limiter).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        if !wanted(&results, &file.path) {
            continue;
        }
        let scan = Arc::clone(&scan);
        let results = Arc::clone(&results);
        tasks.spawn_blocking(move || {
            let _permit = permit;
            if !wanted(&results, &file.path) {
                return;
            }
            if let Some(item) = scan(&file.path) {
                results
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .add(item);
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            tracing::warn!(error = %err, "Grep worker failed");
        }
    }

    if interrupted {
        return Err(cancelled());
    }
    let mut guard = results.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(guard.finish())
}

fn wanted<C: Collector>(results: &Mutex<C>, path: &Path) -> bool {
    results
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .wants(path)
}

/// Forward mode.
///
/// Returns the sets, ascending by path, that hold the first `budget` records
/// in path order. Files sorting after that point are not scanned once it is
/// known, so memory stays bounded by `budget` whatever the tree size.
pub async fn run_forward(
    files: Vec<CandidateFile>,
    matcher: Arc<Regex>,
    options: ScanOptions,
    budget: usize,
    workers: usize,
    cancel: &CancellationToken,
) -> Result<Vec<FileMatchSet>, ToolError> {
    run_pool(files, workers, cancel, ForwardWindow::new(budget), move |path| {
        collect_records(path, &matcher, options, budget)
    })
    .await
}

/// Count-only mode. Uncapped.
pub async fn run_counts(
    files: Vec<CandidateFile>,
    matcher: Arc<Regex>,
    options: ScanOptions,
    workers: usize,
    cancel: &CancellationToken,
) -> Result<Vec<FileCount>, ToolError> {
    run_pool(files, workers, cancel, Vec::new(), move |path| {
        count_records(path, &matcher, options)
    })
    .await
}

#[derive(Debug, Default)]
pub struct InvertOutcome {
    pub sets: Vec<FileMatchSet>,
    /// Cancellation cut the scan short; `sets` is partial.
    pub interrupted: bool,
}

/// Invert mode: one file at a time, in discovery order.
///
/// Stops once `budget` records are held or cancellation fires. Cancellation
/// keeps what was collected.
pub async fn run_invert(
    files: Vec<CandidateFile>,
    matcher: Arc<Regex>,
    options: ScanOptions,
    budget: usize,
    cancel: &CancellationToken,
) -> InvertOutcome {
    let mut outcome = InvertOutcome::default();
    let mut held = 0usize;
    for file in files {
        if cancel.is_cancelled() {
            outcome.interrupted = true;
            break;
        }
        let remaining = budget.saturating_sub(held);
        if remaining == 0 {
            break;
        }
        let matcher = Arc::clone(&matcher);
        let scanned = tokio::task::spawn_blocking(move || {
            collect_records(&file.path, &matcher, options, remaining)
        })
        .await;
        match scanned {
            Ok(Some(set)) => {
                held += set.records.len();
                outcome.sets.push(set);
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "Invert scan task failed"),
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::{Collector, FileMatchSet, ForwardWindow, run_counts, run_forward, run_invert};
    use crate::ToolError;
    use crate::grep::discover::CandidateFile;
    use crate::grep::scan::{MatchRecord, ScanOptions};
    use regex::Regex;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    fn options(invert: bool) -> ScanOptions {
        ScanOptions {
            context_lines: 0,
            invert,
            max_line_chars: 500,
        }
    }

    fn candidates(root: &Path, files: &[(&str, &str)]) -> Vec<CandidateFile> {
        files
            .iter()
            .map(|(name, body)| {
                let path = root.join(name);
                fs::write(&path, body).unwrap();
                CandidateFile {
                    path,
                    size: body.len() as u64,
                    extension: None,
                }
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn forward_pool_collects_every_matching_file() {
        let dir = tempdir().unwrap();
        let names: Vec<String> = (0..25).map(|i| format!("f{i:02}.txt")).collect();
        let specs: Vec<(&str, &str)> = names
            .iter()
            .map(|n| (n.as_str(), "hit\nmiss\nhit\n"))
            .collect();
        let files = candidates(dir.path(), &specs);
        let matcher = Arc::new(Regex::new("hit").unwrap());

        let sets = run_forward(files, matcher, options(false), 501, 3, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sets.len(), 25);
        assert!(sets.windows(2).all(|w| w[0].path < w[1].path));
        assert!(sets.iter().all(|s| s.records.len() == 2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn forward_holds_only_the_budget_across_many_files() {
        let dir = tempdir().unwrap();
        let body = "hit\n".repeat(600);
        let names: Vec<String> = (0..50).map(|i| format!("f{i:02}.txt")).collect();
        let specs: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), body.as_str())).collect();
        let files = candidates(dir.path(), &specs);
        let matcher = Arc::new(Regex::new("hit").unwrap());

        let sets = run_forward(files, matcher, options(false), 501, 8, &CancellationToken::new())
            .await
            .unwrap();
        let held: usize = sets.iter().map(|s| s.records.len()).sum();
        assert_eq!(held, 501);
        assert_eq!(sets.len(), 1);
        assert!(sets[0].path.ends_with("f00.txt"));
    }

    #[test]
    fn window_keeps_smallest_paths_when_results_arrive_out_of_order() {
        let set = |name: &str, n: usize| FileMatchSet {
            path: PathBuf::from(name),
            records: (1..=n)
                .map(|line_number| MatchRecord {
                    line_number,
                    text: String::new(),
                    context: false,
                })
                .collect(),
        };
        let mut window = ForwardWindow::new(5);
        window.add(set("/r/c", 4));
        window.add(set("/r/d", 4));
        assert_eq!(window.cutoff.as_deref(), Some(Path::new("/r/d")));
        assert!(!window.wants(Path::new("/r/e")));

        window.add(set("/r/a", 3));
        assert_eq!(window.cutoff.as_deref(), Some(Path::new("/r/c")));
        assert!(!window.wants(Path::new("/r/d")));
        assert!(window.wants(Path::new("/r/b")));

        window.add(set("/r/e", 9));
        let sets = window.finish();
        let shape: Vec<(&Path, usize)> = sets
            .iter()
            .map(|s| (s.path.as_path(), s.records.len()))
            .collect();
        assert_eq!(shape, vec![(Path::new("/r/a"), 3), (Path::new("/r/c"), 2)]);
    }

    #[tokio::test]
    async fn forward_respects_per_file_limit() {
        let dir = tempdir().unwrap();
        let files = candidates(dir.path(), &[("a.txt", "x\nx\nx\nx\n")]);
        let matcher = Arc::new(Regex::new("x").unwrap());
        let sets = run_forward(files, matcher, options(false), 2, 1, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sets[0].records.len(), 2);
    }

    #[tokio::test]
    async fn cancelled_pool_reports_cancelled() {
        let dir = tempdir().unwrap();
        let files = candidates(dir.path(), &[("a.txt", "x\n")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_forward(
            files,
            Arc::new(Regex::new("x").unwrap()),
            options(false),
            10,
            2,
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(ToolError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn counts_skip_files_without_matches() {
        let dir = tempdir().unwrap();
        let files = candidates(dir.path(), &[("a.txt", "x\nx\n"), ("b.txt", "y\n")]);
        let counts = run_counts(
            files,
            Arc::new(Regex::new("x").unwrap()),
            options(false),
            4,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].count, 2);
    }

    #[tokio::test]
    async fn invert_keeps_discovery_order_and_budget() {
        let dir = tempdir().unwrap();
        let files = candidates(dir.path(), &[("b.txt", "a\nb\nc\n"), ("a.txt", "d\ne\n")]);
        let outcome = run_invert(
            files,
            Arc::new(Regex::new("zzz").unwrap()),
            options(true),
            4,
            &CancellationToken::new(),
        )
        .await;
        assert!(!outcome.interrupted);
        assert_eq!(outcome.sets.len(), 2);
        assert!(outcome.sets[0].path.ends_with("b.txt"));
        assert_eq!(outcome.sets[0].records.len(), 3);
        assert_eq!(outcome.sets[1].records.len(), 1);
    }

    #[tokio::test]
    async fn invert_returns_partial_on_cancel() {
        let dir = tempdir().unwrap();
        let files = candidates(dir.path(), &[("a.txt", "a\n")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = run_invert(
            files,
            Arc::new(Regex::new("zzz").unwrap()),
            options(true),
            10,
            &cancel,
        )
        .await;
        assert!(outcome.interrupted);
        assert!(outcome.sets.is_empty());
    }
}
