//! Incremental output: a producer task scans files one at a time and sends
//! chunks over a bounded channel as records are found.

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::GrepToolConfig;
use super::access::{AccessKind, AccessRecorder};
use super::aggregate::{relative_display, summary_line, unit};
use super::compile::compile_guarded;
use super::discover::Discovery;
use super::engine::log_skip;
use super::ignore_rules::IgnoreRules;
use super::query::SearchQuery;
use super::scan::{CountSink, MatchRecord, RecordSink, scan_file};
use crate::sandbox::Sandbox;
use crate::{ToolError, sanitize_output};

/// Channel depth between the producer and the consumer.
pub const STREAM_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Header,
    Record,
    CappedNotice,
    Summary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub kind: ChunkKind,
    pub text: String,
}

impl StreamChunk {
    fn new(kind: ChunkKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

#[derive(Debug)]
pub enum GrepStreamEvent {
    Chunk(StreamChunk),
    Failed(ToolError),
    Completed,
}

/// Consumer side of a streaming search.
///
/// Yields chunks until exactly one terminal event (`Completed` or `Failed`),
/// then `None`. Dropping the stream stops the producer.
#[derive(Debug)]
pub struct GrepStream {
    rx: mpsc::Receiver<GrepStreamEvent>,
    finished: bool,
}

impl GrepStream {
    pub(crate) fn failed(err: ToolError) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(GrepStreamEvent::Failed(err));
        Self {
            rx,
            finished: false,
        }
    }

    pub async fn next(&mut self) -> Option<GrepStreamEvent> {
        if self.finished {
            return None;
        }
        let event = self.rx.recv().await;
        if matches!(
            event,
            None | Some(GrepStreamEvent::Completed | GrepStreamEvent::Failed(_))
        ) {
            self.finished = true;
        }
        event
    }

    /// Drain every chunk, returning the error if the stream failed.
    pub async fn collect(mut self) -> Result<Vec<StreamChunk>, ToolError> {
        let mut chunks = Vec::new();
        while let Some(event) = self.next().await {
            match event {
                GrepStreamEvent::Chunk(chunk) => chunks.push(chunk),
                GrepStreamEvent::Failed(err) => return Err(err),
                GrepStreamEvent::Completed => return Ok(chunks),
            }
        }
        Err(ToolError::ExecutionFailed {
            tool: "Grep".to_string(),
            message: "stream ended without a completion signal".to_string(),
        })
    }
}

/// Everything the producer task owns.
pub(crate) struct StreamPlan {
    pub query: SearchQuery,
    pub config: GrepToolConfig,
    pub ignore: Arc<dyn IgnoreRules>,
    pub sandbox: Sandbox,
    pub cancel: CancellationToken,
    pub recorder: Arc<dyn AccessRecorder>,
}

pub(crate) fn spawn(plan: StreamPlan) -> GrepStream {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let terminal = match produce(plan, &tx).await {
            Ok(()) => GrepStreamEvent::Completed,
            Err(err) => GrepStreamEvent::Failed(err),
        };
        let _ = tx.send(terminal).await;
    });
    GrepStream {
        rx,
        finished: false,
    }
}

/// Forwards records as chunks from inside a blocking scan.
struct ChannelSink {
    tx: mpsc::Sender<GrepStreamEvent>,
    rel: String,
    limit: usize,
    sent: usize,
    overflowed: bool,
    closed: bool,
}

impl RecordSink for ChannelSink {
    fn accept(&mut self, record: MatchRecord) -> ControlFlow<()> {
        if self.sent >= self.limit {
            self.overflowed = true;
            return ControlFlow::Break(());
        }
        let text = sanitize_output(&format!(
            "{}:{}: {}",
            self.rel, record.line_number, record.text
        ));
        if self
            .tx
            .blocking_send(GrepStreamEvent::Chunk(StreamChunk::new(ChunkKind::Record, text)))
            .is_err()
        {
            self.closed = true;
            return ControlFlow::Break(());
        }
        self.sent += 1;
        ControlFlow::Continue(())
    }
}

/// Send one chunk; `false` once the consumer is gone.
async fn emit(tx: &mpsc::Sender<GrepStreamEvent>, kind: ChunkKind, text: String) -> bool {
    tx.send(GrepStreamEvent::Chunk(StreamChunk::new(kind, text)))
        .await
        .is_ok()
}

fn cancelled() -> ToolError {
    ToolError::Cancelled {
        tool: "Grep".to_string(),
    }
}

async fn produce(plan: StreamPlan, tx: &mpsc::Sender<GrepStreamEvent>) -> Result<(), ToolError> {
    let StreamPlan {
        query,
        config,
        ignore,
        sandbox,
        cancel,
        recorder,
    } = plan;
    if cancel.is_cancelled() {
        return Err(cancelled());
    }

    let matcher = compile_guarded(
        query.effective_pattern(),
        config.regex_size_limit_bytes,
        config.compile_timeout,
        &cancel,
    )
    .await?;
    let discovery = Discovery {
        max_file_size: config.max_file_size_bytes,
        ignore,
        sandbox: Some(&sandbox),
    };
    let files = discovery.discover(&query.root, query.glob.as_deref(), &cancel)?;

    let header = sanitize_output(&format!(
        "Searching {} file(s) for \"{}\"",
        files.len(),
        query.pattern
    ));
    if !emit(tx, ChunkKind::Header, header).await {
        return Ok(());
    }

    let base = query.display_base().to_path_buf();
    let options = query.scan_options(config.max_line_chars);
    let mut emitted = 0usize;
    let mut matched_files = 0usize;
    let mut capped = false;

    for file in files {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let rel = relative_display(&file.path, &base);
        let path: PathBuf = file.path;
        let matcher = Arc::clone(&matcher);

        if query.count_only {
            let scan_path = path.clone();
            let counted = tokio::task::spawn_blocking(move || {
                let mut sink = CountSink::default();
                scan_file(&scan_path, &matcher, options, &mut sink)
                    .map(|()| sink.count)
                    .inspect_err(|skip| log_skip(&scan_path, skip))
                    .unwrap_or(0)
            })
            .await
            .unwrap_or(0);
            if counted == 0 {
                continue;
            }
            recorder.record_access(&path, AccessKind::Search, "grep");
            matched_files += 1;
            emitted += counted;
            if !emit(tx, ChunkKind::Record, sanitize_output(&format!("{rel}: {counted}"))).await {
                return Ok(());
            }
            continue;
        }

        let sink = ChannelSink {
            tx: tx.clone(),
            rel,
            limit: config.max_matches.saturating_sub(emitted),
            sent: 0,
            overflowed: false,
            closed: false,
        };
        let scan_path = path.clone();
        let sink = match tokio::task::spawn_blocking(move || {
            let mut sink = sink;
            if let Err(skip) = scan_file(&scan_path, &matcher, options, &mut sink) {
                log_skip(&scan_path, &skip);
            }
            sink
        })
        .await
        {
            Ok(sink) => sink,
            Err(err) => {
                tracing::warn!(error = %err, "Streaming scan task failed");
                continue;
            }
        };
        if sink.closed {
            return Ok(());
        }
        if sink.sent > 0 {
            recorder.record_access(&path, AccessKind::Search, "grep");
            matched_files += 1;
            emitted += sink.sent;
        }
        if sink.overflowed {
            capped = true;
            break;
        }
    }

    if capped
        && !emit(
            tx,
            ChunkKind::CappedNotice,
            format!("[capped at {} matches]", config.max_matches),
        )
        .await
    {
        return Ok(());
    }
    let summary = if query.count_only {
        format!(
            "Total: {emitted} {} in {matched_files} file(s)",
            unit(query.invert)
        )
    } else {
        summary_line(emitted, matched_files, false, config.max_matches, query.invert)
    };
    tracing::info!(
        matches = emitted,
        files = matched_files,
        capped,
        "Streaming grep completed"
    );
    emit(tx, ChunkKind::Summary, summary).await;
    Ok(())
}
