//! Single-file scanning shared by the pooled, inverted and streaming paths.
//!
//! A scan reads one file, splits it into lines and pushes [`MatchRecord`]s
//! into a [`RecordSink`]. The sink decides what to do with them: collect,
//! count, or forward over a channel.

use std::io::Read;
use std::ops::ControlFlow;
use std::path::Path;

use regex::Regex;

use delve_types::truncate_preview;

/// Marker appended to lines cut at `max_line_chars`.
pub const LINE_ELLIPSIS: &str = "...";

/// Bytes inspected for a NUL when deciding whether a file is binary.
pub const BINARY_SNIFF_BYTES: usize = 8 * 1024;

/// One emitted line.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MatchRecord {
    /// 1-indexed.
    pub line_number: usize,
    pub text: String,
    /// Set for lines emitted only because they fall inside a context window.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub context: bool,
}

/// Destination for records produced by a scan.
pub trait RecordSink {
    /// `Break` stops the scan of the current file.
    fn accept(&mut self, record: MatchRecord) -> ControlFlow<()>;

    /// Counting sinks skip line truncation and copying.
    fn needs_text(&self) -> bool {
        true
    }
}

impl RecordSink for Vec<MatchRecord> {
    fn accept(&mut self, record: MatchRecord) -> ControlFlow<()> {
        self.push(record);
        ControlFlow::Continue(())
    }
}

/// Counts records without keeping them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CountSink {
    pub count: usize,
}

impl RecordSink for CountSink {
    fn accept(&mut self, _record: MatchRecord) -> ControlFlow<()> {
        self.count += 1;
        ControlFlow::Continue(())
    }

    fn needs_text(&self) -> bool {
        false
    }
}

/// Keeps at most `limit` records and notes whether more were offered.
#[derive(Debug)]
pub struct BoundedSink {
    pub records: Vec<MatchRecord>,
    limit: usize,
    pub overflowed: bool,
}

impl BoundedSink {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            records: Vec::new(),
            limit,
            overflowed: false,
        }
    }
}

impl RecordSink for BoundedSink {
    fn accept(&mut self, record: MatchRecord) -> ControlFlow<()> {
        if self.records.len() >= self.limit {
            self.overflowed = true;
            return ControlFlow::Break(());
        }
        self.records.push(record);
        ControlFlow::Continue(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub context_lines: usize,
    pub invert: bool,
    pub max_line_chars: usize,
}

/// Why a file produced no scan.
#[derive(Debug)]
pub enum ScanSkip {
    Binary,
    Io(std::io::Error),
}

/// Read `path` and feed its records into `sink`.
///
/// Unreadable and binary files are reported as [`ScanSkip`]; callers log and
/// move on.
pub fn scan_file(
    path: &Path,
    matcher: &Regex,
    options: ScanOptions,
    sink: &mut dyn RecordSink,
) -> Result<(), ScanSkip> {
    let bytes = read_file(path).map_err(ScanSkip::Io)?;
    let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
    if sniff.contains(&0) {
        return Err(ScanSkip::Binary);
    }
    let text = String::from_utf8_lossy(&bytes);
    scan_text(&text, matcher, options, sink);
    Ok(())
}

fn read_file(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut file = std::fs::File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Split into lines, dropping one trailing `\r` per line.
fn split_lines(text: &str) -> Vec<&str> {
    text.split_terminator('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect()
}

/// Scan already-decoded text.
///
/// Forward mode emits each matching line plus its context window; windows
/// of nearby matches are merged through a per-file emitted set so no line
/// appears twice. Invert mode emits every non-matching line with no context.
/// A sink that does not want text only ever sees matching lines.
pub fn scan_text(text: &str, matcher: &Regex, options: ScanOptions, sink: &mut dyn RecordSink) {
    let lines = split_lines(text);
    let with_text = sink.needs_text();
    let record = |idx: usize, context: bool| MatchRecord {
        line_number: idx + 1,
        text: if with_text {
            truncate_preview(lines[idx], options.max_line_chars, LINE_ELLIPSIS)
        } else {
            String::new()
        },
        context,
    };

    if options.invert {
        for (idx, line) in lines.iter().enumerate() {
            if !matcher.is_match(line) && sink.accept(record(idx, false)).is_break() {
                return;
            }
        }
        return;
    }

    let matched: Vec<bool> = lines.iter().map(|line| matcher.is_match(line)).collect();
    let k = if with_text { options.context_lines } else { 0 };
    let mut emitted = vec![false; lines.len()];
    for (idx, _) in matched.iter().enumerate().filter(|(_, m)| **m) {
        let start = idx.saturating_sub(k);
        let end = idx.saturating_add(k).min(lines.len() - 1);
        for line_idx in start..=end {
            if emitted[line_idx] {
                continue;
            }
            emitted[line_idx] = true;
            if sink.accept(record(line_idx, !matched[line_idx])).is_break() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BoundedSink, CountSink, MatchRecord, ScanOptions, ScanSkip, scan_file, scan_text};
    use regex::Regex;

    fn opts(context_lines: usize, invert: bool) -> ScanOptions {
        ScanOptions {
            context_lines,
            invert,
            max_line_chars: 500,
        }
    }

    fn lines_of(records: &[MatchRecord]) -> Vec<usize> {
        records.iter().map(|r| r.line_number).collect()
    }

    #[test]
    fn forward_match_reports_one_indexed_lines() {
        let re = Regex::new("TODO").unwrap();
        let mut out: Vec<MatchRecord> = Vec::new();
        scan_text("a\nTODO b\nc\nTODO d\n", &re, opts(0, false), &mut out);
        assert_eq!(lines_of(&out), vec![2, 4]);
        assert_eq!(out[0].text, "TODO b");
        assert!(!out[0].context);
    }

    #[test]
    fn overlapping_windows_emit_each_line_once() {
        let re = Regex::new("hit").unwrap();
        let mut out: Vec<MatchRecord> = Vec::new();
        scan_text("l1\nhit\nl3\nhit\nl5", &re, opts(1, false), &mut out);
        assert_eq!(lines_of(&out), vec![1, 2, 3, 4, 5]);
        let context: Vec<bool> = out.iter().map(|r| r.context).collect();
        assert_eq!(context, vec![true, false, true, false, true]);
    }

    #[test]
    fn window_is_clipped_at_file_bounds() {
        let re = Regex::new("first").unwrap();
        let mut out: Vec<MatchRecord> = Vec::new();
        scan_text("first\nsecond\nthird\nfourth", &re, opts(2, false), &mut out);
        assert_eq!(lines_of(&out), vec![1, 2, 3]);
    }

    #[test]
    fn invert_emits_complement_without_context() {
        let re = Regex::new("x").unwrap();
        let mut out: Vec<MatchRecord> = Vec::new();
        scan_text("x\na\nx\nb", &re, opts(3, true), &mut out);
        assert_eq!(lines_of(&out), vec![2, 4]);
    }

    #[test]
    fn crlf_is_trimmed_and_trailing_newline_adds_no_line() {
        let re = Regex::new("^b$").unwrap();
        let mut out: Vec<MatchRecord> = Vec::new();
        scan_text("a\r\nb\r\n", &re, opts(0, false), &mut out);
        assert_eq!(lines_of(&out), vec![2]);

        let mut count = CountSink::default();
        scan_text("a\r\nb\r\n", &re, opts(0, true), &mut count);
        assert_eq!(count.count, 1);
    }

    #[test]
    fn long_lines_are_truncated_with_ellipsis() {
        let re = Regex::new("z").unwrap();
        let mut out: Vec<MatchRecord> = Vec::new();
        let line = "z".repeat(600);
        scan_text(&line, &re, opts(0, false), &mut out);
        assert_eq!(out[0].text.chars().count(), 503);
        assert!(out[0].text.ends_with("..."));
    }

    #[test]
    fn bounded_sink_stops_and_flags_overflow() {
        let re = Regex::new("y").unwrap();
        let mut sink = BoundedSink::new(2);
        scan_text("y\ny\ny\ny", &re, opts(0, false), &mut sink);
        assert_eq!(sink.records.len(), 2);
        assert!(sink.overflowed);
    }

    #[test]
    fn count_sink_skips_text() {
        let re = Regex::new("y").unwrap();
        let mut sink = CountSink::default();
        scan_text("y\nn\ny", &re, opts(5, false), &mut sink);
        assert_eq!(sink.count, 2);
    }

    #[test]
    fn nul_byte_marks_file_binary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.txt");
        std::fs::write(&path, b"TODO\0rest").unwrap();
        let re = Regex::new("TODO").unwrap();
        let mut out: Vec<MatchRecord> = Vec::new();
        assert!(matches!(
            scan_file(&path, &re, opts(0, false), &mut out),
            Err(ScanSkip::Binary)
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn missing_file_is_io_skip() {
        let dir = tempfile::tempdir().unwrap();
        let re = Regex::new("x").unwrap();
        let mut out: Vec<MatchRecord> = Vec::new();
        assert!(matches!(
            scan_file(&dir.path().join("gone"), &re, opts(0, false), &mut out),
            Err(ScanSkip::Io(_))
        ));
    }
}
