//! Merge, sort, cap and render search results.

use std::fmt::Write as _;
use std::path::Path;

use serde_json::{Value, json};

use super::engine::{FileCount, FileMatchSet};

/// Results after sorting and capping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub matches: Vec<FileMatchSet>,
    pub total: usize,
    pub capped: bool,
}

impl Aggregate {
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.matches.len()
    }
}

/// Sort by path and keep at most `cap` records overall.
///
/// Anything beyond the cap sets `capped`, so "exactly cap" and "more than
/// cap" stay distinguishable.
#[must_use]
pub fn aggregate(mut sets: Vec<FileMatchSet>, cap: usize) -> Aggregate {
    sets.retain(|set| !set.records.is_empty());
    sets.sort_by(|a, b| a.path.cmp(&b.path));

    let mut remaining = cap;
    let mut capped = false;
    let mut matches = Vec::with_capacity(sets.len());
    for mut set in sets {
        if remaining == 0 {
            capped = true;
            break;
        }
        if set.records.len() > remaining {
            set.records.truncate(remaining);
            capped = true;
        }
        remaining -= set.records.len();
        matches.push(set);
    }

    Aggregate {
        matches,
        total: cap - remaining,
        capped,
    }
}

/// `/`-separated path relative to `base`, or the full path when outside it.
#[must_use]
pub fn relative_display(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Wording and annotations for a rendered result.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions<'a> {
    pub base: &'a Path,
    pub pattern: &'a str,
    pub cap: usize,
    pub invert: bool,
    pub cached: bool,
    pub interrupted: bool,
}

pub(crate) fn unit(invert: bool) -> &'static str {
    if invert { "non-matching line(s)" } else { "match(es)" }
}

/// One-line summary without trailing colon.
#[must_use]
pub fn summary_line(total: usize, file_count: usize, capped: bool, cap: usize, invert: bool) -> String {
    if capped {
        let noun = if invert { "non-matching lines" } else { "matches" };
        format!(
            "Found {cap}+ {noun} in {file_count} file(s) (capped at {cap}; refine the pattern or path)"
        )
    } else {
        format!("Found {total} {} in {file_count} file(s)", unit(invert))
    }
}

#[must_use]
pub fn render_matches(result: &Aggregate, opts: &RenderOptions<'_>) -> String {
    if result.total == 0 {
        let mut out = if opts.invert {
            format!("No non-matching lines found for pattern \"{}\"", opts.pattern)
        } else {
            format!("No matches found for pattern \"{}\"", opts.pattern)
        };
        if opts.interrupted {
            out.push_str(" (search interrupted)");
        }
        return out;
    }

    let mut out = summary_line(
        result.total,
        result.file_count(),
        result.capped,
        opts.cap,
        opts.invert,
    );
    out.push(':');
    if opts.cached {
        out.push_str(" [served from cache]");
    }
    if opts.interrupted {
        out.push_str(" [search interrupted; results are partial]");
    }
    for set in &result.matches {
        let rel = relative_display(&set.path, opts.base);
        for record in &set.records {
            let _ = write!(out, "\n{rel}:{}: {}", record.line_number, record.text);
        }
    }
    out
}

#[must_use]
pub fn render_counts(counts: &[FileCount], base: &Path, invert: bool) -> String {
    let mut out = String::new();
    for entry in counts {
        let _ = writeln!(out, "{}: {}", relative_display(&entry.path, base), entry.count);
    }
    let total: usize = counts.iter().map(|c| c.count).sum();
    let _ = write!(out, "Total: {total} {} in {} file(s)", unit(invert), counts.len());
    out
}

#[must_use]
pub fn structured_matches(result: &Aggregate, base: &Path, cached: bool) -> Value {
    let matches: Vec<Value> = result
        .matches
        .iter()
        .map(|set| {
            json!({
                "path": relative_display(&set.path, base),
                "lines": set.records,
            })
        })
        .collect();
    json!({
        "matches": matches,
        "file_count": result.file_count(),
        "total": result.total,
        "capped": result.capped,
        "cached": cached,
    })
}

#[must_use]
pub fn structured_counts(counts: &[FileCount], base: &Path) -> Value {
    let files: Vec<Value> = counts
        .iter()
        .map(|c| json!({ "path": relative_display(&c.path, base), "count": c.count }))
        .collect();
    json!({
        "counts": files,
        "file_count": counts.len(),
        "total": counts.iter().map(|c| c.count).sum::<usize>(),
    })
}
