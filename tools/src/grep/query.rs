//! Validated search query and the one routine that builds the pattern string.

use std::path::{Path, PathBuf};

use super::cache::CacheKey;
use super::scan::ScanOptions;

/// Glob applied when the caller supplies none.
pub const DEFAULT_GLOB: &str = "**/*";

/// Build the pattern handed to the regex engine.
///
/// Both the pre-execution syntax check and the execution-time compile call
/// this, so they always see the same string.
#[must_use]
pub fn effective_pattern(pattern: &str, case_insensitive: bool) -> String {
    if case_insensitive {
        format!("(?i){pattern}")
    } else {
        pattern.to_string()
    }
}

/// A search request after argument parsing and sandbox resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub pattern: String,
    /// Canonical search root.
    pub root: PathBuf,
    pub root_is_file: bool,
    pub glob: Option<String>,
    pub case_insensitive: bool,
    pub context_lines: usize,
    pub invert: bool,
    pub count_only: bool,
}

impl SearchQuery {
    #[must_use]
    pub fn effective_pattern(&self) -> String {
        effective_pattern(&self.pattern, self.case_insensitive)
    }

    /// Context only surrounds forward-mode lines; counts and inverted
    /// output never include it.
    #[must_use]
    pub fn scan_options(&self, max_line_chars: usize) -> ScanOptions {
        let plain = !self.invert && !self.count_only;
        ScanOptions {
            context_lines: if plain { self.context_lines } else { 0 },
            invert: self.invert,
            max_line_chars,
        }
    }

    /// Directory that reported paths are made relative to.
    #[must_use]
    pub fn display_base(&self) -> &Path {
        if self.root_is_file {
            self.root.parent().unwrap_or(&self.root)
        } else {
            &self.root
        }
    }

    /// Only plain forward-mode results are memoized.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        !self.invert && !self.count_only
    }

    #[must_use]
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::for_query(
            &self.pattern,
            &self.root,
            self.glob.as_deref(),
            self.case_insensitive,
            self.context_lines,
        )
    }
}
