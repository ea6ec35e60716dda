//! Candidate file discovery.
//!
//! Turns a resolved root and an optional glob into the list of files worth
//! scanning. Directories, oversized files, known binary extensions, ignored
//! paths and sandbox-denied paths never make it into the list.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{GlobBuilder, GlobMatcher};
use ignore::WalkBuilder;
use tokio_util::sync::CancellationToken;

use super::ignore_rules::IgnoreRules;
use crate::ToolError;
use crate::sandbox::Sandbox;

/// Extensions that are never scanned. Compared case-insensitively.
pub const BINARY_EXTENSIONS: &[&str] = &[
    "exe", "dll", "so", "dylib", "o", "a", "lib", "bin", "class", "jar", "pyc", "wasm", "zip",
    "tar", "gz", "tgz", "bz2", "xz", "7z", "rar", "png", "jpg", "jpeg", "gif", "bmp", "ico",
    "webp", "tiff", "mp3", "mp4", "wav", "avi", "mov", "mkv", "flac", "ogg", "pdf", "doc", "docx",
    "xls", "xlsx", "ppt", "pptx", "ttf", "otf", "woff", "woff2", "eot", "db", "sqlite", "iso",
    "dmg",
];

#[must_use]
pub fn is_binary_extension(ext: &str) -> bool {
    BINARY_EXTENSIONS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(ext))
}

/// A file that survived filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub size: u64,
    pub extension: Option<String>,
}

impl CandidateFile {
    fn from_path(path: PathBuf, size: u64) -> Self {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned());
        Self {
            path,
            size,
            extension,
        }
    }
}

/// Compile a user glob. `None` or blank means every file.
pub fn compile_glob(glob: Option<&str>) -> Result<Option<GlobMatcher>, ToolError> {
    let Some(glob) = glob.map(str::trim).filter(|g| !g.is_empty()) else {
        return Ok(None);
    };
    let compiled = GlobBuilder::new(glob)
        .literal_separator(true)
        .build()
        .map_err(|e| ToolError::BadArgs {
            message: format!("Invalid glob '{glob}': {e}"),
        })?;
    Ok(Some(compiled.compile_matcher()))
}

/// Filters applied to every walked file.
pub struct Discovery<'a> {
    pub max_file_size: u64,
    pub ignore: Arc<dyn IgnoreRules>,
    pub sandbox: Option<&'a Sandbox>,
}

impl Discovery<'_> {
    /// List candidate files under `root` in walk (path-sorted) order.
    ///
    /// `root` must already be canonical. A single-file root bypasses glob and
    /// ignore rules but still goes through the size and extension filters.
    /// Ignored directories are pruned, and the ignore rules are told about
    /// every directory the walk enters.
    pub fn discover(
        &self,
        root: &Path,
        glob: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<CandidateFile>, ToolError> {
        let meta = std::fs::metadata(root).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ToolError::PathNotFound {
                path: root.to_path_buf(),
            },
            _ => ToolError::ExecutionFailed {
                tool: "Grep".to_string(),
                message: format!("cannot access {}: {e}", root.display()),
            },
        })?;

        if meta.is_file() {
            return Ok(self
                .admit(root.to_path_buf(), meta.len())
                .into_iter()
                .collect());
        }

        let matcher = compile_glob(glob)?;
        let prune = Arc::clone(&self.ignore);
        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .follow_links(false)
            .filter_entry(move |entry| {
                if entry.file_name() == ".git" {
                    return false;
                }
                let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
                if is_dir && prune.is_ignored(entry.path(), true) {
                    tracing::debug!(path = %entry.path().display(), "Pruning ignored directory");
                    return false;
                }
                true
            })
            .sort_by_file_path(|a, b| a.cmp(b))
            .build();

        let mut files = Vec::new();
        for entry in walker {
            if cancel.is_cancelled() {
                return Err(ToolError::Cancelled {
                    tool: "Grep".to_string(),
                });
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::debug!(error = %err, "Skipping unreadable walk entry");
                    continue;
                }
            };
            let Some(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                self.ignore.enter_dir(entry.path());
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            let path = entry.path();
            if let Some(matcher) = &matcher {
                let rel = path.strip_prefix(root).unwrap_or(path);
                let rel = rel.to_string_lossy().replace('\\', "/");
                if !matcher.is_match(&rel) {
                    continue;
                }
            }
            if self.ignore.is_ignored(path, false) {
                tracing::debug!(path = %path.display(), "Skipping ignored file");
                continue;
            }
            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(err) => {
                    tracing::debug!(path = %path.display(), error = %err, "Skipping file without metadata");
                    continue;
                }
            };
            if let Some(candidate) = self.admit(entry.into_path(), size) {
                files.push(candidate);
            }
        }
        Ok(files)
    }

    /// Size, extension and deny filters shared by both root kinds.
    fn admit(&self, path: PathBuf, size: u64) -> Option<CandidateFile> {
        if size >= self.max_file_size {
            tracing::debug!(path = %path.display(), size, "Skipping oversized file");
            return None;
        }
        let candidate = CandidateFile::from_path(path, size);
        if candidate
            .extension
            .as_deref()
            .is_some_and(is_binary_extension)
        {
            tracing::debug!(path = %candidate.path.display(), "Skipping binary extension");
            return None;
        }
        if self
            .sandbox
            .is_some_and(|sandbox| sandbox.is_path_denied(&candidate.path))
        {
            tracing::debug!(path = %candidate.path.display(), "Skipping sandbox-denied file");
            return None;
        }
        Some(candidate)
    }
}
