//! Filesystem sandbox for search roots.
//!
//! Every search root is resolved here before any file is opened. Files found
//! during the walk are filtered again with [`Sandbox::is_path_denied`], which
//! only consults the deny globs.

use std::path::{Component, Path, PathBuf};

use super::{DenialReason, ToolError};

/// Default deny patterns for credentials and crash dumps.
pub const DEFAULT_SANDBOX_DENY_PATTERNS: &[&str] = &[
    "**/.ssh/**",
    "**/.gnupg/**",
    "**/.aws/**",
    "**/.azure/**",
    "**/.config/gcloud/**",
    "**/.git-credentials",
    "**/.npmrc",
    "**/.pypirc",
    "**/.netrc",
    "**/.env",
    "**/.env.*",
    "**/*.env",
    "**/id_rsa*",
    "**/id_ed25519*",
    "**/id_ecdsa*",
    "**/*.pem",
    "**/*.key",
    "**/*.p12",
    "**/*.pfx",
    "**/core",
    "**/core.*",
    "**/*.dmp",
];

#[must_use]
pub fn default_sandbox_deny_patterns() -> Vec<String> {
    DEFAULT_SANDBOX_DENY_PATTERNS
        .iter()
        .map(std::string::ToString::to_string)
        .collect()
}

#[derive(Debug, Clone)]
struct DenyPattern {
    pattern: String,
    matcher: globset::GlobMatcher,
}

/// Allowed roots plus deny globs.
#[derive(Debug, Clone)]
pub struct Sandbox {
    allowed_roots: Vec<PathBuf>,
    deny_patterns: Vec<DenyPattern>,
    allow_absolute: bool,
}

impl Sandbox {
    pub fn new(
        allowed_roots: Vec<PathBuf>,
        denied_patterns: Vec<String>,
        allow_absolute: bool,
    ) -> Result<Self, ToolError> {
        let mut roots = Vec::with_capacity(allowed_roots.len());
        for root in allowed_roots {
            let canonical = std::fs::canonicalize(&root).map_err(|_| outside(&root, &root))?;
            roots.push(canonical);
        }

        let mut deny_patterns = Vec::with_capacity(denied_patterns.len());
        for pattern in denied_patterns {
            // Case-insensitive so "Secret.PEM" cannot slip past "*.pem".
            let glob = globset::GlobBuilder::new(&pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| ToolError::BadArgs {
                    message: format!("Invalid denied pattern '{pattern}': {e}"),
                })?;
            deny_patterns.push(DenyPattern {
                matcher: glob.compile_matcher(),
                pattern,
            });
        }

        Ok(Self {
            allowed_roots: roots,
            deny_patterns,
            allow_absolute,
        })
    }

    #[must_use]
    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.allowed_roots
    }

    /// Resolve a user-supplied search root to a canonical path inside the sandbox.
    ///
    /// Relative paths are joined onto `working_dir`. A root that does not exist
    /// yields [`ToolError::PathNotFound`].
    pub fn resolve_path(&self, path: &str, working_dir: &Path) -> Result<PathBuf, ToolError> {
        if path.chars().any(is_unsafe_path_char) {
            return Err(ToolError::BadArgs {
                message: "path contains invalid control characters".to_string(),
            });
        }
        if contains_ntfs_ads(path) {
            return Err(ToolError::BadArgs {
                message: "path contains NTFS alternate data stream syntax".to_string(),
            });
        }

        let input = PathBuf::from(path);
        if input.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(outside(&input, &input));
        }

        let joined = if input.is_absolute() {
            if self.allow_absolute {
                input
            } else {
                self.rebase_onto_root(&input)
                    .ok_or_else(|| outside(&input, &input))?
            }
        } else {
            working_dir.join(input)
        };

        let canonical = match std::fs::canonicalize(&joined) {
            Ok(canonical) => canonical,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolError::PathNotFound { path: joined });
            }
            Err(_) => return Err(outside(&joined, &joined)),
        };
        self.check_allowed(&joined, canonical)
    }

    /// An absolute path is accepted only when it already lies under a root.
    fn rebase_onto_root(&self, path: &Path) -> Option<PathBuf> {
        self.allowed_roots.iter().find_map(|root| {
            path.strip_prefix(root).ok().map(|rel| root.join(rel))
        })
    }

    fn check_allowed(&self, attempted: &Path, canonical: PathBuf) -> Result<PathBuf, ToolError> {
        if !self.allowed_roots.iter().any(|root| canonical.starts_with(root)) {
            return Err(ToolError::SandboxViolation(
                DenialReason::PathOutsideSandbox {
                    attempted: attempted.to_path_buf(),
                    resolved: canonical,
                },
            ));
        }
        if let Some(pattern) = self.matches_denied_pattern(&canonical) {
            return Err(ToolError::SandboxViolation(
                DenialReason::DeniedPatternMatched {
                    attempted: canonical,
                    pattern,
                },
            ));
        }
        Ok(canonical)
    }

    fn matches_denied_pattern(&self, path: &Path) -> Option<String> {
        let normalized = path.to_string_lossy().replace('\\', "/");
        self.deny_patterns
            .iter()
            .find(|deny| deny.matcher.is_match(&normalized))
            .map(|deny| deny.pattern.clone())
    }

    /// Deny-glob check only. No canonicalization or root check, so it is cheap
    /// enough to run on every walked file.
    #[must_use]
    pub fn is_path_denied(&self, path: &Path) -> bool {
        self.matches_denied_pattern(path).is_some()
    }
}

fn outside(attempted: &Path, resolved: &Path) -> ToolError {
    ToolError::SandboxViolation(DenialReason::PathOutsideSandbox {
        attempted: attempted.to_path_buf(),
        resolved: resolved.to_path_buf(),
    })
}

/// On Windows a `:` inside a normal component names an alternate data stream.
fn contains_ntfs_ads(input: &str) -> bool {
    if !cfg!(windows) {
        return false;
    }
    Path::new(input)
        .components()
        .any(|c| matches!(c, Component::Normal(s) if s.to_string_lossy().contains(':')))
}

fn is_unsafe_path_char(c: char) -> bool {
    matches!(c, '\u{0000}'..='\u{001f}' | '\u{007f}' | '\u{0080}'..='\u{009f}')
        || delve_types::is_steganographic_char(c)
}
