//! Grep tool: regex search over a working tree.
//!
//! Pipeline for one query:
//!
//! 1. parse args and resolve the root through the sandbox
//! 2. consult the result cache (forward mode only)
//! 3. compile the pattern under a timeout/cancel race
//! 4. discover candidate files
//! 5. scan them in a bounded worker pool (or sequentially for invert)
//! 6. sort, cap, render, and store in the cache
//!
//! [`GrepTool::execute_streaming`] runs steps 3-5 sequentially and emits
//! chunks as records are found.

pub mod access;
pub mod aggregate;
pub mod cache;
pub mod compile;
pub mod discover;
pub mod engine;
pub mod ignore_rules;
pub mod query;
pub mod scan;
pub mod stream;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

use delve_types::NonEmptyString;

use crate::{
    ToolCtx, ToolError, ToolExecutor, ToolFut, ToolOutput, parse_args, sanitize_output,
    truncate_output, validate_args,
};
use access::AccessKind;
use aggregate::{Aggregate, RenderOptions};
use cache::{GrepCache, GrepCacheEntry, MemoryGrepCache};
use discover::{Discovery, compile_glob};
use ignore_rules::{GitignoreRules, IgnoreRules, NoIgnore};
use query::SearchQuery;

pub use stream::{ChunkKind, GrepStream, GrepStreamEvent, StreamChunk};

pub const DEFAULT_MAX_MATCHES: usize = 500;
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_LINE_CHARS: usize = 500;
pub const DEFAULT_WORKER_POOL_SIZE: usize = 10;
pub const DEFAULT_COMPILE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REGEX_SIZE_LIMIT_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 256;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

const ACCESS_ORIGIN: &str = "grep";

/// Resolved grep limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrepToolConfig {
    pub max_matches: usize,
    pub max_file_size_bytes: u64,
    pub max_line_chars: usize,
    pub worker_pool_size: usize,
    pub compile_timeout: Duration,
    pub regex_size_limit_bytes: usize,
    pub cache_enabled: bool,
    pub cache_max_entries: usize,
    pub cache_ttl: Duration,
}

impl Default for GrepToolConfig {
    fn default() -> Self {
        Self {
            max_matches: DEFAULT_MAX_MATCHES,
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            max_line_chars: DEFAULT_MAX_LINE_CHARS,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            compile_timeout: DEFAULT_COMPILE_TIMEOUT,
            regex_size_limit_bytes: DEFAULT_REGEX_SIZE_LIMIT_BYTES,
            cache_enabled: true,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GrepArgs {
    pattern: NonEmptyString,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    glob: Option<String>,
    #[serde(default)]
    case_insensitive: bool,
    #[serde(default)]
    context_lines: usize,
    #[serde(default)]
    invert: bool,
    #[serde(default)]
    count_only: bool,
}

impl GrepArgs {
    fn glob(&self) -> Option<&str> {
        self.glob.as_deref().map(str::trim).filter(|g| !g.is_empty())
    }

    fn path(&self) -> &str {
        self.path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(".")
    }
}

fn cancelled() -> ToolError {
    ToolError::Cancelled {
        tool: "Grep".to_string(),
    }
}

/// The `Grep` tool.
pub struct GrepTool {
    config: GrepToolConfig,
    cache: Option<Arc<dyn GrepCache>>,
    /// Fixed ignore rules; `None` loads `.gitignore` files per query root.
    ignore_rules: Option<Arc<dyn IgnoreRules>>,
}

impl std::fmt::Debug for GrepTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrepTool")
            .field("config", &self.config)
            .field("cache", &self.cache.is_some())
            .field("ignore_rules", &self.ignore_rules.is_some())
            .finish()
    }
}

impl GrepTool {
    #[must_use]
    pub fn new(config: GrepToolConfig) -> Self {
        let cache: Option<Arc<dyn GrepCache>> = config.cache_enabled.then(|| {
            Arc::new(MemoryGrepCache::new(
                config.cache_max_entries,
                config.cache_ttl,
            )) as Arc<dyn GrepCache>
        });
        Self {
            config,
            cache,
            ignore_rules: None,
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn GrepCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    #[must_use]
    pub fn with_ignore_rules(mut self, rules: Arc<dyn IgnoreRules>) -> Self {
        self.ignore_rules = Some(rules);
        self
    }

    #[must_use]
    pub fn config(&self) -> &GrepToolConfig {
        &self.config
    }

    /// Parse args and resolve the search root.
    fn prepare(&self, args: &Value, ctx: &ToolCtx) -> Result<SearchQuery, ToolError> {
        let typed: GrepArgs = parse_args(args)?;
        compile_glob(typed.glob())?;

        let root = ctx.sandbox.resolve_path(typed.path(), &ctx.working_dir)?;
        let root_is_file = root.is_file();
        Ok(SearchQuery {
            glob: typed.glob().map(str::to_string),
            pattern: typed.pattern.into_inner(),
            root,
            root_is_file,
            case_insensitive: typed.case_insensitive,
            context_lines: typed.context_lines,
            invert: typed.invert,
            count_only: typed.count_only,
        })
    }

    fn ignore_for(&self, query: &SearchQuery) -> Arc<dyn IgnoreRules> {
        if query.root_is_file {
            return Arc::new(NoIgnore);
        }
        match &self.ignore_rules {
            Some(rules) => Arc::clone(rules),
            None => Arc::new(GitignoreRules::load(&query.root)),
        }
    }

    /// Run the aggregated pipeline. Errors are classified by the caller.
    async fn run(&self, query: SearchQuery, ctx: &ToolCtx) -> Result<ToolOutput, ToolError> {
        let cache_key = query.is_cacheable().then(|| query.cache_key());
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(entry) = cache.get_grep(key) {
                tracing::debug!(key = key.as_str(), pattern = %query.pattern, "Grep cache hit");
                let total = entry.matches.iter().map(|set| set.records.len()).sum();
                let result = Aggregate {
                    matches: entry.matches,
                    total,
                    capped: entry.capped,
                };
                return Ok(self.render_forward(&query, &result, true, false));
            }
            tracing::debug!(key = key.as_str(), pattern = %query.pattern, "Grep cache miss");
        }

        let matcher = compile::compile_guarded(
            query.effective_pattern(),
            self.config.regex_size_limit_bytes,
            self.config.compile_timeout,
            &ctx.cancel,
        )
        .await?;

        let discovery = Discovery {
            max_file_size: self.config.max_file_size_bytes,
            ignore: self.ignore_for(&query),
            sandbox: Some(&ctx.sandbox),
        };
        let files = discovery.discover(&query.root, query.glob.as_deref(), &ctx.cancel)?;
        let candidates = files.len();
        let options = query.scan_options(self.config.max_line_chars);
        let workers = self.config.worker_pool_size;
        let cap = self.config.max_matches;

        if query.count_only {
            let mut counts =
                engine::run_counts(files, matcher, options, workers, &ctx.cancel).await?;
            counts.sort_by(|a, b| a.path.cmp(&b.path));
            for entry in &counts {
                ctx.access_recorder
                    .record_access(&entry.path, AccessKind::Search, ACCESS_ORIGIN);
            }
            tracing::info!(
                pattern = %query.pattern,
                candidates,
                files = counts.len(),
                "Grep count completed"
            );
            let base = query.display_base();
            return Ok(ToolOutput::success(aggregate::render_counts(
                &counts,
                base,
                query.invert,
            ))
            .with_structured(aggregate::structured_counts(&counts, base)));
        }

        if query.invert {
            let outcome =
                engine::run_invert(files, matcher, options, cap.saturating_add(1), &ctx.cancel)
                    .await;
            let result = aggregate::aggregate(outcome.sets, cap);
            self.record_access(&result, ctx);
            tracing::info!(
                pattern = %query.pattern,
                candidates,
                lines = result.total,
                files = result.file_count(),
                capped = result.capped,
                interrupted = outcome.interrupted,
                "Grep invert completed"
            );
            return Ok(self.render_forward(&query, &result, false, outcome.interrupted));
        }

        let sets = engine::run_forward(
            files,
            matcher,
            options,
            cap.saturating_add(1),
            workers,
            &ctx.cancel,
        )
        .await?;
        let result = aggregate::aggregate(sets, cap);

        if ctx.cancel.is_cancelled() {
            tracing::warn!(pattern = %query.pattern, "Skipping grep cache store: search was cancelled");
            return Err(cancelled());
        }
        self.record_access(&result, ctx);
        tracing::info!(
            pattern = %query.pattern,
            candidates,
            matches = result.total,
            files = result.file_count(),
            capped = result.capped,
            "Grep completed"
        );
        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            cache.set_grep(
                key,
                GrepCacheEntry {
                    matches: result.matches.clone(),
                    capped: result.capped,
                },
            );
        }
        Ok(self.render_forward(&query, &result, false, false))
    }

    fn record_access(&self, result: &Aggregate, ctx: &ToolCtx) {
        for set in &result.matches {
            ctx.access_recorder
                .record_access(&set.path, AccessKind::Search, ACCESS_ORIGIN);
        }
    }

    fn render_forward(
        &self,
        query: &SearchQuery,
        result: &Aggregate,
        cached: bool,
        interrupted: bool,
    ) -> ToolOutput {
        let base = query.display_base();
        let text = aggregate::render_matches(
            result,
            &RenderOptions {
                base,
                pattern: &query.pattern,
                cap: self.config.max_matches,
                invert: query.invert,
                cached,
                interrupted,
            },
        );
        ToolOutput::success(text).with_structured(aggregate::structured_matches(result, base, cached))
    }

    /// Start a streaming search.
    ///
    /// Must be called from within a Tokio runtime. Argument and path errors
    /// arrive as the stream's first event.
    #[must_use]
    pub fn execute_streaming(&self, args: Value, ctx: &ToolCtx) -> GrepStream {
        if ctx.cancel.is_cancelled() {
            return GrepStream::failed(cancelled());
        }
        let query = match self.prepare(&args, ctx) {
            Ok(query) => query,
            Err(err) => return GrepStream::failed(err),
        };
        let ignore = self.ignore_for(&query);
        stream::spawn(stream::StreamPlan {
            query,
            config: self.config.clone(),
            ignore,
            sandbox: ctx.sandbox.clone(),
            cancel: ctx.cancel.clone(),
            recorder: Arc::clone(&ctx.access_recorder),
        })
    }
}

fn finalize(mut output: ToolOutput, ctx: &ToolCtx) -> ToolOutput {
    output.content = truncate_output(sanitize_output(&output.content), ctx.max_output_bytes);
    output
}

impl ToolExecutor for GrepTool {
    fn name(&self) -> &'static str {
        "Grep"
    }

    fn description(&self) -> &'static str {
        "Search file contents with a regular expression. Returns matching lines as \
         path:line: text, sorted by path. Supports a glob filter, case-insensitive \
         matching, context lines, inverted matching and per-file counts. Detailed \
         results are capped at 500 lines; count_only is uncapped."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search (default: working directory)"
                },
                "glob": {
                    "type": "string",
                    "description": "Glob relative to path, e.g. **/*.rs (default: **/*)"
                },
                "case_insensitive": {
                    "type": "boolean",
                    "description": "Match without regard to case"
                },
                "context_lines": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "Lines of context around each match"
                },
                "invert": {
                    "type": "boolean",
                    "description": "Report lines that do NOT match"
                },
                "count_only": {
                    "type": "boolean",
                    "description": "Report per-file counts instead of lines"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    fn is_side_effecting(&self, _args: &Value) -> bool {
        false
    }

    fn reads_user_data(&self, _args: &Value) -> bool {
        true
    }

    fn approval_summary(&self, args: &Value) -> Result<String, ToolError> {
        let typed: GrepArgs = parse_args(args)?;
        Ok(format!("Grep '{}' in {}", typed.pattern, typed.path()))
    }

    fn validate(&self, args: &Value) -> Result<(), ToolError> {
        validate_args(&self.schema(), args)?;
        let typed: GrepArgs = parse_args(args)?;
        compile_glob(typed.glob())?;
        let pattern = query::effective_pattern(&typed.pattern, typed.case_insensitive);
        compile::build_regex(&pattern, self.config.regex_size_limit_bytes)
            .map(|_| ())
            .map_err(|err| compile::regex_error(&err))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            if ctx.cancel.is_cancelled() {
                return Err(cancelled());
            }
            let outcome = match self.prepare(&args, ctx) {
                Ok(query) => self.run(query, ctx).await,
                Err(err) => Err(err),
            };
            match outcome {
                Ok(output) => Ok(finalize(output, ctx)),
                Err(err) if err.is_cancellation() => Err(err),
                Err(err) => {
                    tracing::debug!(error = %err, "Grep failed");
                    Ok(ToolOutput::failure(&err))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{GrepTool, GrepToolConfig};
    use crate::sandbox::Sandbox;
    use crate::{ToolCtx, ToolError, ToolExecutor};
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn tool() -> GrepTool {
        GrepTool::new(GrepToolConfig::default())
    }

    #[test]
    fn validate_rejects_empty_and_invalid_patterns() {
        let tool = tool();
        assert!(tool.validate(&json!({"pattern": "fn main"})).is_ok());
        assert!(matches!(
            tool.validate(&json!({"pattern": "   "})),
            Err(ToolError::BadArgs { .. })
        ));
        assert!(matches!(
            tool.validate(&json!({"pattern": "(open"})),
            Err(ToolError::BadArgs { .. })
        ));
        assert!(matches!(
            tool.validate(&json!({})),
            Err(ToolError::BadArgs { .. })
        ));
    }

    #[test]
    fn validate_rejects_schema_violations() {
        let tool = tool();
        assert!(tool.validate(&json!({"pattern": "x", "context_lines": -1})).is_err());
        assert!(tool.validate(&json!({"pattern": "x", "bogus": true})).is_err());
        assert!(tool.validate(&json!({"pattern": "x", "glob": "a["})).is_err());
    }

    #[test]
    fn validate_checks_the_case_insensitive_pattern() {
        let tool = tool();
        assert!(
            tool.validate(&json!({"pattern": "todo", "case_insensitive": true}))
                .is_ok()
        );
    }

    #[test]
    fn approval_summary_names_pattern_and_path() {
        let summary = tool()
            .approval_summary(&json!({"pattern": "TODO", "path": "src"}))
            .unwrap();
        assert_eq!(summary, "Grep 'TODO' in src");
        let summary = tool().approval_summary(&json!({"pattern": "x"})).unwrap();
        assert_eq!(summary, "Grep 'x' in .");
    }

    #[test]
    fn tool_is_read_only() {
        let tool = tool();
        assert!(!tool.is_side_effecting(&json!({})));
        assert!(tool.reads_user_data(&json!({})));
    }

    #[tokio::test]
    async fn bad_regex_is_a_failed_result_not_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();
        let sandbox = Sandbox::new(vec![dir.path().to_path_buf()], vec![], false).unwrap();
        let mut ctx = ToolCtx::new(sandbox, dir.path().to_path_buf());
        let output = tool()
            .execute(json!({"pattern": "(open"}), &mut ctx)
            .await
            .unwrap();
        assert!(output.is_error);
        assert!(output.content.contains("Invalid regex"));
    }

    #[tokio::test]
    async fn missing_root_is_a_failed_result() {
        let dir = tempdir().unwrap();
        let sandbox = Sandbox::new(vec![dir.path().to_path_buf()], vec![], false).unwrap();
        let mut ctx = ToolCtx::new(sandbox, dir.path().to_path_buf());
        let output = tool()
            .execute(json!({"pattern": "x", "path": "nope"}), &mut ctx)
            .await
            .unwrap();
        assert!(output.is_error);
        assert!(output.content.contains("Path not found"));
    }

    #[tokio::test]
    async fn pre_cancelled_call_is_an_error() {
        let dir = tempdir().unwrap();
        let sandbox = Sandbox::new(vec![dir.path().to_path_buf()], vec![], false).unwrap();
        let mut ctx = ToolCtx::new(sandbox, dir.path().to_path_buf());
        ctx.cancel.cancel();
        let result = tool().execute(json!({"pattern": "x"}), &mut ctx).await;
        assert!(matches!(result, Err(ToolError::Cancelled { .. })));
    }
}
