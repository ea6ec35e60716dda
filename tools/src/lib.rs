//! Tool Executor Framework - core types, helpers, and the built-in Grep tool.

pub mod config;
pub mod grep;
pub mod sandbox;

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use delve_types::{ToolDefinition, sanitize_terminal_text};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use grep::access::{AccessRecorder, NoopAccessRecorder};
use sandbox::Sandbox;

pub use grep::{GrepStream, GrepStreamEvent, GrepTool, GrepToolConfig, StreamChunk};

/// Default cap on the text returned by a single tool call.
pub const DEFAULT_MAX_TOOL_OUTPUT_BYTES: usize = 256 * 1024;

/// Tool execution future type alias.
pub type ToolFut<'a> = Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>>;

/// Result of a tool call as handed back to the orchestrator.
///
/// Recoverable failures (bad arguments, sandbox denials, compile timeouts) are
/// carried here with `is_error = true` rather than as `Err`, so the model sees
/// them as an ordinary tool result.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
    /// Machine-readable side channel for programmatic consumers.
    pub structured: Option<Value>,
}

impl ToolOutput {
    #[must_use]
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            structured: None,
        }
    }

    #[must_use]
    pub fn failure(err: &ToolError) -> Self {
        Self {
            content: err.to_string(),
            is_error: true,
            structured: None,
        }
    }

    #[must_use]
    pub fn with_structured(mut self, structured: Value) -> Self {
        self.structured = Some(structured);
        self
    }
}

/// Error types for tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Bad tool args: {message}")]
    BadArgs { message: String },
    #[error("Sandbox violation: {0}")]
    SandboxViolation(DenialReason),
    #[error("Path not found: {}", path.display())]
    PathNotFound { path: PathBuf },
    #[error("Regex compilation exceeded {}ms; simplify the pattern", timeout.as_millis())]
    CompileTimeout { timeout: Duration },
    #[error("Tool call cancelled: {tool}")]
    Cancelled { tool: String },
    #[error("Tool execution failed: {tool}: {message}")]
    ExecutionFailed { tool: String, message: String },
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },
    #[error("Duplicate tool registered: {name}")]
    DuplicateTool { name: String },
}

impl ToolError {
    /// Cancellation is the only error a tool propagates as a hard failure.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ToolError::Cancelled { .. })
    }
}

/// Denial reason for sandbox or policy.
#[derive(Debug, Clone)]
pub enum DenialReason {
    PathOutsideSandbox {
        attempted: PathBuf,
        resolved: PathBuf,
    },
    DeniedPatternMatched {
        attempted: PathBuf,
        pattern: String,
    },
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialReason::PathOutsideSandbox {
                attempted,
                resolved,
            } => write!(
                f,
                "Path outside sandbox (attempted: {}, resolved: {})",
                attempted.display(),
                resolved.display()
            ),
            DenialReason::DeniedPatternMatched { attempted, pattern } => write!(
                f,
                "Path '{}' matched denied pattern '{}'",
                attempted.display(),
                pattern
            ),
        }
    }
}

/// A tool that can be dispatched dynamically by the orchestrator.
pub trait ToolExecutor: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn schema(&self) -> Value;
    fn is_side_effecting(&self, args: &Value) -> bool;
    /// Whether this tool reads local user data that will be sent to the LLM provider.
    fn reads_user_data(&self, _args: &Value) -> bool {
        false
    }
    fn approval_summary(&self, args: &Value) -> Result<String, ToolError>;
    /// Structural check run before `execute`.
    fn validate(&self, args: &Value) -> Result<(), ToolError> {
        validate_args(&self.schema(), args)
    }
    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a>;
}

pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, ToolError> {
    serde_json::from_value(args.clone()).map_err(|e| ToolError::BadArgs {
        message: e.to_string(),
    })
}

/// Tool registry keyed by tool name.
#[derive(Default)]
pub struct ToolRegistry {
    executors: HashMap<String, Box<dyn ToolExecutor>>,
}

impl ToolRegistry {
    pub fn register(&mut self, executor: Box<dyn ToolExecutor>) -> Result<(), ToolError> {
        let name = executor.name().to_string();
        if self.executors.contains_key(&name) {
            return Err(ToolError::DuplicateTool { name });
        }
        self.executors.insert(name, executor);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&dyn ToolExecutor, ToolError> {
        self.executors
            .get(name)
            .map(std::convert::AsRef::as_ref)
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
            })
    }

    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .executors
            .values()
            .map(|exec| ToolDefinition::new(exec.name(), exec.description(), exec.schema()))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

/// Per-call tool context.
pub struct ToolCtx {
    pub sandbox: Sandbox,
    pub working_dir: PathBuf,
    /// Cancellation signal owned by the orchestrator.
    pub cancel: CancellationToken,
    pub access_recorder: Arc<dyn AccessRecorder>,
    pub max_output_bytes: usize,
    pub tool_call_id: String,
}

impl ToolCtx {
    #[must_use]
    pub fn new(sandbox: Sandbox, working_dir: PathBuf) -> Self {
        Self {
            sandbox,
            working_dir,
            cancel: CancellationToken::new(),
            access_recorder: Arc::new(NoopAccessRecorder),
            max_output_bytes: DEFAULT_MAX_TOOL_OUTPUT_BYTES,
            tool_call_id: String::new(),
        }
    }

    #[must_use]
    pub fn with_access_recorder(mut self, recorder: Arc<dyn AccessRecorder>) -> Self {
        self.access_recorder = recorder;
        self
    }

    #[must_use]
    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }
}

impl std::fmt::Debug for ToolCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCtx")
            .field("sandbox", &self.sandbox)
            .field("working_dir", &self.working_dir)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("max_output_bytes", &self.max_output_bytes)
            .field("tool_call_id", &self.tool_call_id)
            .finish_non_exhaustive()
    }
}

/// Aggregated tool settings derived from config.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub grep: GrepToolConfig,
    pub max_output_bytes: usize,
    pub sandbox: Sandbox,
}

/// Validate arguments against a JSON schema.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), ToolError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| ToolError::BadArgs {
        message: format!("Invalid tool schema: {e}"),
    })?;
    if let Err(err) = validator.validate(args) {
        return Err(ToolError::BadArgs {
            message: err.to_string(),
        });
    }
    Ok(())
}

/// Truncate tool output to the effective maximum length.
#[must_use]
pub fn truncate_output(output: String, effective_max: usize) -> String {
    if output.len() <= effective_max {
        return output;
    }
    let marker = "\n\n... [output truncated]";
    if effective_max <= marker.len() {
        return marker[..effective_max].to_string();
    }
    let max_body = effective_max - marker.len();
    let mut end = max_body;
    while end > 0 && !output.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = output;
    truncated.truncate(end);
    truncated.push_str(marker);
    truncated
}

/// Sanitize tool output for terminal display and context inclusion.
///
/// Grep output echoes file contents verbatim, so escape sequences and
/// invisible characters are removed before it leaves the tool.
#[must_use]
pub fn sanitize_output(output: &str) -> String {
    let terminal_safe = sanitize_terminal_text(output);
    delve_types::strip_steganographic_chars(&terminal_safe).into_owned()
}
