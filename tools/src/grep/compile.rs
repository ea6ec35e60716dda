//! Regex compilation under a timeout and cancellation race.

use std::sync::Arc;
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use tokio_util::sync::CancellationToken;

use crate::ToolError;

/// Build a regex with bounded program and DFA sizes.
pub fn build_regex(pattern: &str, size_limit: usize) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .size_limit(size_limit)
        .dfa_size_limit(size_limit)
        .build()
}

pub(crate) fn regex_error(err: &regex::Error) -> ToolError {
    let message = match err {
        regex::Error::CompiledTooBig(limit) => {
            format!("Pattern too complex: compiled size exceeds {limit} bytes")
        }
        other => format!("Invalid regex: {other}"),
    };
    ToolError::BadArgs { message }
}

/// Compile `pattern` on a blocking thread.
///
/// The first of compile completion, `timeout` and `cancel` wins. A compile
/// that loses the race keeps running detached until it finishes on its own.
pub async fn compile_guarded(
    pattern: String,
    size_limit: usize,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Arc<Regex>, ToolError> {
    race_compile(move || build_regex(&pattern, size_limit), timeout, cancel)
        .await
        .map(Arc::new)
}

pub(crate) async fn race_compile<F>(
    compile: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Regex, ToolError>
where
    F: FnOnce() -> Result<Regex, regex::Error> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(compile);
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ToolError::Cancelled {
            tool: "Grep".to_string(),
        }),
        joined = task => match joined {
            Ok(Ok(regex)) => Ok(regex),
            Ok(Err(err)) => Err(regex_error(&err)),
            Err(join_err) => Err(ToolError::ExecutionFailed {
                tool: "Grep".to_string(),
                message: format!("regex compile task failed: {join_err}"),
            }),
        },
        () = tokio::time::sleep(timeout) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Regex compilation timed out");
            Err(ToolError::CompileTimeout { timeout })
        }
    }
}
