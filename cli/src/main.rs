//! Delve CLI - one-shot front end over the Grep tool.
//!
//! ```text
//! main() -> load config -> build_tool_settings() -> ToolRegistry + ToolCtx
//!                                     |
//!                                     v
//!                   Grep::execute() | Grep::execute_streaming()
//! ```
//!
//! Tool output goes to stdout. Logs go to `~/.delve/logs/delve.log` (or
//! `./.delve/logs/delve.log`), and to stderr only when neither can be opened.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{Map, Value, json};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use delve_config::{DelveConfig, build_tool_settings};
use delve_tools::{
    GrepStreamEvent, GrepTool, ToolCtx, ToolError, ToolExecutor, ToolOutput, ToolRegistry,
    ToolSettings,
};

const EXIT_FAILED_RESULT: u8 = 1;
const EXIT_CANCELLED: u8 = 130;

/// Search file contents with a regular expression.
#[derive(Parser, Debug)]
#[command(name = "delve")]
#[command(version)]
struct Args {
    /// Regular expression to search for
    pattern: String,

    /// File or directory to search (default: current directory)
    path: Option<String>,

    /// Configuration file (default: ~/.delve/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print records as they are found instead of a sorted result
    #[arg(long)]
    stream: bool,

    /// Only search files matching this glob, e.g. '**/*.rs'
    #[arg(short, long)]
    glob: Option<String>,

    /// Match without regard to case
    #[arg(short = 'i', long)]
    ignore_case: bool,

    /// Lines of context around each match
    #[arg(short = 'C', long, value_name = "N")]
    context: Option<u64>,

    /// Report lines that do NOT match
    #[arg(short = 'v', long)]
    invert: bool,

    /// Report per-file counts instead of lines
    #[arg(short, long)]
    count: bool,
}

impl Args {
    fn tool_args(&self) -> Value {
        let mut args = Map::new();
        args.insert("pattern".to_string(), json!(self.pattern));
        if let Some(path) = &self.path {
            args.insert("path".to_string(), json!(path));
        }
        if let Some(glob) = &self.glob {
            args.insert("glob".to_string(), json!(glob));
        }
        if self.ignore_case {
            args.insert("case_insensitive".to_string(), json!(true));
        }
        if let Some(context) = self.context {
            args.insert("context_lines".to_string(), json!(context));
        }
        if self.invert {
            args.insert("invert".to_string(), json!(true));
        }
        if self.count {
            args.insert("count_only".to_string(), json!(true));
        }
        Value::Object(args)
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (log_file, init_warnings) = open_delve_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // stdout carries tool output, so the last resort is stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_delve_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in delve_log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn delve_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.delve/logs/delve.log
    if let Some(config_path) = DelveConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("delve.log"));
    }

    // Fallback: ./.delve/logs/delve.log
    candidates.push(PathBuf::from(".delve").join("logs").join("delve.log"));

    candidates
}

fn load_config(explicit: Option<&PathBuf>) -> Result<Option<DelveConfig>> {
    let loaded = match explicit {
        Some(path) => DelveConfig::load_from(path),
        None => DelveConfig::load(),
    };
    Ok(loaded?)
}

fn build_ctx(settings: &ToolSettings) -> Result<ToolCtx> {
    let working_dir = std::env::current_dir().context("cannot determine current directory")?;
    Ok(ToolCtx::new(settings.sandbox.clone(), working_dir)
        .with_max_output_bytes(settings.max_output_bytes))
}

/// Cancel the search on the first Ctrl-C.
fn spawn_interrupt_handler(ctx: &ToolCtx) {
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling search");
            cancel.cancel();
        }
    });
}

fn exit_for(output: &ToolOutput) -> ExitCode {
    if output.is_error {
        ExitCode::from(EXIT_FAILED_RESULT)
    } else {
        ExitCode::SUCCESS
    }
}

fn report_error(err: &ToolError) -> ExitCode {
    eprintln!("{err}");
    if err.is_cancellation() {
        ExitCode::from(EXIT_CANCELLED)
    } else {
        ExitCode::from(EXIT_FAILED_RESULT)
    }
}

async fn run_once(settings: &ToolSettings, args: Value, mut ctx: ToolCtx) -> Result<ExitCode> {
    let mut registry = ToolRegistry::default();
    registry.register(Box::new(GrepTool::new(settings.grep.clone())))?;
    let tool = registry.lookup("Grep")?;

    if let Err(err) = tool.validate(&args) {
        return Ok(report_error(&err));
    }
    match tool.execute(args, &mut ctx).await {
        Ok(output) => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", output.content)?;
            Ok(exit_for(&output))
        }
        Err(err) => Ok(report_error(&err)),
    }
}

async fn run_streaming(settings: &ToolSettings, args: Value, ctx: ToolCtx) -> Result<ExitCode> {
    let tool = GrepTool::new(settings.grep.clone());
    if let Err(err) = tool.validate(&args) {
        return Ok(report_error(&err));
    }

    let mut stream = tool.execute_streaming(args, &ctx);
    let mut stdout = std::io::stdout();
    while let Some(event) = stream.next().await {
        match event {
            GrepStreamEvent::Chunk(chunk) => {
                writeln!(stdout, "{}", chunk.text)?;
                stdout.flush()?;
            }
            GrepStreamEvent::Failed(err) => return Ok(report_error(&err)),
            GrepStreamEvent::Completed => return Ok(ExitCode::SUCCESS),
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn run(args: Args) -> Result<ExitCode> {
    let config = load_config(args.config.as_ref())?;
    let settings = build_tool_settings(config.as_ref())?;
    let ctx = build_ctx(&settings)?;
    spawn_interrupt_handler(&ctx);

    let tool_args = args.tool_args();
    tracing::debug!(args = %tool_args, stream = args.stream, "Starting search");
    if args.stream {
        run_streaming(&settings, tool_args, ctx).await
    } else {
        run_once(&settings, tool_args, ctx).await
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();

    match run(args).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{err:#}");
            eprintln!("delve: {err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Args;
    use clap::Parser;
    use serde_json::json;

    #[test]
    fn flags_map_to_tool_args() {
        let args = Args::parse_from([
            "delve", "-i", "-C", "2", "-g", "**/*.rs", "-v", "TODO", "src",
        ]);
        assert_eq!(
            args.tool_args(),
            json!({
                "pattern": "TODO",
                "path": "src",
                "glob": "**/*.rs",
                "case_insensitive": true,
                "context_lines": 2,
                "invert": true,
            })
        );
    }

    #[test]
    fn minimal_invocation_only_sends_pattern() {
        let args = Args::parse_from(["delve", "fn main"]);
        assert_eq!(args.tool_args(), json!({"pattern": "fn main"}));
        assert!(!args.stream);
    }

    #[test]
    fn count_and_stream_flags() {
        let args = Args::parse_from(["delve", "--stream", "-c", "x"]);
        assert!(args.stream);
        assert_eq!(args.tool_args()["count_only"], true);
    }
}
