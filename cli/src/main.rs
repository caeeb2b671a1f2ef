//! Anvil CLI - run a batch of model tool calls with terminal approval.
//!
//! ```text
//! main() -> load config -> build registry (builtins + discovery)
//!        -> Scheduler::schedule(batch) -> prompt loop -> JSON report on stdout
//! ```
//!
//! Prompts and live output go to stderr so stdout stays machine-readable.

mod batch;
mod prompt;

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::{env, io};

use anvil_config::AnvilConfig;
use anvil_engine::{
    EditorType, ModifyError, Scheduler, SchedulerObserver, ToolCall, TracingTelemetry,
};
use anvil_tools::builtins::register_builtins;
use anvil_tools::{RuntimeConfig, ToolRegistry, detect_shell};
use anvil_types::{ApprovalMode, ConfirmationOutcome};
use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use uuid::Uuid;

use crate::prompt::{Answers, PromptTracker};

#[derive(Debug, Parser)]
#[command(name = "anvil", version, about = "Run a batch of tool calls with terminal approval")]
struct Args {
    /// JSON file holding an array of `{callId?, name, args}`. Reads stdin when omitted.
    batch: Option<PathBuf>,
    /// Print the function declarations of every registered tool and exit.
    #[arg(long)]
    list_tools: bool,
    /// Run every call without confirmation.
    #[arg(long, conflicts_with = "auto_edit")]
    yolo: bool,
    /// Apply file edits without confirmation.
    #[arg(long)]
    auto_edit: bool,
    /// Directory tools operate in (defaults to the configured target or the current directory).
    #[arg(long, value_name = "DIR")]
    cwd: Option<PathBuf>,
}

impl Args {
    fn approval_mode(&self, configured: ApprovalMode) -> ApprovalMode {
        if self.yolo {
            ApprovalMode::Yolo
        } else if self.auto_edit {
            ApprovalMode::AutoEdit
        } else {
            configured
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_anvil_log_file();

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

    // No log file: stay silent rather than mixing logs into the JSON report.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_anvil_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in anvil_log_file_candidates() {
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

fn anvil_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.anvil/logs/anvil.log
    if let Some(config_path) = AnvilConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("anvil.log"));
    }

    // Fallback: ./.anvil/logs/anvil.log
    candidates.push(PathBuf::from(".anvil").join("logs").join("anvil.log"));

    candidates
}

/// Config first, then `$VISUAL`, then `$EDITOR`.
fn preferred_editor(config: &AnvilConfig) -> Option<EditorType> {
    config
        .app
        .editor
        .clone()
        .or_else(|| env::var("VISUAL").ok())
        .or_else(|| env::var("EDITOR").ok())
        .filter(|editor| !editor.trim().is_empty())
        .and_then(|editor| editor.parse().ok())
}

enum UiEvent {
    Calls(Vec<ToolCall>),
    Output { call_id: String, output: String },
    ModifyFailed { call_id: String, message: String },
}

/// Forwards scheduler callbacks to the main loop.
struct CliObserver {
    events: mpsc::UnboundedSender<UiEvent>,
    editor: Option<EditorType>,
}

impl SchedulerObserver for CliObserver {
    fn on_tool_calls_update(&self, calls: &[ToolCall]) {
        let _ = self.events.send(UiEvent::Calls(calls.to_vec()));
    }

    fn on_output_update(&self, call_id: &str, output: &str) {
        let _ = self.events.send(UiEvent::Output {
            call_id: call_id.to_string(),
            output: output.to_string(),
        });
    }

    fn on_modify_failed(&self, call_id: &str, error: &ModifyError) {
        let _ = self.events.send(UiEvent::ModifyFailed {
            call_id: call_id.to_string(),
            message: error.to_string(),
        });
    }

    fn preferred_editor(&self) -> Option<EditorType> {
        self.editor.clone()
    }
}

/// Live output is cumulative; print only what is new since the last update.
fn print_live_output(printed: &mut HashMap<String, usize>, call_id: &str, output: &str) {
    let seen = printed.entry(call_id.to_string()).or_default();
    let fresh = output.get(*seen..).unwrap_or(output);
    if fresh.is_empty() {
        return;
    }
    let mut stderr = io::stderr().lock();
    let _ = write!(stderr, "{fresh}");
    if !fresh.ends_with('\n') {
        let _ = writeln!(stderr);
    }
    *seen = output.len();
}

async fn read_batch(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read batch from {}", path.display())),
        None => {
            let mut input = String::new();
            tokio::io::stdin()
                .read_to_string(&mut input)
                .await
                .context("failed to read batch from stdin")?;
            Ok(input)
        }
    }
}

async fn run_batch(
    args: &Args,
    config: &AnvilConfig,
    session_id: &str,
    registry: Arc<ToolRegistry>,
) -> Result<()> {
    let input = read_batch(args.batch.as_ref()).await?;
    let requests = batch::parse_batch(&input, session_id)?;

    let editor = preferred_editor(config);
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let observer = Arc::new(CliObserver {
        events: events_tx,
        editor: editor.clone(),
    });
    let scheduler = Scheduler::new(registry, observer)
        .with_telemetry(Arc::new(TracingTelemetry))
        .with_approval_mode(args.approval_mode(config.app.approval_mode));

    let signal = CancellationToken::new();
    let handle = scheduler.schedule(requests, signal.clone())?;
    let wait = handle.wait();
    tokio::pin!(wait);

    let mut tracker = PromptTracker::default();
    let mut answers = Answers::default();
    let mut printed = HashMap::new();

    let calls = loop {
        tokio::select! {
            result = &mut wait => break result?,
            Some(event) = events.recv() => match event {
                UiEvent::Output { call_id, output } => {
                    print_live_output(&mut printed, &call_id, &output);
                }
                UiEvent::ModifyFailed { call_id, message } => {
                    eprintln!("warning: could not modify {call_id}: {message}");
                }
                UiEvent::Calls(calls) => {
                    for call_id in tracker.pending(&calls) {
                        if signal.is_cancelled() {
                            break;
                        }
                        let Some(call) = calls.iter().find(|c| c.call_id() == call_id) else {
                            continue;
                        };
                        let Some(details) = call.confirmation() else {
                            continue;
                        };
                        let can_modify = editor.is_some()
                            && call.tool.as_ref().is_some_and(|t| t.as_modifiable().is_some());
                        let outcome = tokio::select! {
                            outcome = prompt::ask(call.name(), details, can_modify, &mut answers) => outcome,
                            _ = tokio::signal::ctrl_c() => {
                                eprintln!("\nCancelling...");
                                signal.cancel();
                                ConfirmationOutcome::Cancel
                            }
                        };
                        if let Err(err) =
                            scheduler.resolve_confirmation(&call_id, outcome, &signal, None)
                        {
                            tracing::warn!(call_id = %call_id, "confirmation not applied: {err}");
                        }
                    }
                }
            },
            result = tokio::signal::ctrl_c(), if !signal.is_cancelled() => {
                if let Err(err) = result {
                    tracing::warn!("failed to listen for Ctrl-C: {err}");
                }
                eprintln!("\nCancelling...");
                signal.cancel();
            }
        }
    };

    let report = serde_json::to_string_pretty(&batch::report(&calls))?;
    println!("{report}");
    Ok(())
}

fn list_tools(registry: &ToolRegistry) -> Result<()> {
    let declarations = registry.function_declarations();
    println!("{}", serde_json::to_string_pretty(&declarations)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let config = AnvilConfig::load().context("failed to load configuration")?;
    let cwd = match &args.cwd {
        Some(dir) => dir.clone(),
        None => env::current_dir().context("failed to read the current directory")?,
    };
    let target_dir = config.target_dir(&cwd);
    let target_dir = target_dir
        .canonicalize()
        .with_context(|| format!("target directory {} is not accessible", target_dir.display()))?;

    let session_id = Uuid::new_v4().to_string();
    let runtime = RuntimeConfig::new(session_id.clone(), target_dir.clone())
        .with_debug(config.app.debug);
    let registry = ToolRegistry::new(target_dir)
        .with_discovery(config.discovery())
        .with_shell(detect_shell(Some(&config.tools.shell)));
    register_builtins(&registry, &runtime, &config.tools.shell)
        .context("failed to register built-in tools")?;

    let report = registry.discover().await;
    for failure in &report.failures {
        eprintln!("warning: {failure}");
    }
    tracing::info!(
        session_id = %session_id,
        discovered = report.registered(),
        "registry ready"
    );

    let registry = Arc::new(registry);
    let result = if args.list_tools {
        list_tools(&registry)
    } else {
        run_batch(&args, &config, &session_id, Arc::clone(&registry)).await
    };
    registry.shutdown().await;
    result
}
