//! Terminal approval prompts.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};

use anvil_engine::{ToolCall, ToolCallStatus};
use anvil_tools::{ConfirmationDetails, ConfirmationKind};
use anvil_types::ConfirmationOutcome;
use tokio::sync::mpsc;

/// Lines typed on stdin, read on a dedicated thread so a pending prompt never
/// holds up runtime shutdown.
#[derive(Default)]
pub(crate) struct Answers {
    lines: Option<mpsc::UnboundedReceiver<String>>,
}

impl Answers {
    async fn next_line(&mut self) -> Option<String> {
        let lines = self.lines.get_or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            std::thread::spawn(move || {
                for line in io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
            rx
        });
        lines.recv().await
    }
}

/// Remembers which confirmation each call was already asked about, so repeated
/// snapshots don't prompt twice. A call that went through an editor session
/// comes back with new details and is asked again.
#[derive(Debug, Default)]
pub(crate) struct PromptTracker {
    asked: HashMap<String, ConfirmationKind>,
}

impl PromptTracker {
    /// Ids of calls in `calls` that need a prompt now, in batch order.
    pub(crate) fn pending(&mut self, calls: &[ToolCall]) -> Vec<String> {
        let mut pending = Vec::new();
        for call in calls {
            let ToolCallStatus::AwaitingApproval { details, modifying } = &call.status else {
                continue;
            };
            if *modifying {
                self.asked.remove(call.call_id());
                continue;
            }
            if self.asked.get(call.call_id()) == Some(&details.kind) {
                continue;
            }
            self.asked
                .insert(call.call_id().to_string(), details.kind.clone());
            pending.push(call.call_id().to_string());
        }
        pending
    }
}

pub(crate) fn describe(tool_name: &str, details: &ConfirmationDetails) -> String {
    let mut out = format!("\n== {} ({tool_name}) ==\n", details.title);
    match &details.kind {
        ConfirmationKind::Edit {
            file_path,
            file_diff,
            ..
        } => {
            out.push_str(&format!("File: {}\n", file_path.display()));
            out.push_str(file_diff);
            if !file_diff.ends_with('\n') {
                out.push('\n');
            }
        }
        ConfirmationKind::Exec { command, .. } => {
            out.push_str(&format!("Command: {command}\n"));
        }
        ConfirmationKind::Mcp {
            server_name,
            tool_display_name,
            ..
        } => {
            out.push_str(&format!("MCP server: {server_name}\nTool: {tool_display_name}\n"));
        }
        ConfirmationKind::Info { prompt, urls } => {
            out.push_str(prompt);
            out.push('\n');
            for url in urls {
                out.push_str(&format!("  {url}\n"));
            }
        }
    }
    out
}

fn choices(details: &ConfirmationDetails, can_modify: bool) -> String {
    let mut choices = vec!["[y]es", "[a]lways"];
    if matches!(details.kind, ConfirmationKind::Mcp { .. }) {
        choices.push("[s]erver always");
    }
    if can_modify {
        choices.push("[m]odify");
    }
    choices.push("[n]o");
    choices.join(" / ")
}

pub(crate) fn parse_answer(
    line: &str,
    details: &ConfirmationDetails,
    can_modify: bool,
) -> Option<ConfirmationOutcome> {
    let is_mcp = matches!(details.kind, ConfirmationKind::Mcp { .. });
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(ConfirmationOutcome::ProceedOnce),
        "a" | "always" if is_mcp => Some(ConfirmationOutcome::ProceedAlwaysTool),
        "a" | "always" => Some(ConfirmationOutcome::ProceedAlways),
        "s" | "server" if is_mcp => Some(ConfirmationOutcome::ProceedAlwaysServer),
        "m" | "modify" if can_modify => Some(ConfirmationOutcome::ModifyWithEditor),
        "n" | "no" => Some(ConfirmationOutcome::Cancel),
        _ => None,
    }
}

/// Ask until the user gives a valid answer. Closed stdin cancels.
pub(crate) async fn ask(
    tool_name: &str,
    details: &ConfirmationDetails,
    can_modify: bool,
    answers: &mut Answers,
) -> ConfirmationOutcome {
    eprint!("{}", describe(tool_name, details));
    let choices = choices(details, can_modify);
    loop {
        eprint!("Allow? {choices} > ");
        let _ = io::stderr().flush();
        let Some(line) = answers.next_line().await else {
            eprintln!("\nstdin closed; cancelling {tool_name}");
            return ConfirmationOutcome::Cancel;
        };
        if let Some(outcome) = parse_answer(&line, details, can_modify) {
            return outcome;
        }
        eprintln!("Please answer one of: {choices}");
    }
}
