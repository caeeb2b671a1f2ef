//! Shell execution engine.
//!
//! Runs one command string under a cancellation token and reports a single
//! structured result. Responsibilities:
//!
//! - spawn the shell in its own session so the whole process group can be
//!   signalled
//! - capture the final working directory through a wrapper script
//! - stream stdout/stderr through per-stream UTF-8 decoders and strip
//!   terminal escapes
//! - detect binary output and switch to byte-count progress messages
//! - throttle live output callbacks
//! - apply the SIGTERM -> grace -> SIGKILL policy on cancellation

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use anvil_utils::{strip_terminal_escapes, truncate_output};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::DEFAULT_MAX_OUTPUT_CHARS;
use crate::process::{self, ChildGuard, DEFAULT_KILL_GRACE};
use crate::shell::{DetectedShell, shell_quote};
use crate::stream::{BinarySniffer, Utf8StreamDecoder, split_incomplete_escape};

const READ_BUF_SIZE: usize = 4096;

/// Tunables for [`ShellExecutor`].
#[derive(Debug, Clone)]
pub struct ShellExecutionSettings {
    /// Minimum spacing between live output callbacks.
    pub throttle: Duration,
    /// Time between SIGTERM and SIGKILL on cancellation.
    pub kill_grace: Duration,
    /// How long to keep reading after exit while something (e.g. a background
    /// job) still holds the pipes open.
    pub post_exit_drain: Duration,
    /// Cap on [`ShellExecutionResult::summary`].
    pub max_summary_chars: usize,
}

impl Default for ShellExecutionSettings {
    fn default() -> Self {
        Self {
            throttle: Duration::from_secs(1),
            kill_grace: DEFAULT_KILL_GRACE,
            post_exit_drain: Duration::from_millis(250),
            max_summary_chars: DEFAULT_MAX_OUTPUT_CHARS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Stdout,
    Stderr,
}

/// Final classification of a shell run, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellOutcome {
    /// The process could not be spawned or supervised.
    Error,
    Aborted,
    Signalled,
    ExitCode(i32),
    Success,
}

#[derive(Debug, Default)]
pub struct ShellExecutionResult {
    /// Every byte the process wrote, both streams interleaved.
    pub raw_output: Vec<u8>,
    /// Sanitized combined text (with any directory warning prepended).
    pub output: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
    pub error: Option<io::Error>,
    pub aborted: bool,
    pub pid: Option<u32>,
    pub binary_detected: bool,
    /// Working directory the command finished in, when it could be captured.
    pub final_cwd: Option<PathBuf>,
}

impl ShellExecutionResult {
    fn spawn_failure(error: io::Error) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn outcome(&self) -> ShellOutcome {
        if self.error.is_some() {
            ShellOutcome::Error
        } else if self.aborted {
            ShellOutcome::Aborted
        } else if self.signal.is_some() {
            ShellOutcome::Signalled
        } else {
            match self.exit_code {
                Some(code) if code != 0 => ShellOutcome::ExitCode(code),
                _ => ShellOutcome::Success,
            }
        }
    }

    /// The one textual summary of this run, shared by the model response and
    /// the user-facing display. Truncated past `max_chars`.
    #[must_use]
    pub fn summary(&self, command: &str, directory: Option<&str>, max_chars: usize) -> String {
        let mut text = String::new();
        let _ = writeln!(text, "Command: {command}");
        let _ = writeln!(text, "Directory: {}", directory.unwrap_or("(root)"));

        let output = self.output.trim_end();
        if self.aborted {
            text.push_str("Output: Command was cancelled before it could complete.");
            if !output.is_empty() {
                let _ = write!(text, " Output before cancellation:\n{output}");
            }
            text.push('\n');
        } else if output.is_empty() {
            text.push_str("Output: (empty)\n");
        } else {
            let _ = writeln!(text, "Output: {output}");
        }

        let none = "(none)";
        let error = self.error.as_ref().map(ToString::to_string);
        let _ = writeln!(text, "Error: {}", error.as_deref().unwrap_or(none));
        let exit_code = self.exit_code.map(|c| c.to_string());
        let _ = writeln!(text, "Exit Code: {}", exit_code.as_deref().unwrap_or(none));
        let _ = writeln!(text, "Signal: {}", self.signal.as_deref().unwrap_or(none));
        let pgid = self.pid.map(|p| p.to_string());
        let _ = write!(text, "Process Group PGID: {}", pgid.as_deref().unwrap_or(none));

        truncate_output(text, max_chars)
    }
}

/// Per-stream text state.
#[derive(Default)]
struct StreamText {
    decoder: Utf8StreamDecoder,
    /// Escape sequence split across reads, awaiting its remainder.
    carry: String,
    text: String,
}

impl StreamText {
    /// Decode and sanitize `bytes`; returns the newly visible text.
    fn push(&mut self, bytes: &[u8]) -> String {
        let mut decoded = std::mem::take(&mut self.carry);
        decoded.push_str(&self.decoder.decode(bytes));
        let (ready, held) = split_incomplete_escape(&decoded);
        let clean = strip_terminal_escapes(ready).into_owned();
        self.carry = held.to_string();
        self.text.push_str(&clean);
        clean
    }

    fn finish(&mut self) -> String {
        let mut rest = std::mem::take(&mut self.carry);
        rest.push_str(&self.decoder.finish());
        let clean = strip_terminal_escapes(&rest).into_owned();
        self.text.push_str(&clean);
        clean
    }
}

/// Collects output and decides when live updates go out.
struct OutputCollector {
    raw: Vec<u8>,
    stdout: StreamText,
    stderr: StreamText,
    combined: String,
    sniffer: BinarySniffer,
    throttle: Duration,
    last_emit: Option<Instant>,
}

impl OutputCollector {
    fn new(throttle: Duration) -> Self {
        Self {
            raw: Vec::new(),
            stdout: StreamText::default(),
            stderr: StreamText::default(),
            combined: String::new(),
            sniffer: BinarySniffer::default(),
            throttle,
            last_emit: None,
        }
    }

    fn stream(&mut self, kind: StreamKind) -> &mut StreamText {
        match kind {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        }
    }

    fn push(&mut self, kind: StreamKind, bytes: &[u8], on_chunk: &mut (dyn FnMut(&str) + Send)) {
        self.raw.extend_from_slice(bytes);
        // Once binary, text decoding stops for good.
        if !self.sniffer.observe(bytes) {
            let visible = self.stream(kind).push(bytes);
            self.combined.push_str(&visible);
        }

        let due = self
            .last_emit
            .is_none_or(|last| last.elapsed() >= self.throttle);
        if !due {
            return;
        }
        self.last_emit = Some(Instant::now());
        if self.sniffer.is_binary() {
            on_chunk(&format!(
                "[Received {} bytes of binary output]",
                self.raw.len()
            ));
        } else {
            on_chunk(&self.combined);
        }
    }

    fn finish(&mut self) {
        if self.sniffer.is_binary() {
            return;
        }
        let tail = self.stdout.finish();
        self.combined.push_str(&tail);
        let tail = self.stderr.finish();
        self.combined.push_str(&tail);
    }
}

/// Runs shell commands.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: DetectedShell,
    settings: ShellExecutionSettings,
}

impl ShellExecutor {
    #[must_use]
    pub fn new(shell: DetectedShell) -> Self {
        Self {
            shell,
            settings: ShellExecutionSettings::default(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: ShellExecutionSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &ShellExecutionSettings {
        &self.settings
    }

    #[must_use]
    pub fn shell(&self) -> &DetectedShell {
        &self.shell
    }

    /// Execute `command` in `cwd`.
    ///
    /// `on_chunk` receives the cumulative sanitized output (or a binary
    /// progress message) at most once per throttle interval. `on_debug`
    /// receives supervision messages (spawn, signals).
    pub async fn execute(
        &self,
        command: &str,
        cwd: &Path,
        signal: &CancellationToken,
        on_chunk: impl FnMut(&str) + Send,
        on_debug: impl FnMut(&str) + Send,
    ) -> ShellExecutionResult {
        self.execute_observed(command, cwd, signal, on_chunk, on_debug, |_| {})
            .await
    }

    /// [`execute`](Self::execute), additionally reporting the child pid once
    /// the process is spawned.
    pub async fn execute_observed(
        &self,
        command: &str,
        cwd: &Path,
        signal: &CancellationToken,
        mut on_chunk: impl FnMut(&str) + Send,
        mut on_debug: impl FnMut(&str) + Send,
        on_spawn: impl FnOnce(u32) + Send,
    ) -> ShellExecutionResult {
        let pwd_file = if self.shell.is_posix() {
            match tempfile::Builder::new().prefix("shell_pwd_").tempfile() {
                Ok(file) => Some(file),
                Err(e) => {
                    debug!("could not create pwd capture file: {e}");
                    None
                }
            }
        } else {
            None
        };
        let script = match &pwd_file {
            Some(file) => wrap_with_pwd_capture(command, file.path()),
            None => command.to_string(),
        };

        let mut cmd = Command::new(&self.shell.binary);
        cmd.args(self.shell.command_args(&script))
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        process::set_new_session(&mut cmd);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                on_debug(&format!("failed to spawn {}: {e}", self.shell));
                return ShellExecutionResult::spawn_failure(e);
            }
        };
        let mut guard = ChildGuard::new(child);
        let pid = guard.child_mut().id();
        if let Some(pid) = pid {
            on_spawn(pid);
        }
        on_debug(&format!(
            "spawned {} (pid {})",
            self.shell,
            pid.map_or_else(|| "?".to_string(), |p| p.to_string())
        ));

        let (tx, mut rx) = mpsc::channel::<(StreamKind, Vec<u8>)>(64);
        let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(stdout) = guard.child_mut().stdout.take() {
            readers.push(tokio::spawn(pump(stdout, StreamKind::Stdout, tx.clone())));
        }
        if let Some(stderr) = guard.child_mut().stderr.take() {
            readers.push(tokio::spawn(pump(stderr, StreamKind::Stderr, tx.clone())));
        }
        drop(tx);

        let mut collector = OutputCollector::new(self.settings.throttle);
        let mut status: Option<ExitStatus> = None;
        let mut error: Option<io::Error> = None;
        let mut aborted = false;
        let mut streams_open = true;
        let mut drain_deadline = tokio::time::Instant::now();

        loop {
            if status.is_some() && !streams_open {
                break;
            }
            tokio::select! {
                chunk = rx.recv(), if streams_open => match chunk {
                    Some((kind, bytes)) => {
                        collector.push(kind, &bytes, &mut on_chunk);
                        drain_deadline = tokio::time::Instant::now() + self.settings.post_exit_drain;
                    }
                    None => streams_open = false,
                },
                waited = guard.child_mut().wait(), if status.is_none() => match waited {
                    Ok(exit) => {
                        status = Some(exit);
                        drain_deadline = tokio::time::Instant::now() + self.settings.post_exit_drain;
                    }
                    Err(e) => {
                        error = Some(e);
                        break;
                    }
                },
                () = signal.cancelled(), if !aborted && status.is_none() => {
                    aborted = true;
                    if let Err(e) = process::terminate(
                        guard.child_mut(),
                        self.settings.kill_grace,
                        &mut on_debug,
                    )
                    .await
                    {
                        on_debug(&format!("failed to terminate process: {e}"));
                    }
                },
                () = tokio::time::sleep_until(drain_deadline), if status.is_some() && streams_open => {
                    on_debug("output pipes still open after exit; background processes keep running");
                    break;
                },
            }
        }

        if status.is_some() {
            guard.disarm();
        }
        for reader in &readers {
            reader.abort();
        }
        collector.finish();

        let final_cwd = pwd_file.as_ref().and_then(|file| read_final_cwd(file));
        let mut output = if collector.sniffer.is_binary() {
            format!(
                "[Command produced binary output ({} bytes), which is not shown.]",
                collector.raw.len()
            )
        } else {
            std::mem::take(&mut collector.combined)
        };
        if let Some(final_cwd) = &final_cwd
            && !same_dir(final_cwd, cwd)
        {
            output = format!(
                "WARNING: shell mode is stateless; the directory change to '{}' will not persist.\n\n{output}",
                final_cwd.display()
            );
        }

        ShellExecutionResult {
            binary_detected: collector.sniffer.is_binary(),
            raw_output: collector.raw,
            output,
            stdout: collector.stdout.text,
            stderr: collector.stderr.text,
            exit_code: status.and_then(|s| s.code()),
            signal: status.as_ref().and_then(process::exit_signal),
            error,
            aborted,
            pid,
            final_cwd,
        }
    }
}

async fn pump<R: AsyncRead + Unpin + Send + 'static>(
    mut reader: R,
    kind: StreamKind,
    tx: mpsc::Sender<(StreamKind, Vec<u8>)>,
) {
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if tx.send((kind, buf[..n].to_vec())).await.is_err() {
            break;
        }
    }
}

/// `{ cmd; }; __code=$?; pwd > file; exit $__code`, keeping a trailing `&`.
fn wrap_with_pwd_capture(command: &str, pwd_file: &Path) -> String {
    let trimmed = command.trim();
    let body = if trimmed.ends_with('&') {
        trimmed.to_string()
    } else {
        format!("{trimmed};")
    };
    format!(
        "{{ {body} }}; __code=$?; pwd > {}; exit $__code",
        shell_quote(&pwd_file.to_string_lossy())
    )
}

fn read_final_cwd(file: &NamedTempFile) -> Option<PathBuf> {
    let contents = std::fs::read_to_string(file.path()).ok()?;
    let trimmed = contents.trim();
    (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::{ShellExecutionResult, ShellOutcome, wrap_with_pwd_capture};
    use std::io;
    use std::path::Path;

    #[test]
    fn wraps_command_for_pwd_capture() {
        let wrapped = wrap_with_pwd_capture("  ls -la ", Path::new("/tmp/pwd file"));
        assert_eq!(
            wrapped,
            "{ ls -la; }; __code=$?; pwd > '/tmp/pwd file'; exit $__code"
        );
    }

    #[test]
    fn keeps_trailing_background_operator() {
        let wrapped = wrap_with_pwd_capture("sleep 5 &", Path::new("/tmp/p"));
        assert!(wrapped.starts_with("{ sleep 5 & }"));
    }

    #[test]
    fn outcome_priority() {
        let mut result = ShellExecutionResult {
            exit_code: Some(2),
            ..Default::default()
        };
        assert_eq!(result.outcome(), ShellOutcome::ExitCode(2));
        result.signal = Some("SIGTERM".into());
        assert_eq!(result.outcome(), ShellOutcome::Signalled);
        result.aborted = true;
        assert_eq!(result.outcome(), ShellOutcome::Aborted);
        result.error = Some(io::Error::other("spawn failed"));
        assert_eq!(result.outcome(), ShellOutcome::Error);

        let ok = ShellExecutionResult {
            exit_code: Some(0),
            ..Default::default()
        };
        assert_eq!(ok.outcome(), ShellOutcome::Success);
    }

    #[test]
    fn summary_lists_every_field() {
        let result = ShellExecutionResult {
            output: "hello\n".into(),
            exit_code: Some(0),
            pid: Some(42),
            ..Default::default()
        };
        let summary = result.summary("echo hello", None, 10_000);
        assert_eq!(
            summary,
            "Command: echo hello\nDirectory: (root)\nOutput: hello\nError: (none)\nExit Code: 0\nSignal: (none)\nProcess Group PGID: 42"
        );
    }

    #[test]
    fn summary_of_aborted_run_mentions_cancellation() {
        let result = ShellExecutionResult {
            output: "partial".into(),
            aborted: true,
            ..Default::default()
        };
        let summary = result.summary("sleep 10", Some("src"), 10_000);
        assert!(summary.contains("Directory: src"));
        assert!(summary.contains("cancelled before it could complete"));
        assert!(summary.contains("partial"));
    }

    #[test]
    fn summary_is_truncated() {
        let result = ShellExecutionResult {
            output: "x".repeat(500),
            ..Default::default()
        };
        let summary = result.summary("yes", None, 100);
        assert_eq!(summary.len(), 100);
        assert!(summary.ends_with(anvil_utils::TRUNCATION_MARKER));
    }
}
