//! End-to-end tests for the shell execution engine. Unix only: they rely on
//! `bash`/`sh`, process groups and POSIX signals.
#![cfg(unix)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anvil_tools::{DetectedShell, ShellExecutor, ShellOutcome, detect_shell};
use tokio_util::sync::CancellationToken;

fn executor() -> ShellExecutor {
    ShellExecutor::new(detect_shell(None))
}

async fn run(command: &str, cwd: &std::path::Path) -> anvil_tools::ShellExecutionResult {
    executor()
        .execute(command, cwd, &CancellationToken::new(), |_| {}, |_| {})
        .await
}

#[tokio::test]
async fn captures_stdout_and_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let result = run("echo hello", dir.path()).await;
    assert_eq!(result.output, "hello\n");
    assert_eq!(result.stdout, "hello\n");
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.outcome(), ShellOutcome::Success);
    assert!(result.pid.is_some());
}

#[tokio::test]
async fn reports_non_zero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let result = run("echo oops >&2; exit 3", dir.path()).await;
    assert_eq!(result.exit_code, Some(3));
    assert_eq!(result.stderr, "oops\n");
    assert_eq!(result.outcome(), ShellOutcome::ExitCode(3));
}

#[tokio::test]
async fn strips_terminal_escapes() {
    let dir = tempfile::tempdir().unwrap();
    let result = run(r"printf '\033[31mred\033[0m plain\n'", dir.path()).await;
    assert_eq!(result.output, "red plain\n");
    assert!(result.raw_output.contains(&0x1b));
}

#[tokio::test]
async fn switches_to_byte_count_for_binary_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut chunks = Vec::new();
    let result = executor()
        .execute(
            r"printf 'a\000b'; head -c 5000 /dev/zero",
            dir.path(),
            &CancellationToken::new(),
            |chunk| chunks.push(chunk.to_string()),
            |_| {},
        )
        .await;
    assert!(result.binary_detected);
    assert_eq!(result.raw_output.len(), 5003);
    assert_eq!(
        result.output,
        "[Command produced binary output (5003 bytes), which is not shown.]"
    );
    assert!(!chunks.is_empty());
    assert!(chunks.iter().all(|c| c.starts_with("[Received ")));
}

#[tokio::test]
async fn warns_when_directory_changes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    let result = run("cd sub && echo moved", dir.path()).await;
    let expected: PathBuf = dir.path().join("sub").canonicalize().unwrap();
    assert_eq!(
        result.final_cwd.as_ref().map(|p| p.canonicalize().unwrap()),
        Some(expected)
    );
    assert!(result.output.starts_with("WARNING: shell mode is stateless"));
    assert!(result.output.ends_with("moved\n"));
}

#[tokio::test]
async fn no_warning_when_directory_is_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let result = run("echo same", dir.path()).await;
    assert!(result.final_cwd.is_some());
    assert!(!result.output.contains("WARNING"));
}

#[tokio::test]
async fn throttles_live_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut chunks = Vec::new();
    let result = executor()
        .execute(
            "echo one; echo two; echo three",
            dir.path(),
            &CancellationToken::new(),
            |chunk| chunks.push(chunk.to_string()),
            |_| {},
        )
        .await;
    assert_eq!(result.output, "one\ntwo\nthree\n");
    assert_eq!(chunks.len(), 1, "got {chunks:?}");
}

#[tokio::test]
async fn cancellation_sends_sigterm_before_sigkill() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("got-term");
    let command = format!(
        "trap 'touch {}' TERM; echo started; while :; do sleep 0.05; done",
        marker.display()
    );
    let signal = CancellationToken::new();
    let trigger = signal.clone();
    let debug = Arc::new(Mutex::new(Vec::new()));
    let debug_sink = Arc::clone(&debug);

    let started = Instant::now();
    let result = executor()
        .execute(
            &command,
            dir.path(),
            &signal,
            move |chunk| {
                if chunk.contains("started") {
                    trigger.cancel();
                }
            },
            move |msg| debug_sink.lock().unwrap().push(msg.to_string()),
        )
        .await;

    assert!(result.aborted);
    assert_eq!(result.outcome(), ShellOutcome::Aborted);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(marker.exists(), "SIGTERM was not delivered first");
    let debug = debug.lock().unwrap();
    assert!(debug.iter().any(|m| m.contains("SIGTERM")));
    assert!(debug.iter().any(|m| m.contains("SIGKILL")));
}

#[tokio::test]
async fn spawn_failure_is_reported_as_error() {
    let dir = tempfile::tempdir().unwrap();
    let shell = DetectedShell {
        binary: PathBuf::from("/nonexistent/shell"),
        args: vec!["-c".into()],
        name: "missing".into(),
    };
    let result = ShellExecutor::new(shell)
        .execute("echo hi", dir.path(), &CancellationToken::new(), |_| {}, |_| {})
        .await;
    assert!(result.error.is_some());
    assert_eq!(result.outcome(), ShellOutcome::Error);
}
