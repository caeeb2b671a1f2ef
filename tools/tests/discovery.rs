//! Registry discovery through a shell-script discovery command. Unix only.
#![cfg(unix)]

use std::path::Path;
use std::time::Duration;

use anvil_tools::{DiscoveryConfig, ToolCtx, ToolError, ToolRegistry, ToolSource};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const DISCOVER: &str = r#"cat <<'JSON'
[
  {"name": "greet", "description": "Say hello.",
   "parameters": {"type": "object", "properties": {"who": {"type": "string"}}}},
  {"functionDeclarations": [
    {"name": "fail", "description": "Always fails."},
    {"name": "slow tool!", "description": "Sleeps."}
  ]}
]
JSON
"#;

const CALL: &str = r#"case "$1" in
  greet) read -r input; echo "hello $input" ;;
  fail) echo oops >&2; exit 3 ;;
  *) sleep 30 ;;
esac
"#;

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("discover.sh"), DISCOVER).unwrap();
    std::fs::write(dir.path().join("call.sh"), CALL).unwrap();
    dir
}

fn registry(root: &Path, exclude: &[&str]) -> ToolRegistry {
    ToolRegistry::new(root).with_discovery(DiscoveryConfig {
        discovery_command: Some("sh discover.sh".into()),
        call_command: Some("sh call.sh".into()),
        exclude: exclude.iter().map(ToString::to_string).collect(),
        ..Default::default()
    })
}

#[tokio::test]
async fn discovers_declarations_and_runs_call_command() {
    let dir = project();
    let registry = registry(dir.path(), &[]);

    let report = registry.discover().await;

    assert_eq!(report.command_tools, vec!["greet", "fail", "slow_tool_"]);
    assert!(report.failures.is_empty(), "{:?}", report.failures);

    let greet = registry.get("greet").unwrap();
    assert_eq!(greet.source(), ToolSource::Discovered);
    assert!(greet.description().starts_with("Say hello."));
    assert!(greet.description().contains("sh call.sh greet"));

    let mut ctx = ToolCtx::new("c1", CancellationToken::new());
    let result = greet
        .execute(json!({"who": "anvil"}), &mut ctx)
        .await
        .unwrap();
    assert_eq!(
        result.llm_content.as_text(),
        Some("hello {\"who\":\"anvil\"}\n")
    );
}

#[tokio::test]
async fn failing_call_reports_process_details() {
    let dir = project();
    let registry = registry(dir.path(), &[]);
    registry.discover().await;

    let fail = registry.get("fail").unwrap();
    let mut ctx = ToolCtx::new("c1", CancellationToken::new());
    let err = fail.execute(json!({}), &mut ctx).await.unwrap_err();

    match err {
        ToolError::Process {
            message, exit_code, ..
        } => {
            assert_eq!(exit_code, Some(3));
            assert!(message.contains("Stderr: oops"));
            assert!(message.contains("Exit Code: 3"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn cancelling_a_call_stops_the_command() {
    let dir = project();
    let registry = registry(dir.path(), &[]);
    registry.discover().await;

    let slow = registry.get("slow_tool_").unwrap();
    let signal = CancellationToken::new();
    let mut ctx = ToolCtx::new("c1", signal.clone());
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        signal.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(10), slow.execute(json!({}), &mut ctx))
        .await
        .expect("cancelled call should return promptly")
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, ToolError::Cancelled { .. }));
}

#[tokio::test]
async fn excluded_tools_are_not_registered() {
    let dir = project();
    let registry = registry(dir.path(), &["fail"]);

    let report = registry.discover().await;

    assert_eq!(report.command_tools, vec!["greet", "slow_tool_"]);
    assert!(!registry.contains("fail"));
}

#[tokio::test]
async fn rediscovery_replaces_previous_tools() {
    let dir = project();
    let registry = registry(dir.path(), &[]);

    registry.discover().await;
    let report = registry.discover().await;

    assert_eq!(report.registered(), 3);
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(registry.all_tools().len(), 3);
}

#[tokio::test]
async fn broken_discovery_output_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ToolRegistry::new(dir.path()).with_discovery(DiscoveryConfig {
        discovery_command: Some("echo not-json".into()),
        call_command: Some("true".into()),
        ..Default::default()
    });

    let report = registry.discover().await;

    assert_eq!(report.registered(), 0);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].contains("not a JSON array"));
}

#[tokio::test]
async fn discovery_without_call_command_is_skipped() {
    let dir = project();
    let registry = ToolRegistry::new(dir.path()).with_discovery(DiscoveryConfig {
        discovery_command: Some("sh discover.sh".into()),
        ..Default::default()
    });

    let report = registry.discover().await;

    assert_eq!(report.registered(), 0);
    assert!(report.failures[0].contains("call_command"));
}
