//! `web_fetch` against a local HTTP server.

use anvil_tools::builtins::WebFetchTool;
use anvil_tools::{ConfirmationKind, Tool, ToolCtx, ToolError};
use anvil_types::{ConfirmationOutcome, ToolResultDisplay};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn run(tool: &WebFetchTool, prompt: String) -> Result<anvil_types::ToolResult, ToolError> {
    let mut ctx = ToolCtx::new("call-1", CancellationToken::new());
    tool.execute(json!({ "prompt": prompt }), &mut ctx).await
}

#[tokio::test]
async fn html_pages_are_converted_to_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "<html><body><h1>Hello</h1><p>World &amp; friends</p></body></html>",
            "text/html; charset=utf-8",
        ))
        .mount(&server)
        .await;

    let tool = WebFetchTool::new().unwrap();
    let url = format!("{}/page", server.uri());
    let result = run(&tool, format!("Summarize {url}")).await.unwrap();

    let text = result.llm_content.as_text().unwrap();
    assert_eq!(text, format!("Content from {url}:\nHello\nWorld & friends"));
    match result.return_display {
        ToolResultDisplay::Text(display) => assert_eq!(display, "Fetched 1 of 1 URL(s)."),
        ToolResultDisplay::FileDiff { .. } => panic!("unexpected diff display"),
    }
}

#[tokio::test]
async fn partial_failures_are_reported_inline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("plain body", "text/plain"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let tool = WebFetchTool::new().unwrap();
    let ok = format!("{}/ok.txt", server.uri());
    let missing = format!("{}/missing", server.uri());
    let result = run(&tool, format!("Compare {ok} with {missing}")).await.unwrap();

    let text = result.llm_content.as_text().unwrap();
    assert!(text.starts_with(&format!("Content from {ok}:\nplain body")));
    assert!(text.contains(&format!("Error fetching {missing}: HTTP 404")));
}

#[tokio::test]
async fn all_failures_are_an_execution_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let tool = WebFetchTool::new().unwrap();
    let err = run(&tool, format!("Read {}/broken", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    assert!(err.to_string().contains("HTTP 500"));
}

#[tokio::test]
async fn long_content_is_truncated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("x".repeat(5000), "text/plain"))
        .mount(&server)
        .await;

    let tool = WebFetchTool::new().unwrap().with_max_content_chars(100);
    let result = run(&tool, format!("Read {}/big", server.uri())).await.unwrap();
    let text = result.llm_content.as_text().unwrap();
    assert!(text.len() < 1000);
    assert!(text.contains(anvil_utils::TRUNCATION_MARKER));
}

#[tokio::test]
async fn prompts_without_urls_fail_validation() {
    let tool = WebFetchTool::new().unwrap();
    assert!(tool.validate_params(&json!({"prompt": "nothing here"})).is_err());
    assert!(tool.validate_params(&json!({})).is_err());
    assert!(
        tool.validate_params(&json!({"prompt": "see https://example.com"}))
            .is_ok()
    );
}

#[tokio::test]
async fn proceed_always_skips_later_confirmations() {
    let tool = WebFetchTool::new().unwrap();
    let signal = CancellationToken::new();
    let args = json!({"prompt": "read https://github.com/o/r/blob/main/README.md"});

    let details = tool
        .should_confirm_execute(&args, &signal)
        .await
        .unwrap()
        .unwrap();
    match &details.kind {
        ConfirmationKind::Info { urls, .. } => {
            assert_eq!(urls, &["https://raw.githubusercontent.com/o/r/main/README.md"]);
        }
        other => panic!("unexpected confirmation {other:?}"),
    }
    details.on_confirm.fire(ConfirmationOutcome::ProceedAlways);
    assert!(
        tool.should_confirm_execute(&args, &signal)
            .await
            .unwrap()
            .is_none()
    );
}
