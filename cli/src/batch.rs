//! Batch input parsing and result reporting.

use anvil_engine::ToolCall;
use anvil_types::{Part, ToolCallRequest};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchEntry {
    call_id: Option<String>,
    name: String,
    #[serde(default = "empty_object")]
    args: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Parse a JSON array of `{callId?, name, args}`. Calls without an id get a
/// fresh one; every call is tagged with `prompt_id`.
pub(crate) fn parse_batch(input: &str, prompt_id: &str) -> Result<Vec<ToolCallRequest>> {
    let entries: Vec<BatchEntry> =
        serde_json::from_str(input).context("batch must be a JSON array of tool calls")?;
    Ok(entries
        .into_iter()
        .map(|entry| {
            let call_id = entry
                .call_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
            ToolCallRequest::new(call_id, entry.name, entry.args).with_prompt_id(prompt_id)
        })
        .collect())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CallReport<'a> {
    call_id: &'a str,
    name: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
    parts: &'a [Part],
}

pub(crate) fn report(calls: &[ToolCall]) -> Vec<CallReport<'_>> {
    calls
        .iter()
        .map(|call| CallReport {
            call_id: call.call_id(),
            name: call.name(),
            status: call.state().as_str(),
            duration_ms: call.status.duration_ms(),
            parts: call
                .response()
                .map_or(&[][..], |response| response.response_parts.as_slice()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{parse_batch, report};
    use anvil_engine::ToolCall;
    use anvil_types::ToolCallRequest;
    use serde_json::json;

    #[test]
    fn parses_calls_and_fills_missing_ids() {
        let requests = parse_batch(
            r#"[
                {"callId": "c1", "name": "list_directory", "args": {"path": "."}},
                {"name": "run_shell_command", "args": {"command": "ls"}},
                {"callId": "", "name": "noop"}
            ]"#,
            "prompt-1",
        )
        .unwrap();

        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].call_id, "c1");
        assert_eq!(requests[0].args, json!({"path": "."}));
        assert!(requests[1].call_id.starts_with("call_"));
        assert!(requests[2].call_id.starts_with("call_"));
        assert_ne!(requests[1].call_id, requests[2].call_id);
        assert_eq!(requests[2].args, json!({}));
        assert!(requests.iter().all(|r| r.prompt_id == "prompt-1"));
    }

    #[test]
    fn rejects_non_arrays() {
        let err = parse_batch(r#"{"name": "x"}"#, "p").unwrap_err();
        assert!(err.to_string().contains("JSON array"));
    }

    #[test]
    fn report_of_unfinished_call_has_no_parts() {
        let calls = vec![ToolCall::new(
            ToolCallRequest::new("c1", "echo", json!({})),
            None,
        )];
        let value = serde_json::to_value(report(&calls)).unwrap();
        assert_eq!(
            value,
            json!([{"callId": "c1", "name": "echo", "status": "validating", "parts": []}])
        );
    }
}
