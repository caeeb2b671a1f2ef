//! Conversion of tool output into function-response parts for the model.

use anvil_types::{Part, ToolResultContent};

/// Shape `content` as the response parts the model receives for one call.
///
/// Text (or a single text part) becomes `{"output": text}`. A single binary
/// part is described in a function response and forwarded after it. A single
/// function response passes through. Anything else gets a generic success
/// response followed by the original parts.
#[must_use]
pub fn convert_to_function_response(
    tool_name: &str,
    call_id: &str,
    content: ToolResultContent,
) -> Vec<Part> {
    let parts = match content {
        ToolResultContent::Text(text) => {
            return vec![text_response(tool_name, call_id, text)];
        }
        ToolResultContent::Parts(parts) => parts,
    };

    if parts.len() == 1 {
        let Some(part) = parts.into_iter().next() else {
            return vec![Part::function_output(call_id, tool_name, "Tool execution succeeded.")];
        };
        return match part {
            Part::Text(text) => vec![text_response(tool_name, call_id, text)],
            Part::FunctionResponse(_) => vec![part],
            Part::InlineData(_) | Part::FileData(_) => {
                let mime = part.mime_type().unwrap_or("unknown").to_string();
                vec![
                    Part::function_output(
                        call_id,
                        tool_name,
                        format!("Binary content of type {mime} was processed."),
                    ),
                    part,
                ]
            }
        };
    }

    let mut out = Vec::with_capacity(parts.len() + 1);
    out.push(Part::function_output(
        call_id,
        tool_name,
        "Tool execution succeeded.",
    ));
    out.extend(parts);
    out
}

fn text_response(tool_name: &str, call_id: &str, text: String) -> Part {
    // Whitespace-only output is reported as empty, never omitted.
    let output = if text.trim().is_empty() {
        String::new()
    } else {
        text
    };
    Part::function_output(call_id, tool_name, output)
}

/// Response parts for a failed call.
#[must_use]
pub fn error_response(tool_name: &str, call_id: &str, message: &str) -> Vec<Part> {
    vec![Part::function_error(call_id, tool_name, message)]
}

/// Response parts for a cancelled call.
#[must_use]
pub fn cancelled_response(tool_name: &str, call_id: &str, reason: &str) -> Vec<Part> {
    vec![Part::function_error(
        call_id,
        tool_name,
        format!("[Operation Cancelled] Reason: {reason}"),
    )]
}

#[cfg(test)]
mod tests {
    use super::{cancelled_response, convert_to_function_response, error_response};
    use anvil_types::{Blob, FileData, Part, ToolResultContent};
    use serde_json::json;

    fn to_json(parts: &[Part]) -> serde_json::Value {
        serde_json::to_value(parts).unwrap()
    }

    #[test]
    fn plain_text_becomes_output() {
        let parts = convert_to_function_response("ls", "c1", "x".into());
        assert_eq!(
            to_json(&parts),
            json!([{"functionResponse": {"id": "c1", "name": "ls", "response": {"output": "x"}}}])
        );
    }

    #[test]
    fn whitespace_text_is_empty_output() {
        let parts = convert_to_function_response("ls", "c1", "  \n".into());
        assert_eq!(parts, vec![Part::function_output("c1", "ls", "")]);
    }

    #[test]
    fn single_text_part_matches_plain_text() {
        let parts = convert_to_function_response(
            "ls",
            "c1",
            ToolResultContent::Parts(vec![Part::text("hello")]),
        );
        assert_eq!(parts, vec![Part::function_output("c1", "ls", "hello")]);
    }

    #[test]
    fn inline_data_is_described_and_forwarded() {
        let image = Part::InlineData(Blob {
            mime_type: "image/png".into(),
            data: "AAAA".into(),
        });
        let parts = convert_to_function_response(
            "screenshot",
            "c2",
            ToolResultContent::Parts(vec![image.clone()]),
        );
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[0],
            Part::function_output(
                "c2",
                "screenshot",
                "Binary content of type image/png was processed."
            )
        );
        assert_eq!(parts[1], image);
    }

    #[test]
    fn file_data_is_described_and_forwarded() {
        let file = Part::FileData(FileData {
            mime_type: "application/pdf".into(),
            file_uri: "gs://bucket/doc.pdf".into(),
        });
        let parts =
            convert_to_function_response("fetch", "c3", ToolResultContent::Parts(vec![file]));
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[0],
            Part::function_output(
                "c3",
                "fetch",
                "Binary content of type application/pdf was processed."
            )
        );
    }

    #[test]
    fn function_response_passes_through() {
        let original = Part::function_output("other", "remote", "payload");
        let parts = convert_to_function_response(
            "remote",
            "c4",
            ToolResultContent::Parts(vec![original.clone()]),
        );
        assert_eq!(parts, vec![original]);
    }

    #[test]
    fn empty_list_is_generic_success() {
        let parts = convert_to_function_response("noop", "c5", ToolResultContent::Parts(vec![]));
        assert_eq!(
            parts,
            vec![Part::function_output("c5", "noop", "Tool execution succeeded.")]
        );
    }

    #[test]
    fn multiple_parts_follow_generic_success() {
        let parts = convert_to_function_response(
            "multi",
            "c6",
            ToolResultContent::Parts(vec![Part::text("a"), Part::text("b")]),
        );
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1], Part::text("a"));
        assert_eq!(parts[2], Part::text("b"));
    }

    #[test]
    fn error_and_cancel_shapes() {
        assert_eq!(
            to_json(&error_response("ls", "c1", "boom")),
            json!([{"functionResponse": {"id": "c1", "name": "ls", "response": {"error": "boom"}}}])
        );
        assert_eq!(
            to_json(&cancelled_response("ls", "c1", "user said no")),
            json!([{"functionResponse": {
                "id": "c1",
                "name": "ls",
                "response": {"error": "[Operation Cancelled] Reason: user said no"}
            }}])
        );
    }
}
