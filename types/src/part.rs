//! Wire-shaped content parts exchanged with the model.
//!
//! Serialized as externally tagged camelCase objects, e.g.
//! `{"functionResponse": {"id": "...", "name": "...", "response": {"output": "..."}}}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Inline binary payload (base64 encoded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

/// Reference to binary content stored elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub mime_type: String,
    pub file_uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    InlineData(Blob),
    FileData(FileData),
    FunctionResponse(FunctionResponse),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// A function response carrying `{"output": output}`.
    pub fn function_output(
        call_id: impl Into<String>,
        name: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self::function_response(call_id, name, "output", output.into())
    }

    /// A function response carrying `{"error": message}`.
    pub fn function_error(
        call_id: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::function_response(call_id, name, "error", message.into())
    }

    fn function_response(
        call_id: impl Into<String>,
        name: impl Into<String>,
        key: &str,
        value: String,
    ) -> Self {
        let mut response = Map::new();
        response.insert(key.to_string(), Value::String(value));
        Self::FunctionResponse(FunctionResponse {
            id: call_id.into(),
            name: name.into(),
            response,
        })
    }

    /// MIME type of binary parts.
    #[must_use]
    pub fn mime_type(&self) -> Option<&str> {
        match self {
            Self::InlineData(blob) => Some(&blob.mime_type),
            Self::FileData(file) => Some(&file.mime_type),
            Self::Text(_) | Self::FunctionResponse(_) => None,
        }
    }
}
