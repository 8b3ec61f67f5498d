use serde::Deserialize;
use serde_json::Value;

use crate::McpError;

/// The payload of a `tools/call` response.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CallToolResult {
    #[serde(default)]
    content: Vec<Value>,
    #[serde(default)]
    structured_content: Option<Value>,
    #[serde(default)]
    is_error: bool,
}

/// Turns a tool call result into the value handed to the model.
///
/// Structured content wins when the server provides it. Otherwise each
/// text block is parsed as JSON if it can be and kept as a string if not,
/// and other blocks are kept as they are. A single block stands for
/// itself, several become an array, and no content at all is `Null`.
pub(crate) fn into_value(
    server: &str,
    tool: &str,
    result: CallToolResult,
) -> Result<Value, McpError> {
    let CallToolResult {
        content,
        structured_content,
        is_error,
    } = result;

    if is_error {
        let message = content
            .iter()
            .filter_map(text_of)
            .collect::<Vec<_>>()
            .join("\n");
        return Err(McpError::ToolFailed {
            server: server.to_owned(),
            tool: tool.to_owned(),
            message: if message.is_empty() {
                "no details given".to_owned()
            } else {
                message
            },
        });
    }

    if let Some(structured) = structured_content.filter(|v| !v.is_null()) {
        return Ok(structured);
    }

    let mut values: Vec<Value> = content
        .into_iter()
        .map(|block| match text_of(&block) {
            Some(text) => serde_json::from_str(text)
                .unwrap_or_else(|_| Value::String(text.to_owned())),
            None => block,
        })
        .collect();
    Ok(match values.len() {
        0 => Value::Null,
        1 => values.remove(0),
        _ => Value::Array(values),
    })
}

fn text_of(block: &Value) -> Option<&str> {
    if block.get("type").and_then(Value::as_str) != Some("text") {
        return None;
    }
    block.get("text").and_then(Value::as_str)
}
