use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Arguments of a tool call, keyed by parameter name.
pub type Arguments = Map<String, Value>;

/// The role that produced a message.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The system instructions.
    System,
    /// The human operator.
    User,
    /// The model.
    Assistant,
    /// A tool invocation performed on behalf of the model.
    Tool,
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// A complete message in the conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced this message.
    pub role: Role,
    /// Content items, in the order they were produced.
    pub items: Vec<ContentItem>,
}

impl Message {
    /// Creates a system message with a single text item.
    #[inline]
    pub fn system<S: Into<String>>(text: S) -> Self {
        Self {
            role: Role::System,
            items: vec![ContentItem::Text(text.into())],
        }
    }

    /// Creates a user message with a single text item.
    #[inline]
    pub fn user<S: Into<String>>(text: S) -> Self {
        Self {
            role: Role::User,
            items: vec![ContentItem::Text(text.into())],
        }
    }

    /// Creates an assistant message from the given items.
    #[inline]
    pub fn assistant(items: Vec<ContentItem>) -> Self {
        Self {
            role: Role::Assistant,
            items,
        }
    }

    /// Creates a tool message carrying a single tool call result.
    #[inline]
    pub fn tool(result: ToolCallResult) -> Self {
        Self {
            role: Role::Tool,
            items: vec![ContentItem::ToolCallResult(result)],
        }
    }

    /// Returns the concatenated text items of this message.
    pub fn text(&self) -> String {
        self.items
            .iter()
            .filter_map(|item| match item {
                ContentItem::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Returns the tool call requests in this message.
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallRequest> {
        self.items.iter().filter_map(|item| match item {
            ContentItem::ToolCallRequest(req) => Some(req),
            _ => None,
        })
    }
}

/// One piece of content in a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ContentItem {
    /// Plain text.
    Text(String),
    /// The model asks for a tool to be invoked.
    ToolCallRequest(ToolCallRequest),
    /// The outcome of a tool invocation.
    ToolCallResult(ToolCallResult),
    /// Anything else the backend produced, e.g. reasoning summaries.
    Other {
        /// A short tag describing the content.
        kind: String,
        /// The raw textual content.
        content: String,
    },
}

impl ContentItem {
    /// Returns a short tag naming the variant.
    pub fn type_tag(&self) -> &str {
        match self {
            ContentItem::Text(_) => "text",
            ContentItem::ToolCallRequest(_) => "tool_call_request",
            ContentItem::ToolCallResult(_) => "tool_call_result",
            ContentItem::Other { kind, .. } => kind,
        }
    }
}

/// Describes a tool call request from the model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// The unique identifier for the tool call request.
    pub id: String,
    /// The name of the tool to call, as exposed to the model.
    pub name: String,
    /// The argument pairs to pass to the function.
    pub arguments: Arguments,
    /// The raw argument text, when the model sent something that isn't a
    /// JSON object. `arguments` is empty then, and the tool must not be
    /// called.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub malformed_arguments: Option<String>,
}

/// The result of calling a tool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// The identifier of the request this result answers.
    pub id: String,
    /// The tool name within its namespace.
    pub name: String,
    /// The namespace (tool server) the tool belongs to.
    pub namespace: String,
    /// The value returned by the tool, absent when there was none.
    pub value: Option<Value>,
    /// Why the value is absent, set only when the invocation failed.
    pub failure: Option<String>,
}

impl ToolCallResult {
    /// Renders the result as the text the model receives.
    pub fn to_model_content(&self) -> String {
        match (&self.value, &self.failure) {
            (Some(Value::String(s)), _) => s.clone(),
            (Some(value), _) => value.to_string(),
            (None, Some(failure)) => {
                serde_json::json!({ "error": failure }).to_string()
            }
            (None, None) => "no result".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_message_text() {
        let msg = Message::assistant(vec![
            ContentItem::Other {
                kind: "reasoning".to_owned(),
                content: "hmm".to_owned(),
            },
            ContentItem::Text("Buda".to_owned()),
            ContentItem::Text("pest".to_owned()),
        ]);
        assert_eq!(msg.text(), "Budapest");
        assert_eq!(msg.tool_calls().count(), 0);
    }

    #[test]
    fn test_model_content() {
        let mut result = ToolCallResult {
            id: "call:1".to_owned(),
            name: "query_capital".to_owned(),
            namespace: "WikidataMCP".to_owned(),
            value: Some(json!({ "capital": "Budapest" })),
            failure: None,
        };
        assert_eq!(result.to_model_content(), r#"{"capital":"Budapest"}"#);

        result.value = Some(json!("plain"));
        assert_eq!(result.to_model_content(), "plain");

        result.value = None;
        result.failure = Some("server gone".to_owned());
        assert_eq!(result.to_model_content(), r#"{"error":"server gone"}"#);

        result.failure = None;
        assert_eq!(result.to_model_content(), "no result");
    }
}
