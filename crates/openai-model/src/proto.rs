use aligner_model::{
    ContentItem, Message as ModelMessage, ModelRequest, ModelTool, Role,
    ToolChoice,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::OpenAIConfig;

// ------------------------------
// Types received from the server
// ------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionToolCall>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ChatCompletionChunk {
    // Azure-hosted endpoints open the stream with a content filter chunk
    // that has an empty id and no choices.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub reasoning_content: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
struct Tool {
    r#type: &'static str,
    function: FunctionTool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    stream: bool,
}

// -----------
// Conversions
// -----------

pub fn create_request(
    req: &ModelRequest,
    config: &OpenAIConfig,
) -> ChatCompletionRequest {
    let tools: Vec<_> = req.tools.iter().map(create_tool).collect();
    // The API rejects a tool choice without tools.
    let tool_choice = (!tools.is_empty()).then_some(match req.tool_choice {
        ToolChoice::Auto => "auto",
        ToolChoice::None => "none",
        ToolChoice::Required => "required",
    });
    ChatCompletionRequest {
        model: config.model.clone(),
        messages: req.messages.iter().flat_map(create_messages).collect(),
        tools,
        tool_choice,
        stream: true,
    }
}

/// Converts one message. Tool messages expand to one message per result,
/// since each result answers its own call id.
fn create_messages(msg: &ModelMessage) -> Vec<Message> {
    match msg.role {
        Role::System => vec![Message::System {
            content: msg.text(),
        }],
        Role::User => vec![Message::User {
            content: msg.text(),
        }],
        Role::Assistant => {
            let text = msg.text();
            let tool_calls: Vec<_> = msg
                .tool_calls()
                .map(|req| ToolCall {
                    index: None,
                    id: Some(req.id.clone()),
                    r#type: Some("function".to_owned()),
                    function: Some(FunctionToolCall {
                        name: Some(req.name.clone()),
                        arguments: Some(
                            Value::Object(req.arguments.clone()).to_string(),
                        ),
                    }),
                })
                .collect();
            vec![Message::Assistant {
                content: (!text.is_empty()).then_some(text),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            }]
        }
        Role::Tool => msg
            .items
            .iter()
            .filter_map(|item| match item {
                ContentItem::ToolCallResult(result) => Some(Message::Tool {
                    tool_call_id: result.id.clone(),
                    content: result.to_model_content(),
                }),
                _ => None,
            })
            .collect(),
    }
}

#[inline]
fn create_tool(tool: &ModelTool) -> Tool {
    Tool {
        r#type: "function",
        function: FunctionTool {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use aligner_model::{ToolCallRequest, ToolCallResult};
    use serde_json::json;

    use super::*;
    use crate::OpenAIConfigBuilder;

    #[test]
    fn test_create_request() {
        let request = ModelRequest {
            messages: vec![
                ModelMessage::system("Answer using Wikidata."),
                ModelMessage::user("Capital of Hungary?"),
                ModelMessage::assistant(vec![
                    ContentItem::Other {
                        kind: "reasoning".to_owned(),
                        content: "Look it up.".to_owned(),
                    },
                    ContentItem::ToolCallRequest(ToolCallRequest {
                        id: "call_1".to_owned(),
                        name: "WikidataMCP-query_capital".to_owned(),
                        arguments: json!({ "country": "Hungary" })
                            .as_object()
                            .cloned()
                            .unwrap(),
                        malformed_arguments: None,
                    }),
                ]),
                ModelMessage::tool(ToolCallResult {
                    id: "call_1".to_owned(),
                    name: "query_capital".to_owned(),
                    namespace: "WikidataMCP".to_owned(),
                    value: Some(json!({ "capital": "Budapest" })),
                    failure: None,
                }),
            ],
            tools: vec![ModelTool {
                name: "WikidataMCP-query_capital".to_owned(),
                description: "Looks up a capital.".to_owned(),
                parameters: json!({ "type": "object" }),
            }],
            tool_choice: ToolChoice::Auto,
        };
        let config = OpenAIConfigBuilder::with_api_key("xxx")
            .with_model("custom")
            .build();

        let serialized =
            serde_json::to_value(create_request(&request, &config)).unwrap();
        assert_eq!(
            serialized,
            json!({
                "model": "custom",
                "messages": [
                    { "role": "system", "content": "Answer using Wikidata." },
                    { "role": "user", "content": "Capital of Hungary?" },
                    {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {
                                "name": "WikidataMCP-query_capital",
                                "arguments": "{\"country\":\"Hungary\"}"
                            }
                        }]
                    },
                    {
                        "role": "tool",
                        "tool_call_id": "call_1",
                        "content": "{\"capital\":\"Budapest\"}"
                    }
                ],
                "tools": [{
                    "type": "function",
                    "function": {
                        "name": "WikidataMCP-query_capital",
                        "description": "Looks up a capital.",
                        "parameters": { "type": "object" }
                    }
                }],
                "tool_choice": "auto",
                "stream": true
            })
        );
    }

    #[test]
    fn test_no_tool_choice_without_tools() {
        let request = ModelRequest {
            messages: vec![ModelMessage::user("Hi")],
            tools: vec![],
            tool_choice: ToolChoice::Auto,
        };
        let config = OpenAIConfigBuilder::with_api_key("xxx").build();
        let serialized =
            serde_json::to_value(create_request(&request, &config)).unwrap();
        assert!(serialized.get("tool_choice").is_none());
        assert!(serialized.get("tools").is_none());
        assert_eq!(serialized["model"], json!("openai/gpt-4.1-mini"));
    }
}
