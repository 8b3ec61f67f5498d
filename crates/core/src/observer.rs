//! Observation of intermediate reasoning steps.
//!
//! Observers only watch; nothing they do feeds back into the reasoning
//! loop. Rendering is split from output: [`render_step`] turns an item into
//! a [`Rendering`], and the observer decides where that goes.

use aligner_model::{ContentItem, Role};
use serde_json::Value;

/// Where a content item came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepContext {
    /// The role of the message the item belongs to.
    pub role: Role,
    /// The tool server namespace, for tool-related items.
    pub namespace: Option<String>,
    /// The tool name within its namespace, for tool-related items.
    pub function_name: Option<String>,
}

impl StepContext {
    /// Creates a context for an item that isn't related to a tool.
    #[inline]
    pub fn new(role: Role) -> Self {
        Self {
            role,
            namespace: None,
            function_name: None,
        }
    }

    /// Attaches the tool this item refers to.
    #[inline]
    pub fn with_tool<S1: Into<String>, S2: Into<String>>(
        mut self,
        namespace: S1,
        function_name: S2,
    ) -> Self {
        self.namespace = Some(namespace.into());
        self.function_name = Some(function_name.into());
        self
    }

    /// Returns `namespace.function`, or whatever part of it is known.
    pub fn qualified_name(&self) -> String {
        match (self.namespace.as_deref(), self.function_name.as_deref()) {
            (Some(ns), Some(name)) => format!("{ns}.{name}"),
            (None, Some(name)) => name.to_owned(),
            (Some(ns), None) => ns.to_owned(),
            (None, None) => String::new(),
        }
    }
}

/// A sink for intermediate reasoning steps.
pub trait StepObserver: Send + Sync {
    /// Called once for every item the session produces, in order.
    fn on_step(&self, item: &ContentItem, context: &StepContext);
}

impl<F> StepObserver for F
where
    F: Fn(&ContentItem, &StepContext) + Send + Sync,
{
    #[inline]
    fn on_step(&self, item: &ContentItem, context: &StepContext) {
        self(item, context)
    }
}

/// An observer that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl StepObserver for NoopObserver {
    #[inline]
    fn on_step(&self, _item: &ContentItem, _context: &StepContext) {}
}

/// A renderer-agnostic description of how to show one item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rendering {
    /// A titled two-column table of key/value pairs.
    Table {
        /// The table title, usually a fully qualified tool name.
        title: String,
        /// Rows, in display order.
        rows: Vec<(String, String)>,
    },
    /// A single line of text.
    Notice(String),
}

/// Describes how an item should be shown to the operator.
///
/// This never panics: values it cannot pretty-print fall back to their
/// debug representation.
pub fn render_step(item: &ContentItem, context: &StepContext) -> Rendering {
    match item {
        ContentItem::ToolCallRequest(req) => {
            let title = match context.function_name {
                Some(_) => context.qualified_name(),
                None => req.name.clone(),
            };
            if req.arguments.is_empty() {
                return Rendering::Notice(format!("{title}: No arguments."));
            }
            let rows = req
                .arguments
                .iter()
                .map(|(key, value)| (key.clone(), display_value(value)))
                .collect();
            Rendering::Table { title, rows }
        }
        ContentItem::ToolCallResult(result) => {
            let title = if context.function_name.is_some() {
                context.qualified_name()
            } else {
                format!("{}.{}", result.namespace, result.name)
            };
            match &result.value {
                Some(value) => Rendering::Table {
                    title,
                    rows: flatten_value(value),
                },
                None => {
                    let mut notice = format!("{title} : no result!");
                    if let Some(failure) = &result.failure {
                        notice.push_str(&format!(" ({failure})"));
                    }
                    Rendering::Notice(notice)
                }
            }
        }
        ContentItem::Text(text) => {
            Rendering::Notice(format!("{} {}: {text}", item.type_tag(), context.role))
        }
        ContentItem::Other { kind, content } => {
            Rendering::Notice(format!("{kind} {}: {content}", context.role))
        }
    }
}

/// Flattens a tool result into key/value rows.
///
/// Objects give one row per key, arrays one row per index, and scalars a
/// single row keyed `value`.
pub fn flatten_value(value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| (key.clone(), display_value(value)))
            .collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(idx, value)| (idx.to_string(), display_value(value)))
            .collect(),
        scalar => vec![("value".to_owned(), display_value(scalar))],
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "NULL".to_owned(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => serde_json::to_string_pretty(value)
            .unwrap_or_else(|_| format!("{value:?}")),
    }
}

#[cfg(test)]
mod tests {
    use aligner_model::{ToolCallRequest, ToolCallResult};
    use serde_json::json;

    use super::*;

    fn result(value: Option<Value>) -> ContentItem {
        ContentItem::ToolCallResult(ToolCallResult {
            id: "call:1".to_owned(),
            name: "query_capital".to_owned(),
            namespace: "WikidataMCP".to_owned(),
            value,
            failure: None,
        })
    }

    #[test]
    fn test_render_tool_call_request() {
        let item = ContentItem::ToolCallRequest(ToolCallRequest {
            id: "call:1".to_owned(),
            name: "WikidataMCP-query_capital".to_owned(),
            arguments: json!({ "country": "Hungary", "limit": 1 })
                .as_object()
                .cloned()
                .unwrap(),
            malformed_arguments: None,
        });
        let context = StepContext::new(Role::Assistant)
            .with_tool("WikidataMCP", "query_capital");
        assert_eq!(
            render_step(&item, &context),
            Rendering::Table {
                title: "WikidataMCP.query_capital".to_owned(),
                rows: vec![
                    ("country".to_owned(), "Hungary".to_owned()),
                    ("limit".to_owned(), "1".to_owned()),
                ],
            }
        );

        let item = ContentItem::ToolCallRequest(ToolCallRequest {
            id: "call:2".to_owned(),
            name: "mystery".to_owned(),
            arguments: Default::default(),
            malformed_arguments: None,
        });
        assert_eq!(
            render_step(&item, &StepContext::new(Role::Assistant)),
            Rendering::Notice("mystery: No arguments.".to_owned())
        );
    }

    #[test]
    fn test_render_tool_call_result() {
        let context =
            StepContext::new(Role::Tool).with_tool("WikidataMCP", "query_capital");
        assert_eq!(
            render_step(&result(Some(json!({ "capital": "Budapest" }))), &context),
            Rendering::Table {
                title: "WikidataMCP.query_capital".to_owned(),
                rows: vec![("capital".to_owned(), "Budapest".to_owned())],
            }
        );
        assert_eq!(
            render_step(&result(Some(json!(42))), &context),
            Rendering::Table {
                title: "WikidataMCP.query_capital".to_owned(),
                rows: vec![("value".to_owned(), "42".to_owned())],
            }
        );
    }

    #[test]
    fn test_render_absent_result() {
        let contexts = [
            StepContext::new(Role::Tool).with_tool("WikidataMCP", "query_capital"),
            StepContext::new(Role::Tool).with_tool("", ""),
            StepContext::new(Role::Tool),
        ];
        for context in contexts {
            let Rendering::Notice(notice) = render_step(&result(None), &context)
            else {
                panic!("expected a notice");
            };
            assert!(notice.ends_with("no result!"), "{notice}");
        }

        let item = ContentItem::ToolCallResult(ToolCallResult {
            id: String::new(),
            name: String::new(),
            namespace: String::new(),
            value: None,
            failure: Some("unreachable".to_owned()),
        });
        assert_eq!(
            render_step(&item, &StepContext::new(Role::Tool)),
            Rendering::Notice(". : no result! (unreachable)".to_owned())
        );
    }

    #[test]
    fn test_render_other_items() {
        let context = StepContext::new(Role::Assistant);
        assert_eq!(
            render_step(&ContentItem::Text("Budapest".to_owned()), &context),
            Rendering::Notice("text assistant: Budapest".to_owned())
        );
        let item = ContentItem::Other {
            kind: "reasoning".to_owned(),
            content: "look it up".to_owned(),
        };
        assert_eq!(
            render_step(&item, &context),
            Rendering::Notice("reasoning assistant: look it up".to_owned())
        );
    }

    #[test]
    fn test_flatten_value() {
        assert_eq!(
            flatten_value(&json!(["a", null, { "k": true }])),
            vec![
                ("0".to_owned(), "a".to_owned()),
                ("1".to_owned(), "NULL".to_owned()),
                ("2".to_owned(), "{\n  \"k\": true\n}".to_owned()),
            ]
        );
        assert_eq!(
            flatten_value(&json!("Budapest")),
            vec![("value".to_owned(), "Budapest".to_owned())]
        );
    }
}
