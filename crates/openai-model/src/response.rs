use std::collections::VecDeque;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use aligner_model::{
    Arguments, ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    ToolCallRequest,
};
use pin_project_lite::pin_project;
use serde_json::Value;

use crate::Error;
use crate::io::Sse;
use crate::proto::{ChatCompletionChunk, Delta, ToolCall};

struct PartialState {
    sse: Sse,
    id: Option<String>,
    // Tool calls arrive in fragments and are only reported once complete,
    // i.e. when the choice finishes.
    tool_calls: Vec<ToolCall>,
    pending_events: VecDeque<ModelResponseEvent>,
    finished: bool,
}

impl PartialState {
    async fn pull(&mut self) -> Result<(), Error> {
        let data = match self.sse.next_event().await {
            Ok(Some(data)) => data,
            Ok(None) => {
                debug!("stream ended without a finish reason");
                self.finish(None);
                return Ok(());
            }
            Err(err) => {
                return Err(Error::new(format!("{err:?}"), ErrorKind::Other));
            }
        };
        trace!("got sse event: {data}");
        if data == "[DONE]" {
            self.finish(None);
            return Ok(());
        }

        let chunk = serde_json::from_str::<ChatCompletionChunk>(&data)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
        if !chunk.id.is_empty()
            && self.id.get_or_insert_with(|| chunk.id.clone()) != &chunk.id
        {
            return Err(Error::new("chunk id mismatch", ErrorKind::Other));
        }

        for choice in chunk.choices {
            let Delta {
                content,
                tool_calls,
                reasoning_content,
            } = choice.delta;
            if let Some(reasoning) = reasoning_content.filter(|s| !s.is_empty())
            {
                self.pending_events
                    .push_back(ModelResponseEvent::ReasoningDelta(reasoning));
            }
            if let Some(content) = content.filter(|s| !s.is_empty()) {
                self.pending_events
                    .push_back(ModelResponseEvent::MessageDelta(content));
            }
            for tool_call in tool_calls.into_iter().flatten() {
                self.merge_tool_call(tool_call);
            }

            match choice.finish_reason.as_deref() {
                None => {}
                Some("content_filter") => {
                    return Err(Error::new(
                        "the response was filtered",
                        ErrorKind::Moderated,
                    ));
                }
                Some("tool_calls") => {
                    self.finish(Some(ModelFinishReason::ToolCalls))
                }
                Some(_) => self.finish(Some(ModelFinishReason::Stop)),
            }
        }
        Ok(())
    }

    fn merge_tool_call(&mut self, tool_call: ToolCall) {
        let Some(partial) = self
            .tool_calls
            .iter_mut()
            .find(|t| t.index == tool_call.index)
        else {
            self.tool_calls.push(tool_call);
            return;
        };

        if let Some(id) = tool_call.id {
            partial.id.get_or_insert_default().push_str(&id);
        }
        if partial.r#type.is_none() {
            partial.r#type = tool_call.r#type;
        }
        let Some(function) = tool_call.function else {
            return;
        };
        match &mut partial.function {
            Some(partial_func) => {
                if let Some(name) = function.name {
                    partial_func.name.get_or_insert_default().push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    partial_func
                        .arguments
                        .get_or_insert_default()
                        .push_str(&arguments);
                }
            }
            None => partial.function = Some(function),
        }
    }

    fn finish(&mut self, reason: Option<ModelFinishReason>) {
        if self.finished {
            return;
        }
        self.finished = true;

        let tool_calls = mem::take(&mut self.tool_calls);
        // Some backends report `stop` even when they called tools.
        let reason = if tool_calls.is_empty() {
            reason.unwrap_or(ModelFinishReason::Stop)
        } else {
            ModelFinishReason::ToolCalls
        };
        for tool_call in tool_calls {
            self.pending_events
                .push_back(ModelResponseEvent::ToolCall(into_request(tool_call)));
        }
        self.pending_events
            .push_back(ModelResponseEvent::Completed(reason));
    }
}

fn into_request(tool_call: ToolCall) -> ToolCallRequest {
    let (name, raw_arguments) = match tool_call.function {
        Some(function) => (
            function.name.unwrap_or_default(),
            function.arguments.unwrap_or_default(),
        ),
        None => Default::default(),
    };
    let (arguments, malformed_arguments) =
        match serde_json::from_str::<Value>(&raw_arguments) {
            Ok(Value::Object(arguments)) => (arguments, None),
            _ if raw_arguments.trim().is_empty() => (Arguments::new(), None),
            _ => {
                warn!("malformed arguments for {name}: {raw_arguments}");
                (Arguments::new(), Some(raw_arguments))
            }
        };
    ToolCallRequest {
        id: tool_call.id.unwrap_or_default(),
        name,
        arguments,
        malformed_arguments,
    }
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            tool_calls: Default::default(),
            pending_events: Default::default(),
            finished: false,
        };
        Self {
            next_event_fut: Some(Box::pin(next_event(partial_state))),
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, _)) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        *this.next_event_fut = Some(Box::pin(next_event(partial_state)));

        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(mut partial_state: PartialState) -> NextEvent {
    loop {
        if let Some(event) = partial_state.pending_events.pop_front() {
            return Ok((Some(event), partial_state));
        }
        if partial_state.finished {
            return Ok((None, partial_state));
        }
        partial_state.pull().await?;
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use serde_json::json;

    use super::*;
    use crate::io::Chunks;
    use crate::proto::FunctionToolCall;

    async fn collect(
        chunks: &[&'static [u8]],
    ) -> Result<Vec<ModelResponseEvent>, Error> {
        let sse = Sse::new(Chunks::from_static(chunks));
        let mut resp = pin!(OpenAIResponse::from_sse(sse));
        let mut events = vec![];
        while let Some(event) =
            poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await?
        {
            events.push(event);
        }
        Ok(events)
    }

    #[tokio::test]
    async fn test_tool_call_events() {
        let events = collect(&[
            br#"data: {"id":"","choices":[],"prompt_filter_results":[]}

"#,
            br#"data: {"id":"c1","choices":[{"delta":{"role":"assistant","content":"Let me check."},"finish_reason":null}]}

data: {"id":"c1","choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"WikidataMCP-query_capital","arguments":""}}]},"finish_reason":null}]}

"#,
            br#"data: {"id":"c1","choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"country\":"}}]},"finish_reason":null}]}

data: {"id":"c1","choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"Hungary\"}"}}]},"finish_reason":null}]}

"#,
            br#"data: {"id":"c1","choices":[{"delta":{},"finish_reason":"tool_calls"}]}

data: [DONE]

"#,
        ])
        .await
        .unwrap();

        assert_eq!(
            events,
            [
                ModelResponseEvent::MessageDelta("Let me check.".to_owned()),
                ModelResponseEvent::ToolCall(ToolCallRequest {
                    id: "call_1".to_owned(),
                    name: "WikidataMCP-query_capital".to_owned(),
                    arguments: json!({ "country": "Hungary" })
                        .as_object()
                        .cloned()
                        .unwrap(),
                    malformed_arguments: None,
                }),
                ModelResponseEvent::Completed(ModelFinishReason::ToolCalls),
            ]
        );
    }

    #[tokio::test]
    async fn test_text_and_reasoning_events() {
        let events = collect(&[
            br#"data: {"id":"c2","choices":[{"delta":{"reasoning_content":"Known fact."},"finish_reason":null}]}

data: {"id":"c2","choices":[{"delta":{"content":"Budapest"},"finish_reason":null}]}

data: {"id":"c2","choices":[{"delta":{"content":""},"finish_reason":"stop"}]}

"#,
        ])
        .await
        .unwrap();

        assert_eq!(
            events,
            [
                ModelResponseEvent::ReasoningDelta("Known fact.".to_owned()),
                ModelResponseEvent::MessageDelta("Budapest".to_owned()),
                ModelResponseEvent::Completed(ModelFinishReason::Stop),
            ]
        );
    }

    #[tokio::test]
    async fn test_content_filter() {
        let err = collect(&[
            br#"data: {"id":"c3","choices":[{"delta":{},"finish_reason":"content_filter"}]}

"#,
        ])
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Moderated);
    }

    #[tokio::test]
    async fn test_id_mismatch() {
        let err = collect(&[
            br#"data: {"id":"a","choices":[{"delta":{"content":"x"},"finish_reason":null}]}

data: {"id":"b","choices":[{"delta":{"content":"y"},"finish_reason":null}]}

"#,
        ])
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Other);
    }

    #[test]
    fn test_malformed_arguments_are_kept() {
        let request = into_request(ToolCall {
            index: Some(0),
            id: Some("call_1".to_owned()),
            r#type: Some("function".to_owned()),
            function: Some(FunctionToolCall {
                name: Some("WikidataMCP-query_capital".to_owned()),
                arguments: Some("{\"country\": Hung".to_owned()),
            }),
        });
        assert_eq!(request.id, "call_1");
        assert!(request.arguments.is_empty());
        assert_eq!(
            request.malformed_arguments.as_deref(),
            Some("{\"country\": Hung")
        );

        let request = into_request(ToolCall {
            index: Some(0),
            id: Some("call_2".to_owned()),
            r#type: None,
            function: Some(FunctionToolCall {
                name: Some("WikidataMCP-forget".to_owned()),
                arguments: Some(" ".to_owned()),
            }),
        });
        assert!(request.arguments.is_empty());
        assert_eq!(request.malformed_arguments, None);
    }
}
