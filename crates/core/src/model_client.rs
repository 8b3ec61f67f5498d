use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;

use aligner_model::{
    ContentItem, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent,
};
use tracing::Instrument;

pub(crate) type SendRequestResult =
    Result<ModelStep, Box<dyn ModelProviderError>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
type HandlerFn =
    Arc<dyn Fn(ModelRequest) -> BoxedSendRequestFuture + Send + Sync>;

/// A wrapper around a model provider that maintains an execution
/// environment for the provider and provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let handler_fn: HandlerFn = Arc::new(move |req| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("got a request: {:?}", req);
                    let resp_or_err = fut.await;
                    handle_response::<P>(resp_or_err).await
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self { handler_fn }
    }

    /// Sends a request and waits for the whole reasoning step.
    ///
    /// Nothing is reported before the response has been fully received,
    /// so a failed attempt leaves no partial output behind.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    #[inline]
    pub async fn send_request(&self, req: ModelRequest) -> SendRequestResult {
        (self.handler_fn)(req).await
    }
}

/// A completely received reasoning step.
#[derive(Clone, Debug, Default)]
pub struct ModelStep {
    /// Items in the order they should appear in the assistant message:
    /// reasoning first, then text, then tool call requests.
    pub items: Vec<ContentItem>,
    /// The reason the model finished generating.
    pub finish_reason: Option<ModelFinishReason>,
}

async fn handle_response<P: ModelProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            debug!("request failed: {err:?}");
            return Err(Box::new(err));
        }
    };

    let mut reasoning = String::new();
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut finish_reason = None;

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(err) => {
                debug!("response failed: {err:?}");
                return Err(Box::new(err));
            }
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(delta) => text.push_str(&delta),
            ModelResponseEvent::ReasoningDelta(delta) => {
                reasoning.push_str(&delta)
            }
            ModelResponseEvent::ToolCall(req) => {
                tool_calls.push(ContentItem::ToolCallRequest(req))
            }
            ModelResponseEvent::Completed(reason) => {
                finish_reason = Some(reason);
            }
        }
    }

    trace!("finished a request");

    let mut items = Vec::with_capacity(tool_calls.len() + 2);
    if !reasoning.is_empty() {
        items.push(ContentItem::Other {
            kind: "reasoning".to_owned(),
            content: reasoning,
        });
    }
    if !text.is_empty() {
        items.push(ContentItem::Text(text));
    }
    items.extend(tool_calls);

    Ok(ModelStep {
        items,
        finish_reason,
    })
}
