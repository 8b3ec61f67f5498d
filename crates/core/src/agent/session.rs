use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use aligner_model::{
    ContentItem, Message, ModelRequest, Role, ToolCallRequest, ToolCallResult,
    ToolChoice,
};
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio::time::{Sleep, sleep};
use tracing::Instrument;

use super::{SessionState, Shared, ToolFailurePolicy};
use crate::conversation::Conversation;
use crate::error::AgentError;
use crate::model_client::ModelStep;
use crate::observer::{StepContext, StepObserver};
use crate::tool::ToolInvocationError;

/// Something a session produced while answering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// An intermediate item: reasoning, text, a tool call or its result.
    Step {
        /// The item itself.
        item: ContentItem,
        /// Where the item came from.
        context: StepContext,
    },
    /// The final answer. Nothing follows it.
    Answer(Message),
}

/// Work a session has produced but not handed out yet.
///
/// Items of a step are appended to the conversation only after they have
/// been yielded, so consumers always see an item first.
enum Queued {
    Event(SessionEvent),
    Append(Message),
}

/// The state of answering one question.
///
/// A session is single-use: [`AgentSession::ask`] consumes it, and a new
/// question needs a new session from [`Agent::session`].
///
/// [`Agent::session`]: crate::Agent::session
pub struct AgentSession {
    shared: Arc<Shared>,
    conversation: Conversation,
    state: SessionState,
    queue: VecDeque<Queued>,
    pending_tool_calls: VecDeque<ToolCallRequest>,
    steps: usize,
}

impl AgentSession {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            conversation: Default::default(),
            state: Default::default(),
            queue: Default::default(),
            pending_tool_calls: Default::default(),
            steps: 0,
        }
    }

    /// Returns the current lifecycle stage.
    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the conversation so far.
    #[inline]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Asks a question, returning the lazy stream of what happens next.
    ///
    /// Nothing is sent to the model until the stream is polled.
    pub fn ask<S: Into<String>>(mut self, question: S) -> Ask {
        let question = question.into();
        debug!("new question: {question}");

        if let Some(prompt) = &self.shared.system_prompt {
            self.conversation.push(Message::system(prompt.clone()));
        }
        self.conversation.push(Message::user(question));
        self.state = SessionState::Running;
        Ask::new(self)
    }

    /// Asks a question and drives the session to its answer, forwarding
    /// every intermediate step to `observer`.
    pub async fn run<S: Into<String>>(
        self,
        question: S,
        observer: &dyn StepObserver,
    ) -> Result<Message, AgentError> {
        let mut ask = self.ask(question);
        while let Some(event) = ask.next().await {
            match event? {
                SessionEvent::Step { item, context } => {
                    observer.on_step(&item, &context)
                }
                SessionEvent::Answer(answer) => return Ok(answer),
            }
        }
        Err(AgentError::Incomplete)
    }

    async fn next_event(
        mut self,
    ) -> (Option<Result<SessionEvent, AgentError>>, Self) {
        loop {
            match self.queue.pop_front() {
                Some(Queued::Event(event)) => return (Some(Ok(event)), self),
                Some(Queued::Append(message)) => {
                    self.conversation.push(message);
                    continue;
                }
                None => {}
            }
            if self.state != SessionState::Running {
                return (None, self);
            }

            let advanced = match self.pending_tool_calls.pop_front() {
                Some(call) => {
                    self.run_tool_call(call).await;
                    Ok(())
                }
                None => self.run_model_step().await,
            };
            if let Err(err) = advanced {
                warn!("session failed: {err}");
                self.state = SessionState::Failed;
                return (Some(Err(err)), self);
            }
        }
    }

    async fn run_model_step(&mut self) -> Result<(), AgentError> {
        let max_steps = self.shared.max_steps;
        if self.steps >= max_steps {
            return Err(AgentError::StepLimitExceeded(max_steps));
        }
        self.steps += 1;

        let request = ModelRequest {
            messages: self.conversation.messages().to_vec(),
            tools: self.shared.registry.definitions(),
            tool_choice: ToolChoice::Auto,
        };
        let ModelStep {
            items,
            finish_reason,
        } = request_step(&self.shared, request)
            .instrument(debug_span!("reasoning step", step = self.steps))
            .await?;
        trace!("step {} finished: {finish_reason:?}", self.steps);

        let message = Message::assistant(items);
        for item in &message.items {
            let context = self.assistant_context(item);
            self.queue.push_back(Queued::Event(SessionEvent::Step {
                item: item.clone(),
                context,
            }));
        }
        self.pending_tool_calls.extend(message.tool_calls().cloned());

        if self.pending_tool_calls.is_empty() {
            if message.items.is_empty() {
                warn!("model finished without saying anything");
            }
            info!("answered after {} steps", self.steps);
            self.state = SessionState::Answered;
            self.queue.push_back(Queued::Append(message.clone()));
            self.queue.push_back(Queued::Event(SessionEvent::Answer(message)));
        } else {
            self.queue.push_back(Queued::Append(message));
        }
        Ok(())
    }

    async fn run_tool_call(&mut self, call: ToolCallRequest) {
        let result = invoke_tool(&self.shared, call).await;
        let context = if result.namespace.is_empty() {
            StepContext {
                role: Role::Tool,
                namespace: None,
                function_name: Some(result.name.clone()),
            }
        } else {
            StepContext::new(Role::Tool)
                .with_tool(&result.namespace, &result.name)
        };

        self.queue.push_back(Queued::Event(SessionEvent::Step {
            item: ContentItem::ToolCallResult(result.clone()),
            context,
        }));
        self.queue.push_back(Queued::Append(Message::tool(result)));
    }

    fn assistant_context(&self, item: &ContentItem) -> StepContext {
        let context = StepContext::new(Role::Assistant);
        let ContentItem::ToolCallRequest(req) = item else {
            return context;
        };
        match self.shared.registry.lookup(&req.name) {
            Some(tool) => context.with_tool(tool.namespace(), tool.name()),
            None => context,
        }
    }
}

async fn request_step(
    shared: &Shared,
    request: ModelRequest,
) -> Result<ModelStep, AgentError> {
    let client = &shared.model_client;
    let mut retries = 0;
    let result = shared
        .invoker
        .invoke_notify(
            move || client.send_request(request.clone()),
            |err, delay: Duration| {
                retries += 1;
                debug!("model step failed: {err}, retrying in {delay:?}");
            },
        )
        .await;

    result.map_err(|error| {
        if error.kind().is_rate_limited() {
            AgentError::RateLimitExhausted {
                attempts: retries + 1,
                error,
            }
        } else {
            AgentError::Model(error)
        }
    })
}

async fn invoke_tool(shared: &Shared, call: ToolCallRequest) -> ToolCallResult {
    let ToolCallRequest {
        id,
        name: requested_name,
        arguments,
        malformed_arguments,
    } = call;

    let Some(tool) = shared.registry.lookup(&requested_name) else {
        warn!("model requested an unknown tool: {requested_name}");
        return ToolCallResult {
            id,
            failure: Some(format!("no tool named '{requested_name}' is available")),
            name: requested_name,
            namespace: String::new(),
            value: None,
        };
    };
    let namespace = tool.namespace().to_owned();
    let name = tool.name().to_owned();

    if let Some(raw) = malformed_arguments {
        warn!(
            "not invoking {}, its arguments are malformed",
            tool.display_name()
        );
        return ToolCallResult {
            id,
            name,
            namespace,
            value: None,
            failure: Some(format!(
                "the arguments are not a valid JSON object: {raw}"
            )),
        };
    }

    let ToolFailurePolicy { retries, timeout } = shared.tool_failure_policy;
    let mut attempt = 0;
    let outcome = loop {
        let invocation =
            shared.registry.resolve(&namespace, &name, arguments.clone());
        let result = match tokio::time::timeout(timeout, invocation).await {
            Ok(result) => result,
            Err(_) => Err(ToolInvocationError {
                namespace: namespace.clone(),
                tool: name.clone(),
                cause: format!("no response within {timeout:?}").into(),
            }),
        };
        match result {
            Ok(value) => break Ok(value),
            Err(err) if attempt < retries => {
                attempt += 1;
                warn!("{err}, retrying ({attempt}/{retries})");
            }
            Err(err) => break Err(err),
        }
    };

    let (value, failure) = match outcome {
        Ok(Value::Null) => (None, None),
        Ok(value) => (Some(value), None),
        Err(err) => {
            warn!("{err}");
            (None, Some(err.to_string()))
        }
    };
    ToolCallResult {
        id,
        name,
        namespace,
        value,
        failure,
    }
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = (Option<Result<SessionEvent, AgentError>>, AgentSession);

/// The lazy, forward-only stream of events answering one question.
///
/// Events of a reasoning step are only produced once the model call
/// behind it has succeeded, so a retried call never shows up twice. The
/// stream ends after the answer or after the first error.
pub struct Ask {
    session: Option<AgentSession>,
    next_event_fut: Option<PinnedFuture<NextEvent>>,
    state: SessionState,
    timeout: Option<Duration>,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl Ask {
    fn new(session: AgentSession) -> Self {
        Self {
            state: session.state,
            timeout: session.shared.timeout,
            session: Some(session),
            next_event_fut: None,
            deadline: None,
        }
    }

    /// Returns the lifecycle stage as of the last produced event.
    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Gives the session back, e.g. to inspect the conversation.
    ///
    /// Returns `None` if the session was dropped by a timeout or is in the
    /// middle of producing an event.
    #[inline]
    pub fn into_session(self) -> Option<AgentSession> {
        self.session
    }
}

impl Stream for Ask {
    type Item = Result<SessionEvent, AgentError>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(timeout) = this.timeout.filter(|_| !this.state.is_terminal()) {
            // The timer starts on the first poll, which is also when the
            // session starts working.
            let deadline = this
                .deadline
                .get_or_insert_with(|| Box::pin(sleep(timeout)));
            if deadline.as_mut().poll(cx).is_ready() {
                warn!("no answer within {timeout:?}, giving up");
                // Dropping the future drops the session along with any
                // tool call still in flight.
                this.next_event_fut = None;
                this.session = None;
                this.deadline = None;
                this.timeout = None;
                this.state = SessionState::Failed;
                return Poll::Ready(Some(Err(AgentError::Timeout(timeout))));
            }
        }

        if this.next_event_fut.is_none() {
            let Some(session) = this.session.take() else {
                return Poll::Ready(None);
            };
            this.next_event_fut = Some(Box::pin(session.next_event()));
        }
        let Some(next_event_fut) = this.next_event_fut.as_mut() else {
            return Poll::Ready(None);
        };

        let (event, session) = ready!(next_event_fut.as_mut().poll(cx));
        this.next_event_fut = None;
        this.state = session.state;
        this.session = Some(session);
        Poll::Ready(event)
    }
}
