mod builder;
mod session;
mod state;

use std::sync::Arc;
use std::time::Duration;

pub use builder::AgentBuilder;
pub use session::{AgentSession, Ask, SessionEvent};
pub use state::SessionState;

use crate::model_client::ModelClient;
use crate::retry::RetryingInvoker;
use crate::tool::ToolRegistry;

/// How long a single tool invocation may take by default.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// How a session reacts when a tool invocation fails.
///
/// Whatever the policy, a tool that keeps failing is eventually reported to
/// the model as a result without a value, and the session goes on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ToolFailurePolicy {
    /// How many extra times a failing tool is invoked before giving up.
    pub retries: u32,
    /// How long one invocation may take. A call running longer counts as
    /// failed.
    pub timeout: Duration,
}

impl Default for ToolFailurePolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

/// A configured agent, from which single-use sessions are created.
///
/// Cloning an agent is cheap, and sessions created from the same agent
/// share nothing but the model client and the tool registry, so they can
/// run concurrently.
#[derive(Clone)]
pub struct Agent {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    pub(crate) model_client: ModelClient,
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) system_prompt: Option<String>,
    pub(crate) invoker: RetryingInvoker,
    pub(crate) tool_failure_policy: ToolFailurePolicy,
    pub(crate) max_steps: usize,
    pub(crate) timeout: Option<Duration>,
}

impl Agent {
    fn from_builder(builder: AgentBuilder) -> Self {
        let AgentBuilder {
            model_client,
            registry,
            system_prompt,
            retry_policy,
            tool_failure_policy,
            max_steps,
            timeout,
        } = builder;

        let shared = Shared {
            model_client,
            registry,
            system_prompt,
            invoker: RetryingInvoker::new(retry_policy),
            tool_failure_policy,
            max_steps,
            timeout,
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Creates a fresh session for one question.
    #[inline]
    pub fn session(&self) -> AgentSession {
        AgentSession::new(Arc::clone(&self.shared))
    }

    /// Returns the tools this agent exposes to the model.
    #[inline]
    pub fn registry(&self) -> &ToolRegistry {
        &self.shared.registry
    }
}
