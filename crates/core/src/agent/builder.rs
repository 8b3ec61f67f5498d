use std::sync::Arc;
use std::time::Duration;

use aligner_model::ModelProvider;

use super::{Agent, ToolFailurePolicy};
use crate::model_client::ModelClient;
use crate::retry::RetryPolicy;
use crate::tool::ToolRegistry;

/// The default bound on model round-trips in one session.
const DEFAULT_MAX_STEPS: usize = 25;

/// [`Agent`] builder.
pub struct AgentBuilder {
    pub(crate) model_client: ModelClient,
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) system_prompt: Option<String>,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) tool_failure_policy: ToolFailurePolicy,
    pub(crate) max_steps: usize,
    pub(crate) timeout: Option<Duration>,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            registry: Default::default(),
            system_prompt: None,
            retry_policy: Default::default(),
            tool_failure_policy: Default::default(),
            max_steps: DEFAULT_MAX_STEPS,
            timeout: None,
        }
    }

    /// Sets the tools exposed to the model.
    #[inline]
    pub fn with_registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the system prompt that opens every conversation.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Sets how rate-limited model calls are retried.
    #[inline]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets how failing tools are handled.
    #[inline]
    pub fn with_tool_failure_policy(mut self, policy: ToolFailurePolicy) -> Self {
        self.tool_failure_policy = policy;
        self
    }

    /// Bounds the number of model round-trips per session.
    #[inline]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Bounds the wall-clock time a session may take to answer.
    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the agent.
    #[inline]
    pub fn build(self) -> Agent {
        Agent::from_builder(self)
    }
}
