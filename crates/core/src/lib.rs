//! Core logic of the aligner: tool discovery, the reasoning loop, retries
//! of rate-limited model calls and observation of intermediate steps.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod conversation;
mod error;
mod model_client;
pub mod observer;
pub mod retry;
pub mod tool;

pub use agent::{
    Agent, AgentBuilder, AgentSession, Ask, DEFAULT_TOOL_TIMEOUT, SessionEvent,
    SessionState, ToolFailurePolicy,
};
pub use error::AgentError;
pub use observer::{NoopObserver, StepContext, StepObserver};
pub use retry::{RetryPolicy, RetryingInvoker};
