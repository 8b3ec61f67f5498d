use std::time::Duration;

use aligner_model::ModelProviderError;
use thiserror::Error;

/// Why a session failed to produce an answer.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model kept rejecting requests for exceeding its quota.
    #[error("model is still rate limited after {attempts} attempts: {error}")]
    RateLimitExhausted {
        /// How many attempts were made.
        attempts: u32,
        /// The last rate-limit failure.
        error: Box<dyn ModelProviderError>,
    },
    /// The model failed in a way that retrying won't fix.
    #[error("model request failed: {0}")]
    Model(Box<dyn ModelProviderError>),
    /// The whole question took longer than allowed.
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    /// The model kept calling tools without ever answering.
    #[error("no answer after {0} reasoning steps")]
    StepLimitExceeded(usize),
    /// The event stream ended before an answer was produced.
    #[error("session ended without an answer")]
    Incomplete,
}

impl AgentError {
    /// Returns the kind of the underlying model error, if there is one.
    pub fn model_error_kind(&self) -> Option<aligner_model::ErrorKind> {
        match self {
            Self::RateLimitExhausted { error, .. } | Self::Model(error) => {
                Some(error.kind())
            }
            _ => None,
        }
    }
}
