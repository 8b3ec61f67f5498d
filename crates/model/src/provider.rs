use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ErrorKind;
use crate::request::ModelRequest;
use crate::response::ModelResponse;

/// The error type for a model provider.
///
/// The agent never inspects provider errors beyond their [`ErrorKind`], so
/// the kind must be accurate: a rate-limited request reported as
/// [`ErrorKind::Other`] is never retried.
pub trait ModelProviderError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;

    /// Returns the wait the backend suggested before trying again, if this
    /// is a rate-limit error that carries one.
    #[inline]
    fn retry_after(&self) -> Option<Duration> {
        match self.kind() {
            ErrorKind::RateLimitExceeded { retry_after } => retry_after,
            ErrorKind::Moderated | ErrorKind::Other => None,
        }
    }
}

/// A chat completion backend that produces the next reasoning step of a
/// conversation.
///
/// Providers are shared by every session of an agent and should behave as
/// if they were stateless: each request carries the whole conversation, and
/// a provider may be dropped at any time.
pub trait ModelProvider: Send + Sync {
    /// The error type that may be returned by the provider.
    type Error: ModelProviderError;

    /// The response type for this provider.
    type Response: ModelResponse<Error = Self::Error>;

    /// Sends a request to the model.
    ///
    /// The returned future must not borrow `self` or `req`, so that callers
    /// can retry it from a fresh request.
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;
}

impl<P: ModelProvider> ModelProvider for Arc<P> {
    type Error = P::Error;
    type Response = P::Response;

    #[inline]
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        (**self).send_request(req)
    }
}
