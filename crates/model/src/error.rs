use std::time::Duration;

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The content is moderated.
    Moderated,
    /// The model provider is rate limited.
    RateLimitExceeded {
        /// How long the provider asked us to wait, if it said so.
        retry_after: Option<Duration>,
    },
    /// Any other errors.
    Other,
}

impl ErrorKind {
    /// Creates a `RateLimitExceeded` kind without a suggested wait.
    #[inline]
    pub fn rate_limited() -> Self {
        Self::RateLimitExceeded { retry_after: None }
    }

    /// Returns `true` if this is a `RateLimitExceeded` kind.
    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }
}
