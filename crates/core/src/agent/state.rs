use std::fmt::{self, Display};

/// The lifecycle stage of a session.
///
/// A session moves from `Idle` to `Running` when it is asked a question,
/// and ends in either `Answered` or `Failed`. The terminal states are
/// never left.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No question has been asked yet.
    #[default]
    Idle,
    /// The reasoning loop is in progress.
    Running,
    /// The model produced a final answer.
    Answered,
    /// The session gave up.
    Failed,
}

impl SessionState {
    /// Returns `true` if the session has finished, either way.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Answered | Self::Failed)
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Answered => "answered",
            Self::Failed => "failed",
        })
    }
}
