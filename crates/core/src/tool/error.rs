use thiserror::Error;

use super::ToolServerError;

/// A tool server failed to report its tools, or reported an unusable set.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The listing call itself failed.
    #[error("failed to list tools of '{namespace}': {source}")]
    Listing {
        /// The namespace of the failing server.
        namespace: String,
        /// The underlying error.
        #[source]
        source: ToolServerError,
    },
    /// Two servers were registered under the same namespace.
    #[error("tool server namespace '{0}' is registered more than once")]
    DuplicateNamespace(String),
    /// A server reported the same tool name twice.
    #[error("tool '{namespace}.{tool}' is reported more than once")]
    DuplicateTool {
        /// The namespace of the server.
        namespace: String,
        /// The repeated tool name.
        tool: String,
    },
    /// Two different tools map to the same model-facing name.
    #[error("tool name '{0}' is ambiguous across tool servers")]
    AmbiguousName(String),
}

/// A specific tool invocation failed.
#[derive(Debug, Error)]
#[error("tool '{namespace}.{tool}' failed: {cause}")]
pub struct ToolInvocationError {
    /// The namespace the tool was looked up in.
    pub namespace: String,
    /// The tool name.
    pub tool: String,
    /// The underlying error.
    #[source]
    pub cause: ToolServerError,
}
