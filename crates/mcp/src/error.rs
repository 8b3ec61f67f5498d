use thiserror::Error;

/// Errors talking to an MCP server.
#[derive(Debug, Error)]
pub enum McpError {
    /// The server process couldn't be started.
    #[error("failed to spawn MCP server '{server}': {source}")]
    Spawn {
        /// The configured server name.
        server: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Writing to the server failed, or it never completed the handshake.
    #[error("MCP server '{server}' transport error: {message}")]
    Transport {
        /// The configured server name.
        server: String,
        /// What went wrong.
        message: String,
    },
    /// A reply didn't have the expected shape.
    #[error("MCP server '{server}' sent an unexpected payload: {source}")]
    InvalidJson {
        /// The configured server name.
        server: String,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// The server answered a request with a JSON-RPC error.
    #[error("MCP server '{server}' returned JSON-RPC error {code}: {message}")]
    Rpc {
        /// The configured server name.
        server: String,
        /// The JSON-RPC error code.
        code: i64,
        /// The error message sent by the server.
        message: String,
    },
    /// The server closed its output before answering.
    #[error("MCP server '{server}' terminated unexpectedly")]
    Terminated {
        /// The configured server name.
        server: String,
    },
    /// The tool ran but reported a failure of its own.
    #[error("tool '{server}.{tool}' reported an error: {message}")]
    ToolFailed {
        /// The configured server name.
        server: String,
        /// The tool that failed.
        tool: String,
        /// The text content of the failed result.
        message: String,
    },
}
