use std::error::Error as StdError;

use aligner_model::Arguments;
use async_trait::async_trait;
use serde_json::Value;

/// The error type reported by a tool server.
pub type ToolServerError = Box<dyn StdError + Send + Sync>;

/// Metadata of a tool, as reported by its server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolSpec {
    /// The tool's name within its server.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// The declared input schema, usually a JSON schema object.
    pub input_schema: Value,
}

/// A connection to an out-of-process server exposing callable tools.
///
/// Implementations must tolerate concurrent `invoke` calls, since one
/// server is shared by every session of the process.
#[async_trait]
pub trait ToolServer: Send + Sync + 'static {
    /// Lists the tools this server currently exposes.
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolServerError>;

    /// Invokes the tool `name` with the given arguments.
    ///
    /// Tool results are plain JSON values: scalars, mappings or sequences.
    /// `Value::Null` means the tool produced no result.
    async fn invoke(
        &self,
        name: &str,
        arguments: Arguments,
    ) -> Result<Value, ToolServerError>;
}
