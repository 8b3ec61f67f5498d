//! Tool discovery and invocation across external tool servers.

mod error;
mod registry;
mod server;

pub use error::{DiscoveryError, ToolInvocationError};
pub use registry::{ToolDescriptor, ToolRegistry, model_facing_name};
pub use server::{ToolServer, ToolServerError, ToolSpec};
