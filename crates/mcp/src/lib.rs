//! A client for MCP tool servers speaking JSON-RPC over stdio.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod client;
mod config;
mod error;
mod result;

pub use client::{McpClient, ServerInfo};
pub use config::McpServerConfig;
pub use error::McpError;
