//! An abstraction layer for the language-model backend.
//!
//! This crate establishes the protocol the agent uses to talk to a chat
//! completion backend: the conversation it sends, the tools it exposes,
//! and the events it receives back. The agent loop only ever sees these
//! types, so backends can be swapped without touching the core.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod error;
mod message;
mod provider;
mod request;
mod response;

pub use error::*;
pub use message::*;
pub use provider::*;
pub use request::*;
pub use response::*;
