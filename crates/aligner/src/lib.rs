//! An agent that answers questions by aligning them with Wikidata (and
//! optionally MusicBrainz), using the tools of MCP servers.
//!
//! The crate includes the `aligner` CLI. Its pieces are also usable as a
//! library: configuration loading, startup of the tool servers and console
//! rendering of reasoning steps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod app;
pub mod config;
pub mod console;

pub use app::{App, DEFAULT_INSTRUCTIONS, StartupError, build_agent};

/// Re-exports of [`aligner_core`] crate.
pub mod core {
    pub use aligner_core::*;
}
