//! Errors raised by nodes and process runners.
//!
//! Step failures (non-zero exits, unreachable hosts) are not errors: they are
//! recorded on the node and surfaced through its status. `NodeError` covers
//! misuse of the node lifecycle and processes that could not be created at all.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node '{node}' is not configured")]
    NotConfigured { node: String },

    #[error("node '{node}' has already been started")]
    AlreadyStarted { node: String },

    #[error("node '{node}' cannot {operation}")]
    Unsupported {
        node: String,
        operation: &'static str,
    },

    #[error("build node '{node}' has no project_src")]
    MissingSource { node: String },

    #[error("run node '{node}' has no path to run")]
    MissingRunPath { node: String },

    #[error("empty command")]
    EmptyCommand,

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}
