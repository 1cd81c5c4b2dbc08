//! allorun: build a project on a fleet of machines, then run it everywhere.
//!
//! The binary in `main.rs` is one consumer of this API. A dashboard is
//! another: it drives an `Orchestrator`, reads the per-node logs and moves
//! the current selection.

// Public API
pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod node;
pub mod orchestrator;
pub mod output;
pub mod plan;
pub mod process;
pub mod report;
pub mod runner;
pub mod sink;

// Worker to node messages
mod events;
