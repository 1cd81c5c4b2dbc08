//! Messages from a node's background worker to the node.
//!
//! A worker never touches node state directly; everything it observes travels
//! through this channel and is folded into the node when the node is polled.

use std::time::Instant;

use crate::output::StreamKind;
use crate::process::{FailureKind, StepPhase};

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A step's process is about to be spawned. Indices are dense and ascending.
    StepStarted {
        index: usize,
        phase: StepPhase,
        command: String,
        remote: bool,
        at: Instant,
    },
    /// Output collected from the current process(es).
    Output { stream: StreamKind, text: String },
    /// A step's process exited (or never started).
    StepExited {
        index: usize,
        code: i32,
        failure: Option<FailureKind>,
        at: Instant,
    },
}
