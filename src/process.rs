//! Data structures for tracking node state.
//!
//! This module defines the lifecycle of a node (`NodeState`), the status it
//! reports once done (`NodeStatus`), and the record kept for every process a
//! node ran (`StepRecord`).

use std::fmt;
use std::time::{Duration, Instant};

/// Exit code recorded when a step's process could not be created.
pub const SPAWN_FAILURE_CODE: i32 = 127;

/// Exit code ssh reserves for its own failures (auth, network, host key).
pub const SSH_FAILURE_CODE: i32 = 255;

/// Lifecycle of a node. `Done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unconfigured,
    Configured,
    Running,
    Done,
}

/// Why a node did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The command ran and exited non-zero.
    Command,
    /// The process could not be created.
    Spawn,
    /// ssh itself failed to reach or authenticate with the host.
    Connectivity,
    /// The node was terminated before it finished.
    Terminated,
}

impl FailureKind {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Command => "command failed",
            Self::Spawn => "failed to start",
            Self::Connectivity => "ssh connection failure",
            Self::Terminated => "terminated",
        }
    }
}

/// Status as seen by the orchestrator and display sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Idle,
    Running,
    Succeeded,
    Failed { exit_code: i32, kind: FailureKind },
}

impl NodeStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. })
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Running => f.write_str("running"),
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed { exit_code, kind } => {
                write!(f, "failed with code {} ({})", exit_code, kind.describe())
            }
        }
    }
}

/// Which part of a node's sequence a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    /// Advisory local commands before the build.
    Prebuild,
    Build,
    /// Copying binaries to additional hosts, best effort.
    Deploy,
    Run,
}

impl StepPhase {
    /// Whether a failure in this phase fails the node.
    pub fn gates_status(self) -> bool {
        matches!(self, Self::Build | Self::Run)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Prebuild => "pre-build",
            Self::Build => "building",
            Self::Deploy => "deploying",
            Self::Run => "running",
        }
    }
}

/// One process a node ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub phase: StepPhase,
    /// Command as executed, including any ssh wrapping.
    pub command: String,
    pub remote: bool,
    pub started_at: Instant,
    pub finished_at: Option<Instant>,
    pub exit_code: Option<i32>,
    pub failure: Option<FailureKind>,
}

impl StepRecord {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Wall time from start to exit, once the step exited.
    pub fn elapsed(&self) -> Option<Duration> {
        self.finished_at.map(|end| end.duration_since(self.started_at))
    }
}

/// Classifies a finished step.
pub fn classify_exit(code: i32, remote: bool, terminated: bool) -> Option<FailureKind> {
    if terminated {
        Some(FailureKind::Terminated)
    } else if code == 0 {
        None
    } else if remote && code == SSH_FAILURE_CODE {
        Some(FailureKind::Connectivity)
    } else {
        Some(FailureKind::Command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_exit_255_is_a_connectivity_failure_only_for_remote_steps() {
        assert_eq!(classify_exit(255, true, false), Some(FailureKind::Connectivity));
        assert_eq!(classify_exit(255, false, false), Some(FailureKind::Command));
        assert_eq!(classify_exit(1, true, false), Some(FailureKind::Command));
        assert_eq!(classify_exit(0, true, false), None);
    }

    #[test]
    fn termination_wins_over_exit_code() {
        assert_eq!(classify_exit(0, false, true), Some(FailureKind::Terminated));
        assert_eq!(classify_exit(137, true, true), Some(FailureKind::Terminated));
    }

    #[test]
    fn status_display_names_the_failure() {
        let status = NodeStatus::Failed {
            exit_code: 255,
            kind: FailureKind::Connectivity,
        };
        assert_eq!(
            status.to_string(),
            "failed with code 255 (ssh connection failure)"
        );
        assert!(status.is_done());
        assert!(!NodeStatus::Running.is_done());
    }

    #[test]
    fn elapsed_is_known_once_the_step_exited() {
        let started_at = Instant::now();
        let mut record = StepRecord {
            phase: StepPhase::Build,
            command: "make".into(),
            remote: false,
            started_at,
            finished_at: None,
            exit_code: None,
            failure: None,
        };
        assert_eq!(record.elapsed(), None);
        record.finished_at = Some(started_at + Duration::from_millis(1500));
        record.exit_code = Some(0);
        assert_eq!(record.elapsed(), Some(Duration::from_millis(1500)));
        assert!(record.succeeded());
    }
}
