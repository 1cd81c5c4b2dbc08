//! Single-process execution.
//!
//! A `ProcessRunner` owns exactly one child process for its whole life. Two
//! reader tasks copy the child's stdout and stderr into unbounded queues so a
//! full pipe can never stall the child; the owner drains those queues and polls
//! for exit without ever blocking.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::command::{CommandLine, RemoteTarget};
use crate::error::NodeError;

/// How long the readers get to hit EOF after the child exited.
/// Grandchildren that inherited the pipes can keep them open indefinitely.
const READER_GRACE: Duration = Duration::from_millis(500);

/// Liveness of the child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerStatus {
    Running,
    Exited(i32),
}

/// One spawned process plus the queues its output lands in.
pub struct ProcessRunner {
    command: String,
    child: Child,
    pid: Option<u32>,
    stdout_rx: mpsc::UnboundedReceiver<String>,
    stderr_rx: mpsc::UnboundedReceiver<String>,
    readers: Vec<JoinHandle<()>>,
    exit_code: Option<i32>,
    exited_at: Option<Instant>,
}

impl ProcessRunner {
    /// Spawns `command` in `working_dir`, through ssh when `remote` is given.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        command: &CommandLine,
        working_dir: Option<&Path>,
        remote: Option<&RemoteTarget>,
    ) -> Result<Self, NodeError> {
        if command.is_empty() {
            return Err(NodeError::EmptyCommand);
        }
        let invocation = match remote {
            Some(target) => target.wrap(command, working_dir),
            None => command.clone(),
        };
        let shown = invocation.to_shell_string();

        let mut process = invocation.to_command();
        if remote.is_none() {
            if let Some(dir) = working_dir.filter(|d| !d.as_os_str().is_empty()) {
                process.current_dir(dir);
            }
        }
        process
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        process.kill_on_drop(true);

        #[cfg(unix)]
        unsafe {
            process.pre_exec(|| {
                let _ = libc::setpgid(0, 0);
                Ok(())
            });
        }

        let mut child = process.spawn().map_err(|source| NodeError::Spawn {
            command: shown.clone(),
            source,
        })?;
        let pid = child.id();
        debug!(command = %shown, pid = ?pid, "spawned process");

        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(read_stream(stdout, stdout_tx)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(read_stream(stderr, stderr_tx)));
        }

        Ok(Self {
            command: shown,
            child,
            pid,
            stdout_rx,
            stderr_rx,
            readers,
            exit_code: None,
            exited_at: None,
        })
    }

    /// The command line actually executed.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Returns everything queued since the last call, stdout then stderr.
    pub fn drain_output(&mut self) -> (String, String) {
        (drain(&mut self.stdout_rx), drain(&mut self.stderr_rx))
    }

    /// Non-blocking liveness check. The exit code is recorded exactly once.
    pub fn poll(&mut self) -> RunnerStatus {
        if let Some(code) = self.exit_code {
            return RunnerStatus::Exited(code);
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                let code = exit_code_of(status);
                debug!(command = %self.command, code, "process exited");
                self.record_exit(code);
                RunnerStatus::Exited(code)
            }
            Ok(None) => RunnerStatus::Running,
            Err(err) => {
                warn!(command = %self.command, error = %err, "failed to query process status");
                self.record_exit(-1);
                RunnerStatus::Exited(-1)
            }
        }
    }

    /// Kills the process (and its process group) if it is still running.
    pub fn terminate(&mut self) {
        if self.poll() != RunnerStatus::Running {
            return;
        }
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            unsafe {
                let _ = libc::kill(-(pid as i32), libc::SIGKILL);
            }
        }
        if let Err(err) = self.child.start_kill() {
            debug!(command = %self.command, error = %err, "kill failed");
        }
    }

    /// Non-blocking: true once the child exited and its readers queued the
    /// last of the output, or the grace period after exit ran out.
    pub fn output_settled(&self) -> bool {
        let Some(exited_at) = self.exited_at else {
            return false;
        };
        self.readers.iter().all(JoinHandle::is_finished) || exited_at.elapsed() >= READER_GRACE
    }

    /// Waits briefly for the readers to queue the last of the output.
    pub async fn settle(&mut self) {
        let deadline = self.exited_at.unwrap_or_else(Instant::now) + READER_GRACE;
        for reader in self.readers.drain(..) {
            if tokio::time::timeout_at(deadline, reader).await.is_err() {
                debug!(command = %self.command, "output reader still open after exit");
            }
        }
    }

    fn record_exit(&mut self, code: i32) {
        self.exit_code = Some(code);
        self.exited_at = Some(Instant::now());
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    let mut out = String::new();
    while let Ok(chunk) = rx.try_recv() {
        out.push_str(&chunk);
    }
    out
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

// Lines are forwarded with their newline; invalid UTF-8 is replaced rather than
// ending the read, so the pipe keeps draining.
async fn read_stream<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                    break;
                }
            }
        }
    }
}
