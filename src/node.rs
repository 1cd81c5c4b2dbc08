//! Build and run nodes.
//!
//! A `Node` is a named target asked to build or run something, locally or over
//! ssh. The four node flavours (build, remote build, run, remote run) share one
//! type: the role decides which plan `configure` builds, and an optional
//! `RemoteTarget` decides where the processes run.
//!
//! Starting a node hands its command sequence to a background worker task. The
//! worker runs the steps strictly one after another, one `ProcessRunner` each,
//! and reports everything it sees through a channel. The node folds those
//! events into its buffers and step records whenever it is polled, so polling
//! never blocks.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::{CommandLine, RemoteTarget, Toolchain};
use crate::config::NodeOptions;
use crate::error::NodeError;
use crate::events::WorkerEvent;
use crate::output::StreamKind;
use crate::plan::{BuildPlan, RunPlan};
use crate::process::{
    classify_exit, FailureKind, NodeState, NodeStatus, StepPhase, StepRecord,
    SPAWN_FAILURE_CODE,
};
use crate::runner::{ProcessRunner, RunnerStatus};

/// How often the worker checks its processes for output and exit.
const STEP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Whether a node builds or runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Build,
    Run,
}

#[derive(Debug, Clone)]
enum Plan {
    Build(BuildPlan),
    Run(RunPlan),
}

/// A build or run target.
#[derive(Debug)]
pub struct Node {
    name: String,
    role: NodeRole,
    remote: Option<RemoteTarget>,
    deploy_to: Vec<String>,
    state: NodeState,
    plan: Option<Plan>,
    worker: Option<JoinHandle<()>>,
    cancel: Option<watch::Sender<bool>>,
    events: Option<mpsc::UnboundedReceiver<WorkerEvent>>,
    planned_steps: usize,
    stdout: String,
    stderr: String,
    steps: Vec<StepRecord>,
}

impl Node {
    fn new(name: impl Into<String>, role: NodeRole, remote: Option<RemoteTarget>) -> Self {
        Self {
            name: name.into(),
            role,
            remote,
            deploy_to: Vec::new(),
            state: NodeState::Unconfigured,
            plan: None,
            worker: None,
            cancel: None,
            events: None,
            planned_steps: 0,
            stdout: String::new(),
            stderr: String::new(),
            steps: Vec::new(),
        }
    }

    /// Builds on the local machine.
    pub fn local_build(name: impl Into<String>) -> Self {
        Self::new(name, NodeRole::Build, None)
    }

    /// Builds on `target` over ssh and copies the binaries to `deploy_to`.
    pub fn remote_build(
        name: impl Into<String>,
        target: RemoteTarget,
        deploy_to: Vec<String>,
    ) -> Self {
        let mut node = Self::new(name, NodeRole::Build, Some(target));
        node.deploy_to = deploy_to;
        node
    }

    /// Runs a command on the local machine.
    pub fn local_run(name: impl Into<String>) -> Self {
        Self::new(name, NodeRole::Run, None)
    }

    /// Runs a command on `target` over ssh, with `DISPLAY` pointing at the
    /// host's own screen unless the target already sets it.
    pub fn remote_run(name: impl Into<String>, target: RemoteTarget) -> Self {
        let target = if target.env.iter().any(|(key, _)| key == "DISPLAY") {
            target
        } else {
            target.with_env("DISPLAY", ":0")
        };
        Self::new(name, NodeRole::Run, Some(target))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn remote_target(&self) -> Option<&RemoteTarget> {
        self.remote.as_ref()
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// The build plan, once a build node is configured.
    pub fn build_plan(&self) -> Option<&BuildPlan> {
        match &self.plan {
            Some(Plan::Build(plan)) => Some(plan),
            _ => None,
        }
    }

    /// Every process this node has started so far, in start order.
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// Applies `options`. Allowed until the node is started.
    pub fn configure(&mut self, options: &NodeOptions) -> Result<(), NodeError> {
        if matches!(self.state, NodeState::Running | NodeState::Done) {
            return Err(NodeError::AlreadyStarted {
                node: self.name.clone(),
            });
        }
        let plan = match self.role {
            NodeRole::Build => {
                let mut plan = BuildPlan::from_options(&self.name, options)?;
                if self.remote.is_some() {
                    if plan.deploy_to.is_empty() {
                        plan.deploy_to = self.deploy_to.clone();
                    }
                } else if !plan.deploy_to.is_empty() {
                    warn!(node = %self.name, "deploy_to is ignored for local build nodes");
                    plan.deploy_to.clear();
                }
                Plan::Build(plan)
            }
            NodeRole::Run => Plan::Run(RunPlan::from_options(&self.name, options)?),
        };
        self.plan = Some(plan);
        self.state = NodeState::Configured;
        Ok(())
    }

    /// Starts the node's role: `build` for build nodes, `run` for run nodes.
    pub fn start(&mut self) -> Result<(), NodeError> {
        match self.role {
            NodeRole::Build => self.build(),
            NodeRole::Run => self.run(),
        }
    }

    /// Launches prebuild commands, the build steps and any deployment on a
    /// background worker and returns immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(&mut self) -> Result<(), NodeError> {
        if self.role != NodeRole::Build {
            return Err(self.unsupported("build"));
        }
        let plan = match self.startable_plan()? {
            Plan::Build(plan) => plan.clone(),
            Plan::Run(_) => return Err(self.unsupported("build")),
        };

        let toolchain = Toolchain::detect(self.is_remote());
        let working_dir = plan.working_dir();
        let prebuild = plan
            .prebuild_commands()
            .into_iter()
            .map(|command| Step {
                phase: StepPhase::Prebuild,
                command,
                working_dir: working_dir.clone(),
                remote: None,
                label: Some("[pre] ".to_string()),
            })
            .collect();
        let main = plan
            .build_commands(toolchain, self.is_remote())
            .into_iter()
            .map(|command| Step {
                phase: StepPhase::Build,
                command,
                working_dir: working_dir.clone(),
                remote: self.remote.clone(),
                label: None,
            })
            .collect();
        let deploy = match &self.remote {
            Some(target) => plan
                .deploy_commands(target.login.as_deref())
                .into_iter()
                .map(|(host, command)| Step {
                    phase: StepPhase::Deploy,
                    command,
                    working_dir: working_dir.clone(),
                    remote: Some(target.clone()),
                    label: Some(format!("[deploy {}] ", host)),
                })
                .collect(),
            None => Vec::new(),
        };

        self.spawn_worker(Job {
            prebuild,
            main,
            deploy,
        });
        Ok(())
    }

    /// Launches the configured command as a single process and returns immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn run(&mut self) -> Result<(), NodeError> {
        if self.role != NodeRole::Run {
            return Err(self.unsupported("run"));
        }
        let plan = match self.startable_plan()? {
            Plan::Run(plan) => plan.clone(),
            Plan::Build(_) => return Err(self.unsupported("run")),
        };
        let step = Step {
            phase: StepPhase::Run,
            command: plan.command(),
            working_dir: plan.working_dir(),
            remote: self.remote.clone(),
            label: None,
        };
        self.spawn_worker(Job {
            prebuild: Vec::new(),
            main: vec![step],
            deploy: Vec::new(),
        });
        Ok(())
    }

    /// True once the worker has finished every step. Never blocks.
    pub fn is_done(&mut self) -> bool {
        match self.state {
            NodeState::Done => true,
            NodeState::Running => {
                let finished = self
                    .worker
                    .as_ref()
                    .map(|worker| worker.is_finished())
                    .unwrap_or(true);
                if finished {
                    self.pump();
                    self.state = NodeState::Done;
                    self.worker = None;
                    self.cancel = None;
                    info!(node = %self.name, status = %self.status(), "node done");
                }
                finished
            }
            NodeState::Unconfigured | NodeState::Configured => false,
        }
    }

    /// Drains and returns the output collected since the last call.
    pub fn read_messages(&mut self) -> (String, String) {
        self.pump();
        (
            std::mem::take(&mut self.stdout),
            std::mem::take(&mut self.stderr),
        )
    }

    /// Kills the active process and skips the remaining steps. No-op unless running.
    pub fn terminate(&mut self) {
        if self.state != NodeState::Running {
            return;
        }
        if let Some(cancel) = &self.cancel {
            debug!(node = %self.name, "terminate requested");
            cancel.send_replace(true);
        }
    }

    /// Artifact names this node's build yields; empty for run nodes.
    pub fn get_products(&self) -> Vec<String> {
        self.build_plan().map(BuildPlan::products).unwrap_or_default()
    }

    pub fn status(&self) -> NodeStatus {
        match self.state {
            NodeState::Unconfigured | NodeState::Configured => NodeStatus::Idle,
            NodeState::Running => NodeStatus::Running,
            NodeState::Done => self.final_status(),
        }
    }

    /// Exit code of the most recent build or run step.
    pub fn exit_code(&self) -> Option<i32> {
        self.steps
            .iter()
            .rev()
            .find(|step| step.phase.gates_status())
            .and_then(|step| step.exit_code)
    }

    fn final_status(&self) -> NodeStatus {
        let gating = self.steps.iter().filter(|s| s.phase.gates_status());
        if let Some(failed) = gating.clone().find(|s| !s.succeeded()) {
            return NodeStatus::Failed {
                exit_code: failed.exit_code.unwrap_or(-1),
                kind: failed.failure.unwrap_or(FailureKind::Command),
            };
        }
        if gating.count() < self.planned_steps {
            return NodeStatus::Failed {
                exit_code: -1,
                kind: FailureKind::Terminated,
            };
        }
        NodeStatus::Succeeded
    }

    fn startable_plan(&self) -> Result<&Plan, NodeError> {
        match (self.state, &self.plan) {
            (NodeState::Configured, Some(plan)) => Ok(plan),
            (NodeState::Running | NodeState::Done, _) => Err(NodeError::AlreadyStarted {
                node: self.name.clone(),
            }),
            _ => Err(NodeError::NotConfigured {
                node: self.name.clone(),
            }),
        }
    }

    fn unsupported(&self, operation: &'static str) -> NodeError {
        NodeError::Unsupported {
            node: self.name.clone(),
            operation,
        }
    }

    fn spawn_worker(&mut self, job: Job) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.planned_steps = job.main.len();
        let worker = Worker {
            node: self.name.clone(),
            events: events_tx,
            cancel: cancel_rx,
            next_index: 0,
        };
        info!(node = %self.name, steps = job.main.len(), "node started");
        self.worker = Some(tokio::spawn(worker.run(job)));
        self.cancel = Some(cancel_tx);
        self.events = Some(events_rx);
        self.state = NodeState::Running;
    }

    // Moves everything the worker reported into the node.
    fn pump(&mut self) {
        let Some(events) = self.events.as_mut() else {
            return;
        };
        while let Ok(event) = events.try_recv() {
            match event {
                WorkerEvent::StepStarted {
                    index,
                    phase,
                    command,
                    remote,
                    at,
                } => {
                    debug_assert_eq!(index, self.steps.len());
                    self.steps.push(StepRecord {
                        phase,
                        command,
                        remote,
                        started_at: at,
                        finished_at: None,
                        exit_code: None,
                        failure: None,
                    });
                }
                WorkerEvent::Output { stream, text } => match stream {
                    StreamKind::Stdout => self.stdout.push_str(&text),
                    StreamKind::Stderr => self.stderr.push_str(&text),
                },
                WorkerEvent::StepExited {
                    index,
                    code,
                    failure,
                    at,
                } => {
                    if let Some(step) = self.steps.get_mut(index) {
                        step.exit_code = Some(code);
                        step.failure = failure;
                        step.finished_at = Some(at);
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Step {
    phase: StepPhase,
    command: CommandLine,
    working_dir: Option<PathBuf>,
    remote: Option<RemoteTarget>,
    /// Prefix for every output line of this step.
    label: Option<String>,
}

impl Step {
    fn display(&self) -> String {
        match &self.remote {
            Some(target) => target
                .wrap(&self.command, self.working_dir.as_deref())
                .to_shell_string(),
            None => self.command.to_shell_string(),
        }
    }
}

struct Job {
    prebuild: Vec<Step>,
    main: Vec<Step>,
    deploy: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    SpawnFailed,
    Exited { code: i32, terminated: bool },
}

struct Active<'a> {
    slot: usize,
    index: usize,
    step: &'a Step,
    runner: ProcessRunner,
    terminated: bool,
}

struct Worker {
    node: String,
    events: mpsc::UnboundedSender<WorkerEvent>,
    cancel: watch::Receiver<bool>,
    next_index: usize,
}

impl Worker {
    async fn run(mut self, job: Job) {
        for step in &job.prebuild {
            if self.cancelled() {
                return;
            }
            match self.run_step(step).await {
                StepOutcome::Exited { code: 0, .. } => {}
                outcome => {
                    warn!(node = %self.node, ?outcome, "pre-build step failed, continuing");
                }
            }
        }

        let mut built = true;
        for step in &job.main {
            if self.cancelled() {
                return;
            }
            match self.run_step(step).await {
                StepOutcome::SpawnFailed => return,
                StepOutcome::Exited {
                    terminated: true, ..
                } => return,
                StepOutcome::Exited { code, .. } => built &= code == 0,
            }
        }

        if job.deploy.is_empty() || self.cancelled() {
            return;
        }
        if !built {
            warn!(node = %self.node, "build failed, skipping deployment");
            return;
        }
        let outcomes = self.run_concurrently(&job.deploy).await;
        let failed = outcomes
            .iter()
            .filter(|o| !matches!(o, StepOutcome::Exited { code: 0, .. }))
            .count();
        if failed > 0 {
            warn!(node = %self.node, failed, hosts = job.deploy.len(), "deployment incomplete");
        } else {
            info!(node = %self.node, hosts = job.deploy.len(), "deployed");
        }
    }

    async fn run_step(&mut self, step: &Step) -> StepOutcome {
        self.run_concurrently(std::slice::from_ref(step))
            .await
            .into_iter()
            .next()
            .unwrap_or(StepOutcome::SpawnFailed)
    }

    /// Starts every step at once and supervises them until all have exited.
    async fn run_concurrently(&mut self, steps: &[Step]) -> Vec<StepOutcome> {
        let mut outcomes = vec![StepOutcome::SpawnFailed; steps.len()];
        let mut active = Vec::with_capacity(steps.len());

        for (slot, step) in steps.iter().enumerate() {
            let index = self.next_index;
            self.next_index += 1;
            let command = step.display();
            debug!(node = %self.node, step = index, phase = ?step.phase, %command, "starting step");
            self.send(WorkerEvent::StepStarted {
                index,
                phase: step.phase,
                command: command.clone(),
                remote: step.remote.is_some(),
                at: Instant::now(),
            });
            self.send(WorkerEvent::Output {
                stream: StreamKind::Stdout,
                text: format!("-- {}: {}\n", step.phase.label(), command),
            });

            match ProcessRunner::start(
                &step.command,
                step.working_dir.as_deref(),
                step.remote.as_ref(),
            ) {
                Ok(runner) => active.push(Active {
                    slot,
                    index,
                    step,
                    runner,
                    terminated: false,
                }),
                Err(err) => {
                    warn!(node = %self.node, step = index, error = %err, "step failed to start");
                    self.forward(step, String::new(), format!("{}\n", err));
                    self.send(WorkerEvent::StepExited {
                        index,
                        code: SPAWN_FAILURE_CODE,
                        failure: Some(FailureKind::Spawn),
                        at: Instant::now(),
                    });
                }
            }
        }

        let mut ticker = tokio::time::interval(STEP_POLL_INTERVAL);
        while !active.is_empty() {
            ticker.tick().await;
            let cancelled = self.cancelled();
            let mut running = Vec::with_capacity(active.len());
            for mut current in std::mem::take(&mut active) {
                let alive = current.runner.poll() == RunnerStatus::Running;
                if cancelled && alive && !current.terminated {
                    current.runner.terminate();
                    current.terminated = true;
                }
                let (stdout, stderr) = current.runner.drain_output();
                self.forward(current.step, stdout, stderr);

                let RunnerStatus::Exited(code) = current.runner.poll() else {
                    running.push(current);
                    continue;
                };
                // Exited, but the last output may still be in flight.
                if !current.runner.output_settled() {
                    running.push(current);
                    continue;
                }
                let (stdout, stderr) = current.runner.drain_output();
                self.forward(current.step, stdout, stderr);

                let remote = current.step.remote.is_some();
                let failure = classify_exit(code, remote, current.terminated);
                debug!(node = %self.node, step = current.index, code, ?failure, "step exited");
                self.send(WorkerEvent::StepExited {
                    index: current.index,
                    code,
                    failure,
                    at: Instant::now(),
                });
                outcomes[current.slot] = StepOutcome::Exited {
                    code,
                    terminated: current.terminated,
                };
            }
            active = running;
        }
        outcomes
    }

    fn cancelled(&self) -> bool {
        *self.cancel.borrow() || self.cancel.has_changed().is_err()
    }

    fn forward(&self, step: &Step, stdout: String, stderr: String) {
        for (stream, text) in [(StreamKind::Stdout, stdout), (StreamKind::Stderr, stderr)] {
            if text.is_empty() {
                continue;
            }
            let text = match &step.label {
                Some(label) => prefix_lines(label, &text),
                None => text,
            };
            self.send(WorkerEvent::Output { stream, text });
        }
    }

    fn send(&self, event: WorkerEvent) {
        // The node may already be gone; its processes die with the runners.
        let _ = self.events.send(event);
    }
}

fn prefix_lines(prefix: &str, text: &str) -> String {
    let mut out = String::with_capacity(text.len() + prefix.len());
    for line in text.split_inclusive('\n') {
        out.push_str(prefix);
        out.push_str(line);
    }
    out
}
