//! Two-phase orchestration of a fleet of nodes.
//!
//! Every build node is configured and started at once, then a single polling
//! loop drains their output into the per-node and combined logs and forwards
//! it to the display sink until all of them are done. The successful builds
//! are then turned into run nodes and driven through the same loop, which by
//! default only ends on an explicit stop.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::command::RemoteTarget;
use crate::config::NodeOptions;
use crate::node::Node;
use crate::output::{split_lines, CombinedEntry, CombinedLog, LogBuffer, LogLine, StreamKind};
use crate::process::{FailureKind, NodeStatus, StepRecord};
use crate::report::load_report;
use crate::sink::DisplaySink;

/// Exit code reported for a node that could not be configured or started.
const START_FAILURE_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Build,
    Run,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build => f.write_str("build"),
            Self::Run => f.write_str("run"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub poll_interval: Duration,
    /// Lines kept per node, and in the combined log.
    pub max_lines: usize,
    /// Keep the run phase alive after every run node finished, until stopped.
    pub linger: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            max_lines: 10_000,
            linger: true,
        }
    }
}

/// Final state of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReport {
    pub name: String,
    pub phase: Phase,
    pub status: NodeStatus,
    /// Every process the node started, in start order.
    pub steps: Vec<StepRecord>,
    /// Why the node never started, if it did not.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub build: Vec<NodeReport>,
    pub run: Vec<NodeReport>,
    pub stopped: bool,
}

impl Summary {
    pub fn all_succeeded(&self) -> bool {
        self.build
            .iter()
            .chain(&self.run)
            .all(|report| report.status == NodeStatus::Succeeded)
    }
}

/// Requests a stop from outside the polling loop, e.g. a signal handler.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

struct Slot {
    node: Node,
    phase: Phase,
    log: LogBuffer,
    last_status: NodeStatus,
    start_error: Option<String>,
}

impl Slot {
    fn status(&self) -> NodeStatus {
        if self.start_error.is_some() {
            NodeStatus::Failed {
                exit_code: START_FAILURE_CODE,
                kind: FailureKind::Spawn,
            }
        } else {
            self.node.status()
        }
    }

    fn report(&self) -> NodeReport {
        NodeReport {
            name: self.node.name().to_string(),
            phase: self.phase,
            status: self.status(),
            steps: self.node.steps().to_vec(),
            error: self.start_error.clone(),
        }
    }
}

pub struct Orchestrator<S> {
    settings: OrchestratorSettings,
    sink: S,
    slots: Vec<Slot>,
    combined: CombinedLog,
    selection: usize,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl<S: DisplaySink> Orchestrator<S> {
    pub fn new(settings: OrchestratorSettings, sink: S) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let combined = CombinedLog::new(settings.max_lines);
        Self {
            settings,
            sink,
            slots: Vec::new(),
            combined,
            selection: 0,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: Arc::clone(&self.stop_tx),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Every node tracked so far, build nodes first, in display order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.slots.iter().map(|slot| &slot.node)
    }

    pub fn node_log(&self, index: usize) -> Option<&LogBuffer> {
        self.slots.get(index).map(|slot| &slot.log)
    }

    pub fn combined_log(&self) -> &CombinedLog {
        &self.combined
    }

    pub fn selected(&self) -> Option<&Node> {
        self.slots.get(self.selection).map(|slot| &slot.node)
    }

    pub fn selected_index(&self) -> usize {
        self.selection
    }

    pub fn select_next(&mut self) {
        if !self.slots.is_empty() {
            self.selection = (self.selection + 1) % self.slots.len();
        }
    }

    pub fn select_prev(&mut self) {
        if !self.slots.is_empty() {
            self.selection = (self.selection + self.slots.len() - 1) % self.slots.len();
        }
    }

    /// Builds every node, then runs what the successful builds produced.
    pub async fn run_all(&mut self, nodes: Vec<(Node, NodeOptions)>) -> Result<Summary> {
        let stopped = self.build_all(nodes).await?;
        if stopped {
            info!("stopped during build, skipping run phase");
            return Ok(self.summary(true));
        }

        let runs = self.plan_run_phase();
        if runs.is_empty() {
            info!("nothing to run");
            return Ok(self.summary(false));
        }
        self.start_phase(Phase::Run, runs)?;
        let stopped = self.drive(Phase::Run).await;
        Ok(self.summary(stopped))
    }

    /// Configures and starts every build node, then polls until all are done.
    /// Returns whether a stop was requested.
    pub async fn build_all(&mut self, nodes: Vec<(Node, NodeOptions)>) -> Result<bool> {
        self.start_phase(Phase::Build, nodes)?;
        Ok(self.drive(Phase::Build).await)
    }

    /// Run nodes for every build node that succeeded, uniquely named.
    pub fn plan_run_phase(&self) -> Vec<(Node, NodeOptions)> {
        let mut taken: HashSet<String> = self
            .slots
            .iter()
            .map(|slot| slot.node.name().to_string())
            .collect();
        let mut runs = Vec::new();
        for slot in &self.slots {
            if slot.phase != Phase::Build || slot.status() != NodeStatus::Succeeded {
                continue;
            }
            runs.extend(run_targets(&slot.node, &mut taken));
        }
        runs
    }

    /// Terminates every tracked node and returns without waiting.
    pub fn stop(&mut self) {
        for slot in &mut self.slots {
            slot.node.terminate();
        }
    }

    pub fn summary(&self, stopped: bool) -> Summary {
        let mut summary = Summary {
            stopped,
            ..Default::default()
        };
        for slot in &self.slots {
            match slot.phase {
                Phase::Build => summary.build.push(slot.report()),
                Phase::Run => summary.run.push(slot.report()),
            }
        }
        summary
    }

    fn start_phase(&mut self, phase: Phase, nodes: Vec<(Node, NodeOptions)>) -> Result<()> {
        let mut seen: HashSet<&str> = self.slots.iter().map(|s| s.node.name()).collect();
        for (node, _) in &nodes {
            if !seen.insert(node.name()) {
                bail!("duplicate node name: {}", node.name());
            }
        }

        let names: Vec<String> = nodes.iter().map(|(n, _)| n.name().to_string()).collect();
        info!(%phase, nodes = names.len(), "starting phase");
        self.sink.phase(phase, &names);

        for (mut node, options) in nodes {
            let started = node.configure(&options).and_then(|()| node.start());
            let start_error = match started {
                Ok(()) => None,
                Err(err) => {
                    warn!(node = %node.name(), error = %err, "node failed to start");
                    self.sink
                        .output(node.name(), StreamKind::Stderr, &format!("{}\n", err));
                    Some(err.to_string())
                }
            };
            self.slots.push(Slot {
                node,
                phase,
                log: LogBuffer::new(self.settings.max_lines),
                last_status: NodeStatus::Idle,
                start_error,
            });
        }
        Ok(())
    }

    async fn drive(&mut self, phase: Phase) -> bool {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stopping = false;
        loop {
            ticker.tick().await;
            if !stopping && *self.stop_rx.borrow() {
                info!(%phase, "stop requested");
                self.stop();
                stopping = true;
            }
            if !self.poll(phase) {
                continue;
            }
            if stopping || phase == Phase::Build || !self.settings.linger {
                info!(%phase, stopped = stopping, "phase finished");
                return stopping;
            }
            debug!("run nodes finished, waiting for stop");
            self.wait_for_stop().await;
            return true;
        }
    }

    // One tick: drain every node of `phase`. Returns true when all are done.
    fn poll(&mut self, phase: Phase) -> bool {
        let Self {
            slots,
            sink,
            combined,
            ..
        } = self;
        let mut all_done = true;
        for slot in slots.iter_mut().filter(|slot| slot.phase == phase) {
            let done = slot.start_error.is_some() || slot.node.is_done();
            let (stdout, stderr) = slot.node.read_messages();
            for (stream, text) in [(StreamKind::Stdout, stdout), (StreamKind::Stderr, stderr)] {
                if text.is_empty() {
                    continue;
                }
                sink.output(slot.node.name(), stream, &text);
                for line in split_lines(&text) {
                    let line = LogLine {
                        text: line.to_string(),
                        stream,
                    };
                    slot.log.push(line.clone());
                    combined.push(CombinedEntry {
                        node: slot.node.name().to_string(),
                        line,
                    });
                }
            }

            let status = slot.status();
            if status != slot.last_status {
                sink.status(slot.node.name(), &status);
                slot.last_status = status;
            }
            all_done &= done;
        }
        all_done
    }

    async fn wait_for_stop(&self) {
        let mut rx = self.stop_rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Run nodes for one successful build node.
///
/// A local build runs each app listed in its build report, or each product
/// binary when there is no report. A remote build runs every product on the
/// build host and on each deploy host.
fn run_targets(build: &Node, taken: &mut HashSet<String>) -> Vec<(Node, NodeOptions)> {
    let Some(plan) = build.build_plan() else {
        return Vec::new();
    };
    let project_dir = Some(plan.project_dir.clone()).filter(|d| !d.is_empty());
    let mut runs = Vec::new();

    for product in build.get_products() {
        let binary = NodeOptions {
            path: Some(plan.binary_path(&product)),
            run_dir: project_dir.clone(),
            ..Default::default()
        };
        match build.remote_target() {
            None => {
                let report = match load_report(&plan.project_dir, &product) {
                    Ok(report) => report,
                    Err(err) => {
                        let err = format!("{err:#}");
                        warn!(node = %build.name(), error = %err, "ignoring build report");
                        None
                    }
                };
                match report {
                    Some(report) => {
                        for app in &report.apps {
                            let name = unique_name(taken, format!("{}({})", app.kind, build.name()));
                            let options = NodeOptions {
                                path: Some(report.app_command(app)),
                                run_dir: Some(report.root_dir.clone()).filter(|d| !d.is_empty()),
                                ..Default::default()
                            };
                            runs.push((Node::local_run(name), options));
                        }
                    }
                    None => {
                        let name = unique_name(taken, format!("{}({})", product, build.name()));
                        runs.push((Node::local_run(name), binary));
                    }
                }
            }
            Some(target) => {
                let name = unique_name(taken, format!("{}({})", product, target.hostname));
                runs.push((Node::remote_run(name, target.clone()), binary));
                for host in &plan.deploy_to {
                    let deployed = RemoteTarget::new(host.clone())
                        .with_login(target.login.clone())
                        .with_gateway(target.gateway.clone())
                        .with_program(target.program.clone());
                    let name = unique_name(taken, format!("{}({})", product, host));
                    let options = NodeOptions {
                        path: Some(format!("./{}", product)),
                        run_dir: Some(plan.scratch_path.clone()),
                        ..Default::default()
                    };
                    runs.push((Node::remote_run(name, deployed), options));
                }
            }
        }
    }
    runs
}

fn unique_name(taken: &mut HashSet<String>, base: String) -> String {
    let mut name = base.clone();
    let mut n = 2;
    while taken.contains(&name) {
        name = format!("{}#{}", base, n);
        n += 1;
    }
    taken.insert(name.clone());
    name
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;
    use std::time::Instant;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        output: Vec<(String, StreamKind, String)>,
        statuses: Vec<(String, NodeStatus)>,
        phases: Vec<Phase>,
    }

    impl RecordingSink {
        fn text_of(&self, node: &str) -> String {
            self.output
                .iter()
                .filter(|(name, _, _)| name == node)
                .map(|(_, _, text)| text.as_str())
                .collect()
        }
    }

    impl DisplaySink for RecordingSink {
        fn output(&mut self, node: &str, stream: StreamKind, text: &str) {
            self.output.push((node.to_string(), stream, text.to_string()));
        }

        fn status(&mut self, node: &str, status: &NodeStatus) {
            self.statuses.push((node.to_string(), *status));
        }

        fn phase(&mut self, phase: Phase, _nodes: &[String]) {
            self.phases.push(phase);
        }
    }

    fn settings(linger: bool) -> OrchestratorSettings {
        OrchestratorSettings {
            poll_interval: Duration::from_millis(10),
            max_lines: 1000,
            linger,
        }
    }

    fn local_build(name: &str, project_dir: Option<&str>, step: &str) -> (Node, NodeOptions) {
        let options = NodeOptions {
            project_dir: project_dir.map(str::to_string),
            project_src: vec!["app.cpp".into()],
            build_commands: vec![step.to_string()],
            ..Default::default()
        };
        (Node::local_build(name), options)
    }

    fn write_report(dir: &std::path::Path, command: &str) {
        fs::create_dir_all(dir.join("build")).unwrap();
        let report = serde_json::json!({
            "apps": [{"type": "sim", "path": command}],
            "bin_dir": "",
            "root_dir": dir.to_string_lossy(),
        });
        fs::write(dir.join("build").join("app.json"), report.to_string()).unwrap();
    }

    fn fake_ssh(dir: &std::path::Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn build_nodes_run_concurrently() {
        let mut orchestrator = Orchestrator::new(settings(false), RecordingSink::default());
        let nodes = (0..4)
            .map(|i| local_build(&format!("n{}", i), None, "sleep 0.3; true"))
            .collect();

        let started = Instant::now();
        let stopped = orchestrator.build_all(nodes).await.unwrap();
        let elapsed = started.elapsed();

        assert!(!stopped);
        assert!(elapsed < Duration::from_millis(1000), "took {elapsed:?}");
        let summary = orchestrator.summary(false);
        assert_eq!(summary.build.len(), 4);
        assert!(summary
            .build
            .iter()
            .all(|report| report.status == NodeStatus::Succeeded));
    }

    #[tokio::test]
    async fn failed_builds_do_not_block_the_run_phase() {
        let dir = tempfile::tempdir().unwrap();
        write_report(dir.path(), "echo hello from sim");
        let project = dir.path().to_string_lossy().into_owned();

        let mut orchestrator = Orchestrator::new(settings(false), RecordingSink::default());
        let summary = orchestrator
            .run_all(vec![
                local_build("good", Some(&project), "true"),
                local_build("bad", None, "echo broken >&2; exit 1; true"),
            ])
            .await
            .unwrap();

        assert!(!summary.stopped);
        assert_eq!(summary.build[0].status, NodeStatus::Succeeded);
        assert_eq!(
            summary.build[1].status,
            NodeStatus::Failed {
                exit_code: 1,
                kind: FailureKind::Command
            }
        );
        assert_eq!(summary.run.len(), 1);
        assert_eq!(summary.run[0].name, "sim(good)");
        assert_eq!(summary.run[0].status, NodeStatus::Succeeded);
        assert!(!summary.all_succeeded());

        let sink = orchestrator.sink();
        assert_eq!(sink.phases, vec![Phase::Build, Phase::Run]);
        assert!(sink.text_of("sim(good)").contains("hello from sim\n"));
        assert!(sink.text_of("bad").contains("broken"));
        assert!(sink.statuses.contains(&(
            "bad".to_string(),
            NodeStatus::Failed {
                exit_code: 1,
                kind: FailureKind::Command
            }
        )));
        assert!(orchestrator
            .combined_log()
            .iter()
            .any(|entry| entry.node == "sim(good)" && entry.line.text == "hello from sim"));
    }

    #[tokio::test]
    async fn lingering_run_phase_ends_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        write_report(dir.path(), "sleep 30");
        let project = dir.path().to_string_lossy().into_owned();

        let mut orchestrator = Orchestrator::new(settings(true), RecordingSink::default());
        let handle = orchestrator.stop_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            handle.stop();
        });

        let summary = orchestrator
            .run_all(vec![local_build("local", Some(&project), "true")])
            .await
            .unwrap();
        assert!(summary.stopped);
        assert_eq!(summary.run.len(), 1);
        assert!(matches!(
            summary.run[0].status,
            NodeStatus::Failed {
                kind: FailureKind::Terminated,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn stop_during_build_skips_the_run_phase() {
        let mut orchestrator = Orchestrator::new(settings(true), RecordingSink::default());
        let handle = orchestrator.stop_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            handle.stop();
        });

        let summary = orchestrator
            .run_all(vec![local_build("slow", None, "sleep 30; true")])
            .await
            .unwrap();
        assert!(summary.stopped);
        assert!(summary.run.is_empty());
        assert!(matches!(
            summary.build[0].status,
            NodeStatus::Failed {
                kind: FailureKind::Terminated,
                ..
            }
        ));
        assert_eq!(orchestrator.sink().phases, vec![Phase::Build]);
    }

    #[tokio::test]
    async fn nodes_that_cannot_start_are_reported_failed() {
        let mut orchestrator = Orchestrator::new(settings(false), RecordingSink::default());
        let broken = (Node::local_build("empty"), NodeOptions::default());
        let stopped = orchestrator
            .build_all(vec![broken, local_build("ok", None, "true")])
            .await
            .unwrap();
        assert!(!stopped);

        let summary = orchestrator.summary(false);
        assert_eq!(
            summary.build[0].status,
            NodeStatus::Failed {
                exit_code: START_FAILURE_CODE,
                kind: FailureKind::Spawn
            }
        );
        assert!(summary.build[0].error.as_deref().unwrap().contains("project_src"));
        assert_eq!(summary.build[1].status, NodeStatus::Succeeded);
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let mut orchestrator = Orchestrator::new(settings(false), RecordingSink::default());
        let err = orchestrator
            .build_all(vec![
                local_build("same", None, "true"),
                local_build("same", None, "true"),
            ])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("duplicate node name: same"));
    }

    #[tokio::test]
    async fn an_unreachable_build_host_does_not_hold_back_the_others() {
        let dir = tempfile::tempdir().unwrap();
        // Runs the remote script on this machine.
        let reachable = fake_ssh(
            dir.path(),
            "ssh-ok",
            "for last; do :; done\nexec sh -c \"$last\"",
        );
        let unreachable = fake_ssh(
            dir.path(),
            "ssh-down",
            "echo \"ssh: connect to host $3 port 22: Connection timed out\" >&2\nexit 255",
        );
        let options = NodeOptions {
            project_dir: Some(dir.path().to_string_lossy().into_owned()),
            project_src: vec!["app.cpp".into()],
            build_commands: vec!["echo compiled".into()],
            ..Default::default()
        };
        let target = |host: &str, program: &str| RemoteTarget::new(host).with_program(program);
        let nodes = vec![
            (Node::remote_build("gr01", target("gr01", &reachable), Vec::new()), options.clone()),
            (Node::remote_build("gr02", target("gr02", &unreachable), Vec::new()), options),
        ];

        let mut orchestrator = Orchestrator::new(settings(false), RecordingSink::default());
        let stopped = orchestrator.build_all(nodes).await.unwrap();
        assert!(!stopped);

        let summary = orchestrator.summary(false);
        assert_eq!(summary.build[0].status, NodeStatus::Succeeded);
        assert_eq!(
            summary.build[1].status,
            NodeStatus::Failed {
                exit_code: 255,
                kind: FailureKind::Connectivity
            }
        );
        let sink = orchestrator.sink();
        assert!(sink.text_of("gr01").contains("compiled app.cpp\n"));
        assert!(sink.text_of("gr02").contains("connect to host gr02"));

        let runs = orchestrator.plan_run_phase();
        let names: Vec<&str> = runs.iter().map(|(node, _)| node.name()).collect();
        assert_eq!(names, vec!["app(gr01)"]);
        assert_eq!(runs[0].0.remote_target().unwrap().program, reachable);
    }

    #[test]
    fn remote_builds_run_on_the_build_host_and_every_deploy_host() {
        let mut build = Node::remote_build(
            "gr01",
            RemoteTarget::new("gr01").with_login(Some("sphere".into())),
            vec!["gr02".into()],
        );
        build
            .configure(&NodeOptions {
                project_dir: Some("/home/sphere/project".into()),
                project_src: vec!["src/sim.cpp".into()],
                ..Default::default()
            })
            .unwrap();

        let mut taken = HashSet::from(["gr01".to_string()]);
        let runs = run_targets(&build, &mut taken);
        let names: Vec<&str> = runs.iter().map(|(node, _)| node.name()).collect();
        assert_eq!(names, vec!["src_sim(gr01)", "src_sim(gr02)"]);

        let (on_build_host, options) = &runs[0];
        assert!(on_build_host.is_remote());
        assert_eq!(options.path.as_deref(), Some("./build/bin/src_sim"));
        assert_eq!(options.run_dir.as_deref(), Some("/home/sphere/project"));

        let (on_deploy_host, options) = &runs[1];
        let target = on_deploy_host.remote_target().unwrap();
        assert_eq!(target.destination(), "sphere@gr02");
        assert_eq!(options.path.as_deref(), Some("./src_sim"));
        assert_eq!(options.run_dir.as_deref(), Some("/alloshare/scratch"));
    }

    #[test]
    fn unique_names_get_numbered_suffixes() {
        let mut taken = HashSet::new();
        assert_eq!(unique_name(&mut taken, "sim(a)".into()), "sim(a)");
        assert_eq!(unique_name(&mut taken, "sim(a)".into()), "sim(a)#2");
        assert_eq!(unique_name(&mut taken, "sim(a)".into()), "sim(a)#3");
    }

    #[tokio::test]
    async fn selection_wraps_around() {
        let mut orchestrator = Orchestrator::new(settings(false), RecordingSink::default());
        assert!(orchestrator.selected().is_none());
        orchestrator.select_next();
        assert_eq!(orchestrator.selected_index(), 0);

        let nodes = ["a", "b", "c"]
            .iter()
            .map(|name| local_build(name, None, "echo built; true"))
            .collect();
        orchestrator.build_all(nodes).await.unwrap();
        let names: Vec<&str> = orchestrator.nodes().map(Node::name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        assert_eq!(orchestrator.selected().map(Node::name), Some("a"));
        orchestrator.select_prev();
        assert_eq!(orchestrator.selected_index(), 2);
        assert_eq!(orchestrator.selected().map(Node::name), Some("c"));
        orchestrator.select_next();
        orchestrator.select_next();
        assert_eq!(orchestrator.selected().map(Node::name), Some("b"));

        let log = orchestrator.node_log(orchestrator.selected_index()).unwrap();
        assert!(!log.is_empty());
        assert!(log.text(StreamKind::Stdout).contains("built\n"));
        assert!(orchestrator.node_log(3).is_none());
    }
}
