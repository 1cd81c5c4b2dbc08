//! allorun: build a project on a fleet of machines, then run it everywhere.
//!
//! This is the entry point. It parses command-line arguments, loads the node
//! list, and hands the build and run phases to the orchestrator.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::Parser;
use tracing::{debug, info};

use allorun::command::RemoteTarget;
use allorun::config::{self, Config, NodeConfig, NodeOptions};
use allorun::logging;
use allorun::node::Node;
use allorun::orchestrator::{NodeReport, Orchestrator, OrchestratorSettings, StopHandle, Summary};
use allorun::process::{NodeStatus, StepRecord};
use allorun::sink::{PrefixSettings, PrefixedSink};

const DEFAULT_CONFIG: &str = "allorun.toml";

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "allorun",
    version,
    about = "Build a project on every node, then run it everywhere",
    styles = help_styles(),
    color = clap::ColorChoice::Always
)]
struct Cli {
    /// Source files or directories to build (replaces project_src).
    sources: Vec<String>,
    /// Only use local nodes.
    #[arg(long)]
    local: bool,
    /// Log every step that is started.
    #[arg(short, long)]
    verbose: bool,
    /// Build with debug flags and debugger hooks.
    #[arg(long)]
    debug: bool,
    /// Path to allorun.toml configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Ignore any allorun.toml in the current directory.
    #[arg(long)]
    no_config: bool,
    /// Interval between output polls (ms).
    #[arg(long)]
    poll_ms: Option<u64>,
    /// Max log lines kept per node.
    #[arg(long)]
    max_lines: Option<usize>,
    /// Prefix template (e.g. "[{name}]").
    #[arg(long)]
    prefix: Option<String>,
    /// Pad or truncate prefix to length.
    #[arg(long)]
    prefix_length: Option<usize>,
    /// Colorize prefixes.
    #[arg(long)]
    prefix_colors: bool,
    /// Prepend elapsed time to each line.
    #[arg(long)]
    timestamp: bool,
    /// Strip ANSI escape codes from node output.
    #[arg(long)]
    strip_ansi: bool,
    /// Log file template (e.g. "logs/{name}.log").
    #[arg(long)]
    log_file: Option<String>,
    /// Exit once every run node has finished instead of waiting for Ctrl-C.
    #[arg(long)]
    exit_when_done: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose)?;

    let config = load_config_file(&cli)?;
    let node_configs = config.as_ref().map(|c| c.nodes.as_slice()).unwrap_or(&[]);
    let settings = RunSettings::from_cli(&cli, config.as_ref());
    let nodes = select_nodes(&cli, node_configs)?;
    info!(nodes = nodes.len(), "node set selected");

    let mut orchestrator = Orchestrator::new(
        settings.orchestrator.clone(),
        PrefixedSink::new(settings.prefixes.clone()),
    );
    spawn_signal_listener(orchestrator.stop_handle());

    let summary = orchestrator
        .run_all(nodes)
        .await
        .context("orchestration failed")?;
    print_summary(&summary);
    Ok(())
}

fn spawn_signal_listener(stop: StopHandle) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(_) => return,
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => debug!("received SIGINT"),
                _ = sigterm.recv() => debug!("received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
        }
        stop.stop();
    });
}

fn load_config_file(cli: &Cli) -> Result<Option<Config>> {
    if cli.no_config {
        return Ok(None);
    }
    let path = cli
        .config
        .clone()
        .or_else(|| default_config_path().filter(|path| path.exists()));
    match path {
        Some(path) => config::load_config(&path).map(Some),
        None => Ok(None),
    }
}

fn default_config_path() -> Option<PathBuf> {
    let path = Path::new(DEFAULT_CONFIG);
    if path.exists() {
        Some(path.to_path_buf())
    } else {
        None
    }
}

/// Build nodes from the config, with CLI sources and `--debug` applied.
fn select_nodes(cli: &Cli, configs: &[NodeConfig]) -> Result<Vec<(Node, NodeOptions)>> {
    let overrides = NodeOptions {
        project_src: cli.sources.clone(),
        debug: cli.debug.then_some(true),
        ..Default::default()
    };

    let mut nodes = Vec::new();
    for node_config in configs {
        let name = node_config.display_name();
        if cli.local && node_config.is_remote() {
            debug!(node = %name, "skipping remote node");
            continue;
        }
        let options = node_config.options.merged(&overrides);
        let node = match node_config.hostname.as_deref().filter(|h| !h.trim().is_empty()) {
            Some(hostname) => {
                let target = RemoteTarget::new(hostname)
                    .with_login(node_config.login.clone())
                    .with_gateway(node_config.gateway.clone());
                Node::remote_build(name, target, options.deploy_to.clone())
            }
            None => Node::local_build(name),
        };
        nodes.push((node, options));
    }

    if nodes.is_empty() {
        debug!("no configured nodes, building locally");
        nodes.push((Node::local_build("local"), NodeOptions::default().merged(&overrides)));
    }
    Ok(nodes)
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .valid(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}

/// Runtime configuration derived from CLI arguments and the config file.
#[derive(Debug, Clone)]
struct RunSettings {
    orchestrator: OrchestratorSettings,
    prefixes: PrefixSettings,
}

impl RunSettings {
    fn from_cli(cli: &Cli, config: Option<&Config>) -> Self {
        const DEFAULT_POLL_MS: u64 = 100;
        const DEFAULT_MAX_LINES: usize = 10_000;

        let poll_ms = cli
            .poll_ms
            .or(config.and_then(|c| c.poll_interval_ms))
            .unwrap_or(DEFAULT_POLL_MS)
            .max(1);
        let max_lines = cli
            .max_lines
            .or(config.and_then(|c| c.max_lines))
            .unwrap_or(DEFAULT_MAX_LINES);
        let linger = if cli.exit_when_done {
            false
        } else {
            config.and_then(|c| c.linger).unwrap_or(true)
        };
        let flag = |set: bool, configured: Option<bool>| set || configured.unwrap_or(false);

        let colors: HashMap<String, String> = config
            .map(|c| {
                c.nodes
                    .iter()
                    .filter_map(|n| n.color.clone().map(|color| (n.display_name(), color)))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            orchestrator: OrchestratorSettings {
                poll_interval: Duration::from_millis(poll_ms),
                max_lines,
                linger,
            },
            prefixes: PrefixSettings {
                prefix: cli.prefix.clone().or(config.and_then(|c| c.prefix.clone())),
                prefix_length: cli.prefix_length.or(config.and_then(|c| c.prefix_length)),
                prefix_colors: flag(cli.prefix_colors, config.and_then(|c| c.prefix_colors)),
                timestamp: flag(cli.timestamp, config.and_then(|c| c.timestamp)),
                strip_ansi: flag(cli.strip_ansi, config.and_then(|c| c.strip_ansi)),
                log_file: cli.log_file.clone().or(config.and_then(|c| c.log_file.clone())),
                colors,
            },
        }
    }
}

fn print_summary(summary: &Summary) {
    for line in summary_lines(summary) {
        println!("{}", line);
    }
}

fn summary_lines(summary: &Summary) -> Vec<String> {
    let mut lines = Vec::new();
    if summary.stopped {
        lines.push("== stopped ==".to_string());
    }
    let reports: Vec<&NodeReport> = summary.build.iter().chain(&summary.run).collect();
    let width = reports.iter().map(|r| r.name.len()).max().unwrap_or(0);
    for report in &reports {
        match &report.error {
            Some(error) => lines.push(format!(
                "{:<width$}  {} ({}): {}",
                report.name, report.phase, report.status, error
            )),
            None => lines.push(format!(
                "{:<width$}  {}: {}",
                report.name, report.phase, report.status
            )),
        }
        if let Some(step) = failed_step(report) {
            let place = if step.remote { "remote" } else { "local" };
            let elapsed = step
                .elapsed()
                .map(|d| format!(" after {:.1}s", d.as_secs_f64()))
                .unwrap_or_default();
            lines.push(format!("{:<width$}    {} `{}`{}", "", place, step.command, elapsed));
        }
    }
    if !summary.stopped {
        if summary.all_succeeded() {
            lines.push("== all nodes succeeded ==".to_string());
        } else {
            let failed = reports
                .iter()
                .filter(|r| matches!(r.status, NodeStatus::Failed { .. }))
                .count();
            lines.push(format!("== {} of {} nodes failed ==", failed, reports.len()));
        }
    }
    lines
}

// The build or run step that decided a failed node's status.
fn failed_step(report: &NodeReport) -> Option<&StepRecord> {
    if !matches!(report.status, NodeStatus::Failed { .. }) {
        return None;
    }
    report
        .steps
        .iter()
        .find(|step| step.phase.gates_status() && step.exit_code.is_some() && !step.succeeded())
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use allorun::orchestrator::Phase;
    use allorun::process::{classify_exit, FailureKind, StepPhase};

    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("allorun").chain(args.iter().copied())).unwrap()
    }

    fn configs(raw: &str) -> Config {
        toml::from_str(raw).unwrap()
    }

    const FLEET: &str = r#"
prefix_colors = true
linger = false

[[node]]
name = "gr01"
hostname = "gr01"
login = "sphere"
color = "red"
project_src = "src/graphics.cpp"
deploy_to = ["gr02"]

[[node]]
name = "laptop"
project_src = "src/graphics.cpp"
"#;

    #[test]
    fn cli_sources_and_debug_override_every_node() {
        let config = configs(FLEET);
        let nodes = select_nodes(&cli(&["--debug", "src/audio.cpp"]), &config.nodes).unwrap();
        assert_eq!(nodes.len(), 2);
        let (remote, options) = &nodes[0];
        assert!(remote.is_remote());
        assert_eq!(remote.remote_target().unwrap().destination(), "sphere@gr01");
        assert_eq!(options.project_src, vec!["src/audio.cpp"]);
        assert_eq!(options.debug, Some(true));
        assert_eq!(options.deploy_to, vec!["gr02"]);
    }

    #[test]
    fn local_flag_drops_remote_nodes() {
        let config = configs(FLEET);
        let nodes = select_nodes(&cli(&["--local"]), &config.nodes).unwrap();
        let names: Vec<&str> = nodes.iter().map(|(n, _)| n.name()).collect();
        assert_eq!(names, vec!["laptop"]);
    }

    #[test]
    fn falls_back_to_a_single_local_node() {
        let nodes = select_nodes(&cli(&["app.cpp"]), &[]).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].0.name(), "local");
        assert!(!nodes[0].0.is_remote());
        assert_eq!(nodes[0].1.project_src, vec!["app.cpp"]);
    }

    fn report(name: &str, status: NodeStatus, steps: Vec<StepRecord>) -> NodeReport {
        NodeReport {
            name: name.to_string(),
            phase: Phase::Build,
            status,
            steps,
            error: None,
        }
    }

    fn step(command: &str, exit_code: i32, remote: bool) -> StepRecord {
        let started_at = Instant::now();
        StepRecord {
            phase: StepPhase::Build,
            command: command.to_string(),
            remote,
            started_at,
            finished_at: Some(started_at + Duration::from_millis(2500)),
            exit_code: Some(exit_code),
            failure: classify_exit(exit_code, remote, false),
        }
    }

    #[test]
    fn summary_points_at_the_step_that_failed() {
        let summary = Summary {
            build: vec![
                report("gr01", NodeStatus::Succeeded, vec![step("make -j7", 0, true)]),
                report(
                    "laptop",
                    NodeStatus::Failed {
                        exit_code: 2,
                        kind: FailureKind::Command,
                    },
                    vec![step("cmake .", 0, false), step("make -j7", 2, false)],
                ),
            ],
            run: Vec::new(),
            stopped: false,
        };
        assert_eq!(
            summary_lines(&summary),
            vec![
                "gr01    build: succeeded",
                "laptop  build: failed with code 2 (command failed)",
                "          local `make -j7` after 2.5s",
                "== 1 of 2 nodes failed ==",
            ]
        );

        let clean = Summary {
            build: vec![report("gr01", NodeStatus::Succeeded, Vec::new())],
            ..Default::default()
        };
        let lines = summary_lines(&clean);
        assert_eq!(lines.last().map(String::as_str), Some("== all nodes succeeded =="));
    }

    #[test]
    fn settings_merge_cli_over_config() {
        let config = configs(FLEET);
        let settings = RunSettings::from_cli(&cli(&["--poll-ms", "25"]), Some(&config));
        assert_eq!(settings.orchestrator.poll_interval, Duration::from_millis(25));
        assert_eq!(settings.orchestrator.max_lines, 10_000);
        assert!(!settings.orchestrator.linger);
        assert!(settings.prefixes.prefix_colors);
        assert_eq!(settings.prefixes.colors.get("gr01").map(String::as_str), Some("red"));

        let defaults = RunSettings::from_cli(&cli(&[]), None);
        assert!(defaults.orchestrator.linger);
        let eager = RunSettings::from_cli(&cli(&["--exit-when-done"]), Some(&config));
        assert!(!eager.orchestrator.linger);
    }
}
