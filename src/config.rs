//! Configuration management for allorun.
//!
//! This module defines the structure of the `allorun.toml` node list, the
//! `NodeOptions` mapping a node is configured with, and the loader.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};

/// Top-level configuration structure corresponding to `allorun.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Interval between orchestrator poll ticks.
    pub poll_interval_ms: Option<u64>,
    /// Maximum number of lines to keep in memory per node.
    pub max_lines: Option<usize>,
    /// Template for line prefixes (e.g., "[{name}]").
    pub prefix: Option<String>,
    /// Fixed length for prefixes (padding/truncation).
    pub prefix_length: Option<usize>,
    /// Whether to colorize prefixes.
    pub prefix_colors: Option<bool>,
    /// Whether to prepend elapsed time to output lines.
    pub timestamp: Option<bool>,
    /// Whether to strip ANSI escape codes from node output.
    pub strip_ansi: Option<bool>,
    /// Template for per-node log file paths.
    pub log_file: Option<String>,
    /// Keep the run phase alive after every run node has exited.
    pub linger: Option<bool>,
    /// Build nodes, in display order.
    #[serde(rename = "node", default)]
    pub nodes: Vec<NodeConfig>,
}

/// One `[[node]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Display name; defaults to the hostname, or `local`.
    pub name: Option<String>,
    /// Remote host. Nodes with a hostname build over ssh.
    pub hostname: Option<String>,
    pub login: Option<String>,
    pub gateway: Option<String>,
    /// Prefix color for this node's output.
    pub color: Option<String>,
    #[serde(flatten)]
    pub options: NodeOptions,
}

impl NodeConfig {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.hostname.clone())
            .unwrap_or_else(|| "local".to_string())
    }

    pub fn is_remote(&self) -> bool {
        self.hostname
            .as_deref()
            .map(|h| !h.trim().is_empty())
            .unwrap_or(false)
    }
}

/// The mapping a node is configured with. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NodeOptions {
    /// Directory the build runs in (local path, or relative to the remote home).
    pub project_dir: Option<String>,
    /// Source file(s) or a source directory to build.
    #[serde(deserialize_with = "one_or_many")]
    pub project_src: Vec<String>,
    /// Commands run locally before the build, best effort.
    #[serde(deserialize_with = "one_or_many")]
    pub prebuild_commands: Vec<String>,
    /// Build step tokens: `$$cmake`, `$$make`, or a literal command.
    #[serde(deserialize_with = "one_or_many", alias = "build_command")]
    pub build_commands: Vec<String>,
    /// cmake executable.
    pub cmake: Option<String>,
    /// Directory on deploy hosts receiving copied binaries.
    pub scratch_path: Option<String>,
    /// Where binaries land, relative to the project directory.
    pub bin_dir: Option<String>,
    /// Hosts receiving the built binaries.
    #[serde(deserialize_with = "one_or_many")]
    pub deploy_to: Vec<String>,
    /// Build with debug flags and debugger hooks.
    pub debug: Option<bool>,
    /// Parallel job count for make.
    pub jobs: Option<u32>,
    /// Working directory for run nodes.
    pub run_dir: Option<String>,
    /// Command a run node executes.
    pub path: Option<String>,
}

impl NodeOptions {
    /// Returns these options with every value set in `overrides` replacing the original.
    pub fn merged(&self, overrides: &NodeOptions) -> NodeOptions {
        fn pick<T: Clone>(base: &Option<T>, over: &Option<T>) -> Option<T> {
            over.clone().or_else(|| base.clone())
        }
        fn pick_list(base: &[String], over: &[String]) -> Vec<String> {
            if over.is_empty() {
                base.to_vec()
            } else {
                over.to_vec()
            }
        }
        NodeOptions {
            project_dir: pick(&self.project_dir, &overrides.project_dir),
            project_src: pick_list(&self.project_src, &overrides.project_src),
            prebuild_commands: pick_list(&self.prebuild_commands, &overrides.prebuild_commands),
            build_commands: pick_list(&self.build_commands, &overrides.build_commands),
            cmake: pick(&self.cmake, &overrides.cmake),
            scratch_path: pick(&self.scratch_path, &overrides.scratch_path),
            bin_dir: pick(&self.bin_dir, &overrides.bin_dir),
            deploy_to: pick_list(&self.deploy_to, &overrides.deploy_to),
            debug: pick(&self.debug, &overrides.debug),
            jobs: pick(&self.jobs, &overrides.jobs),
            run_dir: pick(&self.run_dir, &overrides.run_dir),
            path: pick(&self.path, &overrides.path),
        }
    }
}

// Accept either `key = "value"` or `key = ["a", "b"]`; a blank string is an empty list.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) if value.trim().is_empty() => Vec::new(),
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_node_list() {
        let raw = r#"
poll_interval_ms = 50
max_lines = 200
prefix = "[{name}]"
prefix_colors = true
log_file = "logs/{name}.log"
linger = false

[[node]]
name = "gr01"
hostname = "gr01"
login = "sphere"
project_dir = "AlloProject"
project_src = "src/graphics.cpp"
prebuild_commands = ""
build_command = "./run.sh "
deploy_to = ["gr02", "gr03"]
scratch_path = "/alloshare/scratch"
some_future_key = 3

[[node]]
project_src = ["a.cpp", "b.cpp"]
build_commands = ["$$cmake", "$$make"]
jobs = 4
debug = true
"#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.poll_interval_ms, Some(50));
        assert_eq!(config.max_lines, Some(200));
        assert_eq!(config.linger, Some(false));
        assert_eq!(config.nodes.len(), 2);

        let remote = &config.nodes[0];
        assert!(remote.is_remote());
        assert_eq!(remote.display_name(), "gr01");
        assert_eq!(remote.login.as_deref(), Some("sphere"));
        assert_eq!(remote.options.project_src, vec!["src/graphics.cpp"]);
        assert!(remote.options.prebuild_commands.is_empty());
        assert_eq!(remote.options.build_commands, vec!["./run.sh "]);
        assert_eq!(remote.options.deploy_to, vec!["gr02", "gr03"]);

        let local = &config.nodes[1];
        assert!(!local.is_remote());
        assert_eq!(local.display_name(), "local");
        assert_eq!(local.options.project_src, vec!["a.cpp", "b.cpp"]);
        assert_eq!(local.options.jobs, Some(4));
        assert_eq!(local.options.debug, Some(true));
    }

    #[test]
    fn merged_prefers_overrides_when_set() {
        let base = NodeOptions {
            project_dir: Some("proj".into()),
            project_src: vec!["old.cpp".into()],
            jobs: Some(2),
            ..Default::default()
        };
        let overrides = NodeOptions {
            project_src: vec!["new.cpp".into()],
            debug: Some(true),
            ..Default::default()
        };
        let merged = base.merged(&overrides);
        assert_eq!(merged.project_dir.as_deref(), Some("proj"));
        assert_eq!(merged.project_src, vec!["new.cpp"]);
        assert_eq!(merged.jobs, Some(2));
        assert_eq!(merged.debug, Some(true));
    }

    #[test]
    fn load_config_reports_the_path_on_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("allorun.toml");
        std::fs::write(&path, "node = 3").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("allorun.toml"));
    }
}
