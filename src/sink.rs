//! Where node output goes.
//!
//! The orchestrator pushes every chunk of node output and every status change
//! into a `DisplaySink`. `PrefixedSink` is the plain terminal consumer: each
//! line is printed with a per-node prefix, stdout lines to stdout and stderr
//! lines to stderr, and optionally mirrored to a per-node log file.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use tracing::warn;

use crate::orchestrator::Phase;
use crate::output::{sanitize_text, split_lines, StreamKind};
use crate::process::NodeStatus;

/// Consumer of node output and status.
pub trait DisplaySink {
    /// A chunk of output from `node`. May hold several lines.
    fn output(&mut self, node: &str, stream: StreamKind, text: &str);

    /// `node` changed status.
    fn status(&mut self, node: &str, status: &NodeStatus);

    /// A phase is starting with the given nodes.
    fn phase(&mut self, _phase: Phase, _nodes: &[String]) {}
}

/// Formatting options for `PrefixedSink`.
#[derive(Debug, Clone, Default)]
pub struct PrefixSettings {
    /// Prefix template; `{name}`, `{index}` and `{time}` are replaced.
    pub prefix: Option<String>,
    pub prefix_length: Option<usize>,
    pub prefix_colors: bool,
    pub timestamp: bool,
    pub strip_ansi: bool,
    /// Log file template, same tokens as `prefix`.
    pub log_file: Option<String>,
    /// Explicit colour per node name.
    pub colors: HashMap<String, String>,
}

const PALETTE: [&str; 6] = ["cyan", "green", "yellow", "magenta", "blue", "red"];

struct NodeSlot {
    index: usize,
    log: Option<BufWriter<File>>,
}

/// Prints `<prefix> <line>` for every line of node output.
pub struct PrefixedSink {
    settings: PrefixSettings,
    start: Instant,
    nodes: HashMap<String, NodeSlot>,
}

impl PrefixedSink {
    pub fn new(settings: PrefixSettings) -> Self {
        Self {
            settings,
            start: Instant::now(),
            nodes: HashMap::new(),
        }
    }

    fn slot(&mut self, name: &str) -> &mut NodeSlot {
        let index = self.nodes.len();
        let template = self.settings.log_file.as_deref();
        self.nodes
            .entry(name.to_string())
            .or_insert_with(|| NodeSlot {
                index,
                log: template.and_then(|template| open_log(template, name, index)),
            })
    }

    fn format_line(&mut self, name: &str, line: &str) -> String {
        let index = self.slot(name).index;
        let mut prefix = self.format_prefix(name, index);
        if self.settings.prefix_colors {
            let color = self
                .settings
                .colors
                .get(name)
                .map(String::as_str)
                .unwrap_or(PALETTE[index % PALETTE.len()]);
            prefix = apply_color(&prefix, Some(color));
        }
        format!("{}{}", prefix, line)
    }

    fn format_prefix(&self, name: &str, index: usize) -> String {
        let mut prefix = match self.settings.prefix.as_deref() {
            Some(template) => {
                let rendered = render_template(template, name, index, &self.elapsed());
                if self.settings.timestamp && !template.contains("{time}") {
                    format!("{} {}", self.elapsed(), rendered)
                } else {
                    rendered
                }
            }
            None if self.settings.timestamp => format!("{} [{}]", self.elapsed(), name),
            None => format!("[{}]", name),
        };
        prefix = apply_prefix_length(prefix, self.settings.prefix_length);
        if !prefix.is_empty() {
            prefix.push(' ');
        }
        prefix
    }

    fn elapsed(&self) -> String {
        let secs = self.start.elapsed().as_secs();
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }

    fn write_log(&mut self, name: &str, line: &str) {
        if let Some(writer) = self.slot(name).log.as_mut() {
            let _ = writeln!(writer, "{}", line);
        }
    }
}

impl DisplaySink for PrefixedSink {
    fn output(&mut self, node: &str, stream: StreamKind, text: &str) {
        let text = sanitize_text(text, self.settings.strip_ansi);
        for line in split_lines(&text) {
            let formatted = self.format_line(node, line);
            self.write_log(node, line);
            match stream {
                StreamKind::Stdout => println!("{}", formatted),
                StreamKind::Stderr => eprintln!("{}", formatted),
            }
        }
    }

    fn status(&mut self, node: &str, status: &NodeStatus) {
        let line = format!("-- {}", status);
        let formatted = self.format_line(node, &line);
        self.write_log(node, &line);
        if let Some(writer) = self.slot(node).log.as_mut() {
            let _ = writer.flush();
        }
        println!("{}", formatted);
    }

    fn phase(&mut self, phase: Phase, nodes: &[String]) {
        println!("== {} ({} nodes) ==", phase, nodes.len());
    }
}

fn open_log(template: &str, name: &str, index: usize) -> Option<BufWriter<File>> {
    let path = render_template(template, name, index, &log_timestamp());
    if let Some(parent) = Path::new(&path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match File::create(&path) {
        Ok(file) => Some(BufWriter::new(file)),
        Err(err) => {
            warn!(node = name, path = %path, error = %err, "cannot open log file");
            None
        }
    }
}

fn log_timestamp() -> String {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .to_string()
}

fn render_template(template: &str, name: &str, index: usize, time: &str) -> String {
    template
        .replace("{name}", name)
        .replace("{index}", &index.to_string())
        .replace("{time}", time)
}

fn apply_prefix_length(prefix: String, length: Option<usize>) -> String {
    let Some(length) = length else { return prefix };
    let width = prefix.chars().count();
    if width > length {
        prefix.chars().take(length).collect()
    } else {
        format!("{}{}", prefix, " ".repeat(length - width))
    }
}

fn apply_color(prefix: &str, color: Option<&str>) -> String {
    let code = match color.unwrap_or("").to_lowercase().as_str() {
        "black" => "30",
        "red" => "31",
        "green" => "32",
        "yellow" => "33",
        "blue" => "34",
        "magenta" => "35",
        "cyan" => "36",
        "gray" | "grey" => "90",
        _ => return prefix.to_string(),
    };
    format!("\u{1b}[{}m{}\u{1b}[0m", code, prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::FailureKind;

    #[test]
    fn default_prefix_is_the_bracketed_name() {
        let mut sink = PrefixedSink::new(PrefixSettings::default());
        assert_eq!(sink.format_line("gr01", "hello"), "[gr01] hello");
    }

    #[test]
    fn templates_know_the_node_index() {
        let mut sink = PrefixedSink::new(PrefixSettings {
            prefix: Some("{index}:{name}".into()),
            prefix_length: Some(8),
            ..Default::default()
        });
        assert_eq!(sink.format_line("gr01", "a"), "0:gr01   a");
        assert_eq!(sink.format_line("gr02", "b"), "1:gr02   b");
        assert_eq!(sink.format_line("gr01", "c"), "0:gr01   c");
    }

    #[test]
    fn colours_come_from_config_or_palette() {
        let mut colors = HashMap::new();
        colors.insert("gr01".to_string(), "red".to_string());
        let mut sink = PrefixedSink::new(PrefixSettings {
            prefix_colors: true,
            colors,
            ..Default::default()
        });
        assert_eq!(sink.format_line("gr01", "x"), "\u{1b}[31m[gr01] \u{1b}[0mx");
        // Second node gets the second palette entry.
        assert_eq!(sink.format_line("gr02", "y"), "\u{1b}[32m[gr02] \u{1b}[0my");
    }

    #[test]
    fn log_files_receive_unprefixed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("logs").join("{name}.log");
        let mut sink = PrefixedSink::new(PrefixSettings {
            log_file: Some(template.to_string_lossy().into_owned()),
            strip_ansi: true,
            ..Default::default()
        });
        sink.output("gr01", StreamKind::Stdout, "\u{1b}[1mone\u{1b}[0m\ntwo\n");
        sink.status(
            "gr01",
            &NodeStatus::Failed {
                exit_code: 2,
                kind: FailureKind::Command,
            },
        );
        drop(sink);

        let written = std::fs::read_to_string(dir.path().join("logs").join("gr01.log")).unwrap();
        assert_eq!(
            written,
            "one\ntwo\n-- failed with code 2 (command failed)\n"
        );
    }

    #[test]
    fn prefix_length_counts_characters() {
        assert_eq!(apply_prefix_length("[näme]".into(), Some(4)), "[näm");
        assert_eq!(apply_prefix_length("[a]".into(), None), "[a]");
    }
}
