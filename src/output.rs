//! Output handling and buffering for node logs.
//!
//! This module stores the output each node produced (`LogBuffer`) and the
//! interleaved output of every node in arrival order (`CombinedLog`). It also
//! handles text sanitization for display.

use std::collections::VecDeque;

use strip_ansi_escapes::strip;

/// Indicates the source stream of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Standard Output.
    Stdout,
    /// Standard Error.
    Stderr,
}

/// A single line of output from a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub text: String,
    pub stream: StreamKind,
}

/// A line in the combined log, tagged with the node that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedEntry {
    pub node: String,
    pub line: LogLine,
}

/// A fixed-capacity ring buffer for storing a node's `LogLine`s.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    max_lines: usize,
    lines: VecDeque<LogLine>,
}

impl LogBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
            lines: VecDeque::with_capacity(max_lines.min(1024)),
        }
    }

    /// Adds a line to the buffer.
    ///
    /// Returns `true` if an old line was dropped to make room.
    pub fn push(&mut self, line: LogLine) -> bool {
        self.lines.push_back(line);
        let mut dropped = false;
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
            dropped = true;
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }

    /// Concatenated text of one stream, one line per row.
    pub fn text(&self, stream: StreamKind) -> String {
        let mut out = String::new();
        for line in self.lines.iter().filter(|l| l.stream == stream) {
            out.push_str(&line.text);
            out.push('\n');
        }
        out
    }
}

/// The output of every node, interleaved by arrival.
#[derive(Debug, Clone)]
pub struct CombinedLog {
    max_lines: usize,
    entries: VecDeque<CombinedEntry>,
}

impl CombinedLog {
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
            entries: VecDeque::with_capacity(max_lines.min(1024)),
        }
    }

    pub fn push(&mut self, entry: CombinedEntry) -> bool {
        self.entries.push_back(entry);
        let mut dropped = false;
        while self.entries.len() > self.max_lines {
            self.entries.pop_front();
            dropped = true;
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CombinedEntry> {
        self.entries.iter()
    }
}

/// Splits a drained chunk into lines. A trailing partial line is kept as a line.
pub fn split_lines(chunk: &str) -> impl Iterator<Item = &str> {
    chunk
        .split_inclusive('\n')
        .map(|line| line.trim_end_matches('\n').trim_end_matches('\r'))
}

/// Sanitizes text for display, optionally stripping ANSI escape codes.
pub fn sanitize_text(text: &str, strip_ansi: bool) -> String {
    if !strip_ansi {
        return text.to_string();
    }
    let stripped = strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).to_string()
}
