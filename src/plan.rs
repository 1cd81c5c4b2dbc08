//! What a node runs.
//!
//! A `BuildPlan` expands build-step tokens into concrete command lines and
//! names the products a build yields; a `RunPlan` is a single command. Both are
//! built from `NodeOptions` when a node is configured.

use std::path::{Path, PathBuf};

use crate::command::{destination, CommandLine, Toolchain};
use crate::config::NodeOptions;
use crate::error::NodeError;

pub const CMAKE_TOKEN: &str = "$$cmake";
pub const MAKE_TOKEN: &str = "$$make";

const DEFAULT_CMAKE: &str = "cmake";
const DEFAULT_JOBS: u32 = 7;
const DEFAULT_SCRATCH_PATH: &str = "/alloshare/scratch";
const DEFAULT_BIN_DIR: &str = "build/bin";
const DEBUGGER: &str = "gdb";

/// Everything a build node needs to produce its command sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    pub project_dir: String,
    pub sources: Vec<String>,
    pub prebuild: Vec<String>,
    pub tokens: Vec<String>,
    pub cmake: String,
    pub scratch_path: String,
    pub bin_dir: String,
    pub deploy_to: Vec<String>,
    pub debug: bool,
    pub jobs: u32,
}

impl BuildPlan {
    pub fn from_options(node: &str, options: &NodeOptions) -> Result<Self, NodeError> {
        let sources: Vec<String> = options
            .project_src
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if sources.is_empty() {
            return Err(NodeError::MissingSource {
                node: node.to_string(),
            });
        }
        let tokens = if options.build_commands.is_empty() {
            vec![CMAKE_TOKEN.to_string(), MAKE_TOKEN.to_string()]
        } else {
            options.build_commands.clone()
        };
        Ok(Self {
            project_dir: options.project_dir.clone().unwrap_or_default(),
            sources,
            prebuild: options
                .prebuild_commands
                .iter()
                .filter(|c| !c.trim().is_empty())
                .cloned()
                .collect(),
            tokens,
            cmake: options
                .cmake
                .clone()
                .unwrap_or_else(|| DEFAULT_CMAKE.to_string()),
            scratch_path: options
                .scratch_path
                .clone()
                .unwrap_or_else(|| DEFAULT_SCRATCH_PATH.to_string()),
            bin_dir: options
                .bin_dir
                .clone()
                .unwrap_or_else(|| DEFAULT_BIN_DIR.to_string()),
            deploy_to: options.deploy_to.clone(),
            debug: options.debug.unwrap_or(false),
            jobs: options.jobs.filter(|j| *j > 0).unwrap_or(DEFAULT_JOBS),
        })
    }

    /// Working directory for build steps; `None` means the current directory
    /// (or the login directory on a remote host).
    pub fn working_dir(&self) -> Option<PathBuf> {
        if self.project_dir.is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.project_dir))
        }
    }

    /// Artifact names, one per configured source.
    pub fn products(&self) -> Vec<String> {
        self.sources.iter().map(|src| product_name(src)).collect()
    }

    /// Prebuild commands, run through the local shell.
    pub fn prebuild_commands(&self) -> Vec<CommandLine> {
        self.prebuild.iter().map(CommandLine::shell).collect()
    }

    /// Expands the build tokens into the ordered command sequence.
    pub fn build_commands(&self, toolchain: Toolchain, remote: bool) -> Vec<CommandLine> {
        let mut commands = Vec::new();
        for token in &self.tokens {
            match token.trim() {
                CMAKE_TOKEN => commands.push(self.cmake_command(toolchain, remote)),
                MAKE_TOKEN => commands.push(self.make_command(toolchain)),
                literal => {
                    for src in &self.sources {
                        commands.push(CommandLine::shell(format!(
                            "{} {}",
                            literal,
                            shell_words::quote(src)
                        )));
                    }
                }
            }
        }
        commands
    }

    fn cmake_command(&self, toolchain: Toolchain, remote: bool) -> CommandLine {
        let mut args = vec![".".to_string()];
        if toolchain.msys {
            args.push("-GMSYS Makefiles".to_string());
        } else if toolchain.ninja {
            args.push("-GNinja".to_string());
        }

        let src = self.sources.join(";");
        if self.builds_directory(remote) {
            args.push(format!("-DALLOPROJECT_BUILD_APP_DIR={}", src));
            args.push("-DALLOPROJECT_BUILD_DIR=1".to_string());
        } else {
            args.push(format!("-DALLOPROJECT_BUILD_APP_FILE={}", src));
            args.push("-DALLOPROJECT_BUILD_DIR=0".to_string());
        }

        if self.debug {
            args.push("-DRUN_IN_DEBUGGER=1".to_string());
            args.push(format!("-DALLOSYSTEM_DEBUGGER={}", DEBUGGER));
            args.push("-DCMAKE_BUILD_TYPE=Debug".to_string());
        } else {
            args.push("-DRUN_IN_DEBUGGER=0".to_string());
        }
        CommandLine::exec(self.cmake.clone(), args)
    }

    fn make_command(&self, toolchain: Toolchain) -> CommandLine {
        let targets = self.products();
        if toolchain.ninja && !toolchain.msys {
            CommandLine::exec("ninja", targets)
        } else {
            let mut args = targets;
            args.push(format!("-j{}", self.jobs));
            CommandLine::exec("make", args)
        }
    }

    // A single source naming a directory builds every app inside it.
    fn builds_directory(&self, remote: bool) -> bool {
        let [src] = self.sources.as_slice() else {
            return false;
        };
        if remote {
            src.ends_with('/')
        } else {
            Path::new(&self.project_dir).join(src).is_dir()
        }
    }

    /// Path of a product's binary, relative to the project directory unless
    /// `bin_dir` is absolute.
    pub fn binary_path(&self, product: &str) -> String {
        if self.bin_dir.starts_with('/') || Path::new(&self.bin_dir).is_absolute() {
            return Path::new(&self.bin_dir)
                .join(product)
                .to_string_lossy()
                .into_owned();
        }
        let bin_dir = self.bin_dir.trim_end_matches('/');
        if bin_dir.is_empty() {
            format!("./{}", product)
        } else {
            format!("./{}/{}", bin_dir, product)
        }
    }

    /// One copy command per deploy host, each executed on the build host.
    pub fn deploy_commands(&self, login: Option<&str>) -> Vec<(String, CommandLine)> {
        let products = self.products();
        self.deploy_to
            .iter()
            .filter(|host| !host.trim().is_empty())
            .map(|host| {
                let mut args = vec!["-az".to_string()];
                args.extend(products.iter().map(|p| self.binary_path(p)));
                args.push(format!(
                    "{}:{}/",
                    destination(login, host),
                    self.scratch_path.trim_end_matches('/')
                ));
                (host.clone(), CommandLine::exec("rsync", args))
            })
            .collect()
    }
}

/// What a run node executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub run_dir: String,
    pub path: String,
}

impl RunPlan {
    pub fn from_options(node: &str, options: &NodeOptions) -> Result<Self, NodeError> {
        let path = options
            .path
            .clone()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| NodeError::MissingRunPath {
                node: node.to_string(),
            })?;
        Ok(Self {
            run_dir: options.run_dir.clone().unwrap_or_default(),
            path,
        })
    }

    pub fn working_dir(&self) -> Option<PathBuf> {
        if self.run_dir.is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.run_dir))
        }
    }

    pub fn command(&self) -> CommandLine {
        CommandLine::shell(self.path.clone())
    }
}

/// Derives an artifact name from a source path: the extension is stripped and
/// path separators become underscores (`src/graphics.cpp` -> `src_graphics`).
pub fn product_name(src: &str) -> String {
    let is_sep = |c: char| c == '/' || c == '\\';
    let trimmed = src.trim().trim_end_matches(is_sep);
    let base_start = trimmed.rfind(is_sep).map(|i| i + 1).unwrap_or(0);
    let base = &trimmed[base_start..];
    // Leading dots belong to the name, not to an extension.
    let leading = base.len() - base.trim_start_matches('.').len();
    let stem_len = match base[leading..].rfind('.') {
        Some(dot) => leading + dot,
        None => base.len(),
    };
    trimmed[..base_start + stem_len].replace(is_sep, "_")
}
