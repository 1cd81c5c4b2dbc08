//! Command lines and how they reach the machine that runs them.
//!
//! A `CommandLine` is either an argv list executed directly or a shell string
//! handed to the platform shell. A `RemoteTarget` turns any command line into
//! an `ssh` invocation that changes into the working directory on the remote
//! host first.

/// Client used to reach remote hosts unless a target names another one.
pub const DEFAULT_SSH_PROGRAM: &str = "ssh";

use std::path::Path;

/// A command to execute, either as an argv list or as a shell string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// Executable plus arguments, no shell involved.
    Exec { program: String, args: Vec<String> },
    /// A string interpreted by `sh -c` (or `cmd /C` on Windows).
    Shell(String),
}

impl CommandLine {
    pub fn exec<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Exec {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn shell(script: impl Into<String>) -> Self {
        Self::Shell(script.into())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Exec { program, .. } => program.trim().is_empty(),
            Self::Shell(script) => script.trim().is_empty(),
        }
    }

    /// Renders the command as text a POSIX shell would execute unchanged.
    pub fn to_shell_string(&self) -> String {
        match self {
            Self::Exec { program, args } => {
                let mut parts = Vec::with_capacity(1 + args.len());
                parts.push(program.as_str());
                parts.extend(args.iter().map(String::as_str));
                shell_words::join(parts)
            }
            Self::Shell(script) => script.clone(),
        }
    }

    pub(crate) fn to_command(&self) -> tokio::process::Command {
        match self {
            Self::Exec { program, args } => {
                let mut command = tokio::process::Command::new(program);
                command.args(args);
                command
            }
            Self::Shell(script) => {
                let mut command = if cfg!(windows) {
                    let mut c = tokio::process::Command::new("cmd");
                    c.arg("/C");
                    c
                } else {
                    let mut c = tokio::process::Command::new("sh");
                    c.arg("-c");
                    c
                };
                command.arg(script);
                command
            }
        }
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_shell_string())
    }
}

/// A host reached over ssh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub hostname: String,
    pub login: Option<String>,
    /// Jump host used to reach `hostname`.
    pub gateway: Option<String>,
    /// Variables exported before the remote command runs.
    pub env: Vec<(String, String)>,
    /// ssh-compatible client that carries the command to the host.
    pub program: String,
}

impl RemoteTarget {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            login: None,
            gateway: None,
            env: Vec::new(),
            program: DEFAULT_SSH_PROGRAM.to_string(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_login(mut self, login: Option<String>) -> Self {
        self.login = login.filter(|l| !l.is_empty());
        self
    }

    pub fn with_gateway(mut self, gateway: Option<String>) -> Self {
        self.gateway = gateway.filter(|g| !g.is_empty());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// `login@host`, or just `host` without a login.
    pub fn destination(&self) -> String {
        destination(self.login.as_deref(), &self.hostname)
    }

    /// Wraps `command` so it runs on this host from `working_dir`.
    pub fn wrap(&self, command: &CommandLine, working_dir: Option<&Path>) -> CommandLine {
        let mut script = String::new();
        for (key, value) in &self.env {
            script.push_str(&format!("export {}={}; ", key, shell_words::quote(value)));
        }
        if let Some(dir) = working_dir.filter(|d| !d.as_os_str().is_empty()) {
            script.push_str(&format!("cd {} && ", quote_remote_dir(&dir.to_string_lossy())));
        }
        script.push_str(&command.to_shell_string());

        let mut args = vec!["-o".to_string(), "StrictHostKeyChecking=no".to_string()];
        if let Some(gateway) = &self.gateway {
            args.push("-J".to_string());
            args.push(gateway.clone());
        }
        args.push(self.destination());
        args.push(script);
        CommandLine::Exec {
            program: self.program.clone(),
            args,
        }
    }
}

// Quotes a remote directory, leaving a leading `~` for the remote shell to expand.
fn quote_remote_dir(dir: &str) -> String {
    if dir == "~" {
        return dir.to_string();
    }
    match dir.strip_prefix("~/") {
        Some("") => "~/".to_string(),
        Some(rest) => format!("~/{}", shell_words::quote(rest)),
        None => shell_words::quote(dir).into_owned(),
    }
}

pub fn destination(login: Option<&str>, hostname: &str) -> String {
    match login.filter(|l| !l.is_empty()) {
        Some(login) => format!("{}@{}", login, hostname),
        None => hostname.to_string(),
    }
}

/// Build tools available where a build node compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Toolchain {
    pub ninja: bool,
    pub msys: bool,
}

impl Toolchain {
    /// Remote hosts are assumed to have plain make; the local host is probed.
    pub fn detect(remote: bool) -> Self {
        if remote {
            return Self::default();
        }
        Self {
            ninja: find_on_path("ninja"),
            msys: cfg!(windows),
        }
    }
}

fn find_on_path(program: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| {
        let candidate = dir.join(program);
        candidate.is_file() || (cfg!(windows) && candidate.with_extension("exe").is_file())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_renders_quoted_shell_string() {
        let cmd = CommandLine::exec("cmake", [".", "-DALLOPROJECT_BUILD_APP_FILE=my app.cpp"]);
        assert_eq!(
            cmd.to_shell_string(),
            "cmake . '-DALLOPROJECT_BUILD_APP_FILE=my app.cpp'"
        );
    }

    #[test]
    fn empty_commands_are_detected() {
        assert!(CommandLine::shell("   ").is_empty());
        assert!(CommandLine::exec("", Vec::<String>::new()).is_empty());
        assert!(!CommandLine::shell("true").is_empty());
    }

    #[test]
    fn remote_wrap_changes_directory_and_exports_env() {
        let target = RemoteTarget::new("gr01")
            .with_login(Some("sphere".into()))
            .with_env("DISPLAY", ":0");
        let wrapped = target.wrap(
            &CommandLine::shell("./build/bin/app"),
            Some(Path::new("/home/sphere/project")),
        );
        let CommandLine::Exec { program, args } = wrapped else {
            panic!("expected exec");
        };
        assert_eq!(program, "ssh");
        assert_eq!(
            args,
            vec![
                "-o",
                "StrictHostKeyChecking=no",
                "sphere@gr01",
                "export DISPLAY=:0; cd /home/sphere/project && ./build/bin/app",
            ]
        );
    }

    #[test]
    fn remote_wrap_keeps_home_relative_directories_expandable() {
        let target = RemoteTarget::new("gr01");
        let script = |dir: &str| {
            let CommandLine::Exec { mut args, .. } =
                target.wrap(&CommandLine::exec("make", ["-j7"]), Some(Path::new(dir)))
            else {
                panic!("expected exec");
            };
            args.pop().unwrap()
        };
        assert_eq!(script("~/AlloProject"), "cd ~/AlloProject && make -j7");
        assert_eq!(script("~/my project"), "cd ~/'my project' && make -j7");
        assert_eq!(script("~"), "cd ~ && make -j7");
        assert_eq!(script("/srv/my project"), "cd '/srv/my project' && make -j7");
        assert_eq!(script("/tmp/~x"), "cd '/tmp/~x' && make -j7");
    }

    #[test]
    fn remote_wrap_runs_through_the_configured_client() {
        let target = RemoteTarget::new("gr03").with_program("/usr/local/bin/fake-ssh");
        let CommandLine::Exec { program, args } = target.wrap(&CommandLine::shell("true"), None)
        else {
            panic!("expected exec");
        };
        assert_eq!(program, "/usr/local/bin/fake-ssh");
        assert_eq!(args.last().map(String::as_str), Some("true"));
        assert_eq!(RemoteTarget::new("gr03").program, DEFAULT_SSH_PROGRAM);
    }

    #[test]
    fn remote_wrap_uses_gateway_as_jump_host() {
        let target = RemoteTarget::new("gr02").with_gateway(Some("gateway.example".into()));
        let CommandLine::Exec { args, .. } = target.wrap(&CommandLine::exec("make", ["-j7"]), None)
        else {
            panic!("expected exec");
        };
        assert_eq!(args[2], "-J");
        assert_eq!(args[3], "gateway.example");
        assert_eq!(args[4], "gr02");
        assert_eq!(args[5], "make -j7");
    }

    #[test]
    fn remote_toolchain_is_plain_make() {
        assert_eq!(Toolchain::detect(true), Toolchain::default());
    }
}
