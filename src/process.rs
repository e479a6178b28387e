//! Data structures describing a supervised process.
//!
//! This module defines what to run (`ProcessSpec`), where its standard
//! streams go (`InputSource`, `OutputSink`) and the lifecycle status
//! reported while it runs (`ProcessStatus`).

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

/// Where the child's standard input comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    /// Share the parent's terminal.
    Inherit,
    /// Read from an empty stream.
    Null,
}

/// Where one of the child's output streams goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSink {
    /// Share the parent's terminal.
    Inherit,
    /// Drop all output.
    Discard,
    /// Append lines, ANSI-stripped and prefixed, to a log file.
    Log(PathBuf),
}

/// Specification for a process to be run.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Friendly name used in logs.
    pub name: String,
    /// The command executable, resolved through `PATH`.
    pub program: String,
    /// Arguments for the command.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables layered over the parent's.
    pub env: HashMap<String, String>,
    pub stdin: InputSource,
    pub stdout: OutputSink,
    pub stderr: OutputSink,
}

impl ProcessSpec {
    /// Builds a spec from a program and its arguments, attached to the terminal.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let program = program.into();
        Self {
            name: display_name(&program),
            program,
            args,
            cwd: None,
            env: HashMap::new(),
            stdin: InputSource::Inherit,
            stdout: OutputSink::Inherit,
            stderr: OutputSink::Inherit,
        }
    }

    /// Splits a shell-style command line (`hugo server -D`) into a spec.
    ///
    /// An empty program is kept so the supervisor can reject it when run.
    pub fn from_command_line(line: &str) -> Result<Self> {
        let mut parts = shell_words::split(line)
            .with_context(|| format!("failed to parse command line {:?}", line))?;
        if parts.is_empty() {
            return Ok(Self::new(String::new(), Vec::new()));
        }
        let program = parts.remove(0);
        Ok(Self::new(program, parts))
    }

    /// Editor invocation: the configured command followed by `paths`.
    pub fn editor(command: &str, paths: &[PathBuf]) -> Result<Self> {
        let mut spec = Self::from_command_line(command)?;
        if spec.program.is_empty() {
            bail!("editor command is empty");
        }
        spec.args
            .extend(paths.iter().map(|p| p.to_string_lossy().into_owned()));
        Ok(spec)
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_stdin(mut self, stdin: InputSource) -> Self {
        self.stdin = stdin;
        self
    }

    /// Sends both output streams to `sink`.
    pub fn with_output(mut self, sink: OutputSink) -> Self {
        self.stdout = sink.clone();
        self.stderr = sink;
        self
    }

    /// The full command line, for logging.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            return self.program.clone();
        }
        format!("{} {}", self.program, shell_words::join(&self.args))
    }
}

fn display_name(program: &str) -> String {
    std::path::Path::new(program)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}

/// The current lifecycle status of a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Not started yet.
    Idle,
    /// Spawn requested.
    Starting,
    /// Process is actively running.
    Running { pid: u32 },
    /// Process reached its terminal state; handles are never reused after this.
    Stopped(StopReason),
}

/// Why a process stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Canceled by its owner.
    Canceled,
    /// Exited on its own with the given code.
    Exited { code: Option<i32> },
    /// Could not be started or waited on.
    Failed { error: String },
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Idle => write!(f, "idle"),
            ProcessStatus::Starting => write!(f, "starting"),
            ProcessStatus::Running { pid } => write!(f, "running (pid {})", pid),
            ProcessStatus::Stopped(StopReason::Canceled) => write!(f, "stopped"),
            ProcessStatus::Stopped(StopReason::Exited { code: Some(0) }) => {
                write!(f, "exited successfully")
            }
            ProcessStatus::Stopped(StopReason::Exited { code: Some(code) }) => {
                write!(f, "exited with code {}", code)
            }
            ProcessStatus::Stopped(StopReason::Exited { code: None }) => write!(f, "exited"),
            ProcessStatus::Stopped(StopReason::Failed { error }) => write!(f, "failed: {}", error),
        }
    }
}
