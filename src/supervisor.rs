//! Process supervision.
//!
//! Runs one external command bound to a cancellation token. The command is
//! resolved on `PATH` before anything is spawned; on cancellation the child
//! receives an interrupt (never a kill) and the supervisor waits for it to
//! exit before returning.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::output::{forward_lines, LogSink, StreamKind};
use crate::process::{InputSource, OutputSink, ProcessSpec, ProcessStatus, StopReason};

/// Failure classes reported by [`run`].
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("command is empty")]
    EmptyCommand,
    #[error("{program}: command not found")]
    NotFound { program: String },
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {}", describe_code(.code))]
    Exited { program: String, code: Option<i32> },
    #[error("{program} canceled")]
    Canceled { program: String },
}

impl ProcessError {
    /// Whether the process stopped because its owner canceled it.
    pub fn is_canceled(&self) -> bool {
        matches!(self, ProcessError::Canceled { .. })
    }
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// A spec whose program has been found on disk; nothing is spawned yet.
#[derive(Debug)]
pub struct Prepared {
    spec: ProcessSpec,
    executable: PathBuf,
}

/// Validates `spec` and resolves its program.
///
/// Empty and unknown commands fail here, before any process is created.
pub fn prepare(spec: &ProcessSpec) -> Result<Prepared, ProcessError> {
    if spec.program.trim().is_empty() {
        return Err(ProcessError::EmptyCommand);
    }
    let executable = find_executable(&spec.program, spec.cwd.as_deref()).ok_or_else(|| {
        ProcessError::NotFound {
            program: spec.program.clone(),
        }
    })?;
    Ok(Prepared {
        spec: spec.clone(),
        executable,
    })
}

/// Runs `spec` until it exits or `cancel` fires.
///
/// Returns `Ok(())` on a zero exit status, [`ProcessError::Canceled`] when the
/// token stopped it, and another variant for every other outcome.
pub async fn run(spec: &ProcessSpec, cancel: CancellationToken) -> Result<(), ProcessError> {
    run_with_status(spec, cancel, None).await
}

/// Like [`run`], publishing lifecycle changes on `status`.
pub async fn run_with_status(
    spec: &ProcessSpec,
    cancel: CancellationToken,
    status: Option<&watch::Sender<ProcessStatus>>,
) -> Result<(), ProcessError> {
    let publish = |value: ProcessStatus| {
        if let Some(tx) = status {
            tx.send_if_modified(|current| {
                if *current == value {
                    return false;
                }
                *current = value;
                true
            });
        }
    };
    publish(ProcessStatus::Starting);
    let result = match prepare(spec) {
        Ok(prepared) => prepared.run(cancel, &publish).await,
        Err(err) => Err(err),
    };
    publish(ProcessStatus::Stopped(stop_reason(&result)));
    result
}

fn stop_reason(result: &Result<(), ProcessError>) -> StopReason {
    match result {
        Ok(()) => StopReason::Exited { code: Some(0) },
        Err(ProcessError::Canceled { .. }) => StopReason::Canceled,
        Err(ProcessError::Exited { code, .. }) => StopReason::Exited { code: *code },
        Err(err) => StopReason::Failed {
            error: err.to_string(),
        },
    }
}

impl Prepared {
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    async fn run(
        self,
        cancel: CancellationToken,
        publish: &impl Fn(ProcessStatus),
    ) -> Result<(), ProcessError> {
        let spec = &self.spec;
        let program = spec.program.clone();

        let (stdout_target, stdout_sink) = open_sink(&spec.stdout, &spec.name).await;
        let (stderr_target, stderr_sink) = open_sink(&spec.stderr, &spec.name).await;

        let mut command = Command::new(&self.executable);
        command.args(&spec.args);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        if !spec.env.is_empty() {
            command.envs(&spec.env);
        }
        command
            .stdin(match spec.stdin {
                InputSource::Inherit => Stdio::inherit(),
                InputSource::Null => Stdio::null(),
            })
            .stdout(stdio_for(&stdout_target))
            .stderr(stdio_for(&stderr_target));
        command.kill_on_drop(true);

        #[cfg(windows)]
        {
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
            command.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        // Background processes get their own group so terminal signals meant
        // for the UI or an editor never reach them.
        #[cfg(unix)]
        if spec.stdin == InputSource::Null {
            unsafe {
                command.pre_exec(|| {
                    let _ = libc::setpgid(0, 0);
                    Ok(())
                });
            }
        }

        info!(
            name = %spec.name,
            command = %spec.command_line(),
            executable = %self.executable().display(),
            "running process"
        );
        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id().unwrap_or(0);
        publish(ProcessStatus::Running { pid });
        debug!(name = %spec.name, pid, "process started");

        let mut forwarders: Vec<JoinHandle<()>> = Vec::new();
        if let (Some(stdout), Some(sink)) = (child.stdout.take(), stdout_sink) {
            forwarders.push(tokio::spawn(forward_lines(
                spec.name.clone(),
                StreamKind::Stdout,
                stdout,
                sink,
            )));
        }
        if let (Some(stderr), Some(sink)) = (child.stderr.take(), stderr_sink) {
            forwarders.push(tokio::spawn(forward_lines(
                spec.name.clone(),
                StreamKind::Stderr,
                stderr,
                sink,
            )));
        }

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = cancel.cancelled() => Outcome::Canceled,
        };

        let result = match outcome {
            Outcome::Exited(Ok(status)) => classify(&program, status),
            Outcome::Exited(Err(source)) => Err(ProcessError::Wait {
                program: program.clone(),
                source,
            }),
            Outcome::Canceled => {
                debug!(name = %spec.name, pid, "cancel received");
                match interrupt(&mut child, pid).await {
                    Ok(_) => Err(ProcessError::Canceled {
                        program: program.clone(),
                    }),
                    Err(source) => Err(ProcessError::Wait {
                        program: program.clone(),
                        source,
                    }),
                }
            }
        };

        publish(ProcessStatus::Stopped(stop_reason(&result)));
        drain(forwarders, &cancel, pid, &spec.name).await;
        match &result {
            Ok(()) => debug!(name = %spec.name, "process finished"),
            Err(err) if err.is_canceled() => debug!(name = %spec.name, "process canceled"),
            Err(err) => warn!(name = %spec.name, error = %err, "process failed"),
        }
        result
    }
}

enum Outcome {
    Exited(io::Result<ExitStatus>),
    Canceled,
}

fn classify(program: &str, status: ExitStatus) -> Result<(), ProcessError> {
    if status.success() {
        return Ok(());
    }
    Err(ProcessError::Exited {
        program: program.to_string(),
        code: status.code(),
    })
}

/// Opens the log file behind `sink`. An unusable file degrades to
/// [`OutputSink::Discard`] instead of keeping the process from starting.
async fn open_sink(sink: &OutputSink, name: &str) -> (OutputSink, Option<LogSink>) {
    match sink {
        OutputSink::Log(path) => match LogSink::open(path).await {
            Ok(log) => (sink.clone(), Some(log)),
            Err(err) => {
                warn!(
                    name,
                    path = %path.display(),
                    error = %format!("{err:#}"),
                    "log file unavailable, discarding output"
                );
                (OutputSink::Discard, None)
            }
        },
        other => (other.clone(), None),
    }
}

/// Waits for the output forwarders to hit EOF.
///
/// Descendants of the child can inherit its pipes and hold them open after
/// it exits. Once `cancel` fires the group is interrupted again, and output
/// still open after [`DRAIN_GRACE`] is dropped.
async fn drain(mut forwarders: Vec<JoinHandle<()>>, cancel: &CancellationToken, pid: u32, name: &str) {
    let finished = tokio::select! {
        biased;
        _ = join_all(&mut forwarders) => true,
        _ = cancel.cancelled() => false,
    };
    if finished {
        return;
    }
    if pid != 0 {
        send_interrupt(pid);
    }
    if tokio::time::timeout(DRAIN_GRACE, join_all(&mut forwarders))
        .await
        .is_err()
    {
        debug!(name, open = forwarders.len(), "output still open after cancel, dropping it");
        for handle in &forwarders {
            handle.abort();
        }
    }
}

/// Awaits each handle, removing it once finished so none is polled twice.
async fn join_all(forwarders: &mut Vec<JoinHandle<()>>) {
    while let Some(handle) = forwarders.last_mut() {
        let _ = handle.await;
        forwarders.pop();
    }
}

fn stdio_for(sink: &OutputSink) -> Stdio {
    match sink {
        OutputSink::Inherit => Stdio::inherit(),
        OutputSink::Discard => Stdio::null(),
        OutputSink::Log(_) => Stdio::piped(),
    }
}

/// Sends an interrupt and waits, without a deadline, for the child to exit.
async fn interrupt(child: &mut Child, pid: u32) -> io::Result<ExitStatus> {
    if pid != 0 {
        send_interrupt(pid);
    }
    child.wait().await
}

#[cfg(unix)]
fn send_interrupt(pid: u32) {
    unsafe {
        let pid = pid as i32;
        let _ = libc::kill(-pid, libc::SIGINT);
        let _ = libc::kill(pid, libc::SIGINT);
    }
}

#[cfg(windows)]
fn send_interrupt(pid: u32) {
    use windows_sys::Win32::System::Console::GenerateConsoleCtrlEvent;
    use windows_sys::Win32::System::Console::CTRL_BREAK_EVENT;
    // Windows has no SIGINT for other processes; CTRL_BREAK is the closest console signal.
    unsafe {
        let _ = GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid);
    }
}

#[cfg(all(not(unix), not(windows)))]
fn send_interrupt(_pid: u32) {}

/// Resolves `program` the way a shell would.
///
/// Names containing a path separator are checked directly (relative to
/// `cwd` when given); bare names are searched on `PATH`.
pub fn find_executable(program: &str, cwd: Option<&Path>) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        let resolved = match cwd {
            Some(dir) if candidate.is_relative() => dir.join(candidate),
            _ => candidate.to_path_buf(),
        };
        return is_executable(&resolved).then_some(resolved);
    }
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        #[cfg(windows)]
        {
            let exts = std::env::var_os("PATHEXT").unwrap_or_else(|| ".EXE;.CMD;.BAT;.COM".into());
            for ext in std::env::split_paths(&exts) {
                let ext = ext.to_string_lossy();
                let candidate = dir.join(format!("{program}{ext}"));
                if is_executable(&candidate) {
                    return Some(candidate);
                }
            }
        }
        #[cfg(not(windows))]
        {
            let candidate = dir.join(program);
            if is_executable(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessSpec {
        ProcessSpec::new("sh", vec!["-c".into(), script.into()])
            .with_stdin(InputSource::Null)
            .with_output(OutputSink::Discard)
    }

    #[tokio::test]
    async fn zero_exit_is_ok() {
        run(&sh("exit 0"), CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported() {
        let err = run(&sh("exit 3"), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProcessError::Exited { code: Some(3), .. }));
        assert!(!err.is_canceled());
    }

    #[tokio::test]
    async fn cancel_is_classified_as_canceled() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let err = run(&sh("sleep 30"), cancel).await.unwrap_err();
        assert!(err.is_canceled(), "unexpected: {err}");
    }

    #[tokio::test]
    async fn cancel_waits_for_graceful_exit() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("cleaned");
        let script = format!(
            "trap 'touch {}; exit 0' INT; while true; do sleep 0.05; done",
            marker.display()
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });
        let err = run(&sh(&script), cancel).await.unwrap_err();
        assert!(err.is_canceled());
        assert!(marker.exists(), "interrupt handler did not run before return");
    }

    #[tokio::test]
    async fn missing_command_fails_before_spawn() {
        let spec = ProcessSpec::new("definitely-not-a-real-binary-blograck", Vec::new());
        let err = prepare(&spec).unwrap_err();
        assert!(matches!(err, ProcessError::NotFound { .. }));
        let err = run(&spec, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProcessError::NotFound { .. }));
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let spec = ProcessSpec::new("", Vec::new());
        let err = run(&spec, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProcessError::EmptyCommand));
    }

    #[tokio::test]
    async fn publishes_lifecycle() {
        let (tx, rx) = watch::channel(ProcessStatus::Idle);
        let _ = run_with_status(&sh("exit 4"), CancellationToken::new(), Some(&tx)).await;
        assert_eq!(
            *rx.borrow(),
            ProcessStatus::Stopped(StopReason::Exited { code: Some(4) })
        );
    }

    #[tokio::test]
    async fn output_goes_to_log_sink() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("debug.log");
        let spec = ProcessSpec::new("sh", vec!["-c".into(), "echo hi; echo oops >&2".into()])
            .with_stdin(InputSource::Null)
            .with_output(OutputSink::Log(log.clone()));
        run(&spec, CancellationToken::new()).await.unwrap();
        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.contains("[sh:out] hi"));
        assert!(contents.contains("[sh:err] oops"));
    }

    #[tokio::test]
    async fn unusable_log_file_discards_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let spec = sh("echo hi").with_output(OutputSink::Log(dir.path().to_path_buf()));
        run(&spec, CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn inherited_pipes_do_not_block_after_exit() {
        let dir = tempfile::TempDir::new().unwrap();
        let spec = sh("sleep 20 & exit 3").with_output(OutputSink::Log(dir.path().join("debug.log")));
        let (tx, mut rx) = watch::channel(ProcessStatus::Idle);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let task = tokio::spawn(async move { run_with_status(&spec, cancel, Some(&tx)).await });

        // The exit is visible while the backgrounded sleep still holds the pipes.
        let stopped = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|status| matches!(status, ProcessStatus::Stopped(_))),
        )
        .await
        .expect("exit was not published")
        .unwrap()
        .clone();
        assert_eq!(
            stopped,
            ProcessStatus::Stopped(StopReason::Exited { code: Some(3) })
        );
        assert!(!task.is_finished());

        trigger.cancel();
        let err = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("supervisor did not return after cancel")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, ProcessError::Exited { code: Some(3), .. }));
    }

    #[test]
    fn resolves_relative_paths_against_cwd() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("serve.sh");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(
            find_executable("./serve.sh", Some(dir.path())),
            Some(dir.path().join("./serve.sh"))
        );
        assert!(find_executable("sh", None).is_some());
    }
}
