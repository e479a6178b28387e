//! Session controller.
//!
//! One interactive session runs the preview server in the background for as
//! long as a foreground unit (the TUI, or a plain editor) is active. When the
//! foreground returns the server is canceled and awaited exactly once, and
//! the first error from either side becomes the session's result.

use std::future::Future;

use anyhow::{anyhow, Result};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::process::{ProcessSpec, ProcessStatus};
use crate::supervisor::{self, ProcessError};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ServerStarting,
    ServerRunning,
    Stopping,
    Stopped,
}

/// Read-only view of the background server handed to the foreground unit.
#[derive(Debug, Clone)]
pub struct ServerMonitor {
    name: String,
    status: watch::Receiver<ProcessStatus>,
}

impl ServerMonitor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the new status if it changed since the last call.
    pub fn poll_change(&mut self) -> Option<ProcessStatus> {
        match self.status.has_changed() {
            Ok(true) => Some(self.status.borrow_and_update().clone()),
            _ => None,
        }
    }
}

/// Drives one session around a background server.
pub struct Session {
    server: ProcessSpec,
    state: SessionState,
}

impl Session {
    pub fn new(server: ProcessSpec) -> Self {
        Self {
            server,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    /// Runs `foreground` while the server runs in the background.
    ///
    /// The server is canceled only after `foreground` has returned, and this
    /// call does not return until the server has exited. A foreground error
    /// takes priority; otherwise any server failure other than the expected
    /// cancellation is returned.
    pub async fn run<F, Fut>(&mut self, foreground: F) -> Result<()>
    where
        F: FnOnce(ServerMonitor) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(ProcessStatus::Idle);
        let (done_tx, done_rx) = oneshot::channel::<Result<(), ProcessError>>();

        self.transition(SessionState::ServerStarting);
        let spec = self.server.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            let result = supervisor::run_with_status(&spec, token, Some(&status_tx)).await;
            match &result {
                Ok(()) => debug!(name = %spec.name, "server finished"),
                Err(err) if err.is_canceled() => debug!(name = %spec.name, "server canceled"),
                Err(err) => error!(name = %spec.name, error = %err, "server failed"),
            }
            let _ = done_tx.send(result);
        });
        self.transition(SessionState::ServerRunning);

        let monitor = ServerMonitor {
            name: self.server.name.clone(),
            status: status_rx,
        };
        let foreground_result = foreground(monitor).await;

        self.transition(SessionState::Stopping);
        cancel.cancel();
        let server_result = match done_rx.await {
            Ok(result) => result,
            Err(_) => {
                self.transition(SessionState::Stopped);
                return foreground_result
                    .and(Err(anyhow!("server supervisor stopped without reporting")));
            }
        };
        self.transition(SessionState::Stopped);

        combine(foreground_result, server_result)
    }
}

/// Picks the session result: foreground error first, then server failure.
fn combine(foreground: Result<()>, server: Result<(), ProcessError>) -> Result<()> {
    foreground?;
    match server {
        Ok(()) => Ok(()),
        Err(err) if err.is_canceled() => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::{InputSource, OutputSink, StopReason};
    use std::time::Duration;

    fn server(script: &str) -> ProcessSpec {
        ProcessSpec::new("sh", vec!["-c".into(), script.into()])
            .with_stdin(InputSource::Null)
            .with_output(OutputSink::Discard)
    }

    #[tokio::test]
    async fn crashed_server_surfaces_after_clean_ui_exit() {
        let mut session = Session::new(server("exit 7"));
        let err = session
            .run(|_| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        let process_err = err.downcast_ref::<ProcessError>().unwrap();
        assert!(matches!(process_err, ProcessError::Exited { code: Some(7), .. }));
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn server_failure_surfaces_when_descendants_hold_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let spec = server("sleep 20 & exit 3").with_output(OutputSink::Log(dir.path().join("debug.log")));
        let mut session = Session::new(spec);
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            session.run(|_| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(())
            }),
        )
        .await
        .expect("session stuck while stopping");
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProcessError>(),
            Some(ProcessError::Exited { code: Some(3), .. })
        ));
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn canceled_server_is_not_an_error() {
        let mut session = Session::new(server("sleep 30"));
        session
            .run(|_| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn ui_error_takes_priority() {
        let mut session = Session::new(server("exit 7"));
        let err = session
            .run(|_| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Err(anyhow!("ui broke"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "ui broke");
    }

    #[tokio::test]
    async fn missing_server_binary_reported_after_ui() {
        let spec = ProcessSpec::new("no-such-preview-server-blograck", Vec::new())
            .with_stdin(InputSource::Null);
        let mut session = Session::new(spec);
        let err = session.run(|_| async { Ok(()) }).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProcessError>(),
            Some(ProcessError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn monitor_sees_early_failure() {
        let mut session = Session::new(server("exit 1"));
        session
            .run(|mut monitor| async move {
                let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
                loop {
                    if let Some(ProcessStatus::Stopped(reason)) = monitor.poll_change() {
                        assert_eq!(reason, StopReason::Exited { code: Some(1) });
                        break;
                    }
                    assert!(tokio::time::Instant::now() < deadline, "no status change");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                assert_eq!(monitor.name(), "sh");
                Ok(())
            })
            .await
            .unwrap_err();
    }

    #[tokio::test]
    async fn server_outlives_ui_until_canceled() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("stopped");
        let script = format!(
            "trap 'touch {}; exit 0' INT; while true; do sleep 0.05; done",
            marker.display()
        );
        let mut session = Session::new(server(&script));
        let check = marker.clone();
        session
            .run(|_| async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                assert!(!check.exists());
                Ok(())
            })
            .await
            .unwrap();
        assert!(marker.exists());
    }
}
