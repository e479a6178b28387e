//! Log following, like `tail -F`.
//!
//! A [`Follower`] remembers its offset in the log file and returns newly
//! completed lines each time it is polled. [`follow`] polls it on a short
//! interval and whenever `notify` reports activity in the log's directory.

use std::fs::{File, Metadata};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Incremental reader over a log file that may be rotated or truncated.
#[derive(Debug)]
pub struct Follower {
    path: PathBuf,
    file: Option<File>,
    identity: Option<(u64, u64)>,
    pos: u64,
    pending: Vec<u8>,
    start_at_end: bool,
}

impl Follower {
    /// `start_at_end` skips whatever the file holds when it is first opened.
    pub fn new(path: impl Into<PathBuf>, start_at_end: bool) -> Self {
        Self {
            path: path.into(),
            file: None,
            identity: None,
            pos: 0,
            pending: Vec::new(),
            start_at_end,
        }
    }

    /// Returns the complete lines written since the last poll.
    pub fn poll(&mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        let metadata = match std::fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                self.start_at_end = false;
                // Moved away: finish what the old handle still has.
                if self.file.is_some() {
                    self.read_available(&mut lines)?;
                    self.close();
                }
                return Ok(lines);
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to stat {}", self.path.display()))
            }
        };

        if self.file.is_some() && identity(&metadata) != self.identity {
            debug!(path = %self.path.display(), "log file replaced, reopening");
            self.read_available(&mut lines)?;
            self.close();
        }

        if self.file.is_none() {
            self.open(&metadata)?;
        } else if metadata.len() < self.pos {
            debug!(path = %self.path.display(), "log file truncated, rewinding");
            self.pos = 0;
            self.pending.clear();
            if let Some(file) = self.file.as_mut() {
                file.seek(SeekFrom::Start(0))?;
            }
        }

        self.read_available(&mut lines)?;
        Ok(lines)
    }

    fn open(&mut self, metadata: &Metadata) -> Result<()> {
        let mut file = File::open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        self.pos = if self.start_at_end {
            file.seek(SeekFrom::End(0))?
        } else {
            0
        };
        // Files that appear later, or replace a rotated one, are read whole.
        self.start_at_end = false;
        self.identity = identity(metadata);
        self.pending.clear();
        self.file = Some(file);
        Ok(())
    }

    fn close(&mut self) {
        self.file = None;
        self.identity = None;
        self.pos = 0;
        self.pending.clear();
    }

    fn read_available(&mut self, lines: &mut Vec<String>) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        let mut chunk = Vec::new();
        let read = file
            .read_to_end(&mut chunk)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        self.pos += read as u64;
        self.pending.extend_from_slice(&chunk);

        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let text = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            lines.push(text.trim_end_matches('\r').to_string());
        }
        Ok(())
    }
}

#[cfg(unix)]
fn identity(metadata: &Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn identity(_metadata: &Metadata) -> Option<(u64, u64)> {
    None
}

/// Sends each new line of `path` to `tx` until `cancel` fires or the
/// receiver goes away.
pub async fn follow(
    path: PathBuf,
    start_at_end: bool,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) -> Result<()> {
    let (wake_tx, mut wake_rx) = mpsc::unbounded_channel::<()>();
    let _watcher = match watch_directory(&path, wake_tx) {
        Ok(watcher) => Some(watcher),
        Err(err) => {
            warn!(error = %format!("{:#}", err), "file notifications unavailable, polling only");
            None
        }
    };

    let mut follower = Follower::new(path, start_at_end);
    loop {
        for line in follower.poll()? {
            if tx.send(line).await.is_err() {
                return Ok(());
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = wake_rx.recv() => {}
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

fn watch_directory(path: &Path, wake: mpsc::UnboundedSender<()>) -> Result<RecommendedWatcher> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut watcher = RecommendedWatcher::new(
        move |_res: notify::Result<notify::Event>| {
            let _ = wake.send(());
        },
        notify::Config::default(),
    )
    .context("failed to create watcher")?;
    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", dir.display()))?;
    Ok(watcher)
}
