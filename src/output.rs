//! Output handling for supervised processes.
//!
//! Child output destined for the log file is read line by line, stripped of
//! ANSI escape codes and appended with a prefix naming the process and the
//! stream it came from.

use std::path::Path;

use anyhow::{Context, Result};
use strip_ansi_escapes::strip;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};

/// Indicates the source stream of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    fn label(self) -> &'static str {
        match self {
            StreamKind::Stdout => "out",
            StreamKind::Stderr => "err",
        }
    }
}

/// Removes ANSI escape codes. Invalid UTF-8 sequences are replaced.
pub fn strip_ansi(text: &str) -> String {
    String::from_utf8_lossy(&strip(text.as_bytes())).into_owned()
}

/// Formats one child output line for the log file.
pub fn format_line(name: &str, stream: StreamKind, line: &str) -> String {
    let text = strip_ansi(line);
    let text = text.rsplit('\r').next().unwrap_or("");
    format!("[{}:{}] {}\n", name, stream.label(), text)
}

/// Append-only writer over the log file.
pub struct LogSink {
    file: File,
}

impl LogSink {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        Ok(Self { file })
    }

    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;
        Ok(())
    }
}

/// Copies every line of `reader` into `sink` until the stream closes.
pub async fn forward_lines<R>(name: String, stream: StreamKind, reader: R, mut sink: LogSink)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if sink
            .write_line(&format_line(&name, stream, &line))
            .await
            .is_err()
        {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_ansi_and_prefixes() {
        let line = format_line("hugo", StreamKind::Stderr, "\u{1b}[31mERROR\u{1b}[0m boom");
        assert_eq!(line, "[hugo:err] ERROR boom\n");
    }

    #[test]
    fn keeps_last_carriage_segment() {
        let line = format_line("hugo", StreamKind::Stdout, "building 10%\rbuilding 100%");
        assert_eq!(line, "[hugo:out] building 100%\n");
    }

    #[tokio::test]
    async fn forwards_lines_to_log_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logs").join("debug.log");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "existing\n").unwrap();

        let sink = LogSink::open(&path).await.unwrap();
        let input: &[u8] = b"one\ntwo\n";
        forward_lines("hugo".into(), StreamKind::Stdout, input, sink).await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "existing\n[hugo:out] one\n[hugo:out] two\n");
    }
}
