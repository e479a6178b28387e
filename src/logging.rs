//! Tracing setup.
//!
//! Everything the tool logs, including preview-server output forwarded by the
//! supervisor, ends up in one append-only file so `blog logs` can follow it
//! while the TUI owns the terminal.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{info_span, warn, Span};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives.
pub const FILTER_ENV: &str = "BLOG_LOG";
const DEFAULT_FILTER: &str = "debug";

/// Installs the global subscriber and returns the per-run root span.
///
/// Falls back to stderr when the log file cannot be opened.
pub fn init(path: &Path) -> Span {
    let filter = EnvFilter::try_from_env(FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false);

    match open_log_file(path) {
        Ok(file) => {
            let _ = builder.with_writer(Mutex::new(file)).try_init();
        }
        Err(err) => {
            let _ = builder.with_writer(std::io::stderr).try_init();
            warn!(error = %format!("{:#}", err), "logging to stderr");
        }
    }

    info_span!("blog", run_id = %run_id())
}

/// Opens `path` for appending, creating missing parent directories.
pub fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

fn run_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    format!("{:x}-{:x}", millis, std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn appends_to_existing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state").join("debug.log");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "first\n").unwrap();

        let mut file = open_log_file(&path).unwrap();
        writeln!(file, "second").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a").join("b").join("debug.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn run_ids_are_hex() {
        let id = run_id();
        let (time, pid) = id.split_once('-').unwrap();
        assert!(u64::from_str_radix(time, 16).is_ok());
        assert!(u32::from_str_radix(pid, 16).is_ok());
    }
}
