//! Front-matter extraction.
//!
//! Content files start with a metadata block fenced by two `---` lines. This
//! module reads just that block (never the document body) and renders new
//! blocks for freshly created articles.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

/// Delimiter line that opens and closes a front-matter block.
pub const DELIMITER: &str = "---";

/// Reads the raw front matter of the file at `path`.
///
/// Lines are consumed until the delimiter has been seen twice. The text
/// between the delimiters is returned. A file that ends before the closing
/// delimiter yields whatever was captured so far; only open/read failures
/// are errors.
pub fn read_front_matter(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    extract(BufReader::new(file))
}

/// Same as [`read_front_matter`] over any buffered reader.
pub fn extract<R: BufRead>(reader: R) -> io::Result<String> {
    let mut seen = 0;
    let mut content = String::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line == DELIMITER {
            seen += 1;
            if seen == 2 {
                break;
            }
            continue;
        }
        if seen == 1 {
            content.push_str(line);
            content.push('\n');
        }
    }
    Ok(content)
}

/// Serializes `meta` as a complete front-matter block including delimiters.
pub fn render<T: Serialize>(meta: &T) -> Result<String> {
    let yaml = serde_yaml::to_string(meta).context("failed to encode front matter")?;
    Ok(format!("{DELIMITER}\n{yaml}{DELIMITER}\n"))
}

/// Writes a front-matter-only document to a new file at `path`.
///
/// An existing file is never overwritten.
pub fn write<T: Serialize>(path: &Path, meta: &T) -> Result<()> {
    let block = render(meta)?;
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(block.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
