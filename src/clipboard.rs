//! Copying article URLs to the system clipboard.

use anyhow::{Context, Result};
use tracing::debug;

/// Places `url` on the clipboard.
///
/// Empty URLs are refused; they come from a missing `blog.url` setting.
pub fn copy_url(url: &str) -> Result<()> {
    if url.is_empty() {
        anyhow::bail!("nothing to copy");
    }
    let mut clipboard = arboard::Clipboard::new().context("failed to access clipboard")?;
    clipboard
        .set_text(url.to_string())
        .with_context(|| format!("failed to copy {}", url))?;
    debug!(url, "copied to clipboard");
    Ok(())
}
