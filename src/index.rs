//! Article index builder.
//!
//! Walks the content root, reads the front matter of every markdown file,
//! and collects the results in walk order. Sorting and filtering live in
//! `collection`.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::article::{Article, Meta};
use crate::collection::Articles;
use crate::frontmatter::read_front_matter;

/// File extensions treated as articles.
pub const EXTENSIONS: [&str; 3] = ["md", "mkd", "markdown"];

/// What to do when a single file cannot be read or parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop the walk and surface the first failure.
    #[default]
    Abort,
    /// Log the failure and continue with the remaining files.
    Skip,
}

/// Scans a content directory for articles.
#[derive(Debug, Clone)]
pub struct Indexer {
    root: PathBuf,
    policy: ErrorPolicy,
}

impl Indexer {
    pub fn new(root: impl Into<PathBuf>, policy: ErrorPolicy) -> Self {
        Self {
            root: root.into(),
            policy,
        }
    }

    /// Walks the root and returns every article in walk order.
    ///
    /// Entries within a directory are visited in file-name order.
    pub fn walk(&self) -> Result<Articles> {
        let walker = WalkBuilder::new(&self.root)
            .standard_filters(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        let mut articles = Vec::new();
        for entry in walker {
            let entry = entry
                .with_context(|| format!("failed to walk {}", self.root.display()))?;
            if entry.depth() == 0 {
                continue;
            }
            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.path();
            if !is_article_path(path) {
                continue;
            }
            match load_article(path) {
                Ok(article) => articles.push(article),
                Err(err) => match self.policy {
                    ErrorPolicy::Abort => return Err(err),
                    ErrorPolicy::Skip => {
                        warn!(path = %path.display(), error = %format!("{err:#}"), "skipping article");
                    }
                },
            }
        }
        debug!(root = %self.root.display(), count = articles.len(), "indexed articles");
        Ok(Articles::from(articles))
    }
}

/// Whether `path` has one of the article extensions.
pub fn is_article_path(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|ext| EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Reads and parses a single article file.
pub fn load_article(path: &Path) -> Result<Article> {
    let raw = read_front_matter(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let meta = Meta::parse(&raw)
        .with_context(|| format!("failed to parse front matter of {}", path.display()))?;
    Ok(Article::new(path, meta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::filters;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn post(title: &str, date: &str, draft: bool) -> String {
        format!("---\ntitle: {title}\ndate: {date}\ndraft: {draft}\n---\n\nbody\n")
    }

    #[test]
    fn walked_articles_sort_and_hide_drafts() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "old/index.md", &post("Old", "2023-01-01", false));
        write(dir.path(), "new/index.md", &post("New", "2025-03-10", false));
        write(dir.path(), "wip/index.md", &post("WIP", "2024-06-15", true));

        let mut articles = Indexer::new(dir.path(), ErrorPolicy::Abort).walk().unwrap();
        articles.sort_by_date();
        let visible = articles.filter(filters::not_draft);
        let dates: Vec<_> = visible.iter().map(|a| a.meta.date.as_str()).collect();
        assert_eq!(dates, vec!["2025-03-10", "2023-01-01"]);
        assert_eq!(articles.len(), 3);
    }

    #[test]
    fn collects_markdown_files_in_walk_order() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "b-post/index.md", &post("B", "2024-01-02", false));
        write(dir.path(), "a-post/index.md", &post("A", "2024-01-01", false));
        write(dir.path(), "2019/legacy.markdown", &post("Legacy", "2019-05-05", false));
        write(dir.path(), "c-post/index.mkd", &post("C", "2024-01-03", false));
        write(dir.path(), "c-post/cover.png", "not markdown");
        write(dir.path(), "notes.txt", "---\ntitle: nope\n---\n");

        let articles = Indexer::new(dir.path(), ErrorPolicy::Abort).walk().unwrap();
        let titles: Vec<_> = articles.iter().map(|a| a.meta.title.as_str()).collect();
        assert_eq!(titles, vec!["Legacy", "A", "B", "C"]);
        assert_eq!(articles.iter().next().unwrap().slug(), "legacy");
    }

    #[test]
    fn parse_error_aborts_walk() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "good/index.md", &post("Good", "2024-01-01", false));
        write(dir.path(), "bad/index.md", "---\ntitle: [broken\n---\n");

        let err = Indexer::new(dir.path(), ErrorPolicy::Abort).walk().unwrap_err();
        assert!(format!("{err:#}").contains("bad"));
    }

    #[test]
    fn skip_policy_keeps_going() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "good/index.md", &post("Good", "2024-01-01", false));
        write(dir.path(), "bad/index.md", "---\ntitle: [broken\n---\n");

        let articles = Indexer::new(dir.path(), ErrorPolicy::Skip).walk().unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles.iter().next().unwrap().meta.title, "Good");
    }

    #[test]
    fn bad_date_is_kept_with_empty_timestamp() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "odd/index.md", &post("Odd", "someday", false));

        let articles = Indexer::new(dir.path(), ErrorPolicy::Abort).walk().unwrap();
        assert_eq!(articles.len(), 1);
        assert!(articles.iter().next().unwrap().published.is_none());
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = Indexer::new(dir.path().join("missing"), ErrorPolicy::Abort).walk();
        assert!(result.is_err());
    }

    #[test]
    fn recognises_extensions() {
        assert!(is_article_path(Path::new("a/index.md")));
        assert!(is_article_path(Path::new("a/index.mkd")));
        assert!(is_article_path(Path::new("a/index.markdown")));
        assert!(!is_article_path(Path::new("a/index.MD.bak")));
        assert!(!is_article_path(Path::new("a/README")));
    }
}
