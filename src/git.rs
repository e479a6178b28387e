//! Ship workflow: commit and push changed articles.
//!
//! Shells out to the `git` binary in the site root.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Result};
use tracing::{debug, info};

use crate::article::Article;
use crate::index::{is_article_path, load_article};

#[derive(Debug, Clone)]
pub struct ExecResult {
    pub ok: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

pub fn run_git(args: &[&str], cwd: &Path) -> ExecResult {
    debug!(args = ?args, cwd = %cwd.display(), "running git");
    let output = Command::new("git").args(args).current_dir(cwd).output();
    match output {
        Ok(out) => ExecResult {
            ok: out.status.success(),
            exit_code: out.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
        },
        Err(err) => ExecResult {
            ok: false,
            exit_code: -1,
            stdout: String::new(),
            stderr: err.to_string(),
        },
    }
}

/// Runs git and turns a failure into an error carrying its stderr.
fn git(args: &[&str], cwd: &Path) -> Result<String> {
    let result = run_git(args, cwd);
    if !result.ok {
        bail!(
            "git {} failed ({}): {}",
            args.first().copied().unwrap_or_default(),
            result.exit_code,
            result.stderr.trim()
        );
    }
    Ok(result.stdout)
}

/// Paths named by `git status --porcelain`, relative to the repository.
///
/// Renames report their new path. Deleted entries are dropped.
pub fn parse_porcelain(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .filter(|line| line.len() > 3)
        .filter(|line| !line[..2].contains('D'))
        .map(|line| {
            let path = &line[3..];
            let path = path.rsplit(" -> ").next().unwrap_or(path);
            PathBuf::from(unquote(path))
        })
        .collect()
}

fn unquote(path: &str) -> String {
    let Some(inner) = path.strip_prefix('"').and_then(|p| p.strip_suffix('"')) else {
        return path.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('t') => out.push('\t'),
                Some('n') => out.push('\n'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Top-level directory of the work tree containing `cwd`.
pub fn toplevel(cwd: &Path) -> Result<PathBuf> {
    let out = git(&["rev-parse", "--show-toplevel"], cwd)?;
    let top = PathBuf::from(out.trim());
    Ok(std::fs::canonicalize(&top).unwrap_or(top))
}

/// Changed files under `content` that parse as articles.
pub fn changed_articles(root: &Path, content: &Path) -> Result<Vec<Article>> {
    let top = toplevel(root)?;
    let content = std::fs::canonicalize(content).unwrap_or_else(|_| content.to_path_buf());
    let status = git(&["status", "--porcelain", "--untracked-files=all"], root)?;
    let articles = parse_porcelain(&status)
        .into_iter()
        .map(|rel| top.join(rel))
        .filter(|path| path.starts_with(&content) && is_article_path(path))
        .filter_map(|path| match load_article(&path) {
            Ok(article) => Some(article),
            Err(err) => {
                debug!(path = %path.display(), error = %format!("{:#}", err), "not an article");
                None
            }
        })
        .collect();
    Ok(articles)
}

/// Keeps the articles whose slug is listed, or all of them when `slugs` is empty.
pub fn select(articles: Vec<Article>, slugs: &[String]) -> Vec<Article> {
    if slugs.is_empty() {
        return articles;
    }
    articles
        .into_iter()
        .filter(|article| slugs.iter().any(|slug| *slug == article.slug()))
        .collect()
}

/// Stages, commits and pushes the selected changed articles.
///
/// Returns the slugs that were shipped.
pub fn ship(root: &Path, content: &Path, slugs: &[String]) -> Result<Vec<String>> {
    let articles = select(changed_articles(root, content)?, slugs);
    if articles.is_empty() {
        bail!("no changed articles found");
    }

    let paths: Vec<String> = articles
        .iter()
        .map(|article| article.path.to_string_lossy().into_owned())
        .collect();
    let mut shipped: Vec<String> = articles.iter().map(Article::slug).collect();
    shipped.dedup();

    let mut add = vec!["add", "--"];
    add.extend(paths.iter().map(String::as_str));
    git(&add, root)?;

    let message = format!("Update {}", shipped.join(", "));
    let mut commit = vec!["commit", "-m", message.as_str(), "--"];
    commit.extend(paths.iter().map(String::as_str));
    git(&commit, root)?;

    git(&["push", "origin", "HEAD"], root)?;
    info!(slugs = ?shipped, "shipped articles");
    Ok(shipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn parses_porcelain_entries() {
        let output = " M content/post/a/index.md\n\
?? content/post/b/index.md\n\
R  content/post/old/index.md -> content/post/new/index.md\n\
 D content/post/gone/index.md\n\
?? \"content/post/with space/index.md\"\n";
        let paths = parse_porcelain(output);
        assert_eq!(
            paths,
            vec![
                PathBuf::from("content/post/a/index.md"),
                PathBuf::from("content/post/b/index.md"),
                PathBuf::from("content/post/new/index.md"),
                PathBuf::from("content/post/with space/index.md"),
            ]
        );
    }

    fn git_available() -> bool {
        Command::new("git").arg("--version").output().is_ok()
    }

    fn must(args: &[&str], cwd: &Path) {
        let result = run_git(args, cwd);
        assert!(result.ok, "git {:?}: {}", args, result.stderr);
    }

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn site() -> (TempDir, PathBuf, PathBuf) {
        let dir = TempDir::new().unwrap();
        let remote = dir.path().join("remote.git");
        let root = dir.path().join("site");
        fs::create_dir_all(&remote).unwrap();
        fs::create_dir_all(&root).unwrap();
        must(&["init", "--bare", "-q"], &remote);
        must(&["init", "-q"], &root);
        must(&["config", "user.name", "Blog Test"], &root);
        must(&["config", "user.email", "blog@example.com"], &root);
        must(&["config", "commit.gpgsign", "false"], &root);
        must(&["remote", "add", "origin", remote.to_str().unwrap()], &root);
        write(&root, "config.toml", "title = 'test'\n");
        must(&["add", "."], &root);
        must(&["commit", "-q", "-m", "init"], &root);
        (dir, root, remote)
    }

    #[test]
    fn ships_selected_articles() {
        if !git_available() {
            return;
        }
        let (_dir, root, remote) = site();
        let content = root.join("content/post");
        write(&root, "content/post/hello/index.md", "---\ntitle: Hello\n---\n");
        write(&root, "content/post/later/index.md", "---\ntitle: Later\n---\n");
        write(&root, "content/post/hello/cover.png", "png");
        write(&root, "static/style.css", "body {}");

        let shipped = ship(&root, &content, &["hello".to_string()]).unwrap();
        assert_eq!(shipped, vec!["hello"]);

        let log = run_git(&["log", "-1", "--format=%s"], &remote);
        assert_eq!(log.stdout.trim(), "Update hello");

        let remaining = changed_articles(&root, &content).unwrap();
        let slugs: Vec<_> = remaining.iter().map(Article::slug).collect();
        assert_eq!(slugs, vec!["later"]);
    }

    #[test]
    fn nothing_to_ship_is_an_error() {
        if !git_available() {
            return;
        }
        let (_dir, root, _remote) = site();
        write(&root, "static/style.css", "body {}");
        let err = ship(&root, &root.join("content/post"), &[]).unwrap_err();
        assert!(err.to_string().contains("no changed articles"));
    }

    #[test]
    fn select_keeps_all_without_slugs() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a/index.md", "---\ntitle: A\n---\n");
        let article = load_article(&dir.path().join("a/index.md")).unwrap();
        assert_eq!(select(vec![article.clone()], &[]).len(), 1);
        assert!(select(vec![article], &["b".to_string()]).is_empty());
    }
}
