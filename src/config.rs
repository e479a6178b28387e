//! Configuration management for blograck.
//!
//! This module defines the structure of the `config.toml` file, resolves
//! where it lives, creates it with defaults on first run, and turns the raw
//! optional fields into a fully resolved [`Config`].

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::index::ErrorPolicy;

const DEFAULT_EDITOR: &str = "vim";
const DEFAULT_HUGO_COMMAND: &str = "hugo server -D";
const DEFAULT_CONTENT_DIR: &str = "content/post";
const DEFAULT_DEV_PORT: u16 = 1313;
const DEFAULT_DRAFT_SUFFIX: &str = "[draft]";
const DEFAULT_DRAFT_COLOR: &str = "yellow";

/// Written to the default config path when nothing exists there yet.
pub const DEFAULT_CONFIG_CONTENTS: &str = r#"editor = "vim"

[hugo]
command = "hugo server -D"
# root_dir = "~/src/blog"
content_dir = "content/post"

[blog]
# url = "https://example.com"
dev_port = 1313
draft_suffix = "[draft]"
draft_color = "yellow"

[index]
on_error = "abort"
"#;

/// Fully resolved configuration passed to every command.
#[derive(Debug, Clone)]
pub struct Config {
    /// Editor command line; article paths are appended when it runs.
    pub editor: String,
    pub hugo: HugoConfig,
    pub blog: BlogConfig,
    pub index: IndexConfig,
}

#[derive(Debug, Clone)]
pub struct HugoConfig {
    /// Preview server command line, split with shell quoting rules.
    pub command: String,
    /// Site root; the server and git run here.
    pub root_dir: PathBuf,
    /// Article directory, relative to `root_dir` unless absolute.
    pub content_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BlogConfig {
    pub url: String,
    pub dev_port: u16,
    pub draft_suffix: String,
    pub draft_color: String,
}

#[derive(Debug, Clone, Default)]
pub struct IndexConfig {
    pub on_error: ErrorPolicy,
}

impl Config {
    /// Directory walked by the indexer.
    pub fn content_path(&self) -> PathBuf {
        self.hugo.root_dir.join(&self.hugo.content_dir)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    editor: Option<String>,
    hugo: RawHugo,
    blog: RawBlog,
    index: RawIndex,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawHugo {
    command: Option<String>,
    root_dir: Option<String>,
    content_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawBlog {
    url: Option<String>,
    dev_port: Option<u16>,
    draft_suffix: Option<String>,
    draft_color: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawIndex {
    on_error: Option<ErrorPolicy>,
}

/// Resolves the config path: explicit flag, `$BLOG_CONFIG_PATH`, then the
/// platform config directory.
pub fn config_path(explicit: Option<&Path>) -> Result<(PathBuf, bool)> {
    if let Some(path) = explicit {
        return Ok((path.to_path_buf(), false));
    }
    if let Some(path) = non_empty_env("BLOG_CONFIG_PATH") {
        return Ok((PathBuf::from(path), true));
    }
    let dir = dirs::config_dir().ok_or_else(|| anyhow!("could not determine config directory"))?;
    Ok((dir.join("blog").join("config.toml"), true))
}

/// Resolves the log file path: `$BLOG_LOG_PATH`, then the platform data
/// directory.
pub fn log_path() -> Result<PathBuf> {
    if let Some(path) = non_empty_env("BLOG_LOG_PATH") {
        return Ok(PathBuf::from(path));
    }
    let dir = dirs::data_dir().ok_or_else(|| anyhow!("could not determine data directory"))?;
    Ok(dir.join("blog").join("debug.log"))
}

/// Loads the config selected by `explicit` (or the default location).
///
/// The default location is created with [`DEFAULT_CONFIG_CONTENTS`] when it
/// does not exist; an explicitly named file must already exist.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    let (path, create) = config_path(explicit)?;
    if create && !path.exists() {
        create_default(&path)?;
    }
    load_config(&path)
}

fn create_default(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    warn!(path = %path.display(), "creating config file as it does not exist");
    std::fs::write(path, DEFAULT_CONFIG_CONTENTS)
        .with_context(|| format!("failed to write config file {}", path.display()))
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = parse_config(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    debug!(path = %path.display(), "config loaded");
    Ok(config)
}

/// Parses config text, expanding paths against the process environment.
pub fn parse_config(raw: &str) -> Result<Config> {
    resolve(toml::from_str(raw)?, &|name| std::env::var(name).ok())
}

fn resolve(raw: RawConfig, lookup: &dyn Fn(&str) -> Option<String>) -> Result<Config> {
    let root_dir = match raw.hugo.root_dir.as_deref().map(str::trim) {
        Some(dir) if !dir.is_empty() => expand_path(dir, lookup).context("invalid hugo.root_dir")?,
        _ => bail!("hugo.root_dir is not set"),
    };
    let content_dir = expand_path(
        raw.hugo.content_dir.as_deref().unwrap_or(DEFAULT_CONTENT_DIR),
        lookup,
    )
    .context("invalid hugo.content_dir")?;

    Ok(Config {
        editor: resolve_editor(raw.editor, lookup),
        hugo: HugoConfig {
            command: raw
                .hugo
                .command
                .unwrap_or_else(|| DEFAULT_HUGO_COMMAND.to_string()),
            root_dir: PathBuf::from(root_dir),
            content_dir: PathBuf::from(content_dir),
        },
        blog: BlogConfig {
            url: raw
                .blog
                .url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_default(),
            dev_port: raw.blog.dev_port.unwrap_or(DEFAULT_DEV_PORT),
            draft_suffix: raw
                .blog
                .draft_suffix
                .unwrap_or_else(|| DEFAULT_DRAFT_SUFFIX.to_string()),
            draft_color: raw
                .blog
                .draft_color
                .unwrap_or_else(|| DEFAULT_DRAFT_COLOR.to_string()),
        },
        index: IndexConfig {
            on_error: raw.index.on_error.unwrap_or_default(),
        },
    })
}

fn resolve_editor(configured: Option<String>, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    configured
        .filter(|value| !value.trim().is_empty())
        .or_else(|| lookup("BLOG_EDITOR").filter(|value| !value.trim().is_empty()))
        .or_else(|| lookup("EDITOR").filter(|value| !value.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_EDITOR.to_string())
}

/// Expands a leading `~` and `$VAR` / `${VAR}` references.
///
/// Unknown variables expand to nothing. An unclosed `${` is an error.
pub fn expand_path(input: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Result<String> {
    let mut text = input.to_string();
    if text == "~" || text.starts_with("~/") {
        let home = lookup("HOME")
            .filter(|home| !home.is_empty())
            .or_else(|| dirs::home_dir().map(|home| home.to_string_lossy().into_owned()))
            .ok_or_else(|| anyhow!("HOME is not set"))?;
        text.replace_range(..1, &home);
    }

    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }
        if chars.peek() == Some(&'{') {
            chars.next();
            let mut name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                name.push(c);
            }
            if !closed {
                bail!("unclosed variable reference in {:?}", input);
            }
            out.push_str(&lookup(&name).unwrap_or_default());
            continue;
        }
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            out.push('$');
        } else {
            out.push_str(&lookup(&name).unwrap_or_default());
        }
    }
    Ok(out)
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn parse_with(raw: &str, env: &[(&str, &str)]) -> Result<Config> {
        resolve(toml::from_str(raw)?, &vars(env))
    }

    #[test]
    fn parses_all_fields() {
        let raw = r#"
editor = "nvim -p"

[hugo]
command = "hugo server --buildDrafts"
root_dir = "~/src/blog"
content_dir = "content/posts"

[blog]
url = "https://example.com/"
dev_port = 8080
draft_suffix = "(wip)"
draft_color = "red"

[index]
on_error = "skip"
"#;
        let config = parse_with(raw, &[("HOME", "/home/me")]).unwrap();
        assert_eq!(config.editor, "nvim -p");
        assert_eq!(config.hugo.command, "hugo server --buildDrafts");
        assert_eq!(config.hugo.root_dir, PathBuf::from("/home/me/src/blog"));
        assert_eq!(
            config.content_path(),
            PathBuf::from("/home/me/src/blog/content/posts")
        );
        assert_eq!(config.blog.url, "https://example.com");
        assert_eq!(config.blog.dev_port, 8080);
        assert_eq!(config.blog.draft_suffix, "(wip)");
        assert_eq!(config.blog.draft_color, "red");
        assert_eq!(config.index.on_error, ErrorPolicy::Skip);
    }

    #[test]
    fn fills_defaults() {
        let config = parse_with("[hugo]\nroot_dir = \"/srv/blog\"\n", &[]).unwrap();
        assert_eq!(config.editor, DEFAULT_EDITOR);
        assert_eq!(config.hugo.command, DEFAULT_HUGO_COMMAND);
        assert_eq!(config.hugo.content_dir, PathBuf::from(DEFAULT_CONTENT_DIR));
        assert_eq!(config.blog.dev_port, DEFAULT_DEV_PORT);
        assert_eq!(config.blog.draft_suffix, DEFAULT_DRAFT_SUFFIX);
        assert_eq!(config.index.on_error, ErrorPolicy::Abort);
    }

    #[test]
    fn missing_root_dir_is_an_error() {
        let err = parse_with("editor = \"vim\"\n", &[]).unwrap_err();
        assert!(err.to_string().contains("hugo.root_dir"));
    }

    #[test]
    fn default_contents_require_root_dir() {
        let err = parse_with(DEFAULT_CONFIG_CONTENTS, &[]).unwrap_err();
        assert!(err.to_string().contains("hugo.root_dir"));
    }

    #[test]
    fn editor_falls_back_through_env() {
        let raw = "[hugo]\nroot_dir = \"/srv/blog\"\n";
        let config = parse_with(raw, &[("BLOG_EDITOR", "hx"), ("EDITOR", "nano")]).unwrap();
        assert_eq!(config.editor, "hx");
        let config = parse_with(raw, &[("EDITOR", "nano")]).unwrap();
        assert_eq!(config.editor, "nano");
    }

    #[test]
    fn expands_variables() {
        let env = vars(&[("HOME", "/home/me"), ("SITE", "blog")]);
        assert_eq!(expand_path("~", &env).unwrap(), "/home/me");
        assert_eq!(expand_path("~/src/$SITE", &env).unwrap(), "/home/me/src/blog");
        assert_eq!(expand_path("/srv/${SITE}-data", &env).unwrap(), "/srv/blog-data");
        assert_eq!(expand_path("/srv/$MISSING/x", &env).unwrap(), "/srv//x");
        assert_eq!(expand_path("cost$", &env).unwrap(), "cost$");
        assert_eq!(expand_path("~user/x", &env).unwrap(), "~user/x");
    }

    #[test]
    fn unclosed_brace_is_an_error() {
        let env = vars(&[]);
        assert!(expand_path("/srv/${SITE", &env).is_err());
        let err = parse_with("[hugo]\nroot_dir = \"/srv/${SITE\"\n", &[]).unwrap_err();
        assert!(format!("{:#}", err).contains("unclosed"));
    }

    #[test]
    fn load_creates_default_file_at_env_path() {
        let _guard = env_lock();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let original = std::env::var("BLOG_CONFIG_PATH").ok();
        std::env::set_var("BLOG_CONFIG_PATH", &path);

        let result = load(None);

        match original {
            Some(value) => std::env::set_var("BLOG_CONFIG_PATH", value),
            None => std::env::remove_var("BLOG_CONFIG_PATH"),
        }
        assert!(result.is_err());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            DEFAULT_CONFIG_CONTENTS
        );
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");
        assert!(load(Some(&path)).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn load_config_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[hugo]\nroot_dir = \"/srv/blog\"\ncontent_dir = \"/abs\"\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.content_path(), PathBuf::from("/abs"));
    }
}
