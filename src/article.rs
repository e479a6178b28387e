//! Article data model.
//!
//! An `Article` is one content file: its parsed front matter (`Meta`) plus
//! where it lives on disk. Derived values such as the slug and the display
//! strings used by the list view are computed here.

use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Timestamp layout written into new articles.
pub const DATE_LAYOUT: &str = "%Y-%m-%dT%H:%M:%S%:z";

const BULLET: &str = "\u{2022}";

/// Front-matter fields understood by the tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Meta {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub date: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    pub draft: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub author: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub oldlink: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    pub toc: bool,
}

impl Meta {
    /// Parses raw front-matter text. Empty text yields the default metadata.
    pub fn parse(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }
}

/// One content file with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Article {
    #[serde(flatten)]
    pub meta: Meta,
    /// Publication timestamp; `None` when no known layout matched.
    pub published: Option<DateTime<FixedOffset>>,
    pub path: PathBuf,
    pub filename: String,
    pub dirname: String,
}

impl Article {
    /// Builds an article for the file at `path` from its parsed metadata.
    pub fn new(path: &Path, meta: Meta) -> Self {
        let published = parse_date(&meta.date);
        if published.is_none() {
            warn!(
                path = %path.display(),
                input = %meta.date,
                "failed to parse datetime with all formats"
            );
        }
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dirname = path
            .parent()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            meta,
            published,
            path: path.to_path_buf(),
            filename,
            dirname,
        }
    }

    /// Short identifier: the directory name, or the file stem when the
    /// directory is a bare year (`2019/my-post.md`).
    pub fn slug(&self) -> String {
        if is_year(&self.dirname) {
            return Path::new(&self.filename)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        self.dirname.clone()
    }

    /// `2024-06-15 • my-post`
    pub fn description(&self) -> String {
        format!("{} {} {}", self.date_label(), BULLET, self.slug())
    }

    /// Title with `suffix` appended for drafts.
    pub fn display_title(&self, draft_suffix: &str) -> String {
        if self.meta.draft && !draft_suffix.is_empty() {
            return format!("{} {}", self.meta.title, draft_suffix);
        }
        self.meta.title.clone()
    }

    /// Text matched by the in-list search.
    pub fn filter_value(&self) -> String {
        format!("{}{}", self.meta.title, self.slug())
    }

    pub fn date_label(&self) -> String {
        match &self.published {
            Some(date) => date.format("%Y-%m-%d").to_string(),
            None => "0001-01-01".to_string(),
        }
    }

    /// Public URL of the article under `base`.
    pub fn url(&self, base: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), self.permalink())
    }

    /// URL served by the local preview server.
    pub fn dev_url(&self, port: u16) -> String {
        format!("http://localhost:{}/{}", port, self.permalink())
    }

    fn permalink(&self) -> String {
        let day = match &self.published {
            Some(date) => date.format("%Y/%m/%d").to_string(),
            None => "0001/01/01".to_string(),
        };
        format!("post/{}/{}", day, self.slug())
    }

    pub fn is_draft(&self) -> bool {
        self.meta.draft
    }

    pub fn tags(&self) -> &[String] {
        &self.meta.tags
    }
}

fn is_year(name: &str) -> bool {
    name.len() == 4 && name.bytes().all(|b| b.is_ascii_digit())
}

/// Tries each known timestamp layout in order.
///
/// Layouts without an offset are interpreted as UTC.
pub fn parse_date(input: &str) -> Option<DateTime<FixedOffset>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(date) = DateTime::parse_from_str(input, DATE_LAYOUT) {
        return Some(date);
    }
    if let Ok(date) = DateTime::parse_from_rfc3339(input) {
        return Some(date);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc().fixed_offset());
    }
    if let Ok(day) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return day
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc().fixed_offset());
    }
    None
}
