//! Operations over an indexed set of articles.
//!
//! `Articles` owns its backing vector; filtering always produces a new
//! collection so a list held by the UI is never mutated behind its back.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::article::Article;

/// Ordered collection of articles.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Articles(Vec<Article>);

/// One article listed under a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEntry {
    pub title: String,
    pub path: PathBuf,
}

/// Tag name to the articles carrying it. Keys are case-sensitive.
pub type TagIndex = HashMap<String, Vec<TagEntry>>;

impl From<Vec<Article>> for Articles {
    fn from(articles: Vec<Article>) -> Self {
        Self(articles)
    }
}

impl Articles {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Article> {
        self.0.iter()
    }

    /// Sorts most recent first. Equal timestamps keep their walk order and
    /// articles without a timestamp sink to the end.
    pub fn sort_by_date(&mut self) {
        self.0.sort_by(|a, b| b.published.cmp(&a.published));
    }

    /// Returns the articles matching `predicate`, preserving order.
    pub fn filter<P>(&self, predicate: P) -> Articles
    where
        P: Fn(&Article) -> bool,
    {
        Articles(self.0.iter().filter(|a| predicate(a)).cloned().collect())
    }

    /// Builds the tag index. Each tag lists its articles in collection order.
    pub fn tag_index(&self) -> TagIndex {
        let mut index = TagIndex::new();
        for article in &self.0 {
            for tag in article.tags() {
                index.entry(tag.clone()).or_default().push(TagEntry {
                    title: article.meta.title.clone(),
                    path: article.path.clone(),
                });
            }
        }
        index
    }
}

/// Tag names of `index` in lexical order.
pub fn sorted_tags(index: &TagIndex) -> Vec<&str> {
    let mut tags: Vec<&str> = index.keys().map(String::as_str).collect();
    tags.sort_unstable();
    tags
}

/// Predicates used to narrow the article list.
pub mod filters {
    use crate::article::Article;

    pub fn not_draft(article: &Article) -> bool {
        !article.is_draft()
    }

    pub fn untagged(article: &Article) -> bool {
        article.tags().is_empty()
    }

    /// Matches articles carrying `tag`, ignoring case.
    pub fn has_tag(tag: &str) -> impl Fn(&Article) -> bool + '_ {
        move |article| article.tags().iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Selection applied to an indexed collection before display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct View {
    pub show_drafts: bool,
    pub tag: Option<String>,
    pub untagged_only: bool,
}

impl View {
    /// Applies the view to `articles`, returning a new collection.
    pub fn apply(&self, articles: &Articles) -> Articles {
        let mut out = if self.show_drafts {
            articles.clone()
        } else {
            articles.filter(filters::not_draft)
        };
        if let Some(tag) = &self.tag {
            out = out.filter(filters::has_tag(tag));
        }
        if self.untagged_only {
            out = out.filter(filters::untagged);
        }
        out
    }
}
