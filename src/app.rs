//! Application state and UI logic.
//!
//! This module holds the `App` struct behind the article list: the indexed
//! collection, the view and in-list filter applied to it, the selection, the
//! preview server's status and the toast line. It also defines how key
//! events are translated into [`AppAction`]s for the event loop to carry out.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tracing::{debug, warn};

use crate::article::Article;
use crate::collection::{Articles, View};
use crate::process::{ProcessStatus, StopReason};

/// How long a toast stays on screen.
pub const TOAST_TTL: Duration = Duration::from_secs(5);

/// Modes of user input interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// Standard navigation mode.
    Normal,
    /// Typing a filter query.
    Filter,
}

/// Actions resulting from user interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    /// No action required.
    None,
    /// Exit the application.
    Quit,
    /// Open the editor on these files.
    Edit(Vec<PathBuf>),
    /// Re-index the content directory.
    Reload,
    /// Copy text to the clipboard.
    Copy(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Warn,
    Notice,
}

#[derive(Debug, Clone)]
struct Toast {
    text: String,
    level: ToastLevel,
    at: Instant,
}

/// Values from the config that shape how articles are shown.
#[derive(Debug, Clone, Default)]
pub struct ItemSettings {
    pub base_url: String,
    pub dev_port: u16,
    pub draft_suffix: String,
}

/// What the list view needs from a row.
pub trait ListEntry {
    fn title(&self) -> &str;
    fn description(&self) -> &str;
    /// Text matched by the in-list filter.
    fn filter_value(&self) -> &str;
}

/// One row of the list, precomputed from an [`Article`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleItem {
    pub title: String,
    pub description: String,
    pub filter_value: String,
    pub path: PathBuf,
    pub draft: bool,
    pub url: Option<String>,
    pub dev_url: String,
}

impl ArticleItem {
    pub fn new(article: &Article, settings: &ItemSettings) -> Self {
        Self {
            title: article.display_title(&settings.draft_suffix),
            description: article.description(),
            filter_value: article.filter_value(),
            path: article.path.clone(),
            draft: article.is_draft(),
            url: (!settings.base_url.is_empty()).then(|| article.url(&settings.base_url)),
            dev_url: article.dev_url(settings.dev_port),
        }
    }
}

impl ListEntry for ArticleItem {
    fn title(&self) -> &str {
        &self.title
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn filter_value(&self) -> &str {
        &self.filter_value
    }
}

/// The main application state container.
#[derive(Debug)]
pub struct App {
    /// Everything the last applied index returned, newest first.
    articles: Articles,
    /// Rows currently shown.
    items: Vec<ArticleItem>,
    settings: ItemSettings,
    /// Draft/tag selection applied before the in-list filter.
    pub view: View,
    /// Index of the selected row.
    pub selected: usize,
    /// Current input mode.
    pub input_mode: InputMode,
    /// Buffer for filter input.
    pub input: String,
    /// Active filter query.
    pub filter_query: Option<String>,
    /// Whether to show the help overlay.
    pub show_help: bool,
    /// Flag indicating if the application should exit.
    pub should_quit: bool,
    /// A re-index is in flight.
    pub loading: bool,
    load_seq: u64,
    server: Option<(String, ProcessStatus)>,
    toast: Option<Toast>,
}

impl App {
    pub fn new(view: View, settings: ItemSettings) -> Self {
        Self {
            articles: Articles::default(),
            items: Vec::new(),
            settings,
            view,
            selected: 0,
            input_mode: InputMode::Normal,
            input: String::new(),
            filter_query: None,
            show_help: false,
            should_quit: false,
            loading: false,
            load_seq: 0,
            server: None,
            toast: None,
        }
    }

    pub fn items(&self) -> &[ArticleItem] {
        &self.items
    }

    pub fn selected_item(&self) -> Option<&ArticleItem> {
        self.items.get(self.selected)
    }

    pub fn total(&self) -> usize {
        self.articles.len()
    }

    /// Starts a new index request and returns its sequence number.
    pub fn begin_load(&mut self) -> u64 {
        self.load_seq += 1;
        self.loading = true;
        self.load_seq
    }

    /// Applies an index result unless a newer request has been issued since.
    ///
    /// Returns whether the result was applied.
    pub fn on_articles_loaded(&mut self, seq: u64, result: Result<Articles, String>) -> bool {
        if seq != self.load_seq {
            debug!(seq, latest = self.load_seq, "dropping stale index result");
            return false;
        }
        self.loading = false;
        match result {
            Ok(mut articles) => {
                articles.sort_by_date();
                self.articles = articles;
                self.refresh();
            }
            Err(err) => {
                warn!(error = %err, "re-index failed");
                self.set_toast(ToastLevel::Warn, format!("index failed: {}", err));
            }
        }
        true
    }

    /// Records a server status change, raising a toast when it stops on its own.
    pub fn on_server_status(&mut self, name: &str, status: ProcessStatus) {
        match &status {
            ProcessStatus::Stopped(StopReason::Exited { code: Some(0) }) => {
                self.set_toast(ToastLevel::Notice, format!("{} exited", name));
            }
            ProcessStatus::Stopped(StopReason::Canceled) => {}
            ProcessStatus::Stopped(_) => {
                self.set_toast(ToastLevel::Warn, format!("{} {}", name, status));
            }
            _ => {}
        }
        self.server = Some((name.to_string(), status));
    }

    pub fn server_status(&self) -> Option<(&str, &ProcessStatus)> {
        self.server
            .as_ref()
            .map(|(name, status)| (name.as_str(), status))
    }

    /// Recomputes the visible rows, keeping the selection on the same file
    /// when it is still shown.
    pub fn refresh(&mut self) {
        let previous = self.selected_item().map(|item| item.path.clone());
        let query = self.filter_query.as_ref().map(|q| q.to_lowercase());
        self.items = self
            .view
            .apply(&self.articles)
            .iter()
            .map(|article| ArticleItem::new(article, &self.settings))
            .filter(|item| match &query {
                Some(query) => item.filter_value().to_lowercase().contains(query),
                None => true,
            })
            .collect();
        self.selected = previous
            .and_then(|path| self.items.iter().position(|item| item.path == path))
            .unwrap_or_else(|| self.selected.min(self.items.len().saturating_sub(1)));
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> AppAction {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_quit = true;
            return AppAction::Quit;
        }
        match self.input_mode {
            InputMode::Filter => self.handle_filter_input(key),
            InputMode::Normal => self.handle_normal_input(key),
        }
    }

    fn handle_filter_input(&mut self, key: KeyEvent) -> AppAction {
        match key.code {
            KeyCode::Esc => {
                self.input_mode = InputMode::Normal;
                self.input.clear();
                self.filter_query = None;
                self.refresh();
            }
            KeyCode::Enter => {
                self.input.clear();
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Backspace => {
                if self.input.pop().is_some() {
                    self.update_filter();
                }
            }
            KeyCode::Char(c) => {
                if key.modifiers.contains(KeyModifiers::CONTROL) {
                    return AppAction::None;
                }
                self.input.push(c);
                self.update_filter();
            }
            _ => {}
        }
        AppAction::None
    }

    fn update_filter(&mut self) {
        let query = self.input.trim().to_string();
        self.filter_query = if query.is_empty() { None } else { Some(query) };
        self.selected = 0;
        self.refresh();
    }

    fn handle_normal_input(&mut self, key: KeyEvent) -> AppAction {
        if self.show_help {
            self.show_help = false;
            if matches!(key.code, KeyCode::Char('?') | KeyCode::Esc) {
                return AppAction::None;
            }
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
                AppAction::Quit
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
                AppAction::None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.selected + 1 < self.items.len() {
                    self.selected += 1;
                }
                AppAction::None
            }
            KeyCode::Home | KeyCode::Char('g') => {
                self.selected = 0;
                AppAction::None
            }
            KeyCode::End | KeyCode::Char('G') => {
                self.selected = self.items.len().saturating_sub(1);
                AppAction::None
            }
            KeyCode::Enter => match self.selected_item() {
                Some(item) => AppAction::Edit(vec![item.path.clone()]),
                None => AppAction::None,
            },
            KeyCode::Char('d') => {
                self.view.show_drafts = !self.view.show_drafts;
                let state = if self.view.show_drafts { "shown" } else { "hidden" };
                self.set_toast(ToastLevel::Info, format!("drafts {}", state));
                self.refresh();
                AppAction::Reload
            }
            KeyCode::Char('r') => AppAction::Reload,
            KeyCode::Char('/') => {
                self.input_mode = InputMode::Filter;
                self.input = self.filter_query.clone().unwrap_or_default();
                AppAction::None
            }
            KeyCode::Char('y') => match self.selected_item().map(|item| item.url.clone()) {
                Some(Some(url)) => AppAction::Copy(url),
                Some(None) => {
                    self.set_toast(ToastLevel::Warn, "blog.url is not set");
                    AppAction::None
                }
                None => AppAction::None,
            },
            KeyCode::Char('Y') => match self.selected_item() {
                Some(item) => AppAction::Copy(item.dev_url.clone()),
                None => AppAction::None,
            },
            KeyCode::Char('?') => {
                self.show_help = true;
                AppAction::None
            }
            _ => AppAction::None,
        }
    }

    pub fn set_toast(&mut self, level: ToastLevel, text: impl Into<String>) {
        self.toast = Some(Toast {
            text: text.into(),
            level,
            at: Instant::now(),
        });
    }

    /// The toast to show at `now`, if it has not expired.
    pub fn toast_at(&self, now: Instant) -> Option<(&str, ToastLevel)> {
        let toast = self.toast.as_ref()?;
        if now.saturating_duration_since(toast.at) < TOAST_TTL {
            Some((toast.text.as_str(), toast.level))
        } else {
            None
        }
    }

    /// Drops an expired toast. Returns true when something was cleared.
    pub fn clear_expired_toast(&mut self, now: Instant) -> bool {
        if self.toast.is_some() && self.toast_at(now).is_none() {
            self.toast = None;
            return true;
        }
        false
    }
}
