//! blograck: a terminal companion for a Hugo blog.
//!
//! This is the entry point of the application. It parses command-line arguments,
//! loads configuration, and runs the selected command. The interactive ones run
//! inside a session that keeps the preview server alive in the background.

mod app;
mod article;
mod clipboard;
mod collection;
mod config;
mod events;
mod frontmatter;
mod git;
mod index;
mod logging;
mod output;
mod process;
mod session;
mod supervisor;
mod tail;
mod tui;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Local};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{Args, Parser, Subcommand};
use crossterm::event::KeyEventKind;
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::app::{App, AppAction, ItemSettings, ToastLevel};
use crate::article::{Meta, DATE_LAYOUT};
use crate::collection::{sorted_tags, Articles, View};
use crate::config::Config;
use crate::events::{Event, InputListener, Signal};
use crate::index::Indexer;
use crate::process::{InputSource, OutputSink, ProcessSpec};
use crate::session::{ServerMonitor, Session};
use crate::supervisor::ProcessError;
use crate::tui::{Theme, TuiTerminal};

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "blog",
    version,
    about = "Write, preview and ship a Hugo blog from the terminal",
    styles = help_styles(),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Path to the config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Browse articles and edit them while the preview server runs.
    Edit(EditArgs),
    /// Create a new article and open it in the editor.
    New(NewArgs),
    /// Print the article index.
    List(ListArgs),
    /// List tags, or edit every article carrying TAG.
    Tag {
        tag: Option<String>,
    },
    /// Stream logs in real time, like tail -f.
    Logs {
        /// Stream only new logs, ignoring existing ones.
        #[arg(short = 'n', long)]
        follow_new: bool,
    },
    /// Commit and push changed articles.
    Ship {
        /// Only ship these slugs.
        slugs: Vec<String>,
    },
    /// Show version information.
    Version,
}

#[derive(Debug, Default, Args)]
struct EditArgs {
    /// Start with drafts shown.
    #[arg(long)]
    drafts: bool,
    /// Only articles carrying TAG.
    #[arg(long)]
    tag: Option<String>,
    /// Only articles without tags.
    #[arg(long, conflicts_with = "tag")]
    no_tags: bool,
}

#[derive(Debug, Args)]
struct NewArgs {
    /// Directory name of the article.
    slug: String,
    #[arg(long)]
    title: String,
    /// Show a table of contents.
    #[arg(long)]
    toc: bool,
}

#[derive(Debug, Args)]
struct ListArgs {
    /// Hide drafts.
    #[arg(long)]
    no_draft: bool,
    #[arg(long)]
    tag: Option<String>,
    #[arg(long, conflicts_with = "tag")]
    no_tags: bool,
    /// Print JSON instead of text.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match &cli.command {
        Some(Commands::Version) => {
            println!("blog {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(Commands::Logs { follow_new }) => {
            return follow_logs(&config::log_path()?, *follow_new).await;
        }
        _ => {}
    }

    let log_path = config::log_path()?;
    let span = logging::init(&log_path);
    async move {
        debug!(
            version = env!("CARGO_PKG_VERSION"),
            args = ?std::env::args().collect::<Vec<_>>(),
            "command started"
        );
        let result = run(cli, &log_path).await;
        match &result {
            Ok(()) => debug!("command finished"),
            Err(err) => {
                error!(error = %format!("{:#}", err), "command failed");
                if let Some(ProcessError::NotFound { program }) = err.downcast_ref::<ProcessError>() {
                    eprintln!("hint: install {} or change the command in the config file", program);
                }
            }
        }
        result
    }
    .instrument(span)
    .await
}

async fn run(cli: Cli, log_path: &Path) -> Result<()> {
    let config = config::load(cli.config.as_deref())?;
    match cli.command.unwrap_or(Commands::Edit(EditArgs::default())) {
        Commands::Edit(args) => {
            let view = View {
                show_drafts: args.drafts,
                tag: args.tag,
                untagged_only: args.no_tags,
            };
            edit(&config, view, log_path).await
        }
        Commands::New(args) => new_article(&config, &args, log_path).await,
        Commands::List(args) => list(&config, &args),
        Commands::Tag { tag } => tag_command(&config, tag.as_deref(), log_path).await,
        Commands::Ship { slugs } => {
            let shipped = git::ship(&config.hugo.root_dir, &config.content_path(), &slugs)?;
            println!("shipped {}", shipped.join(", "));
            Ok(())
        }
        Commands::Version | Commands::Logs { .. } => Ok(()),
    }
}

/// The preview server: stdin detached, output appended to the log file.
fn server_spec(config: &Config, log_path: &Path) -> Result<ProcessSpec> {
    Ok(ProcessSpec::from_command_line(&config.hugo.command)?
        .with_cwd(config.hugo.root_dir.clone())
        .with_stdin(InputSource::Null)
        .with_output(OutputSink::Log(log_path.to_path_buf())))
}

fn indexer(config: &Config) -> Indexer {
    Indexer::new(config.content_path(), config.index.on_error)
}

/// Interactive list session.
async fn edit(config: &Config, view: View, log_path: &Path) -> Result<()> {
    let mut session = Session::new(server_spec(config, log_path)?);
    let result = session
        .run(|monitor| run_ui(config, view, monitor))
        .await;
    debug!(state = ?session.state(), ok = result.is_ok(), "session ended");
    result
}

/// Editor-only session around `paths`.
async fn edit_paths(config: &Config, paths: Vec<PathBuf>, log_path: &Path) -> Result<()> {
    let editor = ProcessSpec::editor(&config.editor, &paths)?;
    let mut session = Session::new(server_spec(config, log_path)?);
    session
        .run(|_| async move {
            // The terminal delivers ^C to the editor; keep it from ending the session early.
            let guard = tokio::spawn(async {
                while tokio::signal::ctrl_c().await.is_ok() {
                    debug!("interrupt ignored while the editor runs");
                }
            });
            let result = supervisor::run(&editor, CancellationToken::new()).await;
            guard.abort();
            result.map_err(Into::into)
        })
        .await
}

async fn run_ui(config: &Config, view: View, mut monitor: ServerMonitor) -> Result<()> {
    let mut app = App::new(
        view,
        ItemSettings {
            base_url: config.blog.url.clone(),
            dev_port: config.blog.dev_port,
            draft_suffix: config.blog.draft_suffix.clone(),
        },
    );
    let theme = Theme::new(&config.blog.draft_color);
    let indexer = indexer(config);

    let mut terminal = tui::init_terminal().context("failed to initialize terminal")?;
    let (tx, mut rx) = mpsc::channel(256);
    let listener = InputListener::spawn(tx.clone());
    spawn_signal_listener(listener.clone(), tx.clone());
    spawn_load(&indexer, app.begin_load(), &tx);

    let result = ui_loop(
        &mut app,
        &theme,
        config,
        &indexer,
        &mut monitor,
        &listener,
        &tx,
        &mut rx,
        &mut terminal,
    )
    .await;
    listener.stop();
    let restored = tui::restore_terminal(terminal).context("failed to restore terminal");
    result.and(restored)
}

#[allow(clippy::too_many_arguments)]
async fn ui_loop(
    app: &mut App,
    theme: &Theme,
    config: &Config,
    indexer: &Indexer,
    monitor: &mut ServerMonitor,
    listener: &InputListener,
    tx: &mpsc::Sender<Event>,
    rx: &mut mpsc::Receiver<Event>,
    terminal: &mut TuiTerminal,
) -> Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_millis(150));
    loop {
        if let Some(status) = monitor.poll_change() {
            app.on_server_status(monitor.name(), status);
        }
        tui::draw(app, theme, terminal)?;
        if app.should_quit {
            return Ok(());
        }

        tokio::select! {
            Some(event) = rx.recv() => match event {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    let action = app.handle_key(key);
                    handle_action(app, action, config, indexer, listener, tx, terminal).await?;
                }
                Event::Key(_) => {}
                Event::Resize => {}
                Event::ArticlesLoaded { seq, result } => {
                    app.on_articles_loaded(seq, result);
                }
                Event::Shutdown => {
                    info!("shutdown requested");
                    app.should_quit = true;
                }
            },
            _ = ticker.tick() => {
                app.clear_expired_toast(Instant::now());
            }
        }
    }
}

async fn handle_action(
    app: &mut App,
    action: AppAction,
    config: &Config,
    indexer: &Indexer,
    listener: &InputListener,
    tx: &mpsc::Sender<Event>,
    terminal: &mut TuiTerminal,
) -> Result<()> {
    match action {
        AppAction::Edit(paths) => {
            let spec = ProcessSpec::editor(&config.editor, &paths)?;
            info!(command = %spec.command_line(), "opening editor");
            listener.pause().await;
            tui::suspend(terminal)?;
            let result = supervisor::run(&spec, CancellationToken::new()).await;
            tui::resume(terminal)?;
            listener.resume();
            match result {
                Ok(()) => {}
                Err(err @ ProcessError::Exited { .. }) => {
                    warn!(error = %err, "editor exited with failure");
                    app.set_toast(ToastLevel::Warn, err.to_string());
                }
                Err(err) => return Err(err).context("failed to open editor"),
            }
            spawn_load(indexer, app.begin_load(), tx);
        }
        AppAction::Reload => spawn_load(indexer, app.begin_load(), tx),
        AppAction::Copy(url) => match clipboard::copy_url(&url) {
            Ok(()) => app.set_toast(ToastLevel::Info, format!("copied {}", url)),
            Err(err) => app.set_toast(ToastLevel::Warn, format!("{:#}", err)),
        },
        AppAction::Quit | AppAction::None => {}
    }
    Ok(())
}

/// Walks the content directory off the event loop and reports back with `seq`.
fn spawn_load(indexer: &Indexer, seq: u64, tx: &mpsc::Sender<Event>) {
    let indexer = indexer.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let result = match tokio::task::spawn_blocking(move || indexer.walk()).await {
            Ok(Ok(articles)) => Ok(articles),
            Ok(Err(err)) => Err(format!("{:#}", err)),
            Err(err) => Err(err.to_string()),
        };
        let _ = tx.send(Event::ArticlesLoaded { seq, result }).await;
    });
}

fn spawn_signal_listener(listener: InputListener, tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut sigterm = match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(signal) => signal,
            Err(_) => return,
        };
        loop {
            #[cfg(unix)]
            let signal = tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => Signal::Interrupt,
                    Err(_) => return,
                },
                _ = sigterm.recv() => Signal::Terminate,
            };
            #[cfg(not(unix))]
            let signal = match tokio::signal::ctrl_c().await {
                Ok(()) => Signal::Interrupt,
                Err(_) => return,
            };
            match listener.signal_event(signal) {
                Some(event) => {
                    let _ = tx.send(event).await;
                    return;
                }
                None => debug!("interrupt ignored while the editor runs"),
            }
        }
    });
}

/// Path of a new article under the content directory.
fn article_path(content: &Path, year: i32, slug: &str) -> PathBuf {
    content.join(year.to_string()).join(slug).join("index.md")
}

fn validate_slug(slug: &str) -> Result<()> {
    let pattern = Regex::new(r"^[a-zA-Z0-9-]+$")?;
    if !pattern.is_match(slug) {
        bail!("invalid chars included for slug: {:?}", slug);
    }
    Ok(())
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        bail!("title is empty");
    }
    if title.chars().any(char::is_control) {
        bail!("invalid chars included for title");
    }
    Ok(())
}

/// Writes the front matter of a new article and returns its path.
fn create_article(content: &Path, args: &NewArgs, now: chrono::DateTime<Local>) -> Result<PathBuf> {
    validate_slug(&args.slug)?;
    validate_title(&args.title)?;
    let path = article_path(content, now.year(), &args.slug);
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let meta = Meta {
        title: args.title.clone(),
        date: now.format(DATE_LAYOUT).to_string(),
        toc: args.toc,
        ..Meta::default()
    };
    frontmatter::write(&path, &meta)?;
    info!(path = %path.display(), "created article");
    Ok(path)
}

async fn new_article(config: &Config, args: &NewArgs, log_path: &Path) -> Result<()> {
    let path = create_article(&config.content_path(), args, Local::now())?;
    edit_paths(config, vec![path], log_path).await
}

fn load_sorted(config: &Config) -> Result<Articles> {
    let mut articles = indexer(config).walk()?;
    articles.sort_by_date();
    Ok(articles)
}

fn list(config: &Config, args: &ListArgs) -> Result<()> {
    let view = View {
        show_drafts: !args.no_draft,
        tag: args.tag.clone(),
        untagged_only: args.no_tags,
    };
    let articles = view.apply(&load_sorted(config)?);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&articles)?);
        return Ok(());
    }
    for line in render_list(&articles, &config.blog.draft_suffix) {
        println!("{}", line);
    }
    Ok(())
}

fn render_list(articles: &Articles, draft_suffix: &str) -> Vec<String> {
    articles
        .iter()
        .map(|article| format!("{}\t{}", article.description(), article.display_title(draft_suffix)))
        .collect()
}

async fn tag_command(config: &Config, tag: Option<&str>, log_path: &Path) -> Result<()> {
    let articles = load_sorted(config)?;
    let Some(tag) = tag else {
        for line in render_tags(&articles) {
            println!("{}", line);
        }
        return Ok(());
    };
    let paths: Vec<PathBuf> = articles
        .filter(collection::filters::has_tag(tag))
        .iter()
        .map(|article| article.path.clone())
        .collect();
    if paths.is_empty() {
        bail!("no articles tagged {:?}", tag);
    }
    edit_paths(config, paths, log_path).await
}

fn render_tags(articles: &Articles) -> Vec<String> {
    let index = articles.tag_index();
    sorted_tags(&index)
        .into_iter()
        .map(|tag| format!("{} ({})", tag, index[tag].len()))
        .collect()
}

async fn follow_logs(path: &Path, follow_new: bool) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(256);
    let cancel = CancellationToken::new();
    let follower = tokio::spawn(tail::follow(
        path.to_path_buf(),
        follow_new,
        tx,
        cancel.clone(),
    ));
    loop {
        tokio::select! {
            line = rx.recv() => match line {
                Some(line) => println!("{}", line),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                break;
            }
        }
    }
    follower.await.context("log follower panicked")?
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .valid(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}
