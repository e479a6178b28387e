//! Terminal User Interface (TUI) rendering and management.
//!
//! This module handles initializing the terminal in raw mode, handing it to
//! an editor and taking it back, restoring it on exit, and drawing the
//! application state using `ratatui`.

use std::io::{self, Stdout};
use std::time::Instant;

use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen, SetTitle,
};
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, BorderType, Borders, Clear, List, ListItem, ListState, Paragraph};
use ratatui::{Frame, Terminal};

use crate::app::{App, InputMode, ListEntry, ToastLevel};
use crate::process::{ProcessStatus, StopReason};

/// Type alias for the specific terminal backend used.
pub type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

const HELP_HINT: &str =
    "↑/↓ select | Enter edit | d drafts | r reload | / filter | y/Y copy url | ? help | q quit";

/// Colors used when drawing, resolved from the config.
#[derive(Debug, Clone, Copy)]
pub struct Theme {
    pub draft: Color,
}

impl Theme {
    /// Accepts color names (`yellow`, `light-red`) and `#rrggbb`.
    pub fn new(draft_color: &str) -> Self {
        Self {
            draft: draft_color.parse().unwrap_or(Color::Yellow),
        }
    }
}

/// Initializes the terminal for TUI mode.
///
/// Enables raw mode, enters the alternate screen, and creates a `ratatui` Terminal instance.
/// Raw mode is switched back off when a later step fails.
pub fn init_terminal() -> io::Result<TuiTerminal> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    let entered = execute!(stdout, EnterAlternateScreen, SetTitle("blog"))
        .and_then(|()| Terminal::new(CrosstermBackend::new(stdout)));
    if entered.is_err() {
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        let _ = disable_raw_mode();
    }
    entered
}

/// Restores the terminal to its original state.
///
/// Disables raw mode, leaves the alternate screen, and shows the cursor.
pub fn restore_terminal(mut terminal: TuiTerminal) -> io::Result<()> {
    suspend(&mut terminal)
}

/// Hands the terminal to a foreground child such as the editor.
pub fn suspend(terminal: &mut TuiTerminal) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Takes the terminal back after [`suspend`] and forces a full redraw.
pub fn resume(terminal: &mut TuiTerminal) -> io::Result<()> {
    enable_raw_mode()?;
    execute!(terminal.backend_mut(), EnterAlternateScreen)?;
    terminal.clear()?;
    Ok(())
}

/// Draws the current application state to the terminal.
pub fn draw<B: Backend>(app: &App, theme: &Theme, terminal: &mut Terminal<B>) -> io::Result<()> {
    terminal.draw(|frame| render(frame, app, theme))?;
    Ok(())
}

fn render(frame: &mut Frame, app: &App, theme: &Theme) {
    let area = frame.size();
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(4)])
        .split(area);
    let border_style = Style::default().fg(Color::DarkGray);

    let list_items: Vec<ListItem> = app
        .items()
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let is_selected = index == app.selected;
            let marker = if is_selected { "▶ " } else { "  " };
            let mut title_style = if item.draft {
                Style::default().fg(theme.draft)
            } else {
                Style::default()
            };
            if is_selected {
                title_style = title_style.add_modifier(Modifier::BOLD);
            }
            ListItem::new(Text::from(vec![
                Line::from(vec![
                    Span::styled(marker, Style::default().fg(Color::Cyan)),
                    Span::styled(item.title().to_string(), title_style),
                ]),
                Line::from(vec![
                    Span::raw("  "),
                    Span::styled(
                        item.description().to_string(),
                        Style::default().fg(Color::DarkGray),
                    ),
                ]),
            ]))
        })
        .collect();

    let list = List::new(list_items).block(
        Block::default()
            .title(list_title(app))
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(border_style),
    );
    let mut state = ListState::default();
    if !app.items().is_empty() {
        state.select(Some(app.selected.min(app.items().len() - 1)));
    }
    frame.render_stateful_widget(list, vertical[0], &mut state);

    if app.items().is_empty() {
        let inner = Block::default().borders(Borders::ALL).inner(vertical[0]);
        let message = if app.loading { "Loading…" } else { "No articles" };
        let empty = Paragraph::new(message).style(Style::default().fg(Color::DarkGray));
        frame.render_widget(empty, inner);
    }

    let bottom_line = if app.input_mode == InputMode::Filter {
        Line::from(format!("Filter: {} (Enter to keep, Esc to clear)", app.input))
    } else if let Some((text, level)) = app.toast_at(Instant::now()) {
        Line::from(Span::styled(text.to_string(), toast_style(level)))
    } else {
        Line::from(Span::styled(HELP_HINT, Style::default().fg(Color::DarkGray)))
    };
    let status = Paragraph::new(Text::from(vec![status_line(app), bottom_line])).block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(border_style),
    );
    frame.render_widget(status, vertical[1]);

    if app.show_help {
        let popup_area = centered_rect(60, 60, area);
        let help_text = [
            "Navigation:",
            "  Up/Down j/k  Select article",
            "  Home/End     First/last article",
            "",
            "Actions:",
            "  Enter        Edit selected article",
            "  d            Toggle drafts",
            "  r            Re-index articles",
            "  /            Filter by title or slug",
            "  y            Copy public URL",
            "  Y            Copy preview URL",
            "",
            "General:",
            "  ?            Toggle this help",
            "  q/Esc        Quit",
        ]
        .join("\n");
        let help_block = Paragraph::new(help_text)
            .block(
                Block::default()
                    .title("Help")
                    .borders(Borders::ALL)
                    .border_type(BorderType::Rounded),
            )
            .style(Style::default().bg(Color::DarkGray).fg(Color::White));
        frame.render_widget(Clear, popup_area);
        frame.render_widget(help_block, popup_area);
    }
}

fn list_title(app: &App) -> String {
    let mut title = format!("Articles ({}/{})", app.items().len(), app.total());
    if let Some(query) = &app.filter_query {
        title.push_str(&format!(" · /{}", query));
    }
    title
}

fn status_line(app: &App) -> Line<'static> {
    let mut spans = Vec::new();
    if let Some((name, status)) = app.server_status() {
        spans.push(Span::styled(
            format!("{} {}", status_symbol(status), name),
            status_style(status),
        ));
        spans.push(Span::raw(format!(" {}", status)));
        spans.push(Span::raw(" | "));
    }
    let drafts = if app.view.show_drafts { "shown" } else { "hidden" };
    spans.push(Span::raw(format!("drafts {}", drafts)));
    if let Some(tag) = &app.view.tag {
        spans.push(Span::raw(format!(" | tag {}", tag)));
    }
    if app.view.untagged_only {
        spans.push(Span::raw(" | untagged"));
    }
    if app.loading {
        spans.push(Span::styled(" | indexing…", Style::default().fg(Color::Yellow)));
    }
    Line::from(spans)
}

fn status_symbol(status: &ProcessStatus) -> char {
    match status {
        ProcessStatus::Idle => '·',
        ProcessStatus::Starting => '↻',
        ProcessStatus::Running { .. } => '▲',
        ProcessStatus::Stopped(_) => '■',
    }
}

fn status_style(status: &ProcessStatus) -> Style {
    match status {
        ProcessStatus::Idle => Style::default().fg(Color::DarkGray),
        ProcessStatus::Starting => Style::default().fg(Color::Yellow),
        ProcessStatus::Running { .. } => Style::default().fg(Color::Green),
        ProcessStatus::Stopped(StopReason::Exited { code: Some(0) })
        | ProcessStatus::Stopped(StopReason::Canceled) => Style::default().fg(Color::Gray),
        ProcessStatus::Stopped(_) => Style::default().fg(Color::Red),
    }
}

fn toast_style(level: ToastLevel) -> Style {
    match level {
        ToastLevel::Info => Style::default().fg(Color::Cyan),
        ToastLevel::Warn => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ToastLevel::Notice => Style::default().fg(Color::Yellow),
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ItemSettings;
    use crate::article::{Article, Meta};
    use crate::collection::{Articles, View};
    use ratatui::backend::TestBackend;
    use std::path::Path;

    fn screen(app: &App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 16)).unwrap();
        draw(app, &Theme::new("yellow"), &mut terminal).unwrap();
        let buffer = terminal.backend().buffer().clone();
        let mut out = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                out.push_str(buffer.get(x, y).symbol());
            }
            out.push('\n');
        }
        out
    }

    fn app_with(draft: bool) -> App {
        let mut app = App::new(
            View {
                show_drafts: true,
                ..View::default()
            },
            ItemSettings {
                draft_suffix: "[draft]".into(),
                ..ItemSettings::default()
            },
        );
        let meta = Meta {
            title: "Hello World".into(),
            date: "2024-06-15".into(),
            draft,
            ..Meta::default()
        };
        let article = Article::new(Path::new("content/hello/index.md"), meta);
        let seq = app.begin_load();
        app.on_articles_loaded(seq, Ok(Articles::from(vec![article])));
        app
    }

    #[test]
    fn renders_titles_and_descriptions() {
        let text = screen(&app_with(true));
        assert!(text.contains("Articles (1/1)"));
        assert!(text.contains("Hello World [draft]"));
        assert!(text.contains("2024-06-15 • hello"));
        assert!(text.contains("drafts shown"));
    }

    #[test]
    fn renders_server_status_and_toast() {
        let mut app = app_with(false);
        app.on_server_status("hugo", ProcessStatus::Running { pid: 7 });
        app.set_toast(ToastLevel::Info, "copied");
        let text = screen(&app);
        assert!(text.contains("hugo running (pid 7)"));
        assert!(text.contains("copied"));
    }

    #[test]
    fn renders_empty_list_and_help() {
        let mut app = App::new(View::default(), ItemSettings::default());
        app.show_help = true;
        let text = screen(&app);
        assert!(text.contains("No articles"));
        assert!(text.contains("Edit selected article"));
    }

    #[test]
    fn theme_parses_color_names() {
        assert_eq!(Theme::new("red").draft, Color::Red);
        assert_eq!(Theme::new("not-a-color").draft, Color::Yellow);
    }
}
