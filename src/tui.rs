//! Terminal User Interface (TUI) rendering and management.
//!
//! This module handles initializing the terminal in raw mode, restoring it on exit,
//! and drawing the application state using `ratatui`.

use std::io::{self, Stdout};

use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen, SetTitle,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, BorderType, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Terminal;

use crate::app::{format_duration, App, StatusLevel};
use crate::output::ActivityLevel;
use crate::process::{TaskSnapshot, TaskState};

/// Type alias for the specific terminal backend used.
pub type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

/// Initializes the terminal for TUI mode.
///
/// Enables raw mode, enters the alternate screen, and creates a `ratatui` Terminal instance.
pub fn init_terminal() -> io::Result<TuiTerminal> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

/// Restores the terminal to its original state.
pub fn restore_terminal(mut terminal: TuiTerminal) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Draws the current application state to the terminal.
pub fn draw(app: &mut App, terminal: &mut TuiTerminal) -> io::Result<()> {
    let title = window_title(app);
    execute!(terminal.backend_mut(), SetTitle(title))?;
    terminal.draw(|frame| {
        let area = frame.size();
        let vertical = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(4)])
            .split(area);
        let main = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
            .split(vertical[0]);
        let right = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(7), Constraint::Min(1)])
            .split(main[1]);

        let border_style = Style::default().fg(Color::DarkGray);
        let list_width = main[0].width as usize;
        let list_items: Vec<ListItem> = app
            .tasks
            .iter()
            .enumerate()
            .map(|(idx, task)| task_item(task, idx == app.selected, app.use_symbols, list_width))
            .collect();
        let list = List::new(list_items)
            .block(
                Block::default()
                    .title(format!("Tasks · start all: {}", app.start_all_mode))
                    .borders(Borders::ALL)
                    .border_type(BorderType::Rounded)
                    .border_style(border_style),
            )
            .highlight_style(Style::default().add_modifier(Modifier::BOLD));
        frame.render_stateful_widget(list, main[0], &mut list_state(app.selected, app.tasks.len()));

        let details = Paragraph::new(details_text(app.selected_task()))
            .block(
                Block::default()
                    .title("Details")
                    .borders(Borders::ALL)
                    .border_type(BorderType::Rounded)
                    .border_style(border_style),
            )
            .wrap(Wrap { trim: false });
        frame.render_widget(details, right[0]);

        let activity_block = Block::default()
            .title("Activity")
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(border_style);
        let activity_height = activity_block.inner(right[1]).height as usize;
        let activity_lines: Vec<Line> = app
            .activity
            .tail(activity_height)
            .map(|entry| {
                let style = match entry.level {
                    ActivityLevel::Info => Style::default(),
                    ActivityLevel::Error => Style::default().fg(Color::Red),
                };
                Line::from(vec![
                    Span::styled(format!("{} ", entry.at), Style::default().fg(Color::DarkGray)),
                    Span::styled(entry.text.clone(), style),
                ])
            })
            .collect();
        let activity = if activity_lines.is_empty() {
            Paragraph::new("No activity yet").style(Style::default().fg(Color::DarkGray))
        } else {
            Paragraph::new(activity_lines)
        };
        frame.render_widget(activity.block(activity_block), right[1]);

        let default_help = if app.use_symbols {
            "↑/↓ select | r start | k kill | v window | R start all | K kill all | m start-all mode | ? help | q quit"
        } else {
            "Up/Down select | r start | k kill | v window | R start all | K kill all | m start-all mode | ? help | q quit"
        };
        let (help_line, help_style) = match app.status_message() {
            Some((message, StatusLevel::Warning)) => (message, Style::default().fg(Color::Yellow)),
            Some((message, StatusLevel::Info)) => (message, Style::default().fg(Color::Gray)),
            None => (default_help, Style::default().fg(Color::DarkGray)),
        };
        let status = Paragraph::new(Text::from(vec![
            Line::from(Span::raw(app.status_line())),
            Line::from(Span::styled(help_line.to_string(), help_style)),
        ]))
        .block(
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
                "  Up/Down    Select task",
                "  Tab        Cycle selection",
                "",
                "Task:",
                "  r / Enter  Start selected task",
                "  k          Kill selected task",
                "  v          Cycle window setting (idle tasks)",
                "",
                "All tasks:",
                "  R          Start every idle task",
                "  K          Kill every running task",
                "  m          Cycle start-all window mode",
                "",
                "General:",
                "  ?          Toggle this help",
                "  q          Quit",
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
    })?;
    Ok(())
}

fn task_item(task: &TaskSnapshot, selected: bool, use_symbols: bool, width: usize) -> ListItem<'static> {
    let (indent, name_style) = if selected {
        ("▶ ", Style::default().add_modifier(Modifier::BOLD))
    } else {
        ("  ", Style::default().fg(Color::Gray))
    };
    let state = match (task.state, task.pid) {
        (TaskState::Running, Some(pid)) => format!("pid {}", pid),
        _ => "idle".to_string(),
    };
    let summary = truncate(
        &format!("{} · {}", state, task.selected_visibility),
        width.saturating_sub(4 + indent.len()),
    );
    let mut text = Text::default();
    text.lines.push(Line::from(vec![
        Span::styled(indent, if selected { Style::default().fg(Color::Cyan) } else { name_style }),
        Span::styled(format!("[{}] ", status_char(task.state, use_symbols)), status_style(task.state)),
        Span::styled(task.name.clone(), name_style),
    ]));
    text.lines.push(Line::from(vec![
        Span::raw("    "),
        Span::styled(summary, Style::default().fg(Color::DarkGray)),
    ]));
    ListItem::new(text)
}

fn details_text(task: Option<&TaskSnapshot>) -> Text<'static> {
    let Some(task) = task else {
        return Text::from("No task selected");
    };
    let label = Style::default().fg(Color::DarkGray);
    let state = match (task.state, task.uptime) {
        (TaskState::Running, Some(uptime)) => format!(
            "running, pid {} ({}), up {}",
            task.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
            task.launched_visibility.map(|v| v.label()).unwrap_or("-"),
            format_duration(uptime)
        ),
        _ => "not running".to_string(),
    };
    let last = match (task.last_exit, task.pid) {
        (Some(exit), Some(pid)) => format!("{} (pid {})", exit, pid),
        (Some(exit), None) => exit.to_string(),
        (None, _) => "-".to_string(),
    };
    Text::from(vec![
        Line::from(vec![Span::styled("state    ", label), Span::styled(state, status_style(task.state))]),
        Line::from(vec![Span::styled("command  ", label), Span::raw(task.command.clone())]),
        Line::from(vec![Span::styled("cwd      ", label), Span::raw(task.cwd.display().to_string())]),
        Line::from(vec![Span::styled("window   ", label), Span::raw(task.selected_visibility.label())]),
        Line::from(vec![Span::styled("last run ", label), Span::raw(last)]),
    ])
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

fn window_title(app: &App) -> String {
    match app.selected_task() {
        Some(task) => format!("taskrack · {}", task.name),
        None => "taskrack".to_string(),
    }
}

fn list_state(selected: usize, len: usize) -> ListState {
    let mut state = ListState::default();
    if len > 0 {
        state.select(Some(selected.min(len - 1)));
    }
    state
}

fn status_char(state: TaskState, use_symbols: bool) -> char {
    match (state, use_symbols) {
        (TaskState::Running, true) => '●',
        (TaskState::Idle, true) => '○',
        (TaskState::Running, false) => 'R',
        (TaskState::Idle, false) => '-',
    }
}

fn status_style(state: TaskState) -> Style {
    match state {
        TaskState::Running => Style::default().fg(Color::Green),
        TaskState::Idle => Style::default().fg(Color::DarkGray),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max <= 1 {
        return text.chars().take(max).collect();
    }
    let mut out: String = text.chars().take(max - 1).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("héllo wörld", 6), "héllo…");
        assert_eq!(truncate("abc", 1), "a");
    }

    #[test]
    fn list_state_clamps_selection() {
        assert_eq!(list_state(5, 3).selected(), Some(2));
        assert_eq!(list_state(0, 0).selected(), None);
    }
}
