use std::collections::VecDeque;

use pecs::SessionView;
use pecs::record::observer_millis;
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table};

use crate::server::ServerStats;

const MAX_LOG_LINES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Info,
    Warn,
    Error,
}

pub struct TuiState {
    log: VecDeque<(Level, String)>,
    scroll: usize,
}

impl TuiState {
    pub fn new() -> Self {
        Self {
            log: VecDeque::with_capacity(MAX_LOG_LINES),
            scroll: 0,
        }
    }

    fn push(&mut self, level: Level, message: String) {
        if self.log.len() == MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back((level, message));
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.push(Level::Info, message.into());
    }

    pub fn log_warn(&mut self, message: impl Into<String>) {
        self.push(Level::Warn, message.into());
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.push(Level::Error, message.into());
    }

    pub fn scroll_up(&mut self) {
        self.scroll = (self.scroll + 5).min(self.log.len().saturating_sub(1));
    }

    pub fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_sub(5);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = 0;
    }
}

pub fn render(frame: &mut Frame, state: &TuiState, stats: &ServerStats, views: &[SessionView]) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Min(6),
            Constraint::Length(10),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], stats);
    render_counters(frame, chunks[1], stats);
    render_devices(frame, chunks[2], views);
    render_log(frame, chunks[3], state);
    render_help(frame, chunks[4]);
}

fn render_header(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let title = format!(" PECS Ingest - Uptime: {} ", format_duration(stats.uptime_secs));

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let text = format!(
        "Motes: {}  |  Datagrams: {}  |  Released: {}",
        stats.motes, stats.ingest.datagrams_received, stats.ingest.acks_sent
    );

    let paragraph = Paragraph::new(text)
        .block(block)
        .style(Style::default().fg(Color::White));

    frame.render_widget(paragraph, area);
}

fn counter(label: &str, value: String, alert: bool) -> Vec<Span<'static>> {
    vec![
        Span::styled(format!("{}: ", label), Style::default().fg(Color::Gray)),
        Span::styled(
            format!("{:<14}", value),
            Style::default().fg(if alert { Color::Red } else { Color::White }),
        ),
    ]
}

fn render_counters(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let block = Block::default()
        .title(" Ingest ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let s = &stats.ingest;
    let lines = vec![
        Line::from(
            [
                counter("Bytes", format_bytes(s.bytes_received), false),
                counter("Rejected", s.datagrams_rejected.to_string(), s.datagrams_rejected > 0),
                counter("Ack failures", s.ack_failures.to_string(), s.ack_failures > 0),
            ]
            .concat(),
        ),
        Line::from(
            [
                counter("Records", s.records_decoded.to_string(), false),
                counter("Corrupt", s.corrupt_records.to_string(), false),
                counter("No time", s.dropped_no_time.to_string(), false),
            ]
            .concat(),
        ),
        Line::from(
            [
                counter("Duplicates", s.duplicates.to_string(), false),
                counter("Desyncs", s.desyncs.to_string(), false),
                counter("Sink errors", s.sink_failures.to_string(), s.sink_failures > 0),
            ]
            .concat(),
        ),
    ];

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn clock_cell(view: &SessionView, now_ms: u64) -> Cell<'static> {
    if view.clock.has_absolute_time() {
        let offset = view
            .clock
            .wall_millis()
            .map(|device_ms| (device_ms as f64 - now_ms as f64) / 1000.0)
            .unwrap_or_default();
        Cell::from(format!("{:+.0}s", offset)).style(Style::default().fg(Color::Green))
    } else if view.clock.has_ever_had_time() {
        Cell::from("lost").style(Style::default().fg(Color::Yellow))
    } else {
        Cell::from("none").style(Style::default().fg(Color::DarkGray))
    }
}

fn render_devices(frame: &mut Frame, area: Rect, views: &[SessionView]) {
    let block = Block::default()
        .title(format!(" Motes ({}) ", views.len()))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let now_ms = observer_millis();
    let header = Row::new(vec![
        "Serial", "Peer", "Pointer", "Clock", "Datagrams", "Dups", "Resyncs", "Corrupt", "Seen",
    ])
    .style(Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD));

    let rows = views.iter().map(|view| {
        Row::new(vec![
            Cell::from(format!("{:04x}", view.serial)),
            Cell::from(view.last_peer.map(|p| p.ip().to_string()).unwrap_or_default()),
            Cell::from(view.read_ptr.map(|p| format!("{:#08x}", p)).unwrap_or_default()),
            clock_cell(view, now_ms),
            Cell::from(view.datagrams.to_string()),
            Cell::from(view.duplicates.to_string()),
            Cell::from(view.resyncs.to_string()),
            Cell::from(view.corrupt_records.to_string()),
            Cell::from(
                view.last_seen
                    .map(|at| format!("{}s ago", at.elapsed().as_secs()))
                    .unwrap_or_default(),
            ),
        ])
    });

    let widths = [
        Constraint::Length(6),
        Constraint::Min(20),
        Constraint::Length(10),
        Constraint::Length(8),
        Constraint::Length(10),
        Constraint::Length(6),
        Constraint::Length(8),
        Constraint::Length(8),
        Constraint::Length(9),
    ];

    let table = Table::new(rows, widths).header(header).block(block);
    frame.render_widget(table, area);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Events ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));

    let visible = area.height.saturating_sub(2) as usize;
    let end = state.log.len().saturating_sub(state.scroll);
    let start = end.saturating_sub(visible);

    let lines: Vec<Line> = state
        .log
        .range(start..end)
        .map(|(level, message)| {
            let color = match level {
                Level::Info => Color::White,
                Level::Warn => Color::Yellow,
                Level::Error => Color::Red,
            };
            Line::from(Span::styled(message.as_str(), Style::default().fg(color)))
        })
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new("'q'/ESC quit  |  PgUp/PgDn scroll events  |  End follow")
        .block(block)
        .style(
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        );

    frame.render_widget(text, area);
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1}GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_is_bounded() {
        let mut state = TuiState::new();
        for i in 0..MAX_LOG_LINES + 10 {
            state.log_info(format!("line {}", i));
        }
        assert_eq!(state.log.len(), MAX_LOG_LINES);
        assert_eq!(state.log.front().unwrap().1, "line 10");
    }

    #[test]
    fn test_scroll_is_clamped() {
        let mut state = TuiState::new();
        state.log_warn("one");
        state.log_error("two");
        state.scroll_up();
        assert_eq!(state.scroll, 1);
        state.scroll_down();
        assert_eq!(state.scroll, 0);
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_duration(3725), "01:02:05");
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KB");
    }
}
