use std::collections::VecDeque;

use ratatui::layout::{Alignment, Constraint, Direction, Layout, Margin};
use ratatui::prelude::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols;
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Axis, BarChart, Block, Borders, Chart, Dataset, GraphType, Paragraph, Wrap,
};
use ratatui::Frame;

use session_core::{Diagnostic, DirectionCounts, SessionPhase, SessionStatus, Snapshot};
use telemetry_runtime::StartDefaults;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesPoint {
    pub cycle: u64,
    pub dooders: u64,
    pub energy: u64,
}

pub struct UiState {
    pub endpoint: String,
    pub defaults: StartDefaults,
    pub status: SessionStatus,
    pub counters: Snapshot,
    pub directions: DirectionCounts,
    pub dooder_points: Vec<(f64, f64)>,
    pub energy_points: Vec<(f64, f64)>,
    pub max_points: usize,
    pub logs: VecDeque<String>,
    pub max_logs: usize,
    pub prompt: Option<String>,
}

impl UiState {
    pub fn new(endpoint: String, defaults: StartDefaults) -> Self {
        Self {
            endpoint,
            defaults,
            status: SessionStatus::default(),
            counters: Snapshot::default(),
            directions: DirectionCounts::new(),
            dooder_points: Vec::new(),
            energy_points: Vec::new(),
            max_points: 512,
            logs: VecDeque::new(),
            max_logs: 8,
            prompt: None,
        }
    }

    pub fn push_point(&mut self, point: SeriesPoint) {
        let x = point.cycle as f64;
        self.dooder_points.push((x, point.dooders as f64));
        self.energy_points.push((x, point.energy as f64));
        if self.dooder_points.len() > self.max_points {
            let excess = self.dooder_points.len() - self.max_points;
            self.dooder_points.drain(..excess);
            self.energy_points.drain(..excess);
        }
    }

    pub fn clear_series(&mut self) {
        self.dooder_points.clear();
        self.energy_points.clear();
    }

    pub fn push_log<S: Into<String>>(&mut self, line: S) {
        let text: String = line.into();
        let text = text.trim_end();
        if text.is_empty() {
            return;
        }
        self.logs.push_front(text.to_string());
        while self.logs.len() > self.max_logs {
            self.logs.pop_back();
        }
    }

    pub fn push_diagnostic(&mut self, diagnostic: &Diagnostic) {
        self.push_log(format!("WARN {}: {diagnostic}", diagnostic.event_name()));
    }

    fn x_bounds(&self) -> [f64; 2] {
        let min = self.dooder_points.first().map(|p| p.0).unwrap_or(0.0);
        let max = self.dooder_points.last().map(|p| p.0).unwrap_or(1.0);
        if max > min {
            [min, max]
        } else {
            [min, min + 1.0]
        }
    }

    fn y_max(&self) -> f64 {
        self.dooder_points
            .iter()
            .chain(&self.energy_points)
            .map(|p| p.1)
            .fold(1.0, f64::max)
    }
}

pub fn draw_ui(frame: &mut Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(5),
            Constraint::Min(10),
            Constraint::Length(10),
        ])
        .split(frame.size());

    draw_header(frame, chunks[0], state);
    draw_counters(frame, chunks[1], state);

    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(chunks[2]);
    draw_series(frame, middle[0], state);
    draw_directions(frame, middle[1], state);

    let bottom = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(34), Constraint::Min(20)])
        .split(chunks[3]);
    draw_commands(frame, bottom[0], state);
    draw_logs(frame, bottom[1], state);
}

fn phase_span(status: &SessionStatus) -> Span<'static> {
    match status.phase() {
        SessionPhase::Loading => Span::styled("connecting", Style::default().fg(Color::Yellow)),
        SessionPhase::Failed => Span::styled("error", Style::default().fg(Color::Red)),
        SessionPhase::Empty => Span::styled("no data yet", Style::default().fg(Color::Gray)),
        SessionPhase::Live => Span::styled("live", Style::default().fg(Color::Green)),
    }
}

fn draw_header(frame: &mut Frame, area: Rect, state: &UiState) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Dooders Experiment Inspector");
    let mut spans = vec![
        phase_span(&state.status),
        Span::raw(format!(
            " | {} ({}) | {} snapshots",
            state.endpoint, state.status.connection, state.status.session_len
        )),
    ];
    if let Some(prompt) = &state.prompt {
        spans = vec![
            Span::styled(":", Style::default().fg(Color::Yellow)),
            Span::raw(prompt.clone()),
        ];
    } else if let Some(err) = &state.status.last_error {
        spans.push(Span::styled(
            format!(" | {err}"),
            Style::default().fg(Color::Red),
        ));
    }
    let text = Paragraph::new(Line::from(spans)).wrap(Wrap { trim: true });
    frame.render_widget(block, area);
    frame.render_widget(
        text,
        area.inner(&Margin {
            vertical: 1,
            horizontal: 1,
        }),
    );
}

fn draw_counters(frame: &mut Frame, area: Rect, state: &UiState) {
    let cards = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
        ])
        .split(area);
    let values = [
        ("Cycle", state.counters.cycle_count, Color::Yellow),
        ("Dooders", state.counters.dooder_count, Color::Cyan),
        ("Energy", state.counters.energy_count, Color::Magenta),
    ];
    for ((title, value, color), card) in values.into_iter().zip(cards.iter()) {
        let block = Block::default().borders(Borders::ALL).title(title);
        let line = Line::from(Span::styled(
            value.to_string(),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ));
        frame.render_widget(block, *card);
        frame.render_widget(
            Paragraph::new(line).alignment(Alignment::Center),
            card.inner(&Margin {
                vertical: 1,
                horizontal: 1,
            }),
        );
    }
}

fn draw_series(frame: &mut Frame, area: Rect, state: &UiState) {
    let datasets = vec![
        Dataset::default()
            .name("dooders")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Cyan))
            .data(&state.dooder_points),
        Dataset::default()
            .name("energy")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Magenta))
            .data(&state.energy_points),
    ];
    let [x_min, x_max] = state.x_bounds();
    let y_max = state.y_max();
    let chart = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title("Cycles"))
        .x_axis(
            Axis::default()
                .title("cycle")
                .bounds([x_min, x_max])
                .labels(vec![
                    Span::raw(format!("{x_min:.0}")),
                    Span::raw(format!("{x_max:.0}")),
                ]),
        )
        .y_axis(
            Axis::default()
                .bounds([0.0, y_max])
                .labels(vec![Span::raw("0"), Span::raw(format!("{y_max:.0}"))]),
        );
    frame.render_widget(chart, area);
}

fn draw_directions(frame: &mut Frame, area: Rect, state: &UiState) {
    let data: Vec<(&str, u64)> = state
        .directions
        .iter()
        .map(|(label, count)| (label.as_str(), *count))
        .collect();
    let chart = BarChart::default()
        .block(Block::default().borders(Borders::ALL).title("Directions"))
        .data(data.as_slice())
        .bar_width(5)
        .bar_gap(1)
        .bar_style(Style::default().fg(Color::Green))
        .value_style(Style::default().fg(Color::Black).bg(Color::Green));
    frame.render_widget(chart, area);
}

fn draw_commands(frame: &mut Frame, area: Rect, state: &UiState) {
    let start = format!(
        "  start ({} steps, {} agents)",
        state.defaults.steps, state.defaults.agents
    );
    let entries = [
        ("s", start.as_str()),
        ("x", "  stop"),
        ("r", "  reset experiment"),
        ("c", "  clear session"),
        ("o", "  open / reconnect"),
        (":", "  command prompt"),
        ("q", "  exit inspector"),
    ];
    let lines: Vec<Line> = entries
        .iter()
        .map(|(key, label)| {
            Line::from(vec![
                Span::styled(*key, Style::default().fg(Color::Yellow)),
                Span::raw(*label),
            ])
        })
        .collect();
    let block = Block::default().borders(Borders::ALL).title("Commands");
    let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false });
    frame.render_widget(block, area);
    frame.render_widget(
        paragraph,
        area.inner(&Margin {
            vertical: 1,
            horizontal: 1,
        }),
    );
}

fn draw_logs(frame: &mut Frame, area: Rect, state: &UiState) {
    let block = Block::default().borders(Borders::ALL).title("Logs");
    let lines: Vec<Line> = state
        .logs
        .iter()
        .map(|entry| Line::from(Span::raw(entry)))
        .collect();
    let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false });
    frame.render_widget(block, area);
    frame.render_widget(
        paragraph,
        area.inner(&Margin {
            vertical: 1,
            horizontal: 1,
        }),
    );
}
