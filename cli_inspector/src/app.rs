use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use color_eyre::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::backend::CrosstermBackend;
use ratatui::prelude::*;
use session_core::{
    Command, DashboardConfig, Diagnostic, DirectionCounts, LogEnvelope, SessionHandle, Snapshot,
    Subscription, UpdateKind,
};
use telemetry_runtime::{parse_command_line, StartDefaults};
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::ui::{draw_ui, SeriesPoint, UiState};

/// Update for the time-series panel.
pub enum SeriesEvent {
    Point(SeriesPoint),
    Reset,
}

/// Each panel gets its own subscription and its own channel.
struct Feeds {
    counters: Receiver<Snapshot>,
    series: Receiver<SeriesEvent>,
    directions: Receiver<DirectionCounts>,
    _subscriptions: [Subscription; 3],
}

impl Feeds {
    fn subscribe(session: &SessionHandle) -> Self {
        let (counters_tx, counters) = mpsc::channel();
        let counters_sub = session.subscribe(move |update| {
            let _ = counters_tx.send(update.aggregate.snapshot().clone());
        });

        let (series_tx, series) = mpsc::channel();
        let series_sub = session.subscribe(move |update| {
            let event = match (update.kind, update.latest()) {
                (UpdateKind::Appended, Some(latest)) => SeriesEvent::Point(SeriesPoint {
                    cycle: latest.cycle_count,
                    dooders: latest.dooder_count,
                    energy: latest.energy_count,
                }),
                _ => SeriesEvent::Reset,
            };
            let _ = series_tx.send(event);
        });

        let (directions_tx, directions) = mpsc::channel();
        let directions_sub = session.subscribe(move |update| {
            let _ = directions_tx.send(update.aggregate.direction_counts.clone());
        });

        Self {
            counters,
            series,
            directions,
            _subscriptions: [counters_sub, series_sub, directions_sub],
        }
    }
}

pub struct InspectorApp {
    terminal: Terminal<CrosstermBackend<std::io::Stdout>>,
    ui_state: UiState,
    session: SessionHandle,
    runtime: Handle,
    feeds: Feeds,
    log_receiver: crossbeam_channel::Receiver<LogEnvelope>,
    diagnostics: crossbeam_channel::Receiver<Diagnostic>,
    defaults: StartDefaults,
}

impl InspectorApp {
    pub fn new(
        session: SessionHandle,
        runtime: Handle,
        config: &DashboardConfig,
        log_receiver: crossbeam_channel::Receiver<LogEnvelope>,
    ) -> Result<Self> {
        let stdout = std::io::stdout();
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        crossterm::terminal::enable_raw_mode()?;
        terminal.clear()?;
        terminal.hide_cursor()?;
        let feeds = Feeds::subscribe(&session);
        let diagnostics = session.diagnostics();
        let defaults = config.start_defaults();
        Ok(Self {
            terminal,
            ui_state: UiState::new(config.endpoint.clone(), defaults),
            session,
            runtime,
            feeds,
            log_receiver,
            diagnostics,
            defaults,
        })
    }

    pub fn run(mut self) -> Result<()> {
        let mut last_draw = Instant::now();

        loop {
            self.drain_feeds();

            if last_draw.elapsed() >= Duration::from_millis(100) {
                self.ui_state.status = self.session.status();
                self.terminal.draw(|frame| draw_ui(frame, &self.ui_state))?;
                last_draw = Instant::now();
            }

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    if self.ui_state.prompt.is_some() {
                        self.handle_prompt_key(key.code);
                        continue;
                    }
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => break,
                        KeyCode::Char('s') => self.issue(Command::Start {
                            steps: self.defaults.steps,
                            agents: self.defaults.agents,
                        }),
                        KeyCode::Char('x') => self.issue(Command::Stop),
                        KeyCode::Char('r') => self.issue(Command::Reset),
                        KeyCode::Char('c') => {
                            self.runtime.spawn(self.session.reset_session());
                            info!("inspector.session_cleared");
                        }
                        KeyCode::Char('o') => {
                            let connected = self.session.connect();
                            self.runtime.spawn(async move {
                                if let Err(err) = connected.await {
                                    warn!(error = %err, "inspector.connect_failed");
                                }
                            });
                        }
                        KeyCode::Char(':') => self.ui_state.prompt = Some(String::new()),
                        _ => {}
                    }
                }
            }
        }

        self.terminal.show_cursor()?;
        crossterm::terminal::disable_raw_mode()?;
        Ok(())
    }

    fn drain_feeds(&mut self) {
        while let Ok(counters) = self.feeds.counters.try_recv() {
            self.ui_state.counters = counters;
        }
        while let Ok(event) = self.feeds.series.try_recv() {
            match event {
                SeriesEvent::Point(point) => self.ui_state.push_point(point),
                SeriesEvent::Reset => self.ui_state.clear_series(),
            }
        }
        while let Ok(directions) = self.feeds.directions.try_recv() {
            self.ui_state.directions = directions;
        }
        while let Ok(envelope) = self.log_receiver.try_recv() {
            self.ui_state.push_log(envelope.summary());
        }
        while let Ok(diagnostic) = self.diagnostics.try_recv() {
            self.ui_state.push_diagnostic(&diagnostic);
        }
    }

    fn handle_prompt_key(&mut self, code: KeyCode) {
        let Some(input) = self.ui_state.prompt.as_mut() else {
            return;
        };
        match code {
            KeyCode::Esc => self.ui_state.prompt = None,
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Char(ch) => input.push(ch),
            KeyCode::Enter => {
                let line = std::mem::take(input);
                self.ui_state.prompt = None;
                match parse_command_line(&line, self.defaults) {
                    Ok(command) => self.issue(command),
                    Err(err) => self.ui_state.push_log(format!("{err}")),
                }
            }
            _ => {}
        }
    }

    /// Queue a command in key-press order without blocking the UI; only the
    /// reply is awaited in the background. Failures land in the log pane.
    fn issue(&self, command: Command) {
        let reply = self.session.dispatch(command);
        self.runtime.spawn(async move {
            if let Err(err) = reply.await {
                warn!(command = command.label(), error = %err, "inspector.command_failed");
            }
        });
    }
}
