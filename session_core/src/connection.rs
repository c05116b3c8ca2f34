//! Lifecycle of the single duplex link to the experiment backend.
//!
//! [`ConnectionManager`] owns the state machine; the transport itself sits
//! behind [`Connector`], which spawns a link and reports back through
//! [`LinkEvent`]s tagged with the generation they were opened under.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::error::ConnectionError;
use crate::LOG_TARGET;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounded exponential backoff. `max_attempts == 0` disables retrying.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    pub fn enabled(&self) -> bool {
        self.max_attempts > 0
    }

    /// Delay before retry number `attempt` (zero based): initial * multiplier^attempt, capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay_ms as f64 / 1000.0;
        let cap = self.max_delay_ms as f64 / 1000.0;
        let base = initial * self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        Duration::from_secs_f64(base.min(cap).max(0.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// Everything a connector needs to bring one link up.
pub struct LinkRequest {
    pub endpoint: String,
    pub generation: u64,
    /// Wait this long before the first connect attempt.
    pub delay: Duration,
    pub policy: ReconnectPolicy,
    pub events: UnboundedSender<LinkEvent>,
}

impl LinkRequest {
    pub fn emit(&self, kind: LinkEventKind) -> bool {
        self.events
            .send(LinkEvent {
                generation: self.generation,
                kind,
            })
            .is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub generation: u64,
    pub kind: LinkEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEventKind {
    Opened,
    Payload(Vec<u8>),
    Failed(ConnectionError),
    Closed { reason: Option<String> },
}

/// Outbound side of a spawned link.
pub struct LinkHandle {
    outbound: UnboundedSender<Outbound>,
    abort: Option<AbortHandle>,
}

impl LinkHandle {
    pub fn new(outbound: UnboundedSender<Outbound>) -> Self {
        Self {
            outbound,
            abort: None,
        }
    }

    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }

    fn send(&self, frame: Outbound) -> bool {
        self.outbound.send(frame).is_ok()
    }

    fn shutdown(self, still_connecting: bool) {
        match self.abort {
            Some(abort) if still_connecting => abort.abort(),
            _ => {
                let _ = self.outbound.send(Outbound::Close);
            }
        }
    }
}

/// Spawns transport links. Implementations must not block.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, request: LinkRequest) -> LinkHandle;
}

/// What a link event meant for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Opened,
    Payload(Vec<u8>),
    Discarded { state: ConnectionState, bytes: usize },
    Failed(ConnectionError),
    Dropped(ConnectionError),
    Ignored,
}

pub struct ConnectionManager {
    endpoint: String,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    events: UnboundedSender<LinkEvent>,
    state: ConnectionState,
    generation: u64,
    link: Option<LinkHandle>,
    drop_retries: u32,
}

impl ConnectionManager {
    pub fn new(
        endpoint: impl Into<String>,
        policy: ReconnectPolicy,
        connector: Arc<dyn Connector>,
        events: UnboundedSender<LinkEvent>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            policy,
            connector,
            events,
            state: ConnectionState::Disconnected,
            generation: 0,
            link: None,
            drop_retries: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Generation of the most recently spawned link.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Start connecting. Returns `false` when a link is already pending or open.
    pub fn open(&mut self) -> bool {
        self.drop_retries = 0;
        self.open_after(Duration::ZERO)
    }

    fn open_after(&mut self, delay: Duration) -> bool {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            debug!(target: LOG_TARGET, state = %self.state, "connection.open_ignored");
            return false;
        }
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        let request = LinkRequest {
            endpoint: self.endpoint.clone(),
            generation: self.generation,
            delay,
            policy: self.policy.clone(),
            events: self.events.clone(),
        };
        self.link = Some(self.connector.connect(request));
        info!(
            target: LOG_TARGET,
            endpoint = %self.endpoint,
            generation = self.generation,
            delay_ms = delay.as_millis() as u64,
            "connection.connecting"
        );
        true
    }

    pub fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Open {
            return Err(ConnectionError::NotConnected { state: self.state });
        }
        match &self.link {
            Some(link) if link.send(Outbound::Text(text)) => Ok(()),
            _ => Err(ConnectionError::RemoteClosed {
                reason: Some("link task ended".to_string()),
            }),
        }
    }

    /// Tear the link down. Repeated calls are no-ops and return `false`.
    pub fn close(&mut self) -> bool {
        if matches!(
            self.state,
            ConnectionState::Disconnected | ConnectionState::Closing
        ) {
            return false;
        }
        let still_connecting = self.state == ConnectionState::Connecting;
        self.state = ConnectionState::Closing;
        if let Some(link) = self.link.take() {
            link.shutdown(still_connecting);
        }
        self.state = ConnectionState::Disconnected;
        self.drop_retries = 0;
        info!(target: LOG_TARGET, generation = self.generation, "connection.closed");
        true
    }

    pub fn handle_event(&mut self, event: LinkEvent) -> LinkOutcome {
        if event.generation != self.generation {
            return match event.kind {
                LinkEventKind::Payload(bytes) => {
                    debug!(
                        target: LOG_TARGET,
                        generation = event.generation,
                        current = self.generation,
                        "connection.stale_payload"
                    );
                    LinkOutcome::Discarded {
                        state: ConnectionState::Disconnected,
                        bytes: bytes.len(),
                    }
                }
                _ => LinkOutcome::Ignored,
            };
        }

        match event.kind {
            LinkEventKind::Opened if self.state == ConnectionState::Connecting => {
                self.state = ConnectionState::Open;
                self.drop_retries = 0;
                info!(
                    target: LOG_TARGET,
                    endpoint = %self.endpoint,
                    generation = self.generation,
                    "connection.opened"
                );
                LinkOutcome::Opened
            }
            LinkEventKind::Payload(bytes) => {
                if self.state == ConnectionState::Open {
                    LinkOutcome::Payload(bytes)
                } else {
                    LinkOutcome::Discarded {
                        state: self.state,
                        bytes: bytes.len(),
                    }
                }
            }
            LinkEventKind::Failed(err) if self.state == ConnectionState::Connecting => {
                self.state = ConnectionState::Disconnected;
                self.link = None;
                warn!(target: LOG_TARGET, error = %err, "connection.failed");
                LinkOutcome::Failed(err)
            }
            LinkEventKind::Closed { reason } if self.state == ConnectionState::Open => {
                self.state = ConnectionState::Disconnected;
                self.link = None;
                let err = ConnectionError::RemoteClosed { reason };
                warn!(target: LOG_TARGET, error = %err, "connection.dropped");
                self.schedule_reconnect();
                LinkOutcome::Dropped(err)
            }
            _ => LinkOutcome::Ignored,
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.drop_retries >= self.policy.max_attempts {
            return;
        }
        let delay = self.policy.backoff_delay(self.drop_retries);
        self.drop_retries += 1;
        warn!(
            target: LOG_TARGET,
            attempt = self.drop_retries,
            max_attempts = self.policy.max_attempts,
            "connection.reconnect_scheduled"
        );
        self.open_after(delay);
    }
}
