//! Live telemetry session pipeline for the Dooders experiment dashboard.
//!
//! A session actor owns one WebSocket link to the experiment backend,
//! decodes every inbound snapshot, keeps the ordered session history and its
//! live aggregate, and fans updates out to independent consumers. Control
//! commands travel back over the same link.

mod aggregate;
pub mod config;
pub mod connection;
mod decoder;
mod diagnostics;
mod dispatcher;
mod error;
mod fanout;
mod history;
pub mod log_stream;
mod metrics;
mod pipeline;
mod runtime;
mod session;
mod websocket;

/// `tracing` target for session and connection events.
pub const LOG_TARGET: &str = "dooders::session";
/// Target of the warning logged for every [`Diagnostic`].
pub const DIAGNOSTICS_TARGET: &str = "dooders::diagnostics";

pub use aggregate::{aggregate, LiveAggregate};
pub use config::{load_dashboard_config_from_env, DashboardConfig, DashboardConfigError};
pub use connection::{ConnectionManager, ConnectionState, Connector, ReconnectPolicy};
pub use decoder::decode_snapshot;
pub use diagnostics::{Diagnostic, DiagnosticSink, DEFAULT_DIAGNOSTIC_CAPACITY};
pub use dispatcher::CommandDispatcher;
pub use error::{CommandError, ConnectionError, DecodeError, SessionFault};
pub use fanout::{Fanout, SessionUpdate, Subscription, UpdateKind};
pub use history::SessionHistory;
pub use log_stream::{LogEnvelope, LogForwardLayer};
pub use metrics::SessionMetrics;
pub use pipeline::SessionPipeline;
pub use runtime::{spawn_session, SessionHandle, SessionRuntime};
pub use session::{SessionCore, SessionPhase, SessionStatus};
pub use websocket::WebSocketConnector;

pub use telemetry_runtime::{Command, DirectionCounts, Snapshot};
