use thiserror::Error;

use telemetry_runtime::ParameterError;

use crate::connection::ConnectionState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("failed to connect to {endpoint}: {reason}")]
    ConnectFailed { endpoint: String, reason: String },
    #[error("connection is {state}")]
    NotConnected { state: ConnectionState },
    #[error("remote closed the connection ({})", .reason.as_deref().unwrap_or("no reason given"))]
    RemoteClosed { reason: Option<String> },
}

/// Inbound payload rejected before it reaches the session history.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed payload: {reason}")]
    MalformedPayload { reason: String },
    #[error("schema mismatch: {reason}")]
    SchemaMismatch { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(#[from] ParameterError),
    #[error("command not sent: {0}")]
    NotConnected(ConnectionError),
    #[error("failed to encode command: {0}")]
    Encode(String),
    /// The link failed after `Start` had already cleared the session.
    #[error("session was reset but start was not sent: {0}")]
    StartAborted(ConnectionError),
}

/// Last failure surfaced to whoever drives the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionFault {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Command(#[from] CommandError),
}
