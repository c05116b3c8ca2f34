//! Command model for the experiment dashboard.
//!
//! Re-exports the wire contracts from `telemetry_proto` and layers the typed
//! [`Command`] surface (validation, encoding, text parsing) on top of them.

mod command_text;
mod commands;

pub use command_text::{parse_command_line, CommandParseError, StartDefaults};
pub use commands::{Command, CommandEncodeError, ParameterError};
pub use telemetry_proto::*;
