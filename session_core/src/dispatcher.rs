//! Outbound control commands, coordinated with session resets.

use tracing::{info, warn};

use telemetry_runtime::Command;

use crate::connection::ConnectionManager;
use crate::error::{CommandError, ConnectionError};
use crate::pipeline::SessionPipeline;
use crate::LOG_TARGET;

pub struct CommandDispatcher<'a> {
    connection: &'a mut ConnectionManager,
    pipeline: &'a mut SessionPipeline,
}

impl<'a> CommandDispatcher<'a> {
    pub fn new(connection: &'a mut ConnectionManager, pipeline: &'a mut SessionPipeline) -> Self {
        Self {
            connection,
            pipeline,
        }
    }

    pub fn start(&mut self, steps: u32, agents: u32) -> Result<(), CommandError> {
        self.dispatch(Command::Start { steps, agents })
    }

    pub fn stop(&mut self) -> Result<(), CommandError> {
        self.dispatch(Command::Stop)
    }

    /// Administrative reset of the backend experiment; the local session is kept.
    pub fn reset(&mut self) -> Result<(), CommandError> {
        self.dispatch(Command::Reset)
    }

    /// Validate, check the link, then send. A `Start` clears the session
    /// before its frame is handed to the connection; if that hand-off fails
    /// the error says the session was already cleared. Nothing is queued.
    pub fn dispatch(&mut self, command: Command) -> Result<(), CommandError> {
        command.validate()?;
        if !self.connection.is_open() {
            return Err(CommandError::NotConnected(ConnectionError::NotConnected {
                state: self.connection.state(),
            }));
        }
        let text = command
            .encode_to_string()
            .map_err(|err| CommandError::Encode(err.to_string()))?;
        let starting = matches!(command, Command::Start { .. });
        if starting {
            self.pipeline.reset();
        }
        if let Err(err) = self.connection.send(text) {
            if !starting {
                return Err(CommandError::NotConnected(err));
            }
            warn!(
                target: LOG_TARGET,
                generation = self.connection.generation(),
                error = %err,
                "command.start_aborted"
            );
            return Err(CommandError::StartAborted(err));
        }
        self.pipeline.metrics_mut().commands_sent += 1;
        info!(
            target: LOG_TARGET,
            command = command.label(),
            generation = self.connection.generation(),
            "command.sent"
        );
        Ok(())
    }
}
