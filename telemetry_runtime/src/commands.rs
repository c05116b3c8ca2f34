use thiserror::Error;

use crate::{encode_control_json, ControlFrame, ControlSignal};

/// Control instruction sent to the experiment backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start { steps: u32, agents: u32 },
    Stop,
    Reset,
}

/// Rejected experiment parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterError {
    #[error("{name} must be greater than zero")]
    NotPositive { name: &'static str },
}

#[derive(Debug, Error)]
pub enum CommandEncodeError {
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Command {
    /// Build a validated start command.
    pub fn start(steps: u32, agents: u32) -> Result<Self, ParameterError> {
        let command = Command::Start { steps, agents };
        command.validate()?;
        Ok(command)
    }

    pub fn validate(&self) -> Result<(), ParameterError> {
        if let Command::Start { steps, agents } = *self {
            if steps == 0 {
                return Err(ParameterError::NotPositive { name: "steps" });
            }
            if agents == 0 {
                return Err(ParameterError::NotPositive { name: "agents" });
            }
        }
        Ok(())
    }

    pub fn label(&self) -> &'static str {
        match self {
            Command::Start { .. } => "start",
            Command::Stop => "stop",
            Command::Reset => "reset",
        }
    }

    pub fn to_frame(&self) -> ControlFrame {
        match *self {
            Command::Start { steps, agents } => ControlFrame::Parameters { steps, agents },
            Command::Stop => ControlFrame::Signal {
                command: ControlSignal::Stop,
            },
            Command::Reset => ControlFrame::Signal {
                command: ControlSignal::Reset,
            },
        }
    }

    /// Encode the command as a self-contained JSON text frame.
    pub fn encode_to_string(&self) -> Result<String, CommandEncodeError> {
        Ok(encode_control_json(&self.to_frame())?)
    }
}
