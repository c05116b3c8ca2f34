use std::num::ParseIntError;

use thiserror::Error;

use crate::Command;

/// Parameters used when `start` is typed without arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartDefaults {
    pub steps: u32,
    pub agents: u32,
}

impl Default for StartDefaults {
    fn default() -> Self {
        Self {
            steps: 100,
            agents: 10,
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("invalid integer '{value}' for {context}: {source}")]
    InvalidInteger {
        value: String,
        context: &'static str,
        source: ParseIntError,
    },
    #[error("unexpected argument '{0}'")]
    UnexpectedArgument(String),
}

/// Parse `start [steps] [agents]`, `stop` or `reset`.
///
/// Parameter positivity is not checked here; the dispatcher validates
/// before anything is sent.
pub fn parse_command_line(
    input: &str,
    defaults: StartDefaults,
) -> Result<Command, CommandParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CommandParseError::Empty);
    }

    let mut parts = trimmed.split_whitespace();
    let verb = parts
        .next()
        .map(|v| v.to_ascii_lowercase())
        .ok_or(CommandParseError::Empty)?;

    let command = match verb.as_str() {
        "start" | "run" => {
            let steps = match parts.next() {
                Some(value) => parse_u32(value, "start steps")?,
                None => defaults.steps,
            };
            let agents = match parts.next() {
                Some(value) => parse_u32(value, "start agents")?,
                None => defaults.agents,
            };
            Command::Start { steps, agents }
        }
        "stop" => Command::Stop,
        "reset" => Command::Reset,
        other => return Err(CommandParseError::UnknownCommand(other.to_string())),
    };

    if let Some(extra) = parts.next() {
        return Err(CommandParseError::UnexpectedArgument(extra.to_string()));
    }
    Ok(command)
}

fn parse_u32(value: &str, context: &'static str) -> Result<u32, CommandParseError> {
    value
        .parse::<u32>()
        .map_err(|source| CommandParseError::InvalidInteger {
            value: value.to_string(),
            context,
            source,
        })
}
