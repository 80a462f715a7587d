//! Command Validation
//!
//! Inbound frames are split on their `type` tag: game commands are checked
//! and rate limited here before they may reach a session's command queue,
//! everything else is parsed as a [`ClientMessage`].

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;

use crate::game::command::Command;
use crate::game::components::PlayerId;
use crate::network::protocol::{ClientMessage, CommandFrame};

/// Default per-sender command budget.
pub const MAX_COMMANDS_PER_SECOND: u32 = 60;

/// Wire names of the game commands.
pub const COMMAND_TYPES: [&str; 5] =
    ["MOVE", "STOP", "STATE_SHIFT_LEFT", "STATE_SHIFT_RIGHT", "STATE_CHANGE"];

const WINDOW: Duration = Duration::from_secs(1);

/// Rejected frame.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Not JSON, or not an object.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// No string `type` field.
    #[error("message has no type")]
    MissingType,

    /// `type` is neither a command nor a control message.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Right type, wrong fields (missing entity id, bad direction or state).
    #[error("invalid {kind} command: {reason}")]
    InvalidCommand {
        /// Wire name.
        kind: String,
        /// Parser message.
        reason: String,
    },

    /// Sender exceeded the per-second budget.
    #[error("rate limited: more than {0} commands per second")]
    RateLimited(u32),
}

/// A frame that passed validation.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// Game command for the sender's session.
    Command(Command),
    /// Lobby / connection control.
    Control(ClientMessage),
}

/// Parses inbound frames and enforces `max_commands_per_second` per sender
/// over a sliding one-second window.
#[derive(Debug)]
pub struct CommandValidator {
    max_commands_per_second: u32,
    windows: BTreeMap<PlayerId, VecDeque<Instant>>,
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self::new(MAX_COMMANDS_PER_SECOND)
    }
}

impl CommandValidator {
    /// Validator with a command budget.
    pub fn new(max_commands_per_second: u32) -> Self {
        Self { max_commands_per_second, windows: BTreeMap::new() }
    }

    /// Classify and validate a JSON text frame.
    pub fn validate_text(&mut self, sender: PlayerId, text: &str, now: Instant) -> Result<Inbound, ValidationError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(ValidationError::Malformed("expected an object".into()));
        }
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ValidationError::MissingType)?
            .to_owned();

        if COMMAND_TYPES.contains(&kind.as_str()) {
            let command: Command = serde_json::from_value(value)
                .map_err(|e| ValidationError::InvalidCommand { kind, reason: e.to_string() })?;
            self.admit(sender, now)?;
            return Ok(Inbound::Command(command));
        }

        serde_json::from_value::<ClientMessage>(value)
            .map(Inbound::Control)
            .map_err(|_| ValidationError::UnknownType(kind))
    }

    /// Validate a bincode [`CommandFrame`].
    pub fn validate_binary(&mut self, sender: PlayerId, data: &[u8], now: Instant) -> Result<Command, ValidationError> {
        let frame = CommandFrame::from_bytes(data)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        let command = frame.to_command().ok_or_else(|| ValidationError::InvalidCommand {
            kind: format!("frame kind {}", frame.kind),
            reason: format!("bad argument {}", frame.arg),
        })?;
        self.admit(sender, now)?;
        Ok(command)
    }

    /// Charge one command to `sender`.
    fn admit(&mut self, sender: PlayerId, now: Instant) -> Result<(), ValidationError> {
        let window = self.windows.entry(sender).or_default();
        while let Some(&front) = window.front() {
            if now.saturating_duration_since(front) >= WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() >= self.max_commands_per_second as usize {
            return Err(ValidationError::RateLimited(self.max_commands_per_second));
        }
        window.push_back(now);
        Ok(())
    }

    /// Forget a sender's window.
    pub fn forget(&mut self, sender: &PlayerId) {
        self.windows.remove(sender);
    }
}
