//! Command Queue
//!
//! Intent commands from humans and agents. Pushes may happen at any time from
//! any task through a [`CommandSender`]; the session drains the queue once, at
//! the start of a tick, so a command is applied exactly once and never in the
//! middle of a tick.

use serde::{Serialize, Deserialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::game::components::{AvatarState, PlayerId, RpsState};
use crate::game::entity::{EntityId, EntityStore};

/// Movement axis and sign.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Toward row 0.
    Up,
    /// Away from row 0.
    Down,
    /// Toward column 0.
    Left,
    /// Away from column 0.
    Right,
}

impl Direction {
    /// Velocity this direction asks for, as `(x, y)`.
    pub fn velocity(self) -> (f32, f32) {
        match self {
            Direction::Up => (0.0, -1.0),
            Direction::Down => (0.0, 1.0),
            Direction::Left => (-1.0, 0.0),
            Direction::Right => (1.0, 0.0),
        }
    }
}

/// A simulation command. Same shape for human clients and agents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Start moving along one axis.
    #[serde(rename_all = "camelCase")]
    Move {
        /// Avatar to steer.
        entity_id: EntityId,
        /// Axis and sign of the new velocity.
        direction: Direction,
    },
    /// Stop moving along one axis.
    #[serde(rename_all = "camelCase")]
    Stop {
        /// Avatar to steer.
        entity_id: EntityId,
        /// Axis to zero.
        direction: Direction,
    },
    /// Rotate rock → scissors → paper.
    #[serde(rename_all = "camelCase")]
    StateShiftLeft {
        /// Avatar to switch.
        entity_id: EntityId,
    },
    /// Rotate rock → paper → scissors.
    #[serde(rename_all = "camelCase")]
    StateShiftRight {
        /// Avatar to switch.
        entity_id: EntityId,
    },
    /// Pick a state directly.
    #[serde(rename_all = "camelCase")]
    StateChange {
        /// Avatar to switch.
        entity_id: EntityId,
        /// Target state.
        state: RpsState,
    },
}

impl Command {
    /// Target entity.
    pub fn entity_id(&self) -> EntityId {
        match self {
            Command::Move { entity_id, .. }
            | Command::Stop { entity_id, .. }
            | Command::StateShiftLeft { entity_id }
            | Command::StateShiftRight { entity_id }
            | Command::StateChange { entity_id, .. } => *entity_id,
        }
    }

    /// Wire name.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Move { .. } => "MOVE",
            Command::Stop { .. } => "STOP",
            Command::StateShiftLeft { .. } => "STATE_SHIFT_LEFT",
            Command::StateShiftRight { .. } => "STATE_SHIFT_RIGHT",
            Command::StateChange { .. } => "STATE_CHANGE",
        }
    }
}

/// A command plus who sent it.
#[derive(Clone, Debug, PartialEq)]
pub struct QueuedCommand {
    /// Player the command arrived from.
    pub sender: PlayerId,
    /// The command itself.
    pub command: Command,
}

/// Cloneable push handle.
#[derive(Clone, Debug)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<QueuedCommand>,
}

impl CommandSender {
    /// Enqueue for the next tick. Never blocks.
    pub fn push(&self, sender: PlayerId, command: Command) {
        if self.tx.send(QueuedCommand { sender, command }).is_err() {
            debug!(sender = %sender.short(), "command queue closed, dropping command");
        }
    }
}

/// Receiving end, owned by the session.
#[derive(Debug)]
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<QueuedCommand>,
    rx: mpsc::UnboundedReceiver<QueuedCommand>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    /// Empty queue.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// New push handle.
    pub fn sender(&self) -> CommandSender {
        CommandSender { tx: self.tx.clone() }
    }

    /// Enqueue directly.
    pub fn push(&self, sender: PlayerId, command: Command) {
        if self.tx.send(QueuedCommand { sender, command }).is_err() {
            debug!(sender = %sender.short(), "command queue closed, dropping command");
        }
    }

    /// Take everything queued so far, in arrival order.
    pub fn drain(&mut self) -> Vec<QueuedCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = self.rx.try_recv() {
            out.push(cmd);
        }
        out
    }
}

/// Apply one command. Returns whether anything changed.
///
/// Commands whose sender does not own the target, or whose preconditions do
/// not hold, are dropped without an error.
pub fn apply_command(store: &mut EntityStore, queued: &QueuedCommand, cooldown_max_ticks: u32) -> bool {
    let id = queued.command.entity_id();
    let Some(entity) = store.get(id) else {
        debug!(entity = %id, "command for unknown entity");
        return false;
    };
    let Some(avatar) = entity.avatar.as_ref() else {
        return false;
    };
    if avatar.player_id != queued.sender {
        debug!(
            entity = %id,
            sender = %queued.sender.short(),
            command = queued.command.kind(),
            "dropping command for entity not owned by sender"
        );
        return false;
    }

    let state = avatar.state;
    let physics = entity.hit_box.is_some_and(|hb| hb.physics_enabled);
    let can_switch = state.can_switch_state() && avatar.state_data.state_switch_cooldown_ticks == 0;

    match &queued.command {
        Command::Move { direction, .. } => {
            if state != AvatarState::Alive || !physics {
                return false;
            }
            let (vx, vy) = direction.velocity();
            let Some(t) = store.get_mut(id).and_then(|e| e.transform.as_mut()) else {
                return false;
            };
            if vx != 0.0 {
                t.x_vel = vx;
            }
            if vy != 0.0 {
                t.y_vel = vy;
            }
            true
        }
        Command::Stop { direction, .. } => {
            let (vx, vy) = direction.velocity();
            let Some(t) = entity.transform else { return false };
            // Only cancel motion that is still going the named way
            let stop_x = vx != 0.0 && t.x_vel != 0.0 && t.x_vel.signum() == vx;
            let stop_y = vy != 0.0 && t.y_vel != 0.0 && t.y_vel.signum() == vy;
            if !stop_x && !stop_y {
                return false;
            }
            if let Some(t) = store.get_mut(id).and_then(|e| e.transform.as_mut()) {
                if stop_x {
                    t.x_vel = 0.0;
                }
                if stop_y {
                    t.y_vel = 0.0;
                }
            }
            true
        }
        Command::StateShiftLeft { .. } | Command::StateShiftRight { .. } | Command::StateChange { .. } => {
            if !can_switch {
                return false;
            }
            let Some(avatar) = store.get_mut(id).and_then(|e| e.avatar.as_mut()) else {
                return false;
            };
            let current = avatar.state_data.rock_paper_scissors;
            avatar.state_data.rock_paper_scissors = match &queued.command {
                Command::StateShiftLeft { .. } => current.shift_left(),
                Command::StateShiftRight { .. } => current.shift_right(),
                Command::StateChange { state, .. } => *state,
                _ => current,
            };
            avatar.state_data.state_switch_cooldown_ticks = cooldown_max_ticks;
            avatar.state_data.auto_state_switched = false;
            if avatar.state == AvatarState::BreakingTie {
                avatar.state_data.tie_breaker_choice_locked = true;
            }
            true
        }
    }
}
