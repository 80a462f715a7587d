//! Scripted Bot
//!
//! A behavior tree over the newest broadcast. Priorities, highest first:
//!
//! ```text
//! Fallback
//! ├── Sequence [ not in play?       → halt ]
//! ├── Sequence [ tie-break pending? → lock a choice ]
//! ├── Sequence [ in tie-break?      → halt ]
//! ├── Sequence [ threat in sight?   → counter it or flee ]
//! ├── Sequence [ prey in sight?     → chase ]
//! └── wander (runs for WANDER_MS)
//! ```
//!
//! Commands go through the session's [`CommandSender`] exactly as a human
//! client's would, and only when the bot's intent changes.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::agent::slot::LatestSlot;
use crate::agent::Agent;
use crate::behavior::{Action, BoxedNode, Condition, Fallback, Sequence, Tree};
use crate::core::rng::SessionRng;
use crate::game::command::{Command, CommandSender, Direction};
use crate::game::components::{AvatarState, PlayerId, RpsState};
use crate::game::entity::EntityId;
use crate::network::protocol::GameStateUpdate;

/// How far the bot looks for other avatars, in tiles.
pub const SIGHT_RADIUS: f32 = 6.0;

/// Length of one wander leg.
pub const WANDER_MS: u64 = 400;

/// Ticks to wait for a sent state change to show up before sending another.
const STATE_CHANGE_SETTLE_TICKS: u64 = 3;

/// The bot's own avatar as seen in the latest broadcast.
#[derive(Debug, Clone, Copy)]
struct Own {
    id: EntityId,
    pos: (f32, f32),
    moving: bool,
    state: AvatarState,
    rps: RpsState,
    cooldown: u32,
    locked: bool,
}

/// Shared context of a bot's tree.
pub struct BotContext {
    bot_id: PlayerId,
    commands: CommandSender,
    inbox: LatestSlot<Arc<GameStateUpdate>>,
    latest: Option<Arc<GameStateUpdate>>,
    heading: Option<Direction>,
    state_sent_at: Option<u64>,
    rng: SessionRng,
}

impl BotContext {
    fn new(bot_id: PlayerId, commands: CommandSender, rng: SessionRng) -> Self {
        Self {
            bot_id,
            commands,
            inbox: LatestSlot::new(),
            latest: None,
            heading: None,
            state_sent_at: None,
            rng,
        }
    }

    /// Direction the bot last asked to move in.
    pub fn heading(&self) -> Option<Direction> {
        self.heading
    }

    /// Newest broadcast the tree has seen.
    pub fn latest(&self) -> Option<&GameStateUpdate> {
        self.latest.as_deref()
    }

    fn refresh(&mut self) {
        if let Some(update) = self.inbox.take() {
            self.latest = Some(update);
        }
        // Respawn and tie-breaks zero velocity behind our back
        if self.own().map_or(true, |own| !own.moving) {
            self.heading = None;
        }
    }

    fn current_tick(&self) -> u64 {
        self.latest.as_ref().map_or(0, |u| u.game_context.current_tick)
    }

    fn own(&self) -> Option<Own> {
        let update = self.latest.as_ref()?;
        update.game_context.entities.iter().find_map(|(id, e)| {
            let avatar = e.avatar.as_ref().filter(|a| a.player_id == self.bot_id)?;
            let t = e.transform?;
            Some(Own {
                id: *id,
                pos: (t.x_pos, t.y_pos),
                moving: t.is_moving(),
                state: avatar.state,
                rps: avatar.state_data.rock_paper_scissors,
                cooldown: avatar.state_data.state_switch_cooldown_ticks,
                locked: avatar.state_data.tie_breaker_choice_locked,
            })
        })
    }

    /// Nearest alive opponent in sight whose state satisfies `pred`.
    fn nearest_where(&self, pred: impl Fn(RpsState) -> bool) -> Option<((f32, f32), RpsState)> {
        let own = self.own()?;
        let update = self.latest.as_ref()?;
        update
            .game_context
            .entities
            .values()
            .filter_map(|e| {
                let avatar = e.avatar.as_ref()?;
                let t = e.transform?;
                let rps = avatar.state_data.rock_paper_scissors;
                if avatar.player_id == self.bot_id || avatar.state != AvatarState::Alive || !pred(rps) {
                    return None;
                }
                let d2 = (t.x_pos - own.pos.0).powi(2) + (t.y_pos - own.pos.1).powi(2);
                (d2 <= SIGHT_RADIUS * SIGHT_RADIUS).then_some((d2, (t.x_pos, t.y_pos), rps))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, pos, rps)| (pos, rps))
    }

    fn nearest_threat(&self) -> Option<((f32, f32), RpsState)> {
        let mine = self.own()?.rps;
        self.nearest_where(|theirs| theirs.beats(mine))
    }

    fn nearest_prey(&self) -> Option<((f32, f32), RpsState)> {
        let mine = self.own()?.rps;
        self.nearest_where(|theirs| mine.beats(theirs))
    }

    fn in_play(&self) -> bool {
        self.own()
            .is_some_and(|own| matches!(own.state, AvatarState::Alive | AvatarState::BreakingTie))
    }

    fn breaking_tie(&self) -> bool {
        self.own().is_some_and(|own| own.state == AvatarState::BreakingTie)
    }

    fn state_change_settling(&self) -> bool {
        self.state_sent_at
            .is_some_and(|at| self.current_tick() < at + STATE_CHANGE_SETTLE_TICKS)
    }

    fn send(&self, command: Command) {
        self.commands.push(self.bot_id, command);
    }

    fn steer(&mut self, direction: Direction) {
        let Some(own) = self.own() else { return };
        if self.heading == Some(direction) {
            return;
        }
        if let Some(old) = self.heading.take() {
            self.send(Command::Stop { entity_id: own.id, direction: old });
        }
        self.send(Command::Move { entity_id: own.id, direction });
        self.heading = Some(direction);
    }

    fn halt(&mut self) {
        let Some(own) = self.own() else {
            self.heading = None;
            return;
        };
        if let Some(old) = self.heading.take() {
            self.send(Command::Stop { entity_id: own.id, direction: old });
        }
    }

    fn change_state(&mut self, own: &Own, state: RpsState) -> bool {
        if own.cooldown > 0 || self.state_change_settling() {
            return false;
        }
        self.send(Command::StateChange { entity_id: own.id, state });
        self.state_sent_at = Some(self.current_tick());
        true
    }
}

fn direction_towards(from: (f32, f32), to: (f32, f32)) -> Direction {
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    if dx.abs() >= dy.abs() {
        if dx >= 0.0 { Direction::Right } else { Direction::Left }
    } else if dy >= 0.0 {
        Direction::Down
    } else {
        Direction::Up
    }
}

fn opposite(direction: Direction) -> Direction {
    match direction {
        Direction::Up => Direction::Down,
        Direction::Down => Direction::Up,
        Direction::Left => Direction::Right,
        Direction::Right => Direction::Left,
    }
}

fn lock_tie_choice(ctx: &mut BotContext) -> bool {
    let Some(own) = ctx.own() else { return false };
    let Some(choice) = RpsState::from_index(ctx.rng.next_int(3)) else { return false };
    ctx.change_state(&own, choice)
}

fn evade(ctx: &mut BotContext) -> bool {
    let (Some(own), Some((threat_pos, threat_rps))) = (ctx.own(), ctx.nearest_threat()) else {
        return false;
    };
    if !ctx.change_state(&own, threat_rps.counter()) {
        ctx.steer(opposite(direction_towards(own.pos, threat_pos)));
    }
    true
}

fn chase(ctx: &mut BotContext) -> bool {
    let (Some(own), Some((prey_pos, _))) = (ctx.own(), ctx.nearest_prey()) else {
        return false;
    };
    ctx.steer(direction_towards(own.pos, prey_pos));
    true
}

fn build_tree() -> BoxedNode<BotContext> {
    let halt = || {
        Box::new(Action::immediate(|ctx: &mut BotContext| {
            ctx.halt();
            true
        })) as BoxedNode<BotContext>
    };

    let idle = Sequence::new(vec![
        Box::new(Condition::new(|ctx: &BotContext| !ctx.in_play())) as BoxedNode<BotContext>,
        halt(),
    ]);
    let tie_choice = Sequence::new(vec![
        Box::new(Condition::new(|ctx: &BotContext| {
            ctx.own().is_some_and(|own| own.state == AvatarState::BreakingTie && !own.locked)
        })) as BoxedNode<BotContext>,
        Box::new(Action::immediate(lock_tie_choice)),
    ]);
    let tie_wait = Sequence::new(vec![
        Box::new(Condition::new(BotContext::breaking_tie)) as BoxedNode<BotContext>,
        halt(),
    ]);
    let threatened = Sequence::new(vec![
        Box::new(Condition::new(|ctx: &BotContext| ctx.nearest_threat().is_some()))
            as BoxedNode<BotContext>,
        Box::new(Action::immediate(evade)),
    ]);
    let hunting = Sequence::new(vec![
        Box::new(Condition::new(|ctx: &BotContext| ctx.nearest_prey().is_some()))
            as BoxedNode<BotContext>,
        Box::new(Action::immediate(chase)),
    ]);
    let wander = Action::task(|ctx: &mut BotContext| {
        let direction = match ctx.rng.next_int(4) {
            0 => Direction::Up,
            1 => Direction::Down,
            2 => Direction::Left,
            _ => Direction::Right,
        };
        ctx.steer(direction);
        async {
            tokio::time::sleep(Duration::from_millis(WANDER_MS)).await;
            true
        }
    });

    Box::new(Fallback::new(vec![
        Box::new(idle) as BoxedNode<BotContext>,
        Box::new(tie_choice),
        Box::new(tie_wait),
        Box::new(threatened),
        Box::new(hunting),
        Box::new(wander),
    ]))
}

/// Behavior-tree driven agent.
pub struct BotAgent {
    bot_id: PlayerId,
    tree: Tree<BotContext>,
}

impl BotAgent {
    /// Bot issuing commands as `bot_id`.
    pub fn new(bot_id: PlayerId, commands: CommandSender, seed: u64) -> Self {
        let mut tree = Tree::with(build_tree(), BotContext::new(bot_id, commands, SessionRng::new(seed)));
        tree.set_before_tick(BotContext::refresh);
        debug!(bot = %bot_id.short(), "bot created");
        Self { bot_id, tree }
    }

    /// Tree context.
    pub fn context(&self) -> Option<&BotContext> {
        self.tree.context()
    }
}

impl Agent for BotAgent {
    fn bot_id(&self) -> PlayerId {
        self.bot_id
    }

    fn tick(&mut self, update: &Arc<GameStateUpdate>) {
        if let Some(ctx) = self.tree.context_mut() {
            ctx.inbox.push(Arc::clone(update));
        }
        if let Err(e) = self.tree.tick() {
            warn!(bot = %self.bot_id.short(), error = %e, "bot tree failed to tick");
        }
    }
}
