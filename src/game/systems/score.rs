//! Score System
//!
//! Kill streaks feed the session scoreboard. In elimination rounds the round
//! timer runs down here and the round is declared over.

use std::collections::BTreeMap;

use tracing::info;

use crate::game::components::{AvatarState, PlayerId};
use crate::game::entity::EntityId;
use crate::game::world::{GameMode, World};

#[derive(Debug, Default, Clone, Copy)]
struct Streak {
    last_kills: u32,
    current: u32,
}

/// Streak tracking.
#[derive(Debug, Default)]
pub struct ScoreSystem {
    streaks: BTreeMap<EntityId, Streak>,
}

impl ScoreSystem {
    /// Run one tick.
    pub fn run(&mut self, world: &mut World) {
        self.update_streaks(world);
        if world.game_mode == GameMode::Elimination && !world.round_over {
            update_round(world);
        }
    }

    fn update_streaks(&mut self, world: &mut World) {
        self.streaks.retain(|id, _| world.entities.contains(*id));

        let mut improved = Vec::new();
        for (id, e) in world.entities.iter() {
            let Some(avatar) = e.avatar.as_ref() else { continue };
            let streak = self.streaks.entry(id).or_default();
            let kills = avatar.state_data.kills;
            streak.current += kills.saturating_sub(streak.last_kills);
            streak.last_kills = kills;

            // A streak ends with the avatar leaving play
            if !matches!(avatar.state, AvatarState::Alive | AvatarState::BreakingTie) {
                streak.current = 0;
            }
            if streak.current > 0 {
                improved.push((avatar.player_id, streak.current));
            }
        }

        let Some(board_id) = world.scoreboard_id() else { return };
        let best = |world: &World, player: PlayerId| {
            world
                .entities
                .get(board_id)
                .and_then(|e| e.kill_streak_score_board.as_ref())
                .and_then(|b| b.highest_kill_streak_by_player_id.get(&player).copied())
                .unwrap_or(0)
        };
        for (player, current) in improved {
            if current <= best(world, player) {
                continue;
            }
            if let Some(board) = world
                .entities
                .get_mut(board_id)
                .and_then(|e| e.kill_streak_score_board.as_mut())
            {
                board.highest_kill_streak_by_player_id.insert(player, current);
            }
        }
    }
}

fn update_round(world: &mut World) {
    let delta = world.delta_time;
    let mut expired = false;
    if let Some(timer_id) = world.round_timer_id() {
        if let Some(timer) = world.entities.get_mut(timer_id).and_then(|e| e.round_timer.as_mut()) {
            timer.ms_remaining = (timer.ms_remaining - delta).max(0.0);
            expired = timer.ms_remaining <= 0.0;
        }
    }

    let (total, standing) = world
        .entities
        .iter()
        .filter_map(|(_, e)| e.avatar.as_ref())
        .fold((0usize, 0usize), |(total, standing), a| {
            (total + 1, standing + usize::from(a.state != AvatarState::Spectating))
        });
    let last_one_standing = total >= 2 && standing <= 1;

    if expired || last_one_standing {
        world.round_over = true;
        info!(
            tick = world.current_tick,
            timer_expired = expired,
            standing,
            "elimination round over"
        );
    }
}
