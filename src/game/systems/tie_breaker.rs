//! Tie-Breaker System
//!
//! Drives every active cohort's bracket one tick and applies the results:
//! match losers are defeated, the champion goes back into play, and the cohort
//! entity disappears once its final is decided.

use tracing::{debug, info};

use crate::core::rng::SessionRng;
use crate::game::components::{AvatarState, RpsState};
use crate::game::entity::{EntityId, EntityStore};
use crate::game::systems::{credit_kill, defeat_avatar, resting_speed};
use crate::game::world::World;
use crate::tiebreak::fsm::{mid_match_tie_breaker_fsm, RoundParticipants};

/// Cohort driver.
#[derive(Debug, Default)]
pub struct TieBreakerSystem;

/// Bracket members as seen through the entity store.
struct StoreParticipants<'a> {
    store: &'a mut EntityStore,
    rng: &'a mut SessionRng,
}

impl StoreParticipants<'_> {
    fn breaking_tie(&self, member: EntityId) -> Option<&crate::game::components::Avatar> {
        self.store
            .get(member)
            .and_then(|e| e.avatar.as_ref())
            .filter(|a| a.state == AvatarState::BreakingTie)
    }
}

impl RoundParticipants for StoreParticipants<'_> {
    fn choice(&self, member: EntityId) -> Option<RpsState> {
        self.breaking_tie(member).map(|a| a.state_data.rock_paper_scissors)
    }

    fn is_locked_in(&self, member: EntityId) -> bool {
        self.breaking_tie(member).is_some_and(|a| a.state_data.tie_breaker_choice_locked)
    }

    fn force_random_choice(&mut self, member: EntityId) {
        if self.breaking_tie(member).is_none() {
            return;
        }
        let pick = RpsState::from_index(self.rng.next_int(3)).unwrap_or_default();
        if let Some(avatar) = self.store.get_mut(member).and_then(|e| e.avatar.as_mut()) {
            avatar.state_data.rock_paper_scissors = pick;
            avatar.state_data.auto_state_switched = true;
        }
    }

    fn clear_lock(&mut self, member: EntityId) {
        if !self.is_locked_in(member) {
            return;
        }
        if let Some(avatar) = self.store.get_mut(member).and_then(|e| e.avatar.as_mut()) {
            avatar.state_data.tie_breaker_choice_locked = false;
        }
    }
}

impl TieBreakerSystem {
    /// Run one tick.
    pub fn run(&mut self, world: &mut World) {
        for cohort_id in world.entities.ids_where(|e| e.tie_breaker.is_some()) {
            self.advance(world, cohort_id);
        }
    }

    fn advance(&mut self, world: &mut World, cohort_id: EntityId) {
        let Some(before) = world.entities.get(cohort_id).and_then(|e| e.tie_breaker.clone()) else {
            return;
        };
        let mut tie_breaker = before.clone();
        let mut champion = None;

        let outcomes = {
            let mut participants = StoreParticipants {
                store: &mut world.entities,
                rng: &mut world.rng,
            };
            mid_match_tie_breaker_fsm(&mut tie_breaker, &mut participants, &mut |c| champion = Some(c))
        };

        for outcome in &outcomes {
            credit_kill(&mut world.entities, outcome.winner);
            defeat_avatar(&mut world.entities, outcome.loser, world.game_mode);
            debug!(
                cohort = %cohort_id,
                winner = %outcome.winner,
                loser = %outcome.loser,
                "tie-breaker match decided"
            );
        }

        if let Some(champion) = champion {
            for member in &tie_breaker.ids_of_cohort_members {
                let Some(avatar) = world.entities.get(*member).and_then(|e| e.avatar.as_ref()) else {
                    continue;
                };
                if avatar.state != AvatarState::BreakingTie {
                    continue;
                }
                if let Some(avatar) = world.entities.get_mut(*member).and_then(|e| e.avatar.as_mut()) {
                    avatar.state = AvatarState::Alive;
                    avatar.speed = resting_speed(avatar.state_data.active_power_up);
                    avatar.state_data.auto_state_switched = false;
                    avatar.state_data.tie_breaker_choice_locked = false;
                }
            }
            world.entities.remove(cohort_id);
            info!(cohort = %cohort_id, champion = %champion, "tie-breaker finished");
            return;
        }

        if tie_breaker != before {
            if let Some(entity) = world.entities.get_mut(cohort_id) {
                entity.tie_breaker = Some(tie_breaker);
            }
        }
    }
}
