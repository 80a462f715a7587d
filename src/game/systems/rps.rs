//! Rock/Paper/Scissors Resolution
//!
//! Cools down state switches, settles every decisive contact, and turns ties
//! into tie-breaker cohorts.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::game::components::{AvatarState, CohortState, TieBreaker};
use crate::game::config::SimulationConfig;
use crate::game::entity::{Entity, EntityId};
use crate::game::systems::{credit_kill, defeat_avatar};
use crate::game::world::World;
use crate::tiebreak::bracket::create_tie_breaker_bracket;
use crate::tiebreak::cluster::resolve_cluster_members;
use crate::tiebreak::fsm::TieBreakerState;

/// Combat resolution.
#[derive(Debug, Default)]
pub struct RpsSystem;

impl RpsSystem {
    /// Run one tick.
    pub fn run(&mut self, world: &mut World, config: &SimulationConfig) {
        cool_down(world);
        let ties = settle_contacts(world, config);
        form_cohorts(world, config, ties);
    }
}

fn cool_down(world: &mut World) {
    let cooling = world.entities.ids_where(|e| {
        e.avatar.as_ref().is_some_and(|a| a.state_data.state_switch_cooldown_ticks > 0)
    });
    for id in cooling {
        if let Some(avatar) = world.entities.get_mut(id).and_then(|e| e.avatar.as_mut()) {
            avatar.state_data.state_switch_cooldown_ticks -= 1;
        }
    }
}

fn is_alive(world: &World, id: EntityId) -> bool {
    world.entities.get(id).and_then(|e| e.avatar.as_ref()).is_some_and(|a| a.is_alive())
}

/// Resolve decisive pairs; return the tie seeds.
fn settle_contacts(world: &mut World, config: &SimulationConfig) -> Vec<EntityId> {
    let mut pairs = Vec::new();
    for (id, e) in world.entities.iter() {
        let Some(avatar) = e.avatar.as_ref().filter(|a| a.is_alive()) else { continue };
        for other in avatar.state_data.collisions_with_other_players.range(id..) {
            if *other != id {
                pairs.push((id, *other));
            }
        }
    }

    let mut ties = Vec::new();
    for (a, b) in pairs {
        // An earlier pair may already have taken one of them out
        if !is_alive(world, a) || !is_alive(world, b) {
            continue;
        }
        let state_of = |id: EntityId| {
            world.entities.get(id).and_then(|e| e.avatar.as_ref()).map(|a| a.state_data.rock_paper_scissors)
        };
        let (Some(sa), Some(sb)) = (state_of(a), state_of(b)) else { continue };

        if sa == sb {
            ties.push(a);
            continue;
        }
        let (winner, loser) = if sa.beats(sb) { (a, b) } else { (b, a) };
        credit_kill(&mut world.entities, winner);
        defeat_avatar(&mut world.entities, loser, config.game_mode);
        debug!(winner = %winner, loser = %loser, "contact resolved");
    }
    ties
}

fn form_cohorts(world: &mut World, config: &SimulationConfig, seeds: Vec<EntityId>) {
    let mut claimed = BTreeSet::new();
    for seed in seeds {
        if claimed.contains(&seed) || !is_alive(world, seed) {
            continue;
        }
        let members = resolve_cluster_members(&world.entities, seed);
        claimed.extend(members.iter().copied());

        let bracket = match create_tie_breaker_bracket(&members) {
            Ok(bracket) => bracket,
            Err(e) => {
                debug!(seed = %seed, error = %e, "no cohort formed");
                continue;
            }
        };

        for member in &members {
            let Some(entity) = world.entities.get_mut(*member) else { continue };
            if let Some(t) = entity.transform.as_mut() {
                t.x_vel = 0.0;
                t.y_vel = 0.0;
            }
            if let Some(avatar) = entity.avatar.as_mut() {
                avatar.state = AvatarState::BreakingTie;
                avatar.speed = 0;
                avatar.state_data.tie_breaker_choice_locked = false;
                avatar.state_data.auto_state_switched = false;
                avatar.state_data.collisions_with_other_players.clear();
            }
        }

        let tie_breaker = TieBreaker {
            ids_of_cohort_members: members.clone(),
            state: CohortState::Active,
            tournament_bracket: bracket,
            tie_breaker_state: TieBreakerState::new(config.tie_breaker),
            created_at_tick: world.current_tick,
        };
        match world.entities.instantiate(Entity::new().with_tie_breaker(tie_breaker)) {
            Ok(id) => debug!(cohort = %id, size = members.len(), "tie-breaker cohort formed"),
            Err(e) => warn!(error = %e, "tie-breaker cohort rejected"),
        }
    }
}
