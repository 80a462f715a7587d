//! Power-Up System
//!
//! Spawns pickups on free terrain, ages and expires them, hands them to the
//! first alive avatar that touches them, and times out speed boosts.

use std::collections::BTreeMap;

use tracing::debug;

use crate::game::collision::Aabb;
use crate::game::components::{AvatarState, HitBox, PowerUp, PowerUpType, Transform};
use crate::game::config::PowerUpConfig;
use crate::game::entity::{Entity, EntityId};
use crate::game::world::{World, POWER_UP_SIZE};

/// Pickup bookkeeping.
#[derive(Debug, Default)]
pub struct PowerUpSystem {
    ticks_since_spawn: u32,
    /// Remaining ticks of each running speed boost.
    speed_effects: BTreeMap<EntityId, u32>,
}

impl PowerUpSystem {
    /// Run one tick.
    pub fn run(&mut self, world: &mut World, config: &PowerUpConfig) {
        self.tick_effects(world);
        self.age_pickups(world, config);
        self.claim_pickups(world, config);
        self.maybe_spawn(world, config);
    }

    fn tick_effects(&mut self, world: &mut World) {
        let mut expired = Vec::new();
        for (id, remaining) in self.speed_effects.iter_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                expired.push(*id);
            }
        }

        for id in expired {
            self.speed_effects.remove(&id);
            let boosted = world
                .entities
                .get(id)
                .and_then(|e| e.avatar.as_ref())
                .is_some_and(|a| a.state_data.active_power_up == Some(PowerUpType::Speed));
            if !boosted {
                continue;
            }
            if let Some(avatar) = world.entities.get_mut(id).and_then(|e| e.avatar.as_mut()) {
                avatar.state_data.active_power_up = None;
                if avatar.state != AvatarState::BreakingTie {
                    avatar.speed = 1;
                }
            }
        }

        // Avatars that left the session take their timers with them
        self.speed_effects.retain(|id, _| world.entities.contains(*id));
    }

    fn age_pickups(&mut self, world: &mut World, config: &PowerUpConfig) {
        for id in world.entities.ids_where(|e| e.power_up.is_some()) {
            let Some(power_up) = world.entities.get_mut(id).and_then(|e| e.power_up.as_mut()) else {
                continue;
            };
            power_up.ticks_since_created += 1;
            let age = power_up.ticks_since_created;

            if age >= config.lifetime_ticks {
                world.entities.remove(id);
                debug!(entity = %id, "power-up expired");
            } else if !power_up.is_active && age >= config.activation_delay_ticks {
                power_up.is_active = true;
            }
        }
    }

    fn claim_pickups(&mut self, world: &mut World, config: &PowerUpConfig) {
        let pickups: Vec<(EntityId, PowerUpType, Aabb)> = world
            .entities
            .iter()
            .filter_map(|(id, e)| {
                let p = e.power_up.as_ref().filter(|p| p.is_active)?;
                Some((id, p.power_up_type, Aabb::of(e.transform.as_ref()?, e.hit_box.as_ref()?)))
            })
            .collect();
        if pickups.is_empty() {
            return;
        }

        let mut takers: Vec<(EntityId, Aabb)> = world
            .entities
            .iter()
            .filter_map(|(id, e)| {
                let a = e.avatar.as_ref()?;
                if a.state != AvatarState::Alive || a.state_data.active_power_up.is_some() {
                    return None;
                }
                Some((id, Aabb::of(e.transform.as_ref()?, e.hit_box.as_ref()?)))
            })
            .collect();

        for (pickup_id, kind, pickup_box) in pickups {
            let Some(pos) = takers.iter().position(|(_, b)| b.overlaps(&pickup_box)) else {
                continue;
            };
            let (avatar_id, _) = takers.remove(pos);

            world.entities.remove(pickup_id);
            if let Some(avatar) = world.entities.get_mut(avatar_id).and_then(|e| e.avatar.as_mut()) {
                avatar.state_data.active_power_up = Some(kind);
                if kind == PowerUpType::Speed {
                    avatar.speed = 2;
                    self.speed_effects.insert(avatar_id, config.effect_duration_ticks);
                }
            }
            debug!(avatar = %avatar_id, power_up = ?kind, "power-up claimed");
        }
    }

    fn maybe_spawn(&mut self, world: &mut World, config: &PowerUpConfig) {
        self.ticks_since_spawn += 1;
        if self.ticks_since_spawn < config.spawn_interval_ticks {
            return;
        }
        self.ticks_since_spawn = 0;

        let existing: Vec<(f32, f32)> = world
            .entities
            .iter()
            .filter(|(_, e)| e.power_up.is_some())
            .filter_map(|(_, e)| e.transform.map(|t| (t.x_pos.floor(), t.y_pos.floor())))
            .collect();
        if existing.len() >= config.max_power_ups {
            return;
        }

        let mut tiles: Vec<(f32, f32)> = world
            .entities
            .iter()
            .filter(|(_, e)| e.terrain.is_some())
            .filter_map(|(_, e)| e.transform.map(|t| (t.x_pos, t.y_pos)))
            .filter(|tile| !existing.contains(tile))
            .collect();
        if tiles.is_empty() {
            tiles = world.spawn_positions();
        }

        let Some(&(x, y)) = world.rng.choose(&tiles) else { return };
        let kind = if world.rng.next_bool(0.5) { PowerUpType::Shield } else { PowerUpType::Speed };
        let pad = (1.0 - POWER_UP_SIZE) / 2.0;
        let entity = Entity::new()
            .with_transform(Transform::at(x + pad, y + pad))
            .with_hit_box(HitBox::visual(POWER_UP_SIZE, POWER_UP_SIZE))
            .with_power_up(PowerUp::new(kind));

        match world.entities.instantiate(entity) {
            Ok(id) => debug!(entity = %id, power_up = ?kind, x, y, "power-up spawned"),
            Err(e) => debug!(error = %e, "power-up spawn rejected"),
        }
    }
}
