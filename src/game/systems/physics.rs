//! Physics System
//!
//! Velocity integration with per-axis barrier blocking, grid clamping, and
//! the avatar-vs-avatar contact sets the combat systems read.

use std::collections::{BTreeMap, BTreeSet};

use crate::game::collision::{barrier_boxes, clamp_to_grid, hits_any, overlapping_pairs, Aabb};
use crate::game::components::{speed_multiplier, AvatarState};
use crate::game::entity::EntityId;
use crate::game::world::World;

/// Stateless; kept as a struct so the pipeline treats every system alike.
#[derive(Debug, Default)]
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Run one tick.
    pub fn run(&mut self, world: &mut World) {
        self.integrate(world);
        self.recompute_contacts(world);
    }

    fn integrate(&mut self, world: &mut World) {
        let obstacles = barrier_boxes(&world.entities);
        let dt = world.delta_seconds();
        let grid_width = world.grid_width;

        let movers = world.entities.ids_where(|e| {
            e.barrier.is_none()
                && e.transform.is_some_and(|t| t.is_moving())
                && e.avatar.as_ref().map_or(true, |a| a.state == AvatarState::Alive)
        });

        for id in movers {
            let Some(entity) = world.entities.get(id) else { continue };
            let Some(t) = entity.transform else { continue };
            let mult = speed_multiplier(entity.avatar.as_ref().map(|a| a.speed));
            let dx = t.x_vel * dt * mult;
            let dy = t.y_vel * dt * mult;

            let (mut x, mut y) = (t.x_pos + dx, t.y_pos + dy);
            if let Some(hb) = entity.hit_box {
                let footprint = Aabb::of(&t, &hb);
                let blocking = hb.physics_enabled;

                // One axis at a time so walls let you slide
                x = if blocking && hits_any(&footprint.at(t.x_pos + dx, t.y_pos), &obstacles) {
                    t.x_pos
                } else {
                    t.x_pos + dx
                };
                y = if blocking && hits_any(&footprint.at(x, t.y_pos + dy), &obstacles) {
                    t.y_pos
                } else {
                    t.y_pos + dy
                };
                (x, y) = clamp_to_grid(x, y, &hb, grid_width);
            }

            if x != t.x_pos || y != t.y_pos {
                if let Some(t) = world.entities.get_mut(id).and_then(|e| e.transform.as_mut()) {
                    t.x_pos = x;
                    t.y_pos = y;
                }
            }
        }
    }

    fn recompute_contacts(&mut self, world: &mut World) {
        let mut boxes = Vec::new();
        let mut stale = Vec::new();
        for (id, e) in world.entities.iter() {
            let Some(avatar) = e.avatar.as_ref() else { continue };
            match (avatar.state, e.transform, e.hit_box) {
                (AvatarState::Alive, Some(t), Some(hb)) => boxes.push((id, Aabb::of(&t, &hb))),
                _ if !avatar.state_data.collisions_with_other_players.is_empty() => stale.push(id),
                _ => {}
            }
        }

        let mut contacts: BTreeMap<EntityId, BTreeSet<EntityId>> =
            boxes.iter().map(|(id, _)| (*id, BTreeSet::new())).collect();
        for (a, b) in overlapping_pairs(&boxes) {
            contacts.entry(a).or_default().insert(b);
            contacts.entry(b).or_default().insert(a);
        }

        for (id, set) in contacts {
            let unchanged = world
                .entities
                .get(id)
                .and_then(|e| e.avatar.as_ref())
                .is_some_and(|a| a.state_data.collisions_with_other_players == set);
            if unchanged {
                continue;
            }
            if let Some(avatar) = world.entities.get_mut(id).and_then(|e| e.avatar.as_mut()) {
                avatar.state_data.collisions_with_other_players = set;
            }
        }

        for id in stale {
            if let Some(avatar) = world.entities.get_mut(id).and_then(|e| e.avatar.as_mut()) {
                avatar.state_data.collisions_with_other_players.clear();
            }
        }
    }
}
