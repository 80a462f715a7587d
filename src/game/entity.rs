//! Entity Store
//!
//! Maps entity ids to a fixed record of optional components. Every mutable
//! borrow goes through [`EntityStore::get_mut`], which records the id in the
//! modified set; removals are recorded in the removed set. Both sets feed the
//! delta broadcast and are cleared only when a checkpoint is taken.

use std::collections::{BTreeMap, BTreeSet};
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::components::{
    Avatar, Barrier, HitBox, KillStreakScoreBoard, PowerUp, RoundTimer, SpawnPoint,
    Terrain, TieBreaker, Transform,
};

/// Opaque entity identifier. Never reused within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The component bag of one entity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Position and velocity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,
    /// Collision footprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_box: Option<HitBox>,
    /// Player body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Avatar>,
    /// Solid tile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barrier: Option<Barrier>,
    /// Floor tile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terrain: Option<Terrain>,
    /// Respawn location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_point: Option<SpawnPoint>,
    /// Pickup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_up: Option<PowerUp>,
    /// Tie-breaker cohort.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tie_breaker: Option<TieBreaker>,
    /// Session-wide kill streak records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_streak_score_board: Option<KillStreakScoreBoard>,
    /// Elimination round countdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_timer: Option<RoundTimer>,
}

impl Entity {
    /// Empty bag, for builder-style construction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a transform.
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Attach a hit box.
    pub fn with_hit_box(mut self, hit_box: HitBox) -> Self {
        self.hit_box = Some(hit_box);
        self
    }

    /// Attach an avatar.
    pub fn with_avatar(mut self, avatar: Avatar) -> Self {
        self.avatar = Some(avatar);
        self
    }

    /// Attach a barrier marker.
    pub fn with_barrier(mut self, barrier: Barrier) -> Self {
        self.barrier = Some(barrier);
        self
    }

    /// Attach a terrain marker.
    pub fn with_terrain(mut self, terrain: Terrain) -> Self {
        self.terrain = Some(terrain);
        self
    }

    /// Attach a spawn point marker.
    pub fn with_spawn_point(mut self) -> Self {
        self.spawn_point = Some(SpawnPoint {});
        self
    }

    /// Attach a power-up.
    pub fn with_power_up(mut self, power_up: PowerUp) -> Self {
        self.power_up = Some(power_up);
        self
    }

    /// Attach a tie-breaker.
    pub fn with_tie_breaker(mut self, tie_breaker: TieBreaker) -> Self {
        self.tie_breaker = Some(tie_breaker);
        self
    }
}

/// Entity creation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EntityError {
    /// A component violates its schema.
    #[error("invalid component {component}: {reason}")]
    InvalidComponent {
        /// Component name.
        component: &'static str,
        /// What was wrong.
        reason: String,
    },
}

fn invalid(component: &'static str, reason: impl Into<String>) -> EntityError {
    EntityError::InvalidComponent { component, reason: reason.into() }
}

/// Reject component values that could never be produced by the simulation.
fn validate_entity(entity: &Entity, max_cooldown_ticks: u32) -> Result<(), EntityError> {
    if let Some(t) = &entity.transform {
        if ![t.x_pos, t.y_pos, t.x_vel, t.y_vel].iter().all(|v| v.is_finite()) {
            return Err(invalid("transform", "non-finite value"));
        }
    }
    if let Some(hb) = &entity.hit_box {
        if !(hb.width > 0.0 && hb.height > 0.0) {
            return Err(invalid("hitBox", "dimensions must be positive"));
        }
    }
    if let Some(avatar) = &entity.avatar {
        if avatar.speed > Avatar::MAX_SPEED {
            return Err(invalid("avatar", format!("speed {} out of range", avatar.speed)));
        }
        if avatar.state_data.state_switch_cooldown_ticks > max_cooldown_ticks {
            return Err(invalid("avatar", "cooldown above maximum"));
        }
        if entity.transform.is_none() {
            return Err(invalid("avatar", "avatar requires a transform"));
        }
    }
    if let Some(tb) = &entity.tie_breaker {
        if tb.ids_of_cohort_members.len() < 2 {
            return Err(invalid("tieBreaker", "cohort needs at least two members"));
        }
    }
    Ok(())
}

/// Id → component-bag store with modified/removed tracking.
#[derive(Debug, Clone)]
pub struct EntityStore {
    entities: BTreeMap<EntityId, Entity>,
    next_id: u64,
    modified: BTreeSet<EntityId>,
    removed: BTreeSet<EntityId>,
    max_cooldown_ticks: u32,
}

impl EntityStore {
    /// Create an empty store.
    pub fn new(max_cooldown_ticks: u32) -> Self {
        Self {
            entities: BTreeMap::new(),
            next_id: 1,
            modified: BTreeSet::new(),
            removed: BTreeSet::new(),
            max_cooldown_ticks,
        }
    }

    /// Validate and insert a component bag under a fresh id.
    pub fn instantiate(&mut self, entity: Entity) -> Result<EntityId, EntityError> {
        validate_entity(&entity, self.max_cooldown_ticks)?;

        let id = EntityId(self.next_id);
        self.next_id += 1;
        self.entities.insert(id, entity);
        self.modified.insert(id);
        Ok(id)
    }

    /// Delete an entity and record it as removed.
    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        let entity = self.entities.remove(&id)?;
        self.modified.remove(&id);
        self.removed.insert(id);
        Some(entity)
    }

    /// Read-only access.
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Mutable access; marks the entity modified.
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        let entity = self.entities.get_mut(&id)?;
        self.modified.insert(id);
        Some(entity)
    }

    /// Whether the id is live.
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Iterate all entities in id order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.entities.iter().map(|(id, e)| (*id, e))
    }

    /// Ids of entities matching a predicate, in id order.
    pub fn ids_where(&self, mut pred: impl FnMut(&Entity) -> bool) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|(_, e)| pred(e))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Find the avatar entity owned by a player.
    pub fn avatar_of(&self, player_id: &crate::game::components::PlayerId) -> Option<EntityId> {
        self.entities
            .iter()
            .find(|(_, e)| e.avatar.as_ref().is_some_and(|a| &a.player_id == player_id))
            .map(|(id, _)| *id)
    }

    /// First entity carrying a component selected by `pred`.
    pub fn find(&self, mut pred: impl FnMut(&Entity) -> bool) -> Option<EntityId> {
        self.entities.iter().find(|(_, e)| pred(e)).map(|(id, _)| *id)
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Ids modified since the last checkpoint.
    pub fn modified(&self) -> &BTreeSet<EntityId> {
        &self.modified
    }

    /// Ids removed since the last checkpoint.
    pub fn removed(&self) -> &BTreeSet<EntityId> {
        &self.removed
    }

    /// Clone of every entity (checkpoint payload).
    pub fn snapshot(&self) -> BTreeMap<EntityId, Entity> {
        self.entities.clone()
    }

    /// Clone of the modified entities (delta payload).
    pub fn modified_snapshot(&self) -> BTreeMap<EntityId, Entity> {
        self.modified
            .iter()
            .filter_map(|id| self.entities.get(id).map(|e| (*id, e.clone())))
            .collect()
    }

    /// Forget all tracking (called when a checkpoint goes out).
    pub fn clear_tracking(&mut self) {
        self.modified.clear();
        self.removed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::components::{PlayerId, RpsState};

    fn avatar_entity() -> Entity {
        Entity::new()
            .with_transform(Transform::at(1.0, 1.0))
            .with_hit_box(HitBox::solid(0.8, 0.8))
            .with_avatar(Avatar::new(PlayerId::new([1; 16]), 3, RpsState::Rock))
    }

    #[test]
    fn test_instantiate_assigns_unique_ids() {
        let mut store = EntityStore::new(10);
        let a = store.instantiate(Entity::new().with_spawn_point()).unwrap();
        let b = store.instantiate(Entity::new().with_spawn_point()).unwrap();
        assert_ne!(a, b);
        assert!(store.modified().contains(&a));
        assert!(store.modified().contains(&b));
    }

    #[test]
    fn test_get_mut_marks_modified() {
        let mut store = EntityStore::new(10);
        let id = store.instantiate(avatar_entity()).unwrap();
        store.clear_tracking();
        assert!(store.modified().is_empty());

        let _ = store.get(id);
        assert!(store.modified().is_empty(), "reads must not mark");

        store.get_mut(id).unwrap().transform.as_mut().unwrap().x_vel = 1.0;
        assert!(store.modified().contains(&id));
    }

    #[test]
    fn test_remove_tracks_and_unmarks() {
        let mut store = EntityStore::new(10);
        let id = store.instantiate(avatar_entity()).unwrap();
        assert!(store.remove(id).is_some());
        assert!(!store.modified().contains(&id));
        assert!(store.removed().contains(&id));
        assert!(store.remove(id).is_none());

        // Ids are not reused
        let next = store.instantiate(Entity::new().with_spawn_point()).unwrap();
        assert_ne!(next, id);
    }

    #[test]
    fn test_schema_violations_rejected() {
        let mut store = EntityStore::new(10);

        let mut fast = avatar_entity();
        fast.avatar.as_mut().unwrap().speed = 3;
        assert!(store.instantiate(fast).is_err());

        let mut cooled = avatar_entity();
        cooled.avatar.as_mut().unwrap().state_data.state_switch_cooldown_ticks = 11;
        assert!(store.instantiate(cooled).is_err());

        let no_transform = Entity::new()
            .with_avatar(Avatar::new(PlayerId::new([2; 16]), 3, RpsState::Paper));
        assert!(store.instantiate(no_transform).is_err());

        let flat = Entity::new().with_hit_box(HitBox::solid(0.0, 1.0));
        assert!(store.instantiate(flat).is_err());

        assert!(store.is_empty(), "rejected entities must not be inserted");
    }

    #[test]
    fn test_avatar_lookup() {
        let mut store = EntityStore::new(10);
        let id = store.instantiate(avatar_entity()).unwrap();
        assert_eq!(store.avatar_of(&PlayerId::new([1; 16])), Some(id));
        assert_eq!(store.avatar_of(&PlayerId::new([9; 16])), None);
    }
}
