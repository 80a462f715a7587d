//! Cluster Resolution
//!
//! A tie is never just a pair: every avatar reachable through recorded
//! collisions joins the same cohort.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::game::components::AvatarState;
use crate::game::entity::{EntityId, EntityStore};

/// Undirected collision graph view.
pub trait CollisionGraph {
    /// Ids touching `id` this tick.
    fn neighbours(&self, id: EntityId) -> Vec<EntityId>;
}

impl CollisionGraph for BTreeMap<EntityId, BTreeSet<EntityId>> {
    fn neighbours(&self, id: EntityId) -> Vec<EntityId> {
        self.get(&id).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }
}

/// Only alive avatars take part; anyone who already lost this tick is skipped.
impl CollisionGraph for EntityStore {
    fn neighbours(&self, id: EntityId) -> Vec<EntityId> {
        let Some(avatar) = self.get(id).and_then(|e| e.avatar.as_ref()) else {
            return Vec::new();
        };
        avatar
            .state_data
            .collisions_with_other_players
            .iter()
            .copied()
            .filter(|other| {
                self.get(*other)
                    .and_then(|e| e.avatar.as_ref())
                    .is_some_and(|a| a.state == AvatarState::Alive)
            })
            .collect()
    }
}

/// Breadth-first transitive closure from `seed`. Result is sorted and
/// always contains the seed.
pub fn resolve_cluster_members<G: CollisionGraph + ?Sized>(graph: &G, seed: EntityId) -> Vec<EntityId> {
    let mut visited = BTreeSet::new();
    let mut queue = VecDeque::new();
    visited.insert(seed);
    queue.push_back(seed);

    while let Some(current) = queue.pop_front() {
        for next in graph.neighbours(current) {
            if visited.insert(next) {
                queue.push_back(next);
            }
        }
    }

    visited.into_iter().collect()
}
