//! Collision Detection
//!
//! Axis-aligned boxes anchored at the transform's top-left corner.

use crate::game::components::{HitBox, Transform};
use crate::game::entity::{EntityId, EntityStore};

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    /// Left edge.
    pub x: f32,
    /// Top edge.
    pub y: f32,
    /// Width.
    pub w: f32,
    /// Height.
    pub h: f32,
}

impl Aabb {
    /// Box of an entity.
    #[inline]
    pub fn of(transform: &Transform, hit_box: &HitBox) -> Self {
        Self { x: transform.x_pos, y: transform.y_pos, w: hit_box.width, h: hit_box.height }
    }

    /// Same box moved to another corner.
    #[inline]
    pub fn at(self, x: f32, y: f32) -> Self {
        Self { x, y, ..self }
    }

    /// Strict overlap; touching edges do not collide.
    #[inline]
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.x < other.x + other.w
            && other.x < self.x + self.w
            && self.y < other.y + other.h
            && other.y < self.y + self.h
    }
}

/// Boxes of every physics-enabled barrier.
pub fn barrier_boxes(store: &EntityStore) -> Vec<Aabb> {
    store
        .iter()
        .filter(|(_, e)| e.barrier.is_some())
        .filter_map(|(_, e)| match (&e.transform, &e.hit_box) {
            (Some(t), Some(hb)) if hb.physics_enabled => Some(Aabb::of(t, hb)),
            _ => None,
        })
        .collect()
}

/// Whether `candidate` hits any of `obstacles`.
#[inline]
pub fn hits_any(candidate: &Aabb, obstacles: &[Aabb]) -> bool {
    obstacles.iter().any(|o| candidate.overlaps(o))
}

/// Clamp a box's corner so it stays inside a `grid_width` square.
pub fn clamp_to_grid(x: f32, y: f32, hit_box: &HitBox, grid_width: u32) -> (f32, f32) {
    let limit = grid_width as f32;
    (
        x.clamp(0.0, (limit - hit_box.width).max(0.0)),
        y.clamp(0.0, (limit - hit_box.height).max(0.0)),
    )
}

/// Every overlapping pair among `boxes`, lower id first, in id order.
pub fn overlapping_pairs(boxes: &[(EntityId, Aabb)]) -> Vec<(EntityId, EntityId)> {
    let mut pairs = Vec::new();
    for (i, (a, box_a)) in boxes.iter().enumerate() {
        for (b, box_b) in &boxes[i + 1..] {
            if box_a.overlaps(box_b) {
                pairs.push((*a, *b));
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(x: f32, y: f32) -> Aabb {
        Aabb { x, y, w: 1.0, h: 1.0 }
    }

    #[test]
    fn test_overlap() {
        assert!(unit(0.0, 0.0).overlaps(&unit(0.5, 0.5)));
        assert!(!unit(0.0, 0.0).overlaps(&unit(1.0, 0.0)), "touching is not overlapping");
        assert!(!unit(0.0, 0.0).overlaps(&unit(3.0, 3.0)));
    }

    #[test]
    fn test_clamp_to_grid() {
        let hb = HitBox::solid(0.8, 0.8);
        assert_eq!(clamp_to_grid(-1.0, 5.0, &hb, 10), (0.0, 5.0));
        let (x, y) = clamp_to_grid(12.0, 9.9, &hb, 10);
        assert!((x - 9.2).abs() < 1e-5);
        assert!((y - 9.2).abs() < 1e-5);
    }

    #[test]
    fn test_overlapping_pairs_order() {
        let boxes = vec![
            (EntityId(1), unit(0.0, 0.0)),
            (EntityId(2), unit(0.5, 0.0)),
            (EntityId(3), unit(5.0, 5.0)),
            (EntityId(4), unit(0.9, 0.9)),
        ];
        assert_eq!(
            overlapping_pairs(&boxes),
            vec![(EntityId(1), EntityId(2)), (EntityId(1), EntityId(4)), (EntityId(2), EntityId(4))]
        );
    }
}
