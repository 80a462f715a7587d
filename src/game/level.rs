//! Level Provider
//!
//! Where the map comes from. Tile-file parsing is somebody else's job; the
//! simulation only needs the four queries on [`Level`]. [`ArenaLevel`] is a
//! procedural square arena used by default and in tests.

/// A map tile reported by a level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tile {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
    /// Sprite shown by clients.
    pub sprite_id: u32,
}

/// Map source consumed by world generation.
pub trait Level: Send + Sync {
    /// Report every solid tile.
    fn find_barrier_tiles(&self, cb: &mut dyn FnMut(Tile));

    /// Report every walkable decorative tile.
    fn find_terrain_tiles(&self, cb: &mut dyn FnMut(Tile));

    /// Respawn locations, in tile coordinates.
    fn spawn_points(&self) -> Vec<(u32, u32)>;

    /// Side length of the square grid.
    fn grid_width(&self) -> u32;
}

/// Square arena: walls on the border, a pillar lattice inside.
#[derive(Clone, Debug)]
pub struct ArenaLevel {
    width: u32,
    pillar_spacing: u32,
}

const WALL_SPRITE: u32 = 1;
const PILLAR_SPRITE: u32 = 2;
const FLOOR_SPRITE: u32 = 10;

impl Default for ArenaLevel {
    fn default() -> Self {
        Self::new(24)
    }
}

impl ArenaLevel {
    /// Arena of `width` tiles (at least 8).
    pub fn new(width: u32) -> Self {
        Self { width: width.max(8), pillar_spacing: 5 }
    }

    /// Open arena with border walls only.
    pub fn open(width: u32) -> Self {
        Self { width: width.max(8), pillar_spacing: 0 }
    }

    fn is_border(&self, x: u32, y: u32) -> bool {
        x == 0 || y == 0 || x == self.width - 1 || y == self.width - 1
    }

    fn is_pillar(&self, x: u32, y: u32) -> bool {
        self.pillar_spacing > 0
            && !self.is_border(x, y)
            && x % self.pillar_spacing == 0
            && y % self.pillar_spacing == 0
            && !self.spawn_points().contains(&(x, y))
    }

    fn sprite_at(&self, x: u32, y: u32) -> Option<u32> {
        if self.is_border(x, y) {
            Some(WALL_SPRITE)
        } else if self.is_pillar(x, y) {
            Some(PILLAR_SPRITE)
        } else {
            None
        }
    }
}

impl Level for ArenaLevel {
    fn find_barrier_tiles(&self, cb: &mut dyn FnMut(Tile)) {
        for y in 0..self.width {
            for x in 0..self.width {
                if let Some(sprite_id) = self.sprite_at(x, y) {
                    cb(Tile { x, y, sprite_id });
                }
            }
        }
    }

    fn find_terrain_tiles(&self, cb: &mut dyn FnMut(Tile)) {
        for y in 0..self.width {
            for x in 0..self.width {
                if self.sprite_at(x, y).is_none() {
                    cb(Tile { x, y, sprite_id: FLOOR_SPRITE + (x + y) % 3 });
                }
            }
        }
    }

    fn spawn_points(&self) -> Vec<(u32, u32)> {
        let far = self.width - 2;
        let mid = self.width / 2;
        vec![(1, 1), (far, 1), (1, far), (far, far), (mid, 1), (mid, far), (1, mid), (far, mid)]
    }

    fn grid_width(&self) -> u32 {
        self.width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiles_partition_grid() {
        let level = ArenaLevel::new(12);
        let mut barriers = Vec::new();
        let mut terrain = Vec::new();
        level.find_barrier_tiles(&mut |t| barriers.push((t.x, t.y)));
        level.find_terrain_tiles(&mut |t| terrain.push((t.x, t.y)));

        assert_eq!(barriers.len() + terrain.len(), 144);
        assert!(barriers.iter().all(|b| !terrain.contains(b)));
    }

    #[test]
    fn test_spawn_points_walkable() {
        let level = ArenaLevel::new(20);
        let mut barriers = Vec::new();
        level.find_barrier_tiles(&mut |t| barriers.push((t.x, t.y)));
        for sp in level.spawn_points() {
            assert!(!barriers.contains(&sp), "spawn point {:?} inside a wall", sp);
        }
    }

    #[test]
    fn test_open_arena_has_only_walls() {
        let level = ArenaLevel::open(10);
        let mut count = 0;
        level.find_barrier_tiles(&mut |_| count += 1);
        assert_eq!(count, 36);
    }
}
