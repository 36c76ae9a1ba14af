//! Procedural tile map: generation, lookups, and tile ownership

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;
use uuid::Uuid;

/// Grid coordinate of a tile. Tile centers sit on integer coordinates and
/// each tile spans `[x - 0.5, x + 0.5] x [y - 0.5, y + 0.5]`.
pub type TileCoord = (i16, i16);

/// Tile index of a continuous coordinate.
pub fn tile_index(p: f64) -> i16 {
    (p + 0.5).floor() as i16
}

pub const GRID_SIZE: i16 = 50;

const GENERATOR_COUNT_MIN: usize = 8;
const GENERATOR_COUNT_MAX: usize = 12;
const GENERATOR_SPACING: f64 = 15.0;
const GENERATOR_ATTEMPTS: u32 = 1000;

const CLUSTER_COUNT_MIN: usize = 15;
const CLUSTER_COUNT_MAX: usize = 25;
const CLUSTER_SIZE_MIN: usize = 3;
const CLUSTER_SIZE_MAX: usize = 10;
const CLUSTER_GENERATOR_CLEARANCE: f64 = 3.0;

const HOLE_COUNT_MIN: usize = 5;
const HOLE_COUNT_MAX: usize = 10;
const HOLE_GENERATOR_CLEARANCE: f64 = 5.0;
const HOLE_ATTEMPTS: u32 = 100;

const MIRROR_CHANCE: f64 = 0.3;

const SPAWN_MARGIN: i16 = 10;
const SPAWN_CLEARING: i16 = 5;

/// Kinds of tile. `Boundary` is the synthetic sentinel returned for
/// out-of-bounds lookups; it is never stored in the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileKind {
    Walkable,
    Generator,
    Wall,
    Mirror,
    Hole,
    Boundary,
}

impl TileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TileKind::Walkable => "walkable",
            TileKind::Generator => "generator",
            TileKind::Wall => "wall",
            TileKind::Mirror => "mirror",
            TileKind::Hole => "hole",
            TileKind::Boundary => "boundary",
        }
    }

    /// Tiles that can carry an owner.
    pub fn is_capturable(&self) -> bool {
        matches!(self, TileKind::Walkable | TileKind::Generator)
    }

    /// Tiles a player circle may not overlap.
    pub fn blocks_movement(&self) -> bool {
        matches!(
            self,
            TileKind::Wall | TileKind::Mirror | TileKind::Hole | TileKind::Boundary
        )
    }
}

/// Static tile grid for one match, produced by [`GameMap::generate`].
#[derive(Debug, Clone)]
pub struct GameMap {
    pub size: i16,
    tiles: HashMap<TileCoord, TileKind>,
    pub generators: Vec<TileCoord>,
    pub spawn_points: Vec<TileCoord>,
}

impl GameMap {
    /// Generate a map, retrying until every spawn point can reach every
    /// other over walkable/generator tiles.
    pub fn generate(rng: &mut ChaCha8Rng) -> Self {
        let mut attempts = 0u32;
        loop {
            let map = Self::generate_once(rng);
            if map.spawns_connected() {
                if attempts > 0 {
                    debug!(retries = attempts, "map connectivity achieved after retries");
                }
                return map;
            }
            attempts += 1;
        }
    }

    fn generate_once(rng: &mut ChaCha8Rng) -> Self {
        let size = GRID_SIZE;
        let mut tiles: HashMap<TileCoord, TileKind> = HashMap::with_capacity((size * size) as usize);

        for y in 0..size {
            for x in 0..size {
                tiles.insert((x, y), TileKind::Walkable);
            }
        }

        // Outer ring
        for i in 0..size {
            tiles.insert((i, 0), TileKind::Wall);
            tiles.insert((i, size - 1), TileKind::Wall);
            tiles.insert((0, i), TileKind::Wall);
            tiles.insert((size - 1, i), TileKind::Wall);
        }

        // Generators, uniformly placed with a minimum pairwise spacing.
        // Attempts are a shared budget; a crowded roll just yields fewer.
        let generator_target = rng.gen_range(GENERATOR_COUNT_MIN..=GENERATOR_COUNT_MAX);
        let mut generators: Vec<TileCoord> = Vec::with_capacity(generator_target);
        let mut attempts = 0;
        while generators.len() < generator_target && attempts < GENERATOR_ATTEMPTS {
            attempts += 1;
            let x = rng.gen_range(SPAWN_MARGIN..=size - SPAWN_MARGIN - 1);
            let y = rng.gen_range(SPAWN_MARGIN..=size - SPAWN_MARGIN - 1);
            if generators
                .iter()
                .all(|&g| coord_distance(g, (x, y)) >= GENERATOR_SPACING)
            {
                generators.push((x, y));
                tiles.insert((x, y), TileKind::Generator);
            }
        }

        // Wall clusters grown by random walk, keeping clear of generators
        let cluster_count = rng.gen_range(CLUSTER_COUNT_MIN..=CLUSTER_COUNT_MAX);
        for _ in 0..cluster_count {
            let mut cx = rng.gen_range(5..=size - 6);
            let mut cy = rng.gen_range(5..=size - 6);
            let cluster_size = rng.gen_range(CLUSTER_SIZE_MIN..=CLUSTER_SIZE_MAX);
            let mut placed = 0;
            for _ in 0..cluster_size * 10 {
                if tiles.get(&(cx, cy)) == Some(&TileKind::Walkable)
                    && generators
                        .iter()
                        .all(|&g| coord_distance(g, (cx, cy)) >= CLUSTER_GENERATOR_CLEARANCE)
                {
                    tiles.insert((cx, cy), TileKind::Wall);
                    placed += 1;
                    if placed == cluster_size {
                        break;
                    }
                }
                let (dx, dy) = match rng.gen_range(0..4) {
                    0 => (1, 0),
                    1 => (-1, 0),
                    2 => (0, 1),
                    _ => (0, -1),
                };
                cx = (cx + dx).clamp(1, size - 2);
                cy = (cy + dy).clamp(1, size - 2);
            }
        }

        // Holes
        let hole_count = rng.gen_range(HOLE_COUNT_MIN..=HOLE_COUNT_MAX);
        for _ in 0..hole_count {
            for _ in 0..HOLE_ATTEMPTS {
                let x = rng.gen_range(1..=size - 2);
                let y = rng.gen_range(1..=size - 2);
                if tiles.get(&(x, y)) == Some(&TileKind::Walkable)
                    && generators
                        .iter()
                        .all(|&g| coord_distance(g, (x, y)) >= HOLE_GENERATOR_CLEARANCE)
                {
                    tiles.insert((x, y), TileKind::Hole);
                    break;
                }
            }
        }

        // Convert a share of walls into mirrors
        let wall_coords: Vec<TileCoord> = tiles
            .iter()
            .filter(|(_, k)| **k == TileKind::Wall)
            .map(|(c, _)| *c)
            .collect();
        for coord in wall_coords {
            if rng.gen::<f64>() < MIRROR_CHANCE {
                tiles.insert(coord, TileKind::Mirror);
            }
        }

        // Spawn points in the four corner quadrants, each with a forced
        // walkable clearing (overwrites anything, generators included)
        let m = SPAWN_MARGIN;
        let spawn_points = vec![
            (m, m),
            (size - 1 - m, m),
            (m, size - 1 - m),
            (size - 1 - m, size - 1 - m),
        ];
        for &(sx, sy) in &spawn_points {
            for dy in -SPAWN_CLEARING..=SPAWN_CLEARING {
                for dx in -SPAWN_CLEARING..=SPAWN_CLEARING {
                    let coord = (sx + dx, sy + dy);
                    if tiles.contains_key(&coord) {
                        tiles.insert(coord, TileKind::Walkable);
                    }
                }
            }
        }

        // Clearings may have paved over generators; the list tracks the grid
        let generators: Vec<TileCoord> = generators
            .into_iter()
            .filter(|c| tiles.get(c) == Some(&TileKind::Generator))
            .collect();

        Self {
            size,
            tiles,
            generators,
            spawn_points,
        }
    }

    /// Hand-built map for exercising the simulation against known layouts.
    #[cfg(test)]
    pub fn from_tiles(
        size: i16,
        tiles: HashMap<TileCoord, TileKind>,
        generators: Vec<TileCoord>,
        spawn_points: Vec<TileCoord>,
    ) -> Self {
        Self {
            size,
            tiles,
            generators,
            spawn_points,
        }
    }

    /// Tile kind at a grid coordinate; out-of-bounds resolves to `Boundary`.
    pub fn kind_at(&self, x: i16, y: i16) -> TileKind {
        self.tiles.get(&(x, y)).copied().unwrap_or(TileKind::Boundary)
    }

    /// Iterate all stored tiles.
    pub fn tiles(&self) -> impl Iterator<Item = (&TileCoord, &TileKind)> {
        self.tiles.iter()
    }

    /// Flood-fill from the first spawn over walkable/generator tiles and
    /// confirm every other spawn is reached.
    fn spawns_connected(&self) -> bool {
        let Some(&start) = self.spawn_points.first() else {
            return false;
        };
        let mut visited: HashSet<TileCoord> = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(start);
        queue.push_back(start);

        while let Some((x, y)) = queue.pop_front() {
            for (dx, dy) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
                let next = (x + dx, y + dy);
                if visited.contains(&next) {
                    continue;
                }
                if self.kind_at(next.0, next.1).is_capturable() {
                    visited.insert(next);
                    queue.push_back(next);
                }
            }
        }

        self.spawn_points.iter().all(|s| visited.contains(s))
    }
}

fn coord_distance(a: TileCoord, b: TileCoord) -> f64 {
    let dx = (a.0 - b.0) as f64;
    let dy = (a.1 - b.1) as f64;
    (dx * dx + dy * dy).sqrt()
}

/// Ownership of capturable tiles. Keys are exactly the walkable/generator
/// coordinates of the grid; changes are tracked per tick for the delta
/// broadcast.
#[derive(Debug, Clone)]
pub struct TileOwners {
    owners: HashMap<TileCoord, Option<Uuid>>,
    changed: HashMap<TileCoord, Option<Uuid>>,
}

impl TileOwners {
    pub fn new(map: &GameMap) -> Self {
        let owners = map
            .tiles()
            .filter(|(_, k)| k.is_capturable())
            .map(|(c, _)| (*c, None))
            .collect();
        Self {
            owners,
            changed: HashMap::new(),
        }
    }

    /// Assign an owner. No-ops on non-capturable coordinates and on
    /// writes that do not change the current owner.
    pub fn capture(&mut self, coord: TileCoord, owner: Uuid) {
        match self.owners.get_mut(&coord) {
            Some(current) if *current != Some(owner) => {
                *current = Some(owner);
                self.changed.insert(coord, Some(owner));
            }
            _ => {}
        }
    }

    pub fn owner_of(&self, coord: TileCoord) -> Option<Uuid> {
        self.owners.get(&coord).copied().flatten()
    }

    pub fn contains(&self, coord: TileCoord) -> bool {
        self.owners.contains_key(&coord)
    }

    /// Tiles whose owner changed since the last drain, for the delta.
    pub fn drain_changes(&mut self) -> HashMap<TileCoord, Option<Uuid>> {
        std::mem::take(&mut self.changed)
    }

    pub fn total_capturable(&self) -> usize {
        self.owners.len()
    }

    pub fn owned_count(&self, owner: Uuid) -> usize {
        self.owners.values().filter(|o| **o == Some(owner)).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TileCoord, &Option<Uuid>)> {
        self.owners.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn map_for_seed(seed: u64) -> GameMap {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        GameMap::generate(&mut rng)
    }

    #[test]
    fn spawns_are_mutually_reachable() {
        for seed in 0..25 {
            let map = map_for_seed(seed);
            assert!(map.spawns_connected(), "seed {} lost connectivity", seed);
        }
    }

    #[test]
    fn border_ring_blocks_except_under_clearings() {
        let map = map_for_seed(7);
        for i in 0..GRID_SIZE {
            for coord in [(i, 0), (i, GRID_SIZE - 1), (0, i), (GRID_SIZE - 1, i)] {
                let kind = map.kind_at(coord.0, coord.1);
                assert!(
                    matches!(kind, TileKind::Wall | TileKind::Mirror),
                    "border tile {:?} was {:?}",
                    coord,
                    kind
                );
            }
        }
    }

    #[test]
    fn out_of_bounds_reads_are_boundary() {
        let map = map_for_seed(1);
        assert_eq!(map.kind_at(-1, 5), TileKind::Boundary);
        assert_eq!(map.kind_at(GRID_SIZE, 5), TileKind::Boundary);
        assert_eq!(map.kind_at(5, GRID_SIZE), TileKind::Boundary);
    }

    #[test]
    fn spawn_clearings_are_walkable() {
        let map = map_for_seed(3);
        assert_eq!(map.spawn_points.len(), 4);
        for &(sx, sy) in &map.spawn_points {
            for dy in -5..=5 {
                for dx in -5..=5 {
                    assert_eq!(
                        map.kind_at(sx + dx, sy + dy),
                        TileKind::Walkable,
                        "clearing around {:?} contains an obstacle at offset ({}, {})",
                        (sx, sy),
                        dx,
                        dy
                    );
                }
            }
        }
    }

    #[test]
    fn generator_list_tracks_grid() {
        for seed in 0..10 {
            let map = map_for_seed(seed);
            for &g in &map.generators {
                assert_eq!(map.kind_at(g.0, g.1), TileKind::Generator);
            }
            let grid_generators = map
                .tiles()
                .filter(|(_, k)| **k == TileKind::Generator)
                .count();
            assert_eq!(grid_generators, map.generators.len());
        }
    }

    #[test]
    fn generators_keep_minimum_spacing() {
        let map = map_for_seed(11);
        for (i, &a) in map.generators.iter().enumerate() {
            for &b in &map.generators[i + 1..] {
                assert!(coord_distance(a, b) >= GENERATOR_SPACING);
            }
        }
    }

    #[test]
    fn same_seed_reproduces_the_map() {
        let a = map_for_seed(42);
        let b = map_for_seed(42);
        assert_eq!(a.generators, b.generators);
        assert_eq!(a.spawn_points, b.spawn_points);
        for (coord, kind) in a.tiles() {
            assert_eq!(b.kind_at(coord.0, coord.1), *kind);
        }
    }

    #[test]
    fn ownership_keys_are_exactly_the_capturable_tiles() {
        let map = map_for_seed(5);
        let owners = TileOwners::new(&map);
        for (coord, kind) in map.tiles() {
            assert_eq!(owners.contains(*coord), kind.is_capturable());
        }
    }

    #[test]
    fn capture_tracks_changes_and_ignores_noops() {
        let map = map_for_seed(5);
        let mut owners = TileOwners::new(&map);
        let spawn = map.spawn_points[0];
        let player = Uuid::new_v4();

        owners.capture(spawn, player);
        owners.capture(spawn, player); // repeat write, no new change
        owners.capture((0, 0), player); // wall, ignored

        let changes = owners.drain_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.get(&spawn), Some(&Some(player)));
        assert!(owners.drain_changes().is_empty());
        assert_eq!(owners.owned_count(player), 1);
    }

    #[test]
    fn tile_index_respects_half_open_tile_spans() {
        assert_eq!(tile_index(2.0), 2);
        assert_eq!(tile_index(2.49), 2);
        assert_eq!(tile_index(2.5), 3);
        assert_eq!(tile_index(1.51), 2);
        assert_eq!(tile_index(0.4), 0);
    }
}
