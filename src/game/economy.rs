//! Economy: passive and generator income, coin-drop lifecycle

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use uuid::Uuid;

use super::map::{GameMap, TileOwners};
use super::player::PlayerState;
use crate::util::time::{secs_to_ticks, TICKS_PER_SECOND};

/// Base income per second, before generator bonuses.
const PASSIVE_INCOME: f64 = 1.0;
/// Extra income per second per owned generator.
const GENERATOR_INCOME: f64 = 3.0;

/// Probability per second of attempting a coin-drop spawn.
const DROP_CHANCE_PER_SEC: f64 = 0.05;
/// Soft cap checked at spawn time; existing drops are never evicted.
const MAX_ACTIVE_DROPS: usize = 10;
/// Drops land uniformly in `[DROP_AREA_MARGIN, size - DROP_AREA_MARGIN - 1]`.
const DROP_AREA_MARGIN: f64 = 10.0;

pub const PICKUP_RADIUS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinKind {
    Bronze,
    Silver,
    Gold,
}

impl CoinKind {
    pub fn value(&self) -> f64 {
        match self {
            CoinKind::Bronze => 10.0,
            CoinKind::Silver => 25.0,
            CoinKind::Gold => 50.0,
        }
    }

    /// Seconds between the drop's announcement and its availability.
    pub fn telegraph_secs(&self) -> f64 {
        match self {
            CoinKind::Bronze => 3.0,
            CoinKind::Silver => 5.0,
            CoinKind::Gold => 7.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CoinKind::Bronze => "bronze",
            CoinKind::Silver => "silver",
            CoinKind::Gold => "gold",
        }
    }
}

/// A coin drop, telegraphed ahead of its spawn tick.
#[derive(Debug, Clone)]
pub struct CoinDrop {
    pub id: Uuid,
    pub kind: CoinKind,
    pub value: f64,
    pub x: f64,
    pub y: f64,
    pub spawn_at_tick: u64,
    pub spawned: bool,
    pub collected: bool,
}

/// A completed pickup, for the per-player collection events.
#[derive(Debug, Clone)]
pub struct Pickup {
    pub drop_id: Uuid,
    pub user_id: Uuid,
    pub amount: f64,
}

pub struct EconomySystem;

impl EconomySystem {
    /// Credit tick income: one coin per second plus three per owned
    /// generator, clamped at the coin cap inside the player.
    pub fn apply_income(
        players: &mut HashMap<Uuid, PlayerState>,
        order: &[Uuid],
        map: &GameMap,
        owners: &TileOwners,
        dt: f64,
    ) {
        for user_id in order {
            let Some(player) = players.get_mut(user_id) else {
                continue;
            };
            let generator_count = map
                .generators
                .iter()
                .filter(|g| owners.owner_of(**g) == Some(*user_id))
                .count();
            player.add_coins((PASSIVE_INCOME + GENERATOR_INCOME * generator_count as f64) * dt);
        }
    }

    /// Roll for a new drop this tick. Returns the telegraphed drop (not yet
    /// spawned) or `None`.
    pub fn maybe_spawn_drop(
        rng: &mut ChaCha8Rng,
        drops: &[CoinDrop],
        tick: u64,
        map_size: i16,
    ) -> Option<CoinDrop> {
        if drops.len() >= MAX_ACTIVE_DROPS {
            return None;
        }
        if rng.gen::<f64>() >= DROP_CHANCE_PER_SEC / TICKS_PER_SECOND as f64 {
            return None;
        }

        let kind = match rng.gen::<f64>() {
            r if r < 0.6 => CoinKind::Bronze,
            r if r < 0.9 => CoinKind::Silver,
            _ => CoinKind::Gold,
        };
        let hi = map_size as f64 - DROP_AREA_MARGIN - 1.0;
        let x = rng.gen_range(DROP_AREA_MARGIN..=hi);
        let y = rng.gen_range(DROP_AREA_MARGIN..=hi);

        Some(CoinDrop {
            id: Uuid::new_v4(),
            kind,
            value: kind.value(),
            x,
            y,
            spawn_at_tick: tick + secs_to_ticks(kind.telegraph_secs()),
            spawned: false,
            collected: false,
        })
    }

    /// Flip telegraphed drops whose spawn tick arrived. Returns their ids.
    pub fn promote_spawned(drops: &mut [CoinDrop], tick: u64) -> Vec<Uuid> {
        let mut spawned = Vec::new();
        for drop in drops.iter_mut() {
            if !drop.spawned && tick >= drop.spawn_at_tick {
                drop.spawned = true;
                spawned.push(drop.id);
            }
        }
        spawned
    }

    /// Collect spawned drops: every player within the pickup radius shares
    /// the value equally. Collected drops are removed from the list.
    pub fn resolve_pickups(
        drops: &mut Vec<CoinDrop>,
        players: &mut HashMap<Uuid, PlayerState>,
        order: &[Uuid],
    ) -> Vec<Pickup> {
        let mut pickups = Vec::new();

        for drop in drops.iter_mut() {
            if !drop.spawned || drop.collected {
                continue;
            }
            let collectors: Vec<Uuid> = order
                .iter()
                .filter(|id| {
                    players.get(*id).is_some_and(|p| {
                        let dx = p.x - drop.x;
                        let dy = p.y - drop.y;
                        (dx * dx + dy * dy).sqrt() <= PICKUP_RADIUS
                    })
                })
                .copied()
                .collect();
            if collectors.is_empty() {
                continue;
            }

            let share = drop.value / collectors.len() as f64;
            for user_id in collectors {
                if let Some(player) = players.get_mut(&user_id) {
                    player.add_coins(share);
                }
                pickups.push(Pickup {
                    drop_id: drop.id,
                    user_id,
                    amount: share,
                });
            }
            drop.collected = true;
        }

        drops.retain(|d| !d.collected);
        pickups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::{TileKind, TileOwners};
    use crate::game::player::{PLAYER_COLORS, COIN_CAP};
    use rand::SeedableRng;

    fn open_map_with_generators(generators: Vec<(i16, i16)>) -> GameMap {
        let mut tiles = HashMap::new();
        for y in 0..20 {
            for x in 0..20 {
                tiles.insert((x, y), TileKind::Walkable);
            }
        }
        for &g in &generators {
            tiles.insert(g, TileKind::Generator);
        }
        GameMap::from_tiles(20, tiles, generators, vec![(1, 1)])
    }

    fn player_at(x: f64, y: f64) -> PlayerState {
        PlayerState::new(
            Uuid::new_v4(),
            "earner".to_string(),
            None,
            PLAYER_COLORS[0].to_string(),
            x,
            y,
        )
    }

    fn drop_at(kind: CoinKind, x: f64, y: f64, spawned: bool) -> CoinDrop {
        CoinDrop {
            id: Uuid::new_v4(),
            kind,
            value: kind.value(),
            x,
            y,
            spawn_at_tick: 0,
            spawned,
            collected: false,
        }
    }

    #[test]
    fn income_scales_with_owned_generators() {
        let map = open_map_with_generators(vec![(5, 5), (15, 15)]);
        let mut owners = TileOwners::new(&map);
        let player = player_at(3.0, 3.0);
        let id = player.user_id;
        owners.capture((5, 5), id);
        owners.capture((15, 15), id);

        let mut players = HashMap::from([(id, player)]);
        EconomySystem::apply_income(&mut players, &[id], &map, &owners, 1.0);
        // 1 passive + 3 per generator
        assert!((players[&id].coins - 7.0).abs() < 1e-9);
    }

    #[test]
    fn income_respects_the_coin_cap() {
        let map = open_map_with_generators(vec![]);
        let owners = TileOwners::new(&map);
        let mut player = player_at(3.0, 3.0);
        player.coins = 299.9;
        let id = player.user_id;
        let mut players = HashMap::from([(id, player)]);
        EconomySystem::apply_income(&mut players, &[id], &map, &owners, 1.0);
        assert_eq!(players[&id].coins, COIN_CAP);
    }

    #[test]
    fn drop_spawn_respects_the_soft_cap() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let drops: Vec<CoinDrop> = (0..MAX_ACTIVE_DROPS)
            .map(|_| drop_at(CoinKind::Bronze, 10.0, 10.0, true))
            .collect();
        for _ in 0..10_000 {
            assert!(EconomySystem::maybe_spawn_drop(&mut rng, &drops, 0, 50).is_none());
        }
    }

    #[test]
    fn rolled_drops_are_telegraphed_inside_the_spawn_area() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut seen = 0;
        for tick in 0..200_000u64 {
            if let Some(drop) = EconomySystem::maybe_spawn_drop(&mut rng, &[], tick, 50) {
                assert!(!drop.spawned && !drop.collected);
                assert!((10.0..=39.0).contains(&drop.x));
                assert!((10.0..=39.0).contains(&drop.y));
                let telegraph = drop.spawn_at_tick - tick;
                assert!(
                    [60, 100, 140].contains(&telegraph),
                    "unexpected telegraph {}",
                    telegraph
                );
                seen += 1;
            }
        }
        // 0.0025 per tick over 200k ticks: ~500 expected
        assert!((300..800).contains(&seen), "saw {} spawns", seen);
    }

    #[test]
    fn promotion_flips_spawned_at_the_spawn_tick() {
        let mut drops = vec![drop_at(CoinKind::Bronze, 10.0, 10.0, false)];
        drops[0].spawn_at_tick = 100;

        assert!(EconomySystem::promote_spawned(&mut drops, 99).is_empty());
        assert!(!drops[0].spawned);

        let spawned = EconomySystem::promote_spawned(&mut drops, 100);
        assert_eq!(spawned, vec![drops[0].id]);
        assert!(drops[0].spawned);

        // Already spawned, not reported again
        assert!(EconomySystem::promote_spawned(&mut drops, 101).is_empty());
    }

    #[test]
    fn lone_collector_takes_the_full_value() {
        let mut drops = vec![drop_at(CoinKind::Silver, 10.0, 10.0, true)];
        let player = player_at(10.5, 10.0);
        let id = player.user_id;
        let mut players = HashMap::from([(id, player)]);

        let pickups = EconomySystem::resolve_pickups(&mut drops, &mut players, &[id]);
        assert_eq!(pickups.len(), 1);
        assert_eq!(pickups[0].amount, 25.0);
        assert_eq!(players[&id].coins, 25.0);
        assert!(drops.is_empty());
    }

    #[test]
    fn contested_gold_splits_evenly() {
        let mut drops = vec![drop_at(CoinKind::Gold, 10.0, 10.0, true)];
        let a = player_at(10.3, 10.0);
        let b = player_at(9.8, 10.2);
        let (ida, idb) = (a.user_id, b.user_id);
        let mut players = HashMap::from([(ida, a), (idb, b)]);

        let pickups = EconomySystem::resolve_pickups(&mut drops, &mut players, &[ida, idb]);
        assert_eq!(pickups.len(), 2);
        assert!((players[&ida].coins - 25.0).abs() < 1e-9);
        assert!((players[&idb].coins - 25.0).abs() < 1e-9);
        assert!(drops.is_empty());
    }

    #[test]
    fn telegraphed_drops_cannot_be_collected() {
        let mut drops = vec![drop_at(CoinKind::Bronze, 10.0, 10.0, false)];
        let player = player_at(10.0, 10.0);
        let id = player.user_id;
        let mut players = HashMap::from([(id, player)]);

        let pickups = EconomySystem::resolve_pickups(&mut drops, &mut players, &[id]);
        assert!(pickups.is_empty());
        assert_eq!(drops.len(), 1);
        assert_eq!(players[&id].coins, 0.0);
    }

    #[test]
    fn out_of_range_players_collect_nothing() {
        let mut drops = vec![drop_at(CoinKind::Bronze, 10.0, 10.0, true)];
        let player = player_at(11.2, 10.0);
        let id = player.user_id;
        let mut players = HashMap::from([(id, player)]);

        let pickups = EconomySystem::resolve_pickups(&mut drops, &mut players, &[id]);
        assert!(pickups.is_empty());
        assert_eq!(drops.len(), 1);
    }
}
