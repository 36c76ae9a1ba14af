//! Wire-state construction: full join payloads and per-tick deltas

use std::collections::HashMap;
use uuid::Uuid;

use crate::util::time::unix_millis;
use crate::ws::protocol::{
    BeamWire, CoinDropWire, FullState, PlayerDelta, PlayerWire, ServerMsg, UpgradeFlags,
    UpgradeStacks,
};

use super::beam::Beam;
use super::economy::CoinDrop;
use super::map::TileCoord;
use super::player::PlayerState;
use super::r#match::{MatchEndReport, MatchState};

/// Coordinates travel with 2-decimal precision.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Directions travel with 3-decimal precision.
pub fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Wire key for tile-keyed maps.
pub fn tile_key(coord: TileCoord) -> String {
    format!("{},{}", coord.0, coord.1)
}

pub fn player_wire(player: &PlayerState) -> PlayerWire {
    PlayerWire {
        user_id: player.user_id,
        display_name: player.display_name.clone(),
        avatar_url: player.avatar_url.clone(),
        color: player.color.clone(),
        x: round2(player.x),
        y: round2(player.y),
        energy: round2(player.energy),
        coins: round2(player.coins),
        max_energy: player.max_energy(),
        glow_radius: player.glow_radius(),
        speed_multiplier: player.speed_multiplier(),
        stacks: stacks_of(player),
        flags: flags_of(player),
    }
}

pub fn player_delta(player: &PlayerState) -> PlayerDelta {
    PlayerDelta {
        x: round2(player.x),
        y: round2(player.y),
        energy: round2(player.energy),
        coins: round2(player.coins),
        max_energy: player.max_energy(),
        glow_radius: player.glow_radius(),
        stacks: stacks_of(player),
        flags: flags_of(player),
    }
}

pub fn beam_wire(beam: &Beam) -> BeamWire {
    BeamWire {
        id: beam.id,
        owner_id: beam.owner_id,
        color: beam.color.clone(),
        x: round2(beam.x),
        y: round2(beam.y),
        dir_x: round3(beam.dir_x),
        dir_y: round3(beam.dir_y),
        speed: beam.speed,
    }
}

pub fn drop_wire(drop: &CoinDrop) -> CoinDropWire {
    CoinDropWire {
        id: drop.id,
        kind: drop.kind.as_str().to_string(),
        value: drop.value,
        x: round2(drop.x),
        y: round2(drop.y),
        spawn_at_tick: drop.spawn_at_tick,
        spawned: drop.spawned,
    }
}

fn stacks_of(player: &PlayerState) -> UpgradeStacks {
    UpgradeStacks {
        speed: player.speed_stacks,
        radius: player.radius_stacks,
        energy: player.energy_stacks,
    }
}

fn flags_of(player: &PlayerState) -> UpgradeFlags {
    UpgradeFlags {
        multishot: player.has_multishot,
        piercing: player.has_piercing,
        beam_speed: player.has_beam_speed,
    }
}

fn remaining_ms(state: &MatchState) -> Option<u64> {
    state.time_remaining_ms.map(|t| t.max(0) as u64)
}

/// The full state a joining client receives.
pub fn full_state(state: &MatchState) -> ServerMsg {
    let map_tiles = state
        .map
        .tiles()
        .map(|(coord, kind)| (tile_key(*coord), kind.as_str().to_string()))
        .collect();
    let tile_owners = state
        .owners
        .iter()
        .map(|(coord, owner)| (tile_key(*coord), *owner))
        .collect();

    ServerMsg::MatchJoined(Box::new(FullState {
        match_id: state.id,
        code: state.code.clone(),
        status: state.phase.as_str().to_string(),
        host_id: state.host_id,
        is_solo: state.is_solo,
        grid_size: state.map.size,
        map_tiles,
        tile_owners,
        generators: state.map.generators.iter().map(|c| tile_key(*c)).collect(),
        spawn_points: state.map.spawn_points.iter().map(|c| tile_key(*c)).collect(),
        players: state
            .players
            .values()
            .map(|p| (p.user_id, player_wire(p)))
            .collect(),
        beams: state.beams.iter().map(beam_wire).collect(),
        coin_drops: state.drops.iter().map(drop_wire).collect(),
        tick: state.tick,
        time_remaining_ms: remaining_ms(state),
        server_timestamp_ms: unix_millis(),
    }))
}

/// The per-tick delta: all player dynamics, the live beam list, and only
/// the tiles whose owner changed this tick.
pub fn state_delta(
    state: &MatchState,
    changed_tiles: &HashMap<TileCoord, Option<Uuid>>,
) -> ServerMsg {
    ServerMsg::StateDelta {
        tick: state.tick,
        server_timestamp_ms: unix_millis(),
        time_remaining_ms: remaining_ms(state),
        players: state
            .players
            .values()
            .map(|p| (p.user_id, player_delta(p)))
            .collect(),
        beams: state.beams.iter().map(beam_wire).collect(),
        tiles: changed_tiles
            .iter()
            .map(|(coord, owner)| (tile_key(*coord), *owner))
            .collect(),
    }
}

pub fn game_ended(state: &MatchState, end: &MatchEndReport) -> ServerMsg {
    ServerMsg::GameEnded {
        winner_id: end.winner_id,
        scores: end.scores.clone(),
        players: state
            .players
            .values()
            .map(|p| (p.user_id, player_wire(p)))
            .collect(),
    }
}

/// Opaque terminal state stored with the match row.
pub fn final_state_json(state: &MatchState) -> serde_json::Value {
    let mut tiles_owned: HashMap<String, usize> = HashMap::new();
    for user_id in &state.join_order {
        tiles_owned.insert(user_id.to_string(), state.owners.owned_count(*user_id));
    }
    serde_json::json!({
        "tick": state.tick,
        "total_capturable": state.owners.total_capturable(),
        "tiles_owned": tiles_owned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::r#match::MatchPhase;

    fn seeded_state() -> MatchState {
        let mut state = MatchState::new(
            Uuid::new_v4(),
            "ABCDEF".to_string(),
            Uuid::new_v4(),
            false,
            99,
        );
        let host = state.host_id;
        state.apply_join(host, "host".to_string(), None).unwrap();
        state
            .apply_join(Uuid::new_v4(), "guest".to_string(), Some("http://a/b.png".to_string()))
            .unwrap();
        state
    }

    #[test]
    fn rounding_is_two_and_three_decimals() {
        assert_eq!(round2(12.345_678), 12.35);
        assert_eq!(round2(-0.004), -0.0);
        assert_eq!(round3(0.707_106_78), 0.707);
    }

    #[test]
    fn tile_keys_are_comma_joined() {
        assert_eq!(tile_key((3, 41)), "3,41");
        assert_eq!(tile_key((-1, 0)), "-1,0");
    }

    #[test]
    fn full_state_round_trips_through_json() {
        let state = seeded_state();
        let msg = full_state(&state);
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerMsg = serde_json::from_str(&json).unwrap();

        let ServerMsg::MatchJoined(full) = back else {
            panic!("expected match_joined");
        };
        assert_eq!(full.match_id, state.id);
        assert_eq!(full.code, "ABCDEF");
        assert_eq!(full.status, "waiting");
        assert_eq!(full.grid_size, state.map.size);
        assert_eq!(full.players.len(), 2);
        assert_eq!(full.map_tiles.len(), 50 * 50);
        assert_eq!(full.tile_owners.len(), state.owners.total_capturable());
        assert_eq!(full.spawn_points.len(), 4);
        assert_eq!(full.generators.len(), state.map.generators.len());
        assert!(full.time_remaining_ms.is_none());

        let host_wire = &full.players[&state.host_id];
        assert_eq!(host_wire.display_name, "host");
        assert_eq!(host_wire.max_energy, 100.0);
        assert_eq!(host_wire.stacks.speed, 0);
        assert!(!host_wire.flags.piercing);
    }

    #[test]
    fn delta_contains_only_the_changed_tiles() {
        let mut state = seeded_state();
        state.apply_start(state.host_id).unwrap();
        let report = state.step(0.05);

        let msg = state_delta(&state, &report.changed_tiles);
        let ServerMsg::StateDelta {
            tick,
            players,
            tiles,
            time_remaining_ms,
            ..
        } = msg
        else {
            panic!("expected state_delta");
        };
        assert_eq!(tick, 1);
        assert_eq!(players.len(), 2);
        assert_eq!(tiles.len(), report.changed_tiles.len());
        assert!(tiles.len() < state.owners.total_capturable());
        assert!(time_remaining_ms.is_some());
    }

    #[test]
    fn wire_positions_are_rounded() {
        let mut state = seeded_state();
        let host = state.host_id;
        state.players.get_mut(&host).unwrap().x = 10.123_456;
        let wire = player_wire(&state.players[&host]);
        assert_eq!(wire.x, 10.12);
    }

    #[test]
    fn final_state_records_ownership_counts() {
        let mut state = seeded_state();
        state.apply_start(state.host_id).unwrap();
        state.phase = MatchPhase::Finished;
        let value = final_state_json(&state);
        assert_eq!(value["total_capturable"], state.owners.total_capturable());
        assert!(value["tiles_owned"]
            .as_object()
            .unwrap()
            .contains_key(&state.host_id.to_string()));
    }
}
