//! Player movement, swept collision against the tile grid, glow capture

use super::map::{GameMap, TileCoord};
use super::player::{InputState, PlayerState, BASE_SPEED, PLAYER_RADIUS};

/// Movement and spatial queries for players.
pub struct MovementSystem;

impl MovementSystem {
    /// Unit movement direction from the held-key vector. Opposing keys
    /// cancel; diagonals are normalized.
    pub fn input_direction(input: &InputState) -> (f64, f64) {
        let dx = (input.d as i32 - input.a as i32) as f64;
        let dy = (input.s as i32 - input.w as i32) as f64;
        if dx == 0.0 && dy == 0.0 {
            return (0.0, 0.0);
        }
        let mag = (dx * dx + dy * dy).sqrt();
        (dx / mag, dy / mag)
    }

    /// Integrate one player for `dt`: velocity from input, axis-decomposed
    /// swept collision (x first, then y from the updated x, which yields
    /// wall-sliding), then the map-edge clamp.
    pub fn step_player(map: &GameMap, player: &mut PlayerState, dt: f64) {
        let (dx, dy) = Self::input_direction(&player.input);
        let speed = BASE_SPEED * player.speed_multiplier();
        player.vx = dx * speed;
        player.vy = dy * speed;

        let nx = player.x + player.vx * dt;
        if !Self::circle_overlaps_blocking(map, nx, player.y) {
            player.x = nx;
        }

        let ny = player.y + player.vy * dt;
        if !Self::circle_overlaps_blocking(map, player.x, ny) {
            player.y = ny;
        }

        let max = map.size as f64 - 1.0 - PLAYER_RADIUS;
        player.x = player.x.clamp(PLAYER_RADIUS, max);
        player.y = player.y.clamp(PLAYER_RADIUS, max);
    }

    /// Would a player circle centered at `(cx, cy)` overlap any blocking
    /// tile (or the out-of-map boundary)?
    pub fn circle_overlaps_blocking(map: &GameMap, cx: f64, cy: f64) -> bool {
        let r = PLAYER_RADIUS;
        let x_lo = (cx - r).floor() as i16 - 1;
        let x_hi = (cx + r).floor() as i16 + 1;
        let y_lo = (cy - r).floor() as i16 - 1;
        let y_hi = (cy + r).floor() as i16 + 1;

        for ty in y_lo..=y_hi {
            for tx in x_lo..=x_hi {
                if !map.kind_at(tx, ty).blocks_movement() {
                    continue;
                }
                // Closest point on the tile rectangle to the circle center
                let nx = cx.clamp(tx as f64 - 0.5, tx as f64 + 0.5);
                let ny = cy.clamp(ty as f64 - 0.5, ty as f64 + 0.5);
                let dx = cx - nx;
                let dy = cy - ny;
                if dx * dx + dy * dy <= r * r {
                    return true;
                }
            }
        }
        false
    }

    /// Tiles inside a player's glow: integer offsets around the player's
    /// cell whose Euclidean length fits the glow radius.
    pub fn glow_tiles(px: f64, py: f64, glow_radius: f64) -> Vec<TileCoord> {
        let reach = glow_radius.ceil() as i16;
        let cx = px.floor() as i16;
        let cy = py.floor() as i16;
        let mut tiles = Vec::new();
        for dy in -reach..=reach {
            for dx in -reach..=reach {
                let dist = ((dx as f64).powi(2) + (dy as f64).powi(2)).sqrt();
                if dist <= glow_radius {
                    tiles.push((cx + dx, cy + dy));
                }
            }
        }
        tiles
    }
}
