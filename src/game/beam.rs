//! Beam physics: spawning, DDA tile traversal, wall stops, mirror bounces

use uuid::Uuid;

use super::map::{tile_index, GameMap, TileCoord, TileKind};

pub const BEAM_SPEED: f64 = 15.0;
pub const BEAM_SPEED_BOOSTED: f64 = 30.0;
pub const BEAM_LIFETIME_SECS: f64 = 10.0;

/// Distance in front of the shooter sampled for the muzzle check.
const MUZZLE_OFFSET: f64 = 0.6;
/// Angular spread of the two extra multishot beams.
const MULTISHOT_SPREAD: f64 = std::f64::consts::PI / 12.0;
/// Distance past the entry point a reflected beam is re-seated at.
const REFLECT_EXIT_OFFSET: f64 = 0.1;
/// Inward offset of the wall edge-stop point.
const EDGE_STOP_INSET: f64 = 1e-2;
/// Directions shorter than this are treated as absent.
const MIN_DIR_MAGNITUDE: f64 = 1e-3;
/// Hard cap on tiles visited per segment.
const TRAVERSAL_CAP: usize = 500;

/// A live beam. Direction is always unit length.
#[derive(Debug, Clone)]
pub struct Beam {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub color: String,
    pub x: f64,
    pub y: f64,
    pub dir_x: f64,
    pub dir_y: f64,
    pub speed: f64,
    pub time_alive: f64,
    pub piercing_used: bool,
    pub active: bool,
}

/// What a traversal ran into, if anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collision {
    None,
    Wall(TileCoord),
    Mirror(TileCoord),
    /// Hole or boundary; the beam simply ends.
    Terminal,
}

/// Tile face through which a ray entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Face {
    Left,
    Right,
    Top,
    Bottom,
}

/// Normalize a requested direction, defaulting degenerate input to +x.
fn normalize_dir(dx: f64, dy: f64) -> (f64, f64) {
    let mag = (dx * dx + dy * dy).sqrt();
    if mag < MIN_DIR_MAGNITUDE {
        (1.0, 0.0)
    } else {
        (dx / mag, dy / mag)
    }
}

/// Spawn one beam if its muzzle is clear. The sample point 0.6 tiles ahead
/// blocks on wall/hole/boundary; mirrors do not block (the first advance
/// reflects instead).
pub fn try_spawn(
    map: &GameMap,
    owner_id: Uuid,
    color: &str,
    px: f64,
    py: f64,
    dir_x: f64,
    dir_y: f64,
    speed: f64,
) -> Option<Beam> {
    let (ux, uy) = normalize_dir(dir_x, dir_y);
    let mx = (px + MUZZLE_OFFSET * ux).floor() as i16;
    let my = (py + MUZZLE_OFFSET * uy).floor() as i16;
    match map.kind_at(mx, my) {
        TileKind::Wall | TileKind::Hole | TileKind::Boundary => None,
        _ => Some(Beam {
            id: Uuid::new_v4(),
            owner_id,
            color: color.to_string(),
            x: px,
            y: py,
            dir_x: ux,
            dir_y: uy,
            speed,
            time_alive: 0.0,
            piercing_used: false,
            active: true,
        }),
    }
}

/// Spawn the full volley for one shoot request: a single beam, or three at
/// the base angle and +-15 degrees with multishot. Each beam passes the
/// muzzle check independently; blocked ones are dropped.
pub fn spawn_volley(
    map: &GameMap,
    owner_id: Uuid,
    color: &str,
    px: f64,
    py: f64,
    dir_x: f64,
    dir_y: f64,
    speed: f64,
    multishot: bool,
) -> Vec<Beam> {
    let (ux, uy) = normalize_dir(dir_x, dir_y);
    if !multishot {
        return try_spawn(map, owner_id, color, px, py, ux, uy, speed)
            .into_iter()
            .collect();
    }

    let theta = uy.atan2(ux);
    [theta, theta + MULTISHOT_SPREAD, theta - MULTISHOT_SPREAD]
        .into_iter()
        .filter_map(|a| try_spawn(map, owner_id, color, px, py, a.cos(), a.sin(), speed))
        .collect()
}

impl Beam {
    /// Advance by `dt`, capturing tiles along the way. Returns the
    /// capturable tiles crossed this step, in traversal order; the caller
    /// applies ownership immediately so same-tick contention resolves to
    /// the last beam processed.
    pub fn advance(&mut self, map: &GameMap, piercing: bool, dt: f64) -> Vec<TileCoord> {
        if !self.active {
            return Vec::new();
        }
        if self.time_alive + dt >= BEAM_LIFETIME_SECS {
            self.active = false;
            return Vec::new();
        }

        let nx = self.x + self.dir_x * self.speed * dt;
        let ny = self.y + self.dir_y * self.speed * dt;
        let (captured, collision) = trace_tiles(map, self.x, self.y, nx, ny);

        match collision {
            Collision::None => {
                self.x = nx;
                self.y = ny;
                self.time_alive += dt;
            }
            Collision::Wall(wall) => {
                if piercing && !self.piercing_used {
                    self.piercing_used = true;
                    self.x = nx;
                    self.y = ny;
                    self.time_alive += dt;
                } else {
                    let (sx, sy) = edge_stop(self.x, self.y, self.dir_x, self.dir_y, wall);
                    self.x = sx;
                    self.y = sy;
                    self.active = false;
                }
            }
            Collision::Mirror(mirror) => self.reflect(map, mirror, dt),
            Collision::Terminal => {
                self.active = false;
            }
        }

        captured
    }

    /// Reflect across the entry face of `mirror`. The beam is re-seated a
    /// short way out along the reflected direction; if that point sits
    /// inside another blocking tile the beam ends at the entry point.
    fn reflect(&mut self, map: &GameMap, mirror: TileCoord, dt: f64) {
        let Some((face, ex, ey)) = entry_face(self.x, self.y, self.dir_x, self.dir_y, mirror)
        else {
            // Ray does not actually reach the tile's edges (degenerate
            // float case); end the beam where it stands.
            self.active = false;
            return;
        };

        let (ndx, ndy) = match face {
            Face::Left | Face::Right => (-self.dir_x, self.dir_y),
            Face::Top | Face::Bottom => (self.dir_x, -self.dir_y),
        };

        let rx = ex + ndx * REFLECT_EXIT_OFFSET;
        let ry = ey + ndy * REFLECT_EXIT_OFFSET;
        if map.kind_at(tile_index(rx), tile_index(ry)).blocks_movement() {
            self.x = ex;
            self.y = ey;
            self.active = false;
            return;
        }

        self.x = rx;
        self.y = ry;
        self.dir_x = ndx;
        self.dir_y = ndy;
        self.time_alive += dt;
    }
}

/// Walk every tile the segment enters, in order, with an amanatides-woo
/// style DDA. Axis-aligned rays get infinite crossing times on the other
/// axis; an exactly simultaneous crossing steps diagonally. The starting
/// tile is captured but never collides (a pierced beam may momentarily sit
/// inside a wall).
pub fn trace_tiles(
    map: &GameMap,
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
) -> (Vec<TileCoord>, Collision) {
    let mut captured = Vec::new();

    let mut cx = tile_index(x0);
    let mut cy = tile_index(y0);
    let end_cx = tile_index(x1);
    let end_cy = tile_index(y1);

    if map.kind_at(cx, cy).is_capturable() {
        captured.push((cx, cy));
    }

    let dx = x1 - x0;
    let dy = y1 - y0;
    let step_x: i16 = if dx > 0.0 { 1 } else { -1 };
    let step_y: i16 = if dy > 0.0 { 1 } else { -1 };

    let t_delta_x = if dx != 0.0 { (1.0 / dx).abs() } else { f64::INFINITY };
    let t_delta_y = if dy != 0.0 { (1.0 / dy).abs() } else { f64::INFINITY };

    let mut t_max_x = if dx != 0.0 {
        (cx as f64 + 0.5 * step_x as f64 - x0) / dx
    } else {
        f64::INFINITY
    };
    let mut t_max_y = if dy != 0.0 {
        (cy as f64 + 0.5 * step_y as f64 - y0) / dy
    } else {
        f64::INFINITY
    };

    for _ in 0..TRAVERSAL_CAP {
        if (cx, cy) == (end_cx, end_cy) {
            break;
        }

        if t_max_x < t_max_y {
            if t_max_x > 1.0 {
                break;
            }
            cx += step_x;
            t_max_x += t_delta_x;
        } else if t_max_y < t_max_x {
            if t_max_y > 1.0 {
                break;
            }
            cy += step_y;
            t_max_y += t_delta_y;
        } else {
            // Simultaneous crossing: step through the corner diagonally
            if t_max_x > 1.0 {
                break;
            }
            cx += step_x;
            cy += step_y;
            t_max_x += t_delta_x;
            t_max_y += t_delta_y;
        }

        match map.kind_at(cx, cy) {
            TileKind::Walkable | TileKind::Generator => captured.push((cx, cy)),
            TileKind::Wall => return (captured, Collision::Wall((cx, cy))),
            TileKind::Mirror => return (captured, Collision::Mirror((cx, cy))),
            TileKind::Hole | TileKind::Boundary => return (captured, Collision::Terminal),
        }
    }

    (captured, Collision::None)
}

/// Point just short of the face through which the ray entered `wall`. The
/// face is chosen by the dominant direction axis and its sign.
fn edge_stop(x: f64, y: f64, dir_x: f64, dir_y: f64, wall: TileCoord) -> (f64, f64) {
    let (wx, wy) = (wall.0 as f64, wall.1 as f64);
    if dir_x.abs() >= dir_y.abs() {
        let sign = if dir_x >= 0.0 { 1.0 } else { -1.0 };
        let face_x = wx - 0.5 * sign;
        let t = (face_x - x) / dir_x;
        (face_x - sign * EDGE_STOP_INSET, y + dir_y * t)
    } else {
        let sign = if dir_y >= 0.0 { 1.0 } else { -1.0 };
        let face_y = wy - 0.5 * sign;
        let t = (face_y - y) / dir_y;
        (x + dir_x * t, face_y - sign * EDGE_STOP_INSET)
    }
}

/// Intersect the ray with the four edges of `tile` and return the entry
/// face and point: the smallest positive `t` whose crossing lies within
/// the perpendicular span of that face.
fn entry_face(x: f64, y: f64, dir_x: f64, dir_y: f64, tile: TileCoord) -> Option<(Face, f64, f64)> {
    let (tx, ty) = (tile.0 as f64, tile.1 as f64);
    let mut best: Option<(Face, f64)> = None;

    let mut consider = |face: Face, t: f64, span: f64| {
        if t > 0.0 && span.abs() <= 0.5 && best.map_or(true, |(_, bt)| t < bt) {
            best = Some((face, t));
        }
    };

    if dir_x != 0.0 {
        let t = (tx - 0.5 - x) / dir_x;
        consider(Face::Left, t, y + dir_y * t - ty);
        let t = (tx + 0.5 - x) / dir_x;
        consider(Face::Right, t, y + dir_y * t - ty);
    }
    if dir_y != 0.0 {
        let t = (ty - 0.5 - y) / dir_y;
        consider(Face::Top, t, x + dir_x * t - tx);
        let t = (ty + 0.5 - y) / dir_y;
        consider(Face::Bottom, t, x + dir_x * t - tx);
    }

    best.map(|(face, t)| (face, x + dir_x * t, y + dir_y * t))
}
