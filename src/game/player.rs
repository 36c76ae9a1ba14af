//! Player state: pose, resources, upgrades, and purchase rules

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::GameError;

pub const PLAYER_RADIUS: f64 = 0.4;
pub const BASE_SPEED: f64 = 5.0;
pub const BASE_MAX_ENERGY: f64 = 100.0;
pub const BASE_ENERGY_REGEN: f64 = 10.0;
pub const BASE_GLOW_RADIUS: f64 = 1.5;
pub const COIN_CAP: f64 = 300.0;
pub const SHOOT_ENERGY_COST: f64 = 20.0;

/// Assigned colors, by join order mod 4
pub const PLAYER_COLORS: [&str; 4] = ["#EF4444", "#3B82F6", "#22C55E", "#F59E0B"];

/// Purchasable upgrades. The first three stack; the rest are one-shot flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerupKind {
    Speed,
    Radius,
    Energy,
    Multishot,
    Piercing,
    BeamSpeed,
}

impl PowerupKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "speed" => Some(Self::Speed),
            "radius" => Some(Self::Radius),
            "energy" => Some(Self::Energy),
            "multishot" => Some(Self::Multishot),
            "piercing" => Some(Self::Piercing),
            "beam_speed" => Some(Self::BeamSpeed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Speed => "speed",
            Self::Radius => "radius",
            Self::Energy => "energy",
            Self::Multishot => "multishot",
            Self::Piercing => "piercing",
            Self::BeamSpeed => "beam_speed",
        }
    }
}

/// Last-known held keys for a player.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct InputState {
    pub w: bool,
    pub a: bool,
    pub s: bool,
    pub d: bool,
}

/// Authoritative per-player state, owned by the match actor.
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub user_id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub color: String,

    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,

    pub energy: f64,
    pub coins: f64,

    pub speed_stacks: u32,
    pub radius_stacks: u32,
    pub energy_stacks: u32,
    pub has_multishot: bool,
    pub has_piercing: bool,
    pub has_beam_speed: bool,

    pub input: InputState,
}

impl PlayerState {
    pub fn new(
        user_id: Uuid,
        display_name: String,
        avatar_url: Option<String>,
        color: String,
        spawn_x: f64,
        spawn_y: f64,
    ) -> Self {
        Self {
            user_id,
            display_name,
            avatar_url,
            color,
            x: spawn_x,
            y: spawn_y,
            vx: 0.0,
            vy: 0.0,
            energy: BASE_MAX_ENERGY,
            coins: 0.0,
            speed_stacks: 0,
            radius_stacks: 0,
            energy_stacks: 0,
            has_multishot: false,
            has_piercing: false,
            has_beam_speed: false,
            input: InputState::default(),
        }
    }

    pub fn speed_multiplier(&self) -> f64 {
        1.0 + 0.15 * self.speed_stacks as f64
    }

    pub fn max_energy(&self) -> f64 {
        BASE_MAX_ENERGY + 25.0 * self.energy_stacks as f64
    }

    pub fn energy_regen(&self) -> f64 {
        BASE_ENERGY_REGEN + 2.5 * self.energy_stacks as f64
    }

    pub fn glow_radius(&self) -> f64 {
        BASE_GLOW_RADIUS + 0.25 * self.radius_stacks as f64
    }

    /// Overwrite the held-key vector. Older unprocessed inputs are simply
    /// replaced; movement uses whatever is current when the tick runs.
    pub fn set_input(&mut self, input: InputState) {
        self.input = input;
    }

    pub fn regen_energy(&mut self, dt: f64) {
        self.energy = (self.energy + self.energy_regen() * dt).min(self.max_energy());
    }

    pub fn add_coins(&mut self, amount: f64) {
        self.coins = (self.coins + amount).min(COIN_CAP);
    }

    /// Price of the next purchase of `kind` for this player.
    pub fn powerup_cost(&self, kind: PowerupKind) -> f64 {
        match kind {
            PowerupKind::Speed => 15.0 + 10.0 * self.speed_stacks as f64,
            PowerupKind::Radius => 20.0 + 10.0 * self.radius_stacks as f64,
            PowerupKind::Energy => 20.0 + 10.0 * self.energy_stacks as f64,
            PowerupKind::Multishot => 40.0,
            PowerupKind::Piercing => 35.0,
            PowerupKind::BeamSpeed => 30.0,
        }
    }

    /// Buy an upgrade, debiting coins atomically. One-shot items reject a
    /// second purchase.
    pub fn purchase(&mut self, kind: PowerupKind) -> Result<f64, GameError> {
        let owned = match kind {
            PowerupKind::Multishot => self.has_multishot,
            PowerupKind::Piercing => self.has_piercing,
            PowerupKind::BeamSpeed => self.has_beam_speed,
            _ => false,
        };
        if owned {
            return Err(GameError::AlreadyOwned);
        }

        let cost = self.powerup_cost(kind);
        if self.coins < cost {
            return Err(GameError::NotEnoughCoins);
        }
        self.coins -= cost;

        match kind {
            PowerupKind::Speed => self.speed_stacks += 1,
            PowerupKind::Radius => self.radius_stacks += 1,
            PowerupKind::Energy => self.energy_stacks += 1,
            PowerupKind::Multishot => self.has_multishot = true,
            PowerupKind::Piercing => self.has_piercing = true,
            PowerupKind::BeamSpeed => self.has_beam_speed = true,
        }
        Ok(cost)
    }
}
