//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Held-key vector; fire-and-forget, the last one seen drives the tick
    Input { w: bool, a: bool, s: bool, d: bool },

    /// Fire a beam toward a direction (normalized server-side)
    Shoot {
        direction_x: f64,
        direction_y: f64,
    },

    /// Buy an upgrade from the shop
    BuyPowerup { powerup_type: String },

    /// Host request to begin the match
    StartGame {},

    /// Ping for latency measurement
    Ping { t: u64 },

    /// Leave the match (also injected on socket disconnect)
    Leave,
}

/// Messages sent from server to clients on the match topic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { user_id: Uuid, server_time: u64 },

    /// Full state, sent after a successful (or repeated) join
    MatchJoined(Box<FullState>),

    /// Player joined the match
    PlayerJoined { player: PlayerWire },

    /// Player left the match
    PlayerLeft { user_id: Uuid },

    /// The match transitioned to playing
    GameStarted { time_remaining_ms: Option<u64> },

    /// Per-tick delta: all player dynamics, live beams, changed tiles only
    StateDelta {
        tick: u64,
        server_timestamp_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        time_remaining_ms: Option<u64>,
        players: HashMap<Uuid, PlayerDelta>,
        beams: Vec<BeamWire>,
        tiles: HashMap<String, Option<Uuid>>,
    },

    /// A beam came into existence
    BeamFired { beam: BeamWire },

    /// A beam ended (wall stop, hole, boundary, lifetime, blocked bounce)
    BeamEnded { id: Uuid },

    /// A coin drop was announced; clients draw the telegraph
    CoinTelegraph { drop: CoinDropWire },

    /// A telegraphed drop became collectable
    CoinSpawned { id: Uuid },

    /// A player collected (a share of) a drop
    CoinCollected {
        id: Uuid,
        user_id: Uuid,
        amount: f64,
    },

    /// Shop purchase confirmation
    PowerupPurchased {
        user_id: Uuid,
        powerup_type: String,
    },

    /// Final scores
    GameEnded {
        winner_id: Option<Uuid>,
        scores: HashMap<Uuid, f64>,
        players: HashMap<Uuid, PlayerWire>,
    },

    /// Typed failure for a reply-bearing request. `user_id` identifies the
    /// requester so other subscribers can ignore it.
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<Uuid>,
        code: String,
        message: String,
    },

    /// Pong response
    Pong { t: u64 },
}

/// Full match state as delivered on join. Tile-keyed maps use `"x,y"`
/// string keys on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullState {
    pub match_id: Uuid,
    pub code: String,
    pub status: String,
    pub host_id: Uuid,
    pub is_solo: bool,
    pub grid_size: i16,
    pub map_tiles: HashMap<String, String>,
    pub tile_owners: HashMap<String, Option<Uuid>>,
    pub generators: Vec<String>,
    pub spawn_points: Vec<String>,
    pub players: HashMap<Uuid, PlayerWire>,
    pub beams: Vec<BeamWire>,
    pub coin_drops: Vec<CoinDropWire>,
    pub tick: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining_ms: Option<u64>,
    pub server_timestamp_ms: u64,
}

/// Upgrade stack counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeStacks {
    pub speed: u32,
    pub radius: u32,
    pub energy: u32,
}

/// One-shot upgrade flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeFlags {
    pub multishot: bool,
    pub piercing: bool,
    pub beam_speed: bool,
}

/// Full player record on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerWire {
    pub user_id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub color: String,
    pub x: f64,
    pub y: f64,
    pub energy: f64,
    pub coins: f64,
    pub max_energy: f64,
    pub glow_radius: f64,
    pub speed_multiplier: f64,
    pub stacks: UpgradeStacks,
    pub flags: UpgradeFlags,
}

/// Per-tick player dynamics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerDelta {
    pub x: f64,
    pub y: f64,
    pub energy: f64,
    pub coins: f64,
    pub max_energy: f64,
    pub glow_radius: f64,
    pub stacks: UpgradeStacks,
    pub flags: UpgradeFlags,
}

/// Beam record on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeamWire {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub color: String,
    pub x: f64,
    pub y: f64,
    pub dir_x: f64,
    pub dir_y: f64,
    pub speed: f64,
}

/// Coin drop on the wire; telegraphed drops have `spawned == false`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinDropWire {
    pub id: Uuid,
    pub kind: String,
    pub value: f64,
    pub x: f64,
    pub y: f64,
    pub spawn_at_tick: u64,
    pub spawned: bool,
}
