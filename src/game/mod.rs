//! Game simulation modules

pub mod beam;
pub mod economy;
pub mod map;
pub mod r#match;
pub mod physics;
pub mod player;
pub mod snapshot;

pub use r#match::{GameMatch, MatchHandle, MatchRegistry, MatchState};
pub use player::PlayerState;

use crate::ws::protocol::ClientMsg;
use uuid::Uuid;

/// Player input received from the WebSocket layer
#[derive(Debug, Clone)]
pub struct PlayerInput {
    pub user_id: Uuid,
    pub msg: ClientMsg,
    pub received_at: u64,
}

/// Game-rule failures, transport-agnostic. Reply-bearing requests surface
/// these as typed `error` events; fire-and-forget inputs drop silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("Match not found")]
    MatchNotFound,
    #[error("You are not in this game")]
    NotInGame,
    #[error("Match is full")]
    MatchFull,
    #[error("Game already in progress")]
    GameInProgress,
    #[error("Only the host can do that")]
    NotHost,
    #[error("Game has already started")]
    GameAlreadyStarted,
    #[error("Not enough players to start")]
    NotEnoughPlayers,
    #[error("Game is not in progress")]
    GameNotPlaying,
    #[error("Not enough energy")]
    NotEnoughEnergy,
    #[error("Not enough coins")]
    NotEnoughCoins,
    #[error("Already owned")]
    AlreadyOwned,
    #[error("Unknown powerup")]
    InvalidPowerup,
}

impl GameError {
    /// Stable wire code for clients to translate.
    pub fn code(&self) -> &'static str {
        match self {
            GameError::MatchNotFound => "match_not_found",
            GameError::NotInGame => "not_in_game",
            GameError::MatchFull => "match_full",
            GameError::GameInProgress => "game_in_progress",
            GameError::NotHost => "not_host",
            GameError::GameAlreadyStarted => "game_already_started",
            GameError::NotEnoughPlayers => "not_enough_players",
            GameError::GameNotPlaying => "game_not_playing",
            GameError::NotEnoughEnergy => "not_enough_energy",
            GameError::NotEnoughCoins => "not_enough_coins",
            GameError::AlreadyOwned => "already_owned",
            GameError::InvalidPowerup => "invalid_powerup",
        }
    }
}
