//! Match repository: matches and match_players tables

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

use super::supabase::{StoreError, SupabaseClient};

const JOIN_CODE_LEN: usize = 6;
const JOIN_CODE_ATTEMPTS: usize = 16;

const STALE_WAITING_MINUTES: i64 = 30;
const STALE_PLAYING_MINUTES: i64 = 60;

/// A match row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRow {
    pub id: Uuid,
    pub code: String,
    pub host_id: Uuid,
    pub status: String,
    pub is_public: bool,
    pub is_solo: bool,
    pub winner_id: Option<Uuid>,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
struct NewMatch {
    id: Uuid,
    code: String,
    host_id: Uuid,
    status: &'static str,
    is_public: bool,
    is_solo: bool,
}

/// A match membership row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchPlayerRow {
    pub match_id: Uuid,
    pub user_id: Uuid,
    pub color: String,
    pub score: Option<i32>,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
struct NewMatchPlayer<'a> {
    match_id: Uuid,
    user_id: Uuid,
    color: &'a str,
}

#[derive(Debug, Deserialize)]
struct MatchRowWithPlayers {
    #[serde(flatten)]
    row: MatchRow,
    match_players: Vec<PlayerRef>,
}

#[derive(Debug, Deserialize)]
struct PlayerRef {
    #[allow(dead_code)]
    user_id: Uuid,
}

/// Match persistence operations
#[derive(Clone)]
pub struct MatchStore {
    client: SupabaseClient,
}

impl MatchStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    /// Create a match row with a fresh join code. Codes collide only with
    /// non-finished matches; finished ones free their code for reuse.
    pub async fn create_match(
        &self,
        host_id: Uuid,
        is_public: bool,
        is_solo: bool,
    ) -> Result<MatchRow, StoreError> {
        for _ in 0..JOIN_CODE_ATTEMPTS {
            let code = generate_join_code();
            if self.find_by_code(&code).await?.is_some() {
                warn!(code = %code, "Join code collision, retrying");
                continue;
            }

            let row = NewMatch {
                id: Uuid::new_v4(),
                code,
                host_id,
                status: "waiting",
                is_public,
                is_solo,
            };
            return self.client.insert("matches", &row).await;
        }
        Err(StoreError::JoinCodeExhausted)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<MatchRow>, StoreError> {
        self.client
            .select_one("matches", &format!("id=eq.{}", id))
            .await
    }

    /// Look up a non-finished match by join code.
    pub async fn find_by_code(&self, code: &str) -> Result<Option<MatchRow>, StoreError> {
        self.client
            .select_one(
                "matches",
                &format!("code=eq.{}&status=neq.finished", code),
            )
            .await
    }

    /// Record a player joining, with their assigned color.
    pub async fn add_player(
        &self,
        match_id: Uuid,
        user_id: Uuid,
        color: &str,
    ) -> Result<(), StoreError> {
        let row = NewMatchPlayer {
            match_id,
            user_id,
            color,
        };
        let _: MatchPlayerRow = self.client.insert("match_players", &row).await?;
        Ok(())
    }

    pub async fn update_status(&self, id: Uuid, status: &str) -> Result<(), StoreError> {
        self.client
            .update(
                "matches",
                &format!("id=eq.{}", id),
                &serde_json::json!({ "status": status, "updated_at": Utc::now() }),
            )
            .await
    }

    /// Persist the terminal state: status, winner, opaque final state, and
    /// integer percentage scores on the membership rows.
    pub async fn finish_match(
        &self,
        id: Uuid,
        winner_id: Option<Uuid>,
        final_state: serde_json::Value,
        scores: &HashMap<Uuid, f64>,
    ) -> Result<(), StoreError> {
        self.client
            .update(
                "matches",
                &format!("id=eq.{}", id),
                &serde_json::json!({
                    "status": "finished",
                    "winner_id": winner_id,
                    "final_state": final_state,
                    "updated_at": Utc::now(),
                }),
            )
            .await?;

        for (user_id, score) in scores {
            self.client
                .update(
                    "match_players",
                    &format!("match_id=eq.{}&user_id=eq.{}", id, user_id),
                    &serde_json::json!({ "score": score.round() as i32 }),
                )
                .await?;
        }
        Ok(())
    }

    /// Public waiting multiplayer matches with at least one player.
    pub async fn list_available(&self) -> Result<Vec<MatchRow>, StoreError> {
        let rows: Vec<MatchRowWithPlayers> = self
            .client
            .select(
                "matches",
                "select=*,match_players(user_id)&status=eq.waiting&is_public=eq.true&is_solo=eq.false",
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter(|r| !r.match_players.is_empty())
            .map(|r| r.row)
            .collect())
    }

    /// Force-finish abandoned rows: waiting matches past 30 minutes and
    /// playing matches past 60. Returns the ids that were reaped.
    pub async fn cleanup_stale_matches(&self) -> Result<Vec<Uuid>, StoreError> {
        let waiting_cutoff = Utc::now() - Duration::minutes(STALE_WAITING_MINUTES);
        let playing_cutoff = Utc::now() - Duration::minutes(STALE_PLAYING_MINUTES);

        let mut stale: Vec<MatchRow> = self
            .client
            .select(
                "matches",
                &format!(
                    "status=eq.waiting&inserted_at=lt.{}",
                    waiting_cutoff.to_rfc3339()
                ),
            )
            .await?;
        stale.extend(
            self.client
                .select::<MatchRow>(
                    "matches",
                    &format!(
                        "status=eq.playing&updated_at=lt.{}",
                        playing_cutoff.to_rfc3339()
                    ),
                )
                .await?,
        );

        let mut reaped = Vec::with_capacity(stale.len());
        for row in stale {
            self.update_status(row.id, "finished").await?;
            reaped.push(row.id);
        }
        Ok(reaped)
    }
}

/// Six uppercase ASCII letters.
fn generate_join_code() -> String {
    let mut rng = rand::thread_rng();
    (0..JOIN_CODE_LEN)
        .map(|_| rng.gen_range(b'A'..=b'Z') as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_codes_are_six_uppercase_letters() {
        for _ in 0..100 {
            let code = generate_join_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn join_codes_vary() {
        let a = generate_join_code();
        let b = generate_join_code();
        let c = generate_join_code();
        // 26^6 codes; three in a row colliding means the RNG is broken
        assert!(!(a == b && b == c));
    }
}
