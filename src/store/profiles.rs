//! User profile lookups for joining players

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::supabase::{StoreError, SupabaseClient};

/// Profile row as stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRow {
    pub id: Uuid,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Resolved identity handed to the match actor on join.
#[derive(Debug, Clone)]
pub struct ProfileInfo {
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct NewProfile<'a> {
    id: Uuid,
    display_name: &'a str,
}

/// Profile store operations
#[derive(Clone)]
pub struct ProfileStore {
    client: SupabaseClient,
}

impl ProfileStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    pub async fn get_profile(&self, user_id: Uuid) -> Result<Option<ProfileRow>, StoreError> {
        self.client
            .select_one("profiles", &format!("id=eq.{}", user_id))
            .await
    }

    /// Fetch the profile, creating a placeholder row for first-time users.
    pub async fn ensure_profile(&self, user_id: Uuid) -> Result<ProfileInfo, StoreError> {
        if let Some(row) = self.get_profile(user_id).await? {
            let display_name = row
                .display_name
                .unwrap_or_else(|| default_name(user_id));
            return Ok(ProfileInfo {
                display_name,
                avatar_url: row.avatar_url,
            });
        }

        let display_name = default_name(user_id);
        let _: ProfileRow = self
            .client
            .insert(
                "profiles",
                &NewProfile {
                    id: user_id,
                    display_name: &display_name,
                },
            )
            .await?;
        Ok(ProfileInfo {
            display_name,
            avatar_url: None,
        })
    }
}

fn default_name(user_id: Uuid) -> String {
    format!("Player_{}", &user_id.to_string()[..8])
}
