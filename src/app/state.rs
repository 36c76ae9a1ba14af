//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::MatchRegistry;
use crate::store::{MatchStore, ProfileStore, SupabaseClient};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub match_store: MatchStore,
    pub profile_store: ProfileStore,
    pub registry: Arc<MatchRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let supabase = SupabaseClient::from_config(&config);
        let match_store = MatchStore::new(supabase.clone());
        let profile_store = ProfileStore::new(supabase);

        let registry = Arc::new(MatchRegistry::new(match_store.clone()));

        Self {
            config,
            match_store,
            profile_store,
            registry,
        }
    }
}
