//! Stale-match janitor

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::game::MatchRegistry;
use crate::store::MatchStore;

const SWEEP_INTERVAL_SECS: u64 = 5 * 60;

/// Periodically reaps abandoned matches: the repository flags stale rows
/// finished, then any still-running actors are politely stopped. Janitor
/// failures are logged and retried on the next sweep, never fatal.
pub struct Janitor {
    store: MatchStore,
    registry: Arc<MatchRegistry>,
}

impl Janitor {
    pub fn new(store: MatchStore, registry: Arc<MatchRegistry>) -> Self {
        Self { store, registry }
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        // The first tick fires immediately; skip it so a fresh boot does
        // not race match creation
        interval.tick().await;

        loop {
            interval.tick().await;
            self.sweep().await;
        }
    }

    async fn sweep(&self) {
        match self.store.cleanup_stale_matches().await {
            Ok(reaped) => {
                let mut stopped = 0;
                for id in &reaped {
                    if self.registry.stop(id, "stale") {
                        stopped += 1;
                    }
                }
                if !reaped.is_empty() {
                    info!(
                        reaped = reaped.len(),
                        stopped, "Janitor cleaned up stale matches"
                    );
                }
            }
            Err(e) => warn!(error = %e, "Janitor sweep failed"),
        }
    }
}
