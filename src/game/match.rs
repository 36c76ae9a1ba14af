//! Match state and authoritative tick loop

use dashmap::DashMap;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::store::MatchStore;
use crate::util::time::{TickClock, TICKS_PER_SECOND, TICK_INTERVAL_MS};
use crate::ws::protocol::{ClientMsg, ServerMsg};

use super::beam::{self, Beam, BEAM_SPEED, BEAM_SPEED_BOOSTED};
use super::economy::{CoinDrop, EconomySystem, Pickup};
use super::map::{GameMap, TileCoord, TileOwners};
use super::physics::MovementSystem;
use super::player::{
    InputState, PlayerState, PowerupKind, PLAYER_COLORS, SHOOT_ENERGY_COST,
};
use super::snapshot;
use super::{GameError, PlayerInput};

pub const MAX_PLAYERS: usize = 4;
pub const MATCH_DURATION_MS: i64 = 180_000;

/// Ticks a finished match lingers before its actor stops.
const FINISHED_LINGER_TICKS: u32 = 60 * TICKS_PER_SECOND;

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// Waiting for players
    Waiting,
    /// Match in progress
    Playing,
    /// Match ended
    Finished,
}

impl MatchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchPhase::Waiting => "waiting",
            MatchPhase::Playing => "playing",
            MatchPhase::Finished => "finished",
        }
    }
}

/// Outcome of a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    /// Join is idempotent: a second join returns the state again.
    AlreadyJoined,
}

/// Outcome of a leave request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    NotPresent,
    Left,
    /// Last player left a waiting match; persist finished and stop.
    LastLeftWaiting,
    /// Last player left mid-game; finish with final scores and stop.
    LastLeftPlaying,
}

/// Everything one simulation tick produced, for the broadcast pass.
#[derive(Debug, Default)]
pub struct TickReport {
    pub ended_beams: Vec<Uuid>,
    pub telegraphs: Vec<CoinDrop>,
    pub spawned_drops: Vec<Uuid>,
    pub pickups: Vec<Pickup>,
    pub changed_tiles: HashMap<TileCoord, Option<Uuid>>,
    pub finished: Option<MatchEndReport>,
}

/// Final scores handed to persistence and subscribers.
#[derive(Debug, Clone)]
pub struct MatchEndReport {
    pub winner_id: Option<Uuid>,
    pub scores: HashMap<Uuid, f64>,
}

/// Match state (owned by the match task)
pub struct MatchState {
    pub id: Uuid,
    pub code: String,
    pub host_id: Uuid,
    pub is_solo: bool,
    pub phase: MatchPhase,
    pub map: GameMap,
    pub owners: TileOwners,
    pub players: HashMap<Uuid, PlayerState>,
    /// Join order, driving deterministic iteration for movement, capture,
    /// and income.
    pub join_order: Vec<Uuid>,
    joins_total: u32,
    pub beams: Vec<Beam>,
    pub drops: Vec<CoinDrop>,
    pub tick: u64,
    /// `None` means no clock (solo matches).
    pub time_remaining_ms: Option<i64>,
    rng: ChaCha8Rng,
}

impl MatchState {
    pub fn new(id: Uuid, code: String, host_id: Uuid, is_solo: bool, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let map = GameMap::generate(&mut rng);
        let owners = TileOwners::new(&map);
        Self {
            id,
            code,
            host_id,
            is_solo,
            phase: MatchPhase::Waiting,
            map,
            owners,
            players: HashMap::new(),
            join_order: Vec::new(),
            joins_total: 0,
            beams: Vec::new(),
            drops: Vec::new(),
            tick: 0,
            time_remaining_ms: None,
            rng,
        }
    }

    /// State over a hand-built map, for exercising exact layouts.
    #[cfg(test)]
    pub fn with_map(id: Uuid, host_id: Uuid, is_solo: bool, map: GameMap) -> Self {
        let owners = TileOwners::new(&map);
        Self {
            id,
            code: "TESTAA".to_string(),
            host_id,
            is_solo,
            phase: MatchPhase::Waiting,
            map,
            owners,
            players: HashMap::new(),
            join_order: Vec::new(),
            joins_total: 0,
            beams: Vec::new(),
            drops: Vec::new(),
            tick: 0,
            time_remaining_ms: None,
            rng: ChaCha8Rng::seed_from_u64(0),
        }
    }

    /// Add a player. Rejoining is idempotent; new joins are only accepted
    /// while waiting and under the player cap.
    pub fn apply_join(
        &mut self,
        user_id: Uuid,
        display_name: String,
        avatar_url: Option<String>,
    ) -> Result<JoinOutcome, GameError> {
        if self.players.contains_key(&user_id) {
            return Ok(JoinOutcome::AlreadyJoined);
        }
        if self.phase != MatchPhase::Waiting {
            return Err(GameError::GameInProgress);
        }
        if self.players.len() >= MAX_PLAYERS {
            return Err(GameError::MatchFull);
        }

        let slot = (self.joins_total as usize) % PLAYER_COLORS.len();
        let spawn = self.map.spawn_points[slot % self.map.spawn_points.len()];
        let player = PlayerState::new(
            user_id,
            display_name,
            avatar_url,
            PLAYER_COLORS[slot].to_string(),
            spawn.0 as f64,
            spawn.1 as f64,
        );

        self.players.insert(user_id, player);
        self.join_order.push(user_id);
        self.joins_total += 1;
        Ok(JoinOutcome::Joined)
    }

    pub fn apply_leave(&mut self, user_id: Uuid) -> LeaveOutcome {
        if self.players.remove(&user_id).is_none() {
            return LeaveOutcome::NotPresent;
        }
        self.join_order.retain(|id| *id != user_id);

        if self.players.is_empty() {
            match self.phase {
                MatchPhase::Waiting => LeaveOutcome::LastLeftWaiting,
                MatchPhase::Playing => LeaveOutcome::LastLeftPlaying,
                MatchPhase::Finished => LeaveOutcome::Left,
            }
        } else {
            LeaveOutcome::Left
        }
    }

    /// Host-only transition to playing.
    pub fn apply_start(&mut self, user_id: Uuid) -> Result<(), GameError> {
        if self.phase != MatchPhase::Waiting {
            return Err(GameError::GameAlreadyStarted);
        }
        if user_id != self.host_id {
            return Err(GameError::NotHost);
        }
        let min_players = if self.is_solo { 1 } else { 2 };
        if self.players.len() < min_players {
            return Err(GameError::NotEnoughPlayers);
        }

        self.phase = MatchPhase::Playing;
        self.time_remaining_ms = if self.is_solo {
            None
        } else {
            Some(MATCH_DURATION_MS)
        };
        Ok(())
    }

    /// Merge a held-key vector; silently ignored for non-members.
    pub fn apply_input(&mut self, user_id: Uuid, input: InputState) {
        if let Some(player) = self.players.get_mut(&user_id) {
            player.set_input(input);
        }
    }

    /// Handle a shoot request. Preconditions (playing, membership, energy)
    /// drop the request silently. Energy is debited before the muzzle
    /// check, so a shot swallowed by a wall still costs its energy.
    pub fn apply_shoot(&mut self, user_id: Uuid, dir_x: f64, dir_y: f64) -> Vec<Beam> {
        if self.phase != MatchPhase::Playing {
            return Vec::new();
        }
        let Some(player) = self.players.get_mut(&user_id) else {
            return Vec::new();
        };
        if player.energy < SHOOT_ENERGY_COST {
            return Vec::new();
        }
        player.energy -= SHOOT_ENERGY_COST;

        let speed = if player.has_beam_speed {
            BEAM_SPEED_BOOSTED
        } else {
            BEAM_SPEED
        };
        let fired = beam::spawn_volley(
            &self.map,
            user_id,
            &player.color,
            player.x,
            player.y,
            dir_x,
            dir_y,
            speed,
            player.has_multishot,
        );
        self.beams.extend(fired.iter().cloned());
        fired
    }

    /// Buy an upgrade; synchronous and atomic against the player record.
    pub fn apply_purchase(
        &mut self,
        user_id: Uuid,
        powerup_type: &str,
    ) -> Result<PowerupKind, GameError> {
        if self.phase != MatchPhase::Playing {
            return Err(GameError::GameNotPlaying);
        }
        let kind = PowerupKind::parse(powerup_type).ok_or(GameError::InvalidPowerup)?;
        let player = self.players.get_mut(&user_id).ok_or(GameError::NotInGame)?;
        player.purchase(kind)?;
        Ok(kind)
    }

    /// One simulation tick of a playing match.
    pub fn step(&mut self, dt: f64) -> TickReport {
        let mut report = TickReport::default();
        self.tick += 1;

        if let Some(remaining) = self.time_remaining_ms.as_mut() {
            *remaining -= TICK_INTERVAL_MS as i64;
        }
        if !self.is_solo && self.time_remaining_ms.is_some_and(|t| t <= 0) {
            report.finished = Some(self.finish());
            return report;
        }

        // Movement, clamping, energy regen
        for user_id in &self.join_order {
            if let Some(player) = self.players.get_mut(user_id) {
                MovementSystem::step_player(&self.map, player, dt);
                player.regen_energy(dt);
            }
        }

        // Glow capture, in join order
        for user_id in &self.join_order {
            if let Some(player) = self.players.get(user_id) {
                for tile in MovementSystem::glow_tiles(player.x, player.y, player.glow_radius()) {
                    self.owners.capture(tile, *user_id);
                }
            }
        }

        // Beams: advance, capture immediately, retire the dead
        for i in 0..self.beams.len() {
            let owner_id = self.beams[i].owner_id;
            let piercing = self
                .players
                .get(&owner_id)
                .map(|p| p.has_piercing)
                .unwrap_or(false);
            let captured = self.beams[i].advance(&self.map, piercing, dt);
            for tile in captured {
                self.owners.capture(tile, owner_id);
            }
            if !self.beams[i].active {
                report.ended_beams.push(self.beams[i].id);
            }
        }
        self.beams.retain(|b| b.active);

        // Income
        EconomySystem::apply_income(
            &mut self.players,
            &self.join_order,
            &self.map,
            &self.owners,
            dt,
        );

        // Coin drops: new telegraphs, spawns, pickups
        if let Some(drop) =
            EconomySystem::maybe_spawn_drop(&mut self.rng, &self.drops, self.tick, self.map.size)
        {
            report.telegraphs.push(drop.clone());
            self.drops.push(drop);
        }
        report.spawned_drops = EconomySystem::promote_spawned(&mut self.drops, self.tick);
        report.pickups =
            EconomySystem::resolve_pickups(&mut self.drops, &mut self.players, &self.join_order);

        report.changed_tiles = self.owners.drain_changes();
        report
    }

    /// Transition to finished and compute scores.
    pub fn finish(&mut self) -> MatchEndReport {
        self.phase = MatchPhase::Finished;
        let (winner_id, scores) = self.compute_scores();
        MatchEndReport { winner_id, scores }
    }

    /// Percentage of capturable tiles held, one decimal, per player.
    /// Winner is the highest score; ties go to the earlier joiner.
    pub fn compute_scores(&self) -> (Option<Uuid>, HashMap<Uuid, f64>) {
        let total = self.owners.total_capturable();
        let mut scores = HashMap::new();
        let mut winner: Option<(Uuid, f64)> = None;

        for user_id in &self.join_order {
            let owned = self.owners.owned_count(*user_id);
            let score = if total == 0 {
                0.0
            } else {
                (100.0 * owned as f64 / total as f64 * 10.0).round() / 10.0
            };
            scores.insert(*user_id, score);
            if winner.map_or(true, |(_, best)| score > best) {
                winner = Some((*user_id, score));
            }
        }

        (winner.map(|(id, _)| id), scores)
    }
}

/// Commands on the match mailbox.
#[derive(Debug, Clone)]
pub enum MatchCmd {
    /// A message from a connected client
    Client(PlayerInput),
    /// Socket-level join, carrying the resolved profile
    Join {
        user_id: Uuid,
        display_name: String,
        avatar_url: Option<String>,
    },
    /// Polite stop (janitor or shutdown)
    Shutdown { reason: &'static str },
}

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    pub cmd_tx: mpsc::Sender<MatchCmd>,
    pub event_tx: broadcast::Sender<ServerMsg>,
    pub player_count: Arc<AtomicUsize>,
}

impl MatchHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }
}

/// The authoritative match actor. All state mutation happens on its task;
/// the mailbox and the tick timer are its only suspension points.
pub struct GameMatch {
    state: MatchState,
    cmd_rx: mpsc::Receiver<MatchCmd>,
    event_tx: broadcast::Sender<ServerMsg>,
    player_count: Arc<AtomicUsize>,
    store: MatchStore,
    ticks_since_finished: u32,
    shutting_down: bool,
}

impl GameMatch {
    pub fn new(
        id: Uuid,
        code: String,
        host_id: Uuid,
        is_solo: bool,
        store: MatchStore,
    ) -> (Self, MatchHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (event_tx, _) = broadcast::channel(256);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = MatchHandle {
            id,
            cmd_tx,
            event_tx: event_tx.clone(),
            player_count: player_count.clone(),
        };

        let seed = rand::random::<u64>();
        let game_match = Self {
            state: MatchState::new(id, code, host_id, is_solo, seed),
            cmd_rx,
            event_tx,
            player_count,
            store,
            ticks_since_finished: 0,
            shutting_down: false,
        };

        (game_match, handle)
    }

    /// Run the authoritative tick loop until the match winds down.
    pub async fn run(mut self) {
        info!(match_id = %self.state.id, code = %self.state.code, "Match actor started");

        let mut tick_interval = interval(Duration::from_millis(TICK_INTERVAL_MS));
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut clock = TickClock::start();

        loop {
            tick_interval.tick().await;
            let dt = clock.delta();

            self.process_commands().await;
            if self.shutting_down {
                break;
            }

            match self.state.phase {
                MatchPhase::Waiting => {}
                MatchPhase::Playing => {
                    let report = self.state.step(dt);
                    self.broadcast_tick(report).await;
                }
                MatchPhase::Finished => {
                    self.ticks_since_finished += 1;
                    if self.ticks_since_finished >= FINISHED_LINGER_TICKS {
                        break;
                    }
                }
            }
        }

        info!(match_id = %self.state.id, "Match actor stopped");
    }

    /// Drain the mailbox; commands are applied in arrival order.
    async fn process_commands(&mut self) {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                MatchCmd::Join {
                    user_id,
                    display_name,
                    avatar_url,
                } => self.handle_join(user_id, display_name, avatar_url).await,
                MatchCmd::Client(input) => self.handle_client(input).await,
                MatchCmd::Shutdown { reason } => {
                    info!(match_id = %self.state.id, reason, "Match shutdown requested");
                    self.shutting_down = true;
                    return;
                }
            }
            if self.shutting_down {
                return;
            }
        }
    }

    async fn handle_client(&mut self, input: PlayerInput) {
        // A finished match ignores all further client traffic
        if self.state.phase == MatchPhase::Finished {
            return;
        }

        let user_id = input.user_id;
        match input.msg {
            ClientMsg::Input { w, a, s, d } => {
                self.state.apply_input(user_id, InputState { w, a, s, d });
            }
            ClientMsg::Shoot {
                direction_x,
                direction_y,
            } => {
                let fired = self.state.apply_shoot(user_id, direction_x, direction_y);
                for beam in fired {
                    self.broadcast(ServerMsg::BeamFired {
                        beam: snapshot::beam_wire(&beam),
                    });
                }
            }
            ClientMsg::BuyPowerup { powerup_type } => {
                match self.state.apply_purchase(user_id, &powerup_type) {
                    Ok(kind) => self.broadcast(ServerMsg::PowerupPurchased {
                        user_id,
                        powerup_type: kind.as_str().to_string(),
                    }),
                    Err(e) => self.broadcast_error(user_id, e),
                }
            }
            ClientMsg::StartGame {} => self.handle_start(user_id).await,
            ClientMsg::Ping { t } => {
                self.broadcast(ServerMsg::Pong { t });
            }
            ClientMsg::Leave => self.handle_leave(user_id).await,
        }
    }

    async fn handle_join(
        &mut self,
        user_id: Uuid,
        display_name: String,
        avatar_url: Option<String>,
    ) {
        match self.state.apply_join(user_id, display_name, avatar_url) {
            Ok(JoinOutcome::Joined) => {
                let player = &self.state.players[&user_id];
                let color = player.color.clone();
                let wire = snapshot::player_wire(player);
                self.player_count
                    .store(self.state.players.len(), Ordering::Relaxed);

                if let Err(e) = self.store.add_player(self.state.id, user_id, &color).await {
                    error!(match_id = %self.state.id, user_id = %user_id, error = %e,
                        "Failed to persist player, stopping match");
                    self.shutting_down = true;
                    return;
                }

                self.broadcast(ServerMsg::PlayerJoined { player: wire });
                self.broadcast(snapshot::full_state(&self.state));

                info!(
                    match_id = %self.state.id,
                    user_id = %user_id,
                    player_count = self.state.players.len(),
                    "Player joined match"
                );
            }
            Ok(JoinOutcome::AlreadyJoined) => {
                // Idempotent: hand the full state back without duplicating
                self.broadcast(snapshot::full_state(&self.state));
            }
            Err(e) => self.broadcast_error(user_id, e),
        }
    }

    async fn handle_leave(&mut self, user_id: Uuid) {
        let outcome = self.state.apply_leave(user_id);
        if outcome == LeaveOutcome::NotPresent {
            return;
        }

        self.player_count
            .store(self.state.players.len(), Ordering::Relaxed);
        self.broadcast(ServerMsg::PlayerLeft { user_id });
        info!(match_id = %self.state.id, user_id = %user_id, "Player left match");

        match outcome {
            LeaveOutcome::LastLeftWaiting => {
                info!(match_id = %self.state.id, "Last player left while waiting, closing match");
                self.persist_finish(None, &HashMap::new()).await;
                self.shutting_down = true;
            }
            LeaveOutcome::LastLeftPlaying => {
                info!(match_id = %self.state.id, "All players left mid-game, finishing match");
                let report = self.state.finish();
                self.persist_finish(report.winner_id, &report.scores).await;
                self.broadcast(snapshot::game_ended(&self.state, &report));
                self.shutting_down = true;
            }
            _ => {}
        }
    }

    async fn handle_start(&mut self, user_id: Uuid) {
        match self.state.apply_start(user_id) {
            Ok(()) => {
                // Persist playing before the first tick broadcast
                if let Err(e) = self.store.update_status(self.state.id, "playing").await {
                    error!(match_id = %self.state.id, error = %e,
                        "Failed to persist playing status, stopping match");
                    self.shutting_down = true;
                    return;
                }
                self.broadcast(ServerMsg::GameStarted {
                    time_remaining_ms: self.state.time_remaining_ms.map(|t| t.max(0) as u64),
                });
                info!(match_id = %self.state.id, "Game started");
            }
            Err(e) => self.broadcast_error(user_id, e),
        }
    }

    /// Publish everything one tick produced, then the state delta (or the
    /// game-over message if this tick ended the match).
    async fn broadcast_tick(&mut self, report: TickReport) {
        for id in &report.ended_beams {
            self.broadcast(ServerMsg::BeamEnded { id: *id });
        }
        for drop in &report.telegraphs {
            self.broadcast(ServerMsg::CoinTelegraph {
                drop: snapshot::drop_wire(drop),
            });
        }
        for id in &report.spawned_drops {
            self.broadcast(ServerMsg::CoinSpawned { id: *id });
        }
        for pickup in &report.pickups {
            self.broadcast(ServerMsg::CoinCollected {
                id: pickup.drop_id,
                user_id: pickup.user_id,
                amount: pickup.amount,
            });
        }

        if let Some(end) = report.finished {
            // Persist finished before the game-over broadcast
            self.persist_finish(end.winner_id, &end.scores).await;
            self.broadcast(snapshot::game_ended(&self.state, &end));
            info!(match_id = %self.state.id, winner = ?end.winner_id, "Match finished");
            return;
        }

        self.broadcast(snapshot::state_delta(&self.state, &report.changed_tiles));
    }

    async fn persist_finish(&mut self, winner_id: Option<Uuid>, scores: &HashMap<Uuid, f64>) {
        let final_state = snapshot::final_state_json(&self.state);
        if let Err(e) = self
            .store
            .finish_match(self.state.id, winner_id, final_state, scores)
            .await
        {
            // The match is over regardless; the janitor reconciles the row
            error!(match_id = %self.state.id, error = %e, "Failed to persist match result");
        }
    }

    fn broadcast(&self, msg: ServerMsg) {
        // Publishing never blocks the simulation; lagging subscribers drop
        let _ = self.event_tx.send(msg);
    }

    fn broadcast_error(&self, user_id: Uuid, e: GameError) {
        warn!(match_id = %self.state.id, user_id = %user_id, code = e.code(), "Rejected request");
        self.broadcast(ServerMsg::Error {
            user_id: Some(user_id),
            code: e.code().to_string(),
            message: e.to_string(),
        });
    }
}

/// Registry of all active matches: the only cross-match mutable state.
pub struct MatchRegistry {
    matches: Arc<DashMap<Uuid, MatchHandle>>,
    store: MatchStore,
}

impl MatchRegistry {
    pub fn new(store: MatchStore) -> Self {
        Self {
            matches: Arc::new(DashMap::new()),
            store,
        }
    }

    /// Start the actor for a match, or return the existing handle if one is
    /// already running (double-start is a lookup).
    pub fn start(&self, id: Uuid, code: String, host_id: Uuid, is_solo: bool) -> MatchHandle {
        if let Some(existing) = self.lookup(&id) {
            return existing;
        }

        let (game_match, handle) = GameMatch::new(id, code, host_id, is_solo, self.store.clone());
        self.matches.insert(id, handle.clone());

        let registry_matches = self.matches.clone();
        tokio::spawn(async move {
            game_match.run().await;
            registry_matches.remove(&id);
            info!(match_id = %id, "Match removed from registry");
        });

        handle
    }

    /// Request a polite shutdown. Returns false if no such match is live.
    pub fn stop(&self, id: &Uuid, reason: &'static str) -> bool {
        match self.matches.get(id) {
            Some(handle) => handle
                .cmd_tx
                .try_send(MatchCmd::Shutdown { reason })
                .is_ok(),
            None => false,
        }
    }

    pub fn lookup(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    pub fn exists(&self, id: &Uuid) -> bool {
        self.matches.contains_key(id)
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches.iter().map(|m| m.value().player_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::TileKind;
    use crate::game::player::COIN_CAP;
    use std::collections::HashMap as StdHashMap;

    const DT: f64 = 0.05;

    fn open_map(size: i16) -> GameMap {
        let mut tiles = StdHashMap::new();
        for y in 0..size {
            for x in 0..size {
                tiles.insert((x, y), TileKind::Walkable);
            }
        }
        GameMap::from_tiles(
            size,
            tiles,
            vec![],
            vec![(2, 2), (size - 3, 2), (2, size - 3), (size - 3, size - 3)],
        )
    }

    fn waiting_state() -> MatchState {
        let host = Uuid::new_v4();
        MatchState::with_map(Uuid::new_v4(), host, false, open_map(30))
    }

    fn playing_state_with(players: usize) -> (MatchState, Vec<Uuid>) {
        let mut state = waiting_state();
        let mut ids = Vec::new();
        for i in 0..players {
            let id = if i == 0 { state.host_id } else { Uuid::new_v4() };
            state.apply_join(id, format!("p{}", i), None).unwrap();
            ids.push(id);
        }
        state.apply_start(state.host_id).unwrap();
        (state, ids)
    }

    #[test]
    fn joins_assign_colors_and_spawns_in_order() {
        let mut state = waiting_state();
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(
                state.apply_join(*id, format!("p{}", i), None).unwrap(),
                JoinOutcome::Joined
            );
        }

        for (i, id) in ids.iter().enumerate() {
            let player = &state.players[id];
            assert_eq!(player.color, PLAYER_COLORS[i]);
            let spawn = state.map.spawn_points[i];
            assert_eq!((player.x, player.y), (spawn.0 as f64, spawn.1 as f64));
        }
        assert_eq!(state.join_order, ids);
    }

    #[test]
    fn fifth_join_is_rejected() {
        let mut state = waiting_state();
        for i in 0..4 {
            state.apply_join(Uuid::new_v4(), format!("p{}", i), None).unwrap();
        }
        assert_eq!(
            state.apply_join(Uuid::new_v4(), "p4".to_string(), None),
            Err(GameError::MatchFull)
        );
    }

    #[test]
    fn rejoin_is_idempotent() {
        let mut state = waiting_state();
        let id = Uuid::new_v4();
        state.apply_join(id, "p0".to_string(), None).unwrap();
        assert_eq!(
            state.apply_join(id, "p0".to_string(), None).unwrap(),
            JoinOutcome::AlreadyJoined
        );
        assert_eq!(state.players.len(), 1);
        assert_eq!(state.join_order.len(), 1);
    }

    #[test]
    fn join_after_start_is_rejected_except_for_members() {
        let (mut state, ids) = playing_state_with(2);
        assert_eq!(
            state.apply_join(Uuid::new_v4(), "late".to_string(), None),
            Err(GameError::GameInProgress)
        );
        // Members rejoin fine (reconnect)
        assert_eq!(
            state.apply_join(ids[0], "p0".to_string(), None).unwrap(),
            JoinOutcome::AlreadyJoined
        );
    }

    #[test]
    fn start_requires_host_and_enough_players() {
        let mut state = waiting_state();
        let guest = Uuid::new_v4();
        state.apply_join(state.host_id, "host".to_string(), None).unwrap();

        assert_eq!(state.apply_start(state.host_id), Err(GameError::NotEnoughPlayers));

        state.apply_join(guest, "guest".to_string(), None).unwrap();
        assert_eq!(state.apply_start(guest), Err(GameError::NotHost));

        assert!(state.apply_start(state.host_id).is_ok());
        assert_eq!(state.phase, MatchPhase::Playing);
        assert_eq!(state.time_remaining_ms, Some(MATCH_DURATION_MS));

        assert_eq!(state.apply_start(state.host_id), Err(GameError::GameAlreadyStarted));
    }

    #[test]
    fn solo_matches_start_alone_and_carry_no_clock() {
        let host = Uuid::new_v4();
        let mut state = MatchState::with_map(Uuid::new_v4(), host, true, open_map(30));
        state.apply_join(host, "solo".to_string(), None).unwrap();
        state.apply_start(host).unwrap();
        assert_eq!(state.time_remaining_ms, None);

        // Ticks never finish a solo match on time
        for _ in 0..100 {
            assert!(state.step(DT).finished.is_none());
        }
    }

    #[test]
    fn shoot_requires_playing_and_debits_energy() {
        let mut state = waiting_state();
        let id = Uuid::new_v4();
        state.apply_join(id, "p0".to_string(), None).unwrap();

        // Waiting: silently dropped, no debit
        assert!(state.apply_shoot(id, 1.0, 0.0).is_empty());
        assert_eq!(state.players[&id].energy, 100.0);

        let (mut state, ids) = playing_state_with(2);
        let fired = state.apply_shoot(ids[0], 1.0, 0.0);
        assert_eq!(fired.len(), 1);
        assert_eq!(state.players[&ids[0]].energy, 100.0 - SHOOT_ENERGY_COST);
        assert_eq!(state.beams.len(), 1);
    }

    #[test]
    fn muzzle_blocked_shot_still_costs_energy() {
        let host = Uuid::new_v4();
        let mut tiles = StdHashMap::new();
        for y in 0..30 {
            for x in 0..30 {
                tiles.insert((x, y), TileKind::Walkable);
            }
        }
        tiles.insert((3, 2), TileKind::Wall);
        let map = GameMap::from_tiles(30, tiles, vec![], vec![(2, 2), (27, 2), (2, 27), (27, 27)]);
        let mut state = MatchState::with_map(Uuid::new_v4(), host, true, map);
        state.apply_join(host, "host".to_string(), None).unwrap();
        state.apply_start(host).unwrap();

        // Spawn (2,2), shooting +x samples floor(2.0 + 0.6) == 2... move the
        // player against the wall so the muzzle lands in it
        state.players.get_mut(&host).unwrap().x = 2.5;
        let fired = state.apply_shoot(host, 1.0, 0.0);
        assert!(fired.is_empty());
        assert_eq!(
            state.players[&host].energy,
            100.0 - SHOOT_ENERGY_COST,
            "energy is debited before the muzzle check collapses the volley"
        );
    }

    #[test]
    fn depleted_energy_drops_the_shot_without_debit() {
        let (mut state, ids) = playing_state_with(2);
        state.players.get_mut(&ids[0]).unwrap().energy = SHOOT_ENERGY_COST - 1.0;
        assert!(state.apply_shoot(ids[0], 1.0, 0.0).is_empty());
        assert_eq!(state.players[&ids[0]].energy, SHOOT_ENERGY_COST - 1.0);
    }

    #[test]
    fn multishot_fires_three_and_beam_speed_doubles() {
        let (mut state, ids) = playing_state_with(2);
        {
            let p = state.players.get_mut(&ids[0]).unwrap();
            p.has_multishot = true;
            p.has_beam_speed = true;
            p.coins = COIN_CAP;
        }
        let fired = state.apply_shoot(ids[0], 0.0, 1.0);
        assert_eq!(fired.len(), 3);
        assert!(fired.iter().all(|b| b.speed == BEAM_SPEED_BOOSTED));
    }

    #[test]
    fn tick_decrements_clock_and_times_out_into_finished() {
        let (mut state, _) = playing_state_with(2);
        state.time_remaining_ms = Some(TICK_INTERVAL_MS as i64 * 2);

        let report = state.step(DT);
        assert!(report.finished.is_none());
        assert_eq!(state.time_remaining_ms, Some(TICK_INTERVAL_MS as i64));

        let report = state.step(DT);
        let end = report.finished.expect("second tick must end the match");
        assert_eq!(state.phase, MatchPhase::Finished);
        assert_eq!(end.scores.len(), 2);
    }

    #[test]
    fn glow_capture_shows_up_in_the_tile_delta() {
        let (mut state, ids) = playing_state_with(2);
        let report = state.step(DT);
        assert!(report.finished.is_none());

        // Each player captured the disc around their spawn
        let spawn = state.map.spawn_points[0];
        assert_eq!(state.owners.owner_of(spawn), Some(ids[0]));
        assert!(report
            .changed_tiles
            .values()
            .any(|owner| *owner == Some(ids[0])));

        // A quiet second tick produces no tile changes for idle players
        let report = state.step(DT);
        assert!(report.changed_tiles.is_empty());
    }

    #[test]
    fn contested_tiles_go_to_the_later_joiner_processed_last() {
        let (mut state, ids) = playing_state_with(2);
        // Stack both players on the same cell; join order decides
        let (x, y) = {
            let p0 = &state.players[&ids[0]];
            (p0.x, p0.y)
        };
        {
            let p1 = state.players.get_mut(&ids[1]).unwrap();
            p1.x = x;
            p1.y = y;
        }
        state.step(DT);
        let cell = (x.floor() as i16, y.floor() as i16);
        assert_eq!(state.owners.owner_of(cell), Some(ids[1]));
    }

    #[test]
    fn scoring_matches_the_ownership_distribution() {
        // 32x32 grid with 24 blocked tiles leaves exactly 1000 capturable
        let size = 32;
        let mut tiles = StdHashMap::new();
        for y in 0..size {
            for x in 0..size {
                tiles.insert((x, y), TileKind::Walkable);
            }
        }
        for x in 0..24 {
            tiles.insert((x, 0), TileKind::Wall);
        }
        let map = GameMap::from_tiles(size, tiles, vec![], vec![(2, 2), (29, 2), (2, 29), (29, 29)]);
        let host = Uuid::new_v4();
        let mut state = MatchState::with_map(Uuid::new_v4(), host, false, map);

        let ids: Vec<Uuid> = (0..4)
            .map(|i| {
                let id = if i == 0 { host } else { Uuid::new_v4() };
                state.apply_join(id, format!("p{}", i), None).unwrap();
                id
            })
            .collect();
        state.apply_start(host).unwrap();
        assert_eq!(state.owners.total_capturable(), 1000);

        // Hand out 120 / 80 / 50 / 0 tiles
        let mut coords: Vec<TileCoord> = (1..size)
            .flat_map(|y| (0..size).map(move |x| (x, y)))
            .collect();
        coords.truncate(250);
        for (i, coord) in coords.iter().enumerate() {
            let owner = match i {
                0..=119 => ids[0],
                120..=199 => ids[1],
                _ => ids[2],
            };
            state.owners.capture(*coord, owner);
        }

        let (winner, scores) = state.compute_scores();
        assert_eq!(winner, Some(ids[0]));
        assert_eq!(scores[&ids[0]], 12.0);
        assert_eq!(scores[&ids[1]], 8.0);
        assert_eq!(scores[&ids[2]], 5.0);
        assert_eq!(scores[&ids[3]], 0.0);
    }

    #[test]
    fn leave_outcomes_follow_the_phase() {
        let mut state = waiting_state();
        let host = state.host_id;
        let guest = Uuid::new_v4();
        state.apply_join(host, "host".to_string(), None).unwrap();
        state.apply_join(guest, "guest".to_string(), None).unwrap();

        assert_eq!(state.apply_leave(Uuid::new_v4()), LeaveOutcome::NotPresent);
        assert_eq!(state.apply_leave(guest), LeaveOutcome::Left);
        assert_eq!(state.apply_leave(host), LeaveOutcome::LastLeftWaiting);
        assert!(state.players.is_empty());

        let (mut state, ids) = playing_state_with(2);
        assert_eq!(state.apply_leave(ids[0]), LeaveOutcome::Left);
        assert_eq!(state.apply_leave(ids[1]), LeaveOutcome::LastLeftPlaying);
    }

    #[test]
    fn purchases_require_a_running_game_and_known_types() {
        let mut state = waiting_state();
        let id = Uuid::new_v4();
        state.apply_join(id, "p0".to_string(), None).unwrap();
        assert_eq!(
            state.apply_purchase(id, "speed"),
            Err(GameError::GameNotPlaying)
        );

        let (mut state, ids) = playing_state_with(2);
        assert_eq!(
            state.apply_purchase(ids[0], "warp"),
            Err(GameError::InvalidPowerup)
        );
        assert_eq!(
            state.apply_purchase(Uuid::new_v4(), "speed"),
            Err(GameError::NotInGame)
        );

        state.players.get_mut(&ids[0]).unwrap().coins = 100.0;
        assert_eq!(state.apply_purchase(ids[0], "speed"), Ok(PowerupKind::Speed));
        assert_eq!(state.players[&ids[0]].coins, 85.0);
    }

    #[test]
    fn beams_capture_their_row_as_they_fly() {
        let (mut state, ids) = playing_state_with(2);
        let fired = state.apply_shoot(ids[0], 1.0, 0.0);
        assert_eq!(fired.len(), 1);

        let (px, py) = {
            let p = &state.players[&ids[0]];
            (p.x, p.y)
        };
        state.step(DT);
        // 0.75 tiles after one tick at speed 15: the muzzle-side neighbor
        // is already tagged
        let row_y = py as i16;
        let next = ((px as i16) + 1, row_y);
        assert_eq!(state.owners.owner_of(next), Some(ids[0]));
    }

    #[test]
    fn ended_beams_are_reported_and_retired() {
        let (mut state, ids) = playing_state_with(2);
        state.apply_shoot(ids[0], 1.0, 0.0);
        let beam_id = state.beams[0].id;
        // Expire by lifetime
        state.beams[0].time_alive = 9.99;
        let report = state.step(DT);
        assert_eq!(report.ended_beams, vec![beam_id]);
        assert!(state.beams.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn registry_runs_one_actor_per_id() {
        use crate::store::SupabaseClient;

        let store = MatchStore::new(SupabaseClient::new("http://localhost:9", "test-key"));
        let registry = MatchRegistry::new(store);
        let id = Uuid::new_v4();

        let h1 = registry.start(id, "AAAAAA".to_string(), Uuid::new_v4(), false);
        let h2 = registry.start(id, "BBBBBB".to_string(), Uuid::new_v4(), false);
        assert!(h1.cmd_tx.same_channel(&h2.cmd_tx), "double-start must be a lookup");
        assert_eq!(registry.active_matches(), 1);
        assert!(registry.exists(&id));

        assert!(registry.stop(&id, "test"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!registry.exists(&id));
        assert!(!registry.stop(&id, "test"));
    }
}
