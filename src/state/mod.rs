mod catalog;
mod slots;
mod tally;

pub use catalog::ModifierCatalog;
pub use slots::ActiveSlots;
pub use tally::VoteTally;

use crate::config::RotationConfig;
use crate::engine::EngineLink;
use crate::protocol::{CandidateView, EngineInbound, ServerMessage};
use crate::scheduler::AdminRequest;
use crate::types::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch, RwLock};

/// Everything the voting rotation mutates, behind one lock.
///
/// The scheduler tick, the engine listener, and the ws handlers all funnel
/// their writes through `RotationState::rotation` so a tick always observes
/// a consistent snapshot.
#[derive(Debug)]
pub struct Rotation {
    pub catalog: ModifierCatalog,
    /// Candidate keys for the open cycle; "" marks an absent entry
    pub pool: Vec<ModifierKey>,
    pub tally: VoteTally,
    pub slots: ActiveSlots,
    pub phase: CyclePhase,
    pub opened_at: Option<Instant>,
    /// Target duration of the currently open vote
    pub vote_duration: Duration,
    /// When the next vote may open; None means "never" (Triggered/Disabled)
    pub next_open: Option<Instant>,
    /// elapsed / target for the open vote, clamped to [0, 1]
    pub progress: f64,
    pub paused: bool,
    pub engine_connected: bool,
    pub game_name: Option<String>,
    pub available_games: Vec<String>,
}

impl Rotation {
    pub fn new(config: &RotationConfig) -> Self {
        Self {
            catalog: ModifierCatalog::new(),
            pool: Vec::new(),
            tally: VoteTally::new(),
            slots: ActiveSlots::new(config.active_slots),
            phase: CyclePhase::Idle,
            opened_at: None,
            vote_duration: config.vote_duration(),
            next_open: None,
            progress: 0.0,
            paused: false,
            engine_connected: false,
            game_name: None,
            available_games: Vec::new(),
        }
    }

    /// Votes cannot open and authoritarian winners cannot be drawn until the
    /// engine has announced a game with at least one modifier.
    pub fn engine_data_valid(&self) -> bool {
        !self.catalog.is_empty()
    }

    /// The candidate pool as collaborators render it.
    pub fn candidate_views(&self) -> Vec<CandidateView> {
        let counts = self.tally.counts();
        self.pool
            .iter()
            .enumerate()
            .map(|(i, key)| CandidateView {
                key: key.clone(),
                name: self
                    .catalog
                    .get(key)
                    .map(|m| m.name.clone())
                    .unwrap_or_default(),
                votes: counts.get(i).copied().unwrap_or(0),
            })
            .collect()
    }
}

/// Shared application state
#[derive(Clone)]
pub struct RotationState {
    pub rotation: Arc<RwLock<Rotation>>,
    pub config: Arc<RwLock<RotationConfig>>,
    /// Administrative requests, drained by the scheduler once per tick
    pub admin_tx: mpsc::UnboundedSender<AdminRequest>,
    /// Broadcast channel for pushing messages to collaborator clients
    pub broadcast: broadcast::Sender<ServerMessage>,
    /// Engine link handle, attached at startup, for live endpoint changes
    link: Arc<RwLock<Option<Arc<EngineLink>>>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl RotationState {
    /// Build the shared state plus the receiving half of the admin queue,
    /// which the scheduler takes ownership of.
    pub fn new(config: RotationConfig) -> (Self, mpsc::UnboundedReceiver<AdminRequest>) {
        let (admin_tx, admin_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, _) = broadcast::channel(100);
        let (shutdown_tx, _) = watch::channel(false);
        let state = Self {
            rotation: Arc::new(RwLock::new(Rotation::new(&config))),
            config: Arc::new(RwLock::new(config)),
            admin_tx,
            broadcast: broadcast_tx,
            link: Arc::new(RwLock::new(None)),
            shutdown: Arc::new(shutdown_tx),
        };
        (state, admin_rx)
    }

    /// Attach the engine link so operators can repoint it at runtime.
    pub async fn attach_link(&self, link: Arc<EngineLink>) {
        *self.link.write().await = Some(link);
    }

    pub async fn engine_link(&self) -> Option<Arc<EngineLink>> {
        self.link.read().await.clone()
    }

    /// Record a chat-derived vote. Accepted even while paused; silently
    /// ignored when no vote is open or the voter already voted this cycle.
    pub async fn record_vote(&self, index: usize, voter: &str) -> bool {
        let mut rotation = self.rotation.write().await;
        if rotation.phase != CyclePhase::Open {
            return false;
        }
        rotation.tally.record(index, voter)
    }

    /// Enqueue an administrative request for the next tick.
    pub fn admin(&self, request: AdminRequest) {
        if self.admin_tx.send(request).is_err() {
            tracing::warn!("admin queue closed, scheduler is gone");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.broadcast.subscribe()
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Flip the cooperative shutdown flag; every loop exits promptly.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Apply an unsolicited message from the engine peer.
    pub async fn apply_engine_inbound(&self, message: EngineInbound) {
        match message {
            EngineInbound::Game { game } => {
                let mut rotation = self.rotation.write().await;
                tracing::info!(
                    game = %game.name,
                    modifiers = game.modifiers.len(),
                    "engine announced game, replacing catalog"
                );
                rotation.game_name = Some(game.name);
                rotation.catalog.replace(game.modifiers);
            }
            EngineInbound::Pause { pause } => {
                let mut rotation = self.rotation.write().await;
                if rotation.paused != pause {
                    tracing::info!(paused = pause, "engine pause state changed");
                }
                rotation.paused = pause;
            }
            EngineInbound::AvailableGames { available_games } => {
                // Informational only; forwarded upward to collaborators
                self.rotation.write().await.available_games = available_games.clone();
                let _ = self.broadcast.send(ServerMessage::AvailableGames {
                    games: available_games,
                });
            }
        }
    }

    /// Build the read-only snapshot collaborators render from.
    pub async fn snapshot(&self, seq: u64) -> ServerMessage {
        let rotation = self.rotation.read().await;
        ServerMessage::Snapshot {
            candidates: rotation.candidate_views(),
            progress: rotation.progress,
            slots: rotation.slots.slots().to_vec(),
            vote_open: rotation.phase == CyclePhase::Open,
            paused: rotation.paused,
            connected: rotation.engine_connected,
            game: rotation.game_name.clone(),
            server_now: chrono::Utc::now().to_rfc3339(),
            seq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_game() -> GameDescriptor {
        GameDescriptor {
            name: "skate3".to_string(),
            modifiers: vec![
                Modifier::new("moon", "Moon Gravity"),
                Modifier::new("drunk", "Drunk Controls"),
            ],
        }
    }

    #[tokio::test]
    async fn test_engine_game_replaces_catalog() {
        let (state, _admin_rx) = RotationState::new(RotationConfig::default());
        assert!(!state.rotation.read().await.engine_data_valid());

        state
            .apply_engine_inbound(EngineInbound::Game {
                game: sample_game(),
            })
            .await;

        let rotation = state.rotation.read().await;
        assert!(rotation.engine_data_valid());
        assert_eq!(rotation.game_name.as_deref(), Some("skate3"));
        assert_eq!(rotation.catalog.len(), 2);
    }

    #[tokio::test]
    async fn test_engine_pause_sets_flag() {
        let (state, _admin_rx) = RotationState::new(RotationConfig::default());
        state
            .apply_engine_inbound(EngineInbound::Pause { pause: true })
            .await;
        assert!(state.rotation.read().await.paused);
        state
            .apply_engine_inbound(EngineInbound::Pause { pause: false })
            .await;
        assert!(!state.rotation.read().await.paused);
    }

    #[tokio::test]
    async fn test_available_games_forwarded() {
        let (state, _admin_rx) = RotationState::new(RotationConfig::default());
        let mut rx = state.subscribe();
        state
            .apply_engine_inbound(EngineInbound::AvailableGames {
                available_games: vec!["a".to_string(), "b".to_string()],
            })
            .await;
        match rx.recv().await.unwrap() {
            ServerMessage::AvailableGames { games } => assert_eq!(games, vec!["a", "b"]),
            other => panic!("unexpected broadcast: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_record_vote_requires_open_cycle() {
        let (state, _admin_rx) = RotationState::new(RotationConfig::default());
        assert!(!state.record_vote(0, "alice").await);

        {
            let mut rotation = state.rotation.write().await;
            rotation.phase = CyclePhase::Open;
            rotation.pool = vec!["moon".to_string(), "drunk".to_string()];
            rotation.tally.reset(2);
        }
        assert!(state.record_vote(0, "alice").await);
        assert!(!state.record_vote(1, "alice").await);
    }

    #[tokio::test]
    async fn test_snapshot_shape() {
        let (state, _admin_rx) = RotationState::new(RotationConfig::default());
        state
            .apply_engine_inbound(EngineInbound::Game {
                game: sample_game(),
            })
            .await;
        {
            let mut rotation = state.rotation.write().await;
            rotation.phase = CyclePhase::Open;
            rotation.pool = vec!["moon".to_string()];
            rotation.tally.reset(1);
            rotation.tally.record(0, "alice");
        }

        match state.snapshot(1).await {
            ServerMessage::Snapshot {
                candidates,
                vote_open,
                seq,
                ..
            } => {
                assert!(vote_open);
                assert_eq!(seq, 1);
                assert_eq!(candidates.len(), 1);
                assert_eq!(candidates[0].name, "Moon Gravity");
                assert_eq!(candidates[0].votes, 1);
            }
            other => panic!("unexpected snapshot: {:?}", other),
        }
    }
}
