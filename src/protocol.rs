//! Wire messages for the collaborator WebSocket surface and the engine link.

use crate::types::*;
use serde::{Deserialize, Serialize};

/// Messages from collaborators (chat bot, operator console, overlay).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Chat-derived vote event. `voter_id` may be empty for anonymous
    /// connections; the socket's session id is used instead.
    Vote {
        index: usize,
        #[serde(default)]
        voter_id: VoterId,
    },
    // Operator-only messages
    StartVote {
        /// Overrides the configured vote duration when set
        duration_secs: Option<f64>,
    },
    EndVote,
    /// Insert a modifier immediately, bypassing the vote
    InsertModifier {
        key: ModifierKey,
        #[serde(default)]
        refresh_pool: bool,
    },
    /// Clear a named active slot
    RemoveModifier {
        name: String,
    },
    ResetSlots,
    SetModifierEnabled {
        key: ModifierKey,
        enabled: bool,
    },
    DescribeModifier {
        key: ModifierKey,
    },
    SetCycleMode {
        mode: CycleMode,
    },
    SetVotingType {
        voting_type: VotingType,
    },
    SetOptionCount {
        count: usize,
    },
    SetActiveSlotCount {
        count: usize,
    },
    SetTiming {
        lifetime_secs: Option<f64>,
        vote_duration_secs: Option<f64>,
        vote_delay_secs: Option<f64>,
        softmax_factor: Option<f64>,
    },
    SelectGame {
        name: String,
    },
    QueryAvailableGames,
    QueryGameInfo,
    /// Repoint the engine link at runtime. `peer_host`/`peer_port` must be
    /// set together; `listen_port` rebinds the inbound listener.
    SetEngineEndpoints {
        #[serde(default)]
        peer_host: Option<String>,
        #[serde(default)]
        peer_port: Option<u16>,
        #[serde(default)]
        listen_port: Option<u16>,
    },
}

/// One candidate as rendered by collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateView {
    pub key: ModifierKey,
    pub name: String,
    pub votes: u32,
}

/// Messages pushed to collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Periodic read-only snapshot of the rotation for rendering
    Snapshot {
        candidates: Vec<CandidateView>,
        /// elapsed / target for the open vote, clamped to [0, 1]
        progress: f64,
        slots: Vec<ActiveSlot>,
        vote_open: bool,
        paused: bool,
        connected: bool,
        game: Option<String>,
        server_now: String,
        seq: u64,
    },
    AvailableGames {
        games: Vec<String>,
    },
    ModifierDescription {
        key: ModifierKey,
        description: Option<String>,
    },
    Ack,
    Error {
        message: String,
    },
}

/// Outbound request to the engine peer.
///
/// Serialized as the flat key/value objects the engine expects, e.g.
/// `{"winner": "Moon Gravity", "time": 180.0}` or `{"selectGame": "..."}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum EngineRequest {
    Winner {
        winner: String,
        time: f64,
    },
    GameInfo {
        game: bool,
    },
    AvailableGames {
        #[serde(rename = "availableGames")]
        available_games: bool,
    },
    SelectGame {
        #[serde(rename = "selectGame")]
        select_game: String,
    },
}

/// Unsolicited inbound message from the engine peer.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EngineInbound {
    Game {
        game: GameDescriptor,
    },
    Pause {
        pause: bool,
    },
    AvailableGames {
        #[serde(rename = "availableGames")]
        available_games: Vec<String>,
    },
}
