use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Opaque ID types for type safety
pub type ModifierKey = String;
pub type VoterId = String;

/// A single gameplay modifier known to the engine.
///
/// The `key` is the lowercase unique identity; `name` is what collaborators
/// render and what the engine is told when the modifier wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Modifier {
    pub key: ModifierKey,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Group tags, e.g. "movement" or "camera"
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Times this modifier has won a cycle; feeds anti-repetition weighting
    #[serde(default)]
    pub usage: u32,
}

fn default_enabled() -> bool {
    true
}

impl Modifier {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into().to_lowercase(),
            name: name.into(),
            description: String::new(),
            groups: BTreeSet::new(),
            enabled: true,
            usage: 0,
        }
    }
}

/// What the engine announced about the currently running game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameDescriptor {
    pub name: String,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
}

/// Policy governing when a new vote opens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CycleMode {
    /// A new vote opens the moment the previous one closes
    Continuous,
    /// Fixed delay between a close and the next open
    Interval,
    /// Uniform random delay in [0, max] between close and next open
    Random,
    /// Votes open only on explicit operator request
    Triggered,
    Disabled,
}

impl CycleMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "continuous" => Some(Self::Continuous),
            "interval" => Some(Self::Interval),
            "random" => Some(Self::Random),
            "triggered" => Some(Self::Triggered),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// How a winner is chosen when a vote closes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VotingType {
    /// Highest count wins, uniform among ties
    Majority,
    /// Index drawn with probability proportional to counts (floor of 1 on
    /// zero participation)
    Proportional,
    /// Uniform weighted draw over eligible modifiers, tallies ignored
    Authoritarian,
}

impl VotingType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "majority" => Some(Self::Majority),
            "proportional" => Some(Self::Proportional),
            "authoritarian" => Some(Self::Authoritarian),
            _ => None,
        }
    }
}

/// Voting-cycle phase. Closing is not a stored state; it happens
/// synchronously within one scheduler tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    Open,
}

/// One currently-in-effect modifier position.
///
/// `life` counts down from 1.0 and may go negative (overdue); a negative
/// slot stays expired until a new winner displaces it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveSlot {
    pub name: String,
    pub life: f64,
}

impl ActiveSlot {
    pub fn empty() -> Self {
        Self {
            name: String::new(),
            life: 0.0,
        }
    }
}

/// Role a WebSocket collaborator connects as.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Chat bot feeding vote events
    Bot,
    /// Operator console issuing administrative commands
    Operator,
    /// On-stream overlay, read-only
    Overlay,
}
