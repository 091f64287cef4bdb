//! Rotation configuration.
//!
//! Every recognized option lives here with an explicit default. Values are
//! clamped to safe minimums at configuration time, never at use time, so the
//! scheduler and selector can trust what they read.

use crate::types::{CycleMode, VotingType};
use std::time::Duration;

/// Configuration for the voting rotation itself.
#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Number of concurrently active modifier slots (min 1)
    pub active_slots: usize,
    /// Number of candidates per vote (min 2)
    pub vote_options: usize,
    /// How long an inserted modifier stays in effect (min 1s)
    pub modifier_lifetime_secs: f64,
    /// Softmax decay factor in (0, 100]; lower suppresses repeat winners harder
    pub softmax_factor: f64,
    pub voting_type: VotingType,
    pub cycle_mode: CycleMode,
    /// Target duration of an open vote (min 1s)
    pub vote_duration_secs: f64,
    /// Delay between votes for Interval mode, max delay for Random mode (min 0)
    pub vote_delay_secs: f64,
    /// Scheduler tick rate in Hz (min 0.1)
    pub tick_hz: f64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            active_slots: 3,
            vote_options: 3,
            modifier_lifetime_secs: 180.0,
            softmax_factor: 33.3,
            voting_type: VotingType::Proportional,
            cycle_mode: CycleMode::Continuous,
            vote_duration_secs: 25.0,
            vote_delay_secs: 30.0,
            tick_hz: 20.0,
        }
    }
}

impl RotationConfig {
    /// Load rotation config from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut config = Self {
            active_slots: env_parse("MODWHEEL_ACTIVE_SLOTS", defaults.active_slots),
            vote_options: env_parse("MODWHEEL_VOTE_OPTIONS", defaults.vote_options),
            modifier_lifetime_secs: env_parse(
                "MODWHEEL_MODIFIER_LIFETIME_SECS",
                defaults.modifier_lifetime_secs,
            ),
            softmax_factor: env_parse("MODWHEEL_SOFTMAX_FACTOR", defaults.softmax_factor),
            voting_type: std::env::var("MODWHEEL_VOTING_TYPE")
                .ok()
                .and_then(|s| VotingType::parse(&s))
                .unwrap_or(defaults.voting_type),
            cycle_mode: std::env::var("MODWHEEL_CYCLE_MODE")
                .ok()
                .and_then(|s| CycleMode::parse(&s))
                .unwrap_or(defaults.cycle_mode),
            vote_duration_secs: env_parse(
                "MODWHEEL_VOTE_DURATION_SECS",
                defaults.vote_duration_secs,
            ),
            vote_delay_secs: env_parse("MODWHEEL_VOTE_DELAY_SECS", defaults.vote_delay_secs),
            tick_hz: env_parse("MODWHEEL_TICK_HZ", defaults.tick_hz),
        };
        config.clamp();
        config
    }

    /// Clamp every numeric option into its safe range.
    pub fn clamp(&mut self) {
        self.active_slots = self.active_slots.max(1);
        self.vote_options = self.vote_options.max(2);
        self.modifier_lifetime_secs = self.modifier_lifetime_secs.max(1.0);
        // Factor of exactly 0 would zero every weight; 100 is near-uniform
        self.softmax_factor = self.softmax_factor.clamp(0.1, 100.0);
        self.vote_duration_secs = self.vote_duration_secs.max(1.0);
        self.vote_delay_secs = self.vote_delay_secs.max(0.0);
        self.tick_hz = self.tick_hz.max(0.1);
    }

    pub fn set_vote_options(&mut self, n: usize) {
        self.vote_options = n.max(2);
    }

    pub fn set_active_slots(&mut self, n: usize) {
        self.active_slots = n.max(1);
    }

    pub fn set_modifier_lifetime_secs(&mut self, secs: f64) {
        self.modifier_lifetime_secs = secs.max(1.0);
    }

    pub fn set_softmax_factor(&mut self, factor: f64) {
        self.softmax_factor = factor.clamp(0.1, 100.0);
    }

    pub fn set_vote_duration_secs(&mut self, secs: f64) {
        self.vote_duration_secs = secs.max(1.0);
    }

    pub fn set_vote_delay_secs(&mut self, secs: f64) {
        self.vote_delay_secs = secs.max(0.0);
    }

    pub fn set_tick_hz(&mut self, hz: f64) {
        self.tick_hz = hz.max(0.1);
    }

    pub fn vote_duration(&self) -> Duration {
        Duration::from_secs_f64(self.vote_duration_secs)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_hz)
    }
}

/// Configuration for the engine link and the collaborator surface.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Engine peer address for outbound requests
    pub peer_host: String,
    pub peer_port: u16,
    /// Local port the engine sends unsolicited requests to
    pub listen_port: u16,
    /// How long to wait for an acknowledgment before retrying
    pub ack_timeout: Duration,
    /// Send attempts before reporting failure
    pub retries: u32,
    /// Port the collaborator WebSocket endpoint binds to
    pub ws_port: u16,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            peer_host: "127.0.0.1".to_string(),
            peer_port: 5555,
            listen_port: 5556,
            ack_timeout: Duration::from_millis(1500),
            retries: 3,
            ws_port: 6574,
        }
    }
}

impl LinkConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut config = Self {
            peer_host: std::env::var("MODWHEEL_ENGINE_HOST")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.peer_host),
            peer_port: env_parse("MODWHEEL_ENGINE_PORT", defaults.peer_port),
            listen_port: env_parse("MODWHEEL_LISTEN_PORT", defaults.listen_port),
            ack_timeout: Duration::from_millis(env_parse(
                "MODWHEEL_ACK_TIMEOUT_MS",
                defaults.ack_timeout.as_millis() as u64,
            )),
            retries: env_parse("MODWHEEL_SEND_RETRIES", defaults.retries),
            ws_port: env_parse("MODWHEEL_WS_PORT", defaults.ws_port),
        };
        config.clamp();
        config
    }

    pub fn clamp(&mut self) {
        if self.ack_timeout < Duration::from_millis(50) {
            self.ack_timeout = Duration::from_millis(50);
        }
        self.retries = self.retries.max(1);
    }

    pub fn peer_addr(&self) -> String {
        format!("{}:{}", self.peer_host, self.peer_port)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_are_in_range() {
        let mut config = RotationConfig::default();
        let before = format!("{:?}", config);
        config.clamp();
        assert_eq!(before, format!("{:?}", config));
    }

    #[test]
    fn test_clamping_out_of_range_values() {
        let mut config = RotationConfig::default();
        config.set_vote_options(0);
        assert_eq!(config.vote_options, 2);
        config.set_vote_duration_secs(-5.0);
        assert_eq!(config.vote_duration_secs, 1.0);
        config.set_softmax_factor(0.0);
        assert!(config.softmax_factor > 0.0);
        config.set_softmax_factor(250.0);
        assert_eq!(config.softmax_factor, 100.0);
        config.set_vote_delay_secs(-1.0);
        assert_eq!(config.vote_delay_secs, 0.0);
        config.set_tick_hz(0.0);
        assert_eq!(config.tick_hz, 0.1);
        config.set_active_slots(0);
        assert_eq!(config.active_slots, 1);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("MODWHEEL_VOTE_OPTIONS", "4");
        std::env::set_var("MODWHEEL_CYCLE_MODE", "interval");
        std::env::set_var("MODWHEEL_VOTING_TYPE", "majority");
        let config = RotationConfig::from_env();
        assert_eq!(config.vote_options, 4);
        assert_eq!(config.cycle_mode, CycleMode::Interval);
        assert_eq!(config.voting_type, VotingType::Majority);
        std::env::remove_var("MODWHEEL_VOTE_OPTIONS");
        std::env::remove_var("MODWHEEL_CYCLE_MODE");
        std::env::remove_var("MODWHEEL_VOTING_TYPE");
    }

    #[test]
    #[serial]
    fn test_from_env_clamps_bad_values() {
        std::env::set_var("MODWHEEL_VOTE_OPTIONS", "1");
        std::env::set_var("MODWHEEL_VOTE_DURATION_SECS", "0");
        let config = RotationConfig::from_env();
        assert_eq!(config.vote_options, 2);
        assert_eq!(config.vote_duration_secs, 1.0);
        std::env::remove_var("MODWHEEL_VOTE_OPTIONS");
        std::env::remove_var("MODWHEEL_VOTE_DURATION_SECS");
    }

    #[test]
    #[serial]
    fn test_link_config_from_env() {
        std::env::set_var("MODWHEEL_SEND_RETRIES", "0");
        let config = LinkConfig::from_env();
        assert_eq!(config.retries, 1);
        std::env::remove_var("MODWHEEL_SEND_RETRIES");
    }
}
