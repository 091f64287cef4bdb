//! The voting-cycle state machine.
//!
//! A single periodic tick drives everything: slot decay, administrative
//! requests, scheduled opens, and closes. All mutation happens under the one
//! rotation lock so each tick observes a consistent snapshot. Anything that
//! talks to the engine goes through an mpsc to the engine worker task, so a
//! slow or unreachable peer never stalls tick timing.

use crate::config::RotationConfig;
use crate::protocol::EngineRequest;
use crate::selector;
use crate::state::{Rotation, RotationState};
use crate::types::{CycleMode, CyclePhase, ModifierKey, VotingType};
use rand::Rng;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Cross-thread requests applied at a defined point in the tick,
/// never mid-step.
#[derive(Debug, Clone)]
pub enum AdminRequest {
    /// Insert a modifier immediately, bypassing the vote; displaces the
    /// oldest active slot
    InsertModifier {
        key: ModifierKey,
        refresh_pool: bool,
    },
    /// Clear a named active slot
    RemoveModifier { name: String },
    ResetSlots,
    /// Forwarded to the engine worker, not handled locally
    Engine(EngineRequest),
    /// Open a vote now, bypassing the scheduled next-open time
    StartVote { duration_secs: Option<f64> },
    /// Close the open vote early, still computing a winner
    EndVote,
}

pub struct VotingCycleScheduler {
    state: RotationState,
    admin_rx: mpsc::UnboundedReceiver<AdminRequest>,
    engine_tx: mpsc::UnboundedSender<EngineRequest>,
    last_tick: Option<Instant>,
    prev_mode: Option<CycleMode>,
    /// Pending "start vote now" request and its optional duration override
    pending_start: Option<Option<f64>>,
    pending_end: bool,
}

impl VotingCycleScheduler {
    pub fn new(
        state: RotationState,
        admin_rx: mpsc::UnboundedReceiver<AdminRequest>,
        engine_tx: mpsc::UnboundedSender<EngineRequest>,
    ) -> Self {
        Self {
            state,
            admin_rx,
            engine_tx,
            last_tick: None,
            prev_mode: None,
            pending_start: None,
            pending_end: false,
        }
    }

    pub fn state(&self) -> &RotationState {
        &self.state
    }

    /// One scheduler tick. `now` is injected so tests can drive simulated
    /// time; the tick loop passes `Instant::now()`.
    pub async fn tick(&mut self, now: Instant) {
        let config = self.state.config.read().await.clone();
        let elapsed = match self.last_tick {
            Some(prev) => now.saturating_duration_since(prev),
            None => Duration::ZERO,
        };
        self.last_tick = Some(now);

        let rotation_lock = self.state.rotation.clone();
        let mut guard = rotation_lock.write().await;
        let rotation = &mut *guard;

        if rotation.paused {
            // Freeze the open timer and the next-open countdown by shifting
            // their reference points forward by the skipped delta; decay gets
            // no elapsed time at all.
            if let Some(at) = rotation.opened_at {
                rotation.opened_at = Some(at + elapsed);
            }
            if let Some(at) = rotation.next_open {
                rotation.next_open = Some(at + elapsed);
            }
        } else {
            rotation
                .slots
                .decay(elapsed.as_secs_f64(), config.modifier_lifetime_secs);
        }

        // Drain administrative requests in arrival order
        let mut requests = Vec::new();
        while let Ok(request) = self.admin_rx.try_recv() {
            requests.push(request);
        }
        for request in requests {
            self.apply_admin(rotation, &config, request);
        }

        // Mode transitions
        let mode_changed = self.prev_mode != Some(config.cycle_mode);
        self.prev_mode = Some(config.cycle_mode);
        if config.cycle_mode == CycleMode::Disabled {
            // Start/end requests queued before or during the disable must
            // not fire once the cycle is re-enabled
            self.pending_start = None;
            self.pending_end = false;
            if mode_changed {
                tracing::info!("cycle disabled, clearing vote state");
                rotation.pool.clear();
                rotation.tally.reset(0);
                rotation.phase = CyclePhase::Idle;
                rotation.opened_at = None;
                rotation.next_open = None;
                rotation.progress = 0.0;
            }
            return;
        }
        if mode_changed && rotation.phase == CyclePhase::Idle {
            // Covers startup, leaving Disabled (always via Idle), and
            // switching out of Triggered
            rotation.next_open = next_open_after(now, &config);
        }

        // A vote can neither open nor close while paused: the elapsed and
        // remaining computations below do not advance.
        if rotation.paused {
            return;
        }

        // Explicit start request bypasses the schedule; held pending until
        // engine data is valid
        if self.pending_start.is_some() && rotation.engine_data_valid() {
            let duration = self
                .pending_start
                .take()
                .flatten()
                .unwrap_or(config.vote_duration_secs);
            self.open_vote(rotation, now, duration, &config);
        }

        // Scheduled open
        if rotation.phase == CyclePhase::Idle
            && config.cycle_mode != CycleMode::Triggered
            && rotation.engine_data_valid()
        {
            if let Some(at) = rotation.next_open {
                if now >= at {
                    self.open_vote(rotation, now, config.vote_duration_secs, &config);
                }
            }
        }

        if rotation.phase == CyclePhase::Open {
            let opened_at = rotation.opened_at.unwrap_or(now);
            let open_elapsed = now.saturating_duration_since(opened_at);
            let end_requested = std::mem::take(&mut self.pending_end);
            if end_requested || open_elapsed >= rotation.vote_duration {
                self.close_vote(rotation, now, &config);
            } else {
                rotation.progress = (open_elapsed.as_secs_f64()
                    / rotation.vote_duration.as_secs_f64())
                .clamp(0.0, 1.0);
            }
        }
    }

    fn apply_admin(
        &mut self,
        rotation: &mut Rotation,
        config: &RotationConfig,
        request: AdminRequest,
    ) {
        match request {
            AdminRequest::InsertModifier { key, refresh_pool } => {
                let key = key.trim().to_lowercase();
                if key.is_empty() {
                    return;
                }
                let Some(name) = rotation.catalog.get(&key).map(|m| m.name.clone()) else {
                    tracing::warn!(%key, "insert request for unknown modifier ignored");
                    return;
                };
                tracing::info!(modifier = %name, "immediate insertion");
                rotation.slots.insert(&name);
                self.send_engine(EngineRequest::Winner {
                    winner: name,
                    time: config.modifier_lifetime_secs,
                });
                if refresh_pool {
                    self.refresh_pool(rotation, config);
                }
            }
            AdminRequest::RemoveModifier { name } => {
                let name = name.trim();
                if name.is_empty() {
                    return;
                }
                rotation.slots.remove_by_name(name);
            }
            AdminRequest::ResetSlots => rotation.slots.reset_all(),
            AdminRequest::Engine(request) => self.send_engine(request),
            AdminRequest::StartVote { duration_secs } => {
                self.pending_start = Some(duration_secs);
            }
            AdminRequest::EndVote => {
                // Only meaningful against a vote that is open right now
                self.pending_end = rotation.phase == CyclePhase::Open;
            }
        }
    }

    /// Replace candidate pool entries whose modifier has become active
    /// without running a full vote. The replacement's counter starts at
    /// zero; the voter set is untouched.
    fn refresh_pool(&self, rotation: &mut Rotation, config: &RotationConfig) {
        if rotation.phase != CyclePhase::Open {
            return;
        }
        let mut rng = rand::rng();
        let active = rotation.slots.names();
        for i in 0..rotation.pool.len() {
            let key = rotation.pool[i].clone();
            if key.is_empty() {
                continue;
            }
            let stale = match rotation.catalog.get(&key) {
                Some(m) => active.iter().any(|a| a.eq_ignore_ascii_case(&m.name)),
                // Key vanished from the catalog; also stale
                None => true,
            };
            if !stale {
                continue;
            }
            let pool = rotation.pool.clone();
            let eligible: Vec<(ModifierKey, u32)> = rotation
                .catalog
                .eligible(&active)
                .into_iter()
                .filter(|(k, _)| !pool.contains(k))
                .collect();
            rotation.pool[i] =
                selector::draw_one(&eligible, config.softmax_factor, &mut rng).unwrap_or_default();
            rotation.tally.clear_index(i);
        }
    }

    /// Open a vote at `now`. No-op until the engine has announced a game.
    fn open_vote(
        &self,
        rotation: &mut Rotation,
        now: Instant,
        duration_secs: f64,
        config: &RotationConfig,
    ) {
        if !rotation.engine_data_valid() {
            return;
        }
        let mut rng = rand::rng();
        let active = rotation.slots.names();
        let eligible = rotation.catalog.eligible(&active);
        // A pool shorter than the configured option count is fine
        let pool = selector::draw_without_replacement(
            &eligible,
            config.softmax_factor,
            config.vote_options,
            &mut rng,
        );
        tracing::debug!(candidates = ?pool, "vote opened");
        rotation.tally.reset(pool.len());
        rotation.pool = pool;
        rotation.phase = CyclePhase::Open;
        rotation.opened_at = Some(now);
        rotation.vote_duration = Duration::from_secs_f64(duration_secs.max(1.0));
        rotation.progress = 0.0;
        rotation.next_open = None;
    }

    /// Close the open vote, always computing a winner, then schedule the
    /// next open per cycle mode.
    fn close_vote(&self, rotation: &mut Rotation, now: Instant, config: &RotationConfig) {
        let mut rng = rand::rng();
        let winner_key = self.select_winner(rotation, config, &mut rng);
        rotation.phase = CyclePhase::Idle;
        rotation.opened_at = None;
        rotation.progress = 0.0;

        if let Some(key) = winner_key {
            if let Some(name) = rotation.catalog.get(&key).map(|m| m.name.clone()) {
                tracing::info!(winner = %name, votes = rotation.tally.total(), "vote closed");
                self.send_engine(EngineRequest::Winner {
                    winner: name.clone(),
                    time: config.modifier_lifetime_secs,
                });
                rotation.catalog.increment_usage(&key);
                rotation.slots.insert(&name);
            }
        } else {
            tracing::debug!("vote closed without a selectable winner");
        }

        if config.cycle_mode == CycleMode::Continuous {
            // No gap: reopen immediately with a fresh pool
            self.open_vote(rotation, now, config.vote_duration_secs, config);
        } else {
            rotation.pool.clear();
            rotation.tally.reset(0);
            rotation.next_open = next_open_after(now, config);
        }
    }

    fn select_winner<R: Rng + ?Sized>(
        &self,
        rotation: &Rotation,
        config: &RotationConfig,
        rng: &mut R,
    ) -> Option<ModifierKey> {
        match config.voting_type {
            VotingType::Authoritarian => {
                if !rotation.engine_data_valid() {
                    return None;
                }
                let eligible = rotation.catalog.eligible(&rotation.slots.names());
                selector::draw_one(&eligible, config.softmax_factor, rng)
            }
            VotingType::Proportional => rotation
                .tally
                .winner_by_proportion(rng)
                .and_then(|i| pool_key(rotation, i, rng)),
            VotingType::Majority => rotation
                .tally
                .winner_by_majority(rng)
                .and_then(|i| pool_key(rotation, i, rng)),
        }
    }

    fn send_engine(&self, request: EngineRequest) {
        if self.engine_tx.send(request).is_err() {
            tracing::warn!("engine worker gone, dropping outbound request");
        }
    }
}

/// Winning pool entry for a tally index. A cleared ("") entry can still win
/// the draw; fall back to a uniform pick among the remaining entries.
fn pool_key<R: Rng + ?Sized>(
    rotation: &Rotation,
    index: usize,
    rng: &mut R,
) -> Option<ModifierKey> {
    match rotation.pool.get(index) {
        Some(key) if !key.is_empty() => Some(key.clone()),
        _ => {
            let remaining: Vec<&ModifierKey> =
                rotation.pool.iter().filter(|k| !k.is_empty()).collect();
            if remaining.is_empty() {
                None
            } else {
                Some(remaining[rng.random_range(0..remaining.len())].clone())
            }
        }
    }
}

/// Next vote-open time after `now` for the given mode.
fn next_open_after(now: Instant, config: &RotationConfig) -> Option<Instant> {
    match config.cycle_mode {
        CycleMode::Continuous => Some(now),
        CycleMode::Interval => Some(now + Duration::from_secs_f64(config.vote_delay_secs)),
        CycleMode::Random => {
            let delay = if config.vote_delay_secs > 0.0 {
                rand::rng().random_range(0.0..=config.vote_delay_secs)
            } else {
                0.0
            };
            Some(now + Duration::from_secs_f64(delay))
        }
        CycleMode::Triggered | CycleMode::Disabled => None,
    }
}

/// Spawn the periodic tick loop at the configured rate. Exits promptly when
/// the shutdown flag flips.
pub fn spawn_tick_loop(mut scheduler: VotingCycleScheduler) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut shutdown = scheduler.state.shutdown_rx();
        loop {
            let period = scheduler.state.config.read().await.tick_period();
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    scheduler.tick(Instant::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("scheduler tick loop exited");
    })
}
