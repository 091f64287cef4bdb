//! In-memory registry of the modifiers the engine announced.

use crate::types::{Modifier, ModifierKey};
use std::collections::BTreeMap;

/// The modifier catalog for the current game.
///
/// Keyed by lowercase modifier key; iteration order is the sorted key order,
/// which keeps selection's cumulative walk stable. The catalog is replaced
/// wholesale whenever the engine announces a new game.
#[derive(Debug, Clone, Default)]
pub struct ModifierCatalog {
    entries: BTreeMap<ModifierKey, Modifier>,
    /// Keys of enabled modifiers, rebuilt on every mutation
    enabled_index: Vec<ModifierKey>,
}

impl ModifierCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically swap in a new catalog.
    ///
    /// Usage counts carry forward for keys present in both the old and new
    /// sets; keys new to this catalog start at zero.
    pub fn replace(&mut self, new_entries: Vec<Modifier>) {
        let old = std::mem::take(&mut self.entries);
        for mut modifier in new_entries {
            modifier.key = modifier.key.to_lowercase();
            if modifier.key.is_empty() {
                continue;
            }
            if let Some(previous) = old.get(&modifier.key) {
                modifier.usage = previous.usage;
            } else {
                modifier.usage = 0;
            }
            self.entries.insert(modifier.key.clone(), modifier);
        }
        self.rebuild_enabled_index();
    }

    /// Toggle one modifier's eligibility for future candidate pools.
    /// Returns false for unknown keys. Has no effect on an already-built
    /// candidate pool.
    pub fn set_enabled(&mut self, key: &str, enabled: bool) -> bool {
        let key = key.to_lowercase();
        match self.entries.get_mut(&key) {
            Some(modifier) => {
                modifier.enabled = enabled;
                self.rebuild_enabled_index();
                true
            }
            None => false,
        }
    }

    /// Description text for a modifier, or None if the key is unknown.
    pub fn describe(&self, key: &str) -> Option<String> {
        self.entries
            .get(&key.to_lowercase())
            .map(|m| m.description.clone())
    }

    pub fn get(&self, key: &str) -> Option<&Modifier> {
        self.entries.get(&key.to_lowercase())
    }

    /// Record a cycle win for anti-repetition weighting.
    pub fn increment_usage(&mut self, key: &str) {
        if let Some(modifier) = self.entries.get_mut(&key.to_lowercase()) {
            modifier.usage = modifier.usage.saturating_add(1);
        }
    }

    /// Enabled modifiers whose display name is not currently active,
    /// as `(key, usage)` pairs in stable (sorted key) order.
    ///
    /// Never cached by callers: selection recomputes this before every draw
    /// so no stale subset survives a catalog mutation.
    pub fn eligible(&self, active_names: &[String]) -> Vec<(ModifierKey, u32)> {
        self.enabled_index
            .iter()
            .filter_map(|key| self.entries.get(key))
            .filter(|m| {
                !active_names
                    .iter()
                    .any(|active| active.eq_ignore_ascii_case(&m.name))
            })
            .map(|m| (m.key.clone(), m.usage))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Modifier> {
        self.entries.values()
    }

    fn rebuild_enabled_index(&mut self) {
        self.enabled_index = self
            .entries
            .values()
            .filter(|m| m.enabled)
            .map(|m| m.key.clone())
            .collect();
    }
}
