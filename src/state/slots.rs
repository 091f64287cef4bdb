//! Active-modifier slot bookkeeping.

use crate::types::ActiveSlot;

/// Fixed-size array of currently-in-effect modifiers with a decaying
/// remaining-life fraction per slot.
#[derive(Debug, Clone)]
pub struct ActiveSlots {
    slots: Vec<ActiveSlot>,
}

impl ActiveSlots {
    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![ActiveSlot::empty(); size],
        }
    }

    /// Subtract `elapsed / lifetime` from every slot. No floor at zero:
    /// negative life means "overdue", shown as expired until replaced.
    pub fn decay(&mut self, elapsed_secs: f64, lifetime_secs: f64) {
        if lifetime_secs <= 0.0 {
            return;
        }
        let delta = elapsed_secs / lifetime_secs;
        for slot in &mut self.slots {
            slot.life -= delta;
        }
    }

    /// Place a new winner in the slot with the smallest remaining life
    /// (the oldest), resetting that slot's life to 1.0.
    pub fn insert(&mut self, display_name: &str) {
        let oldest = self
            .slots
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.life.total_cmp(&b.life))
            .map(|(i, _)| i);
        if let Some(i) = oldest {
            self.slots[i].name = display_name.to_string();
            self.slots[i].life = 1.0;
        }
    }

    /// Clear the first slot whose name matches case-insensitively.
    /// No-op if nothing matches.
    pub fn remove_by_name(&mut self, name: &str) {
        if let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| !s.name.is_empty() && s.name.eq_ignore_ascii_case(name))
        {
            slot.name.clear();
            slot.life = 0.0;
        }
    }

    pub fn reset_all(&mut self) {
        for slot in &mut self.slots {
            slot.name.clear();
            slot.life = 0.0;
        }
    }

    /// Change the slot count, keeping existing slots where possible.
    pub fn resize(&mut self, size: usize) {
        self.slots.resize(size, ActiveSlot::empty());
    }

    /// Display names of occupied slots.
    pub fn names(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|s| !s.name.is_empty())
            .map(|s| s.name.clone())
            .collect()
    }

    pub fn slots(&self) -> &[ActiveSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decay_allows_negative_life() {
        let mut slots = ActiveSlots::new(2);
        slots.insert("Moon Gravity");
        slots.decay(90.0, 180.0);
        assert!((slots.slots()[0].life - 0.5).abs() < 1e-9 || (slots.slots()[1].life - 0.5).abs() < 1e-9);

        slots.decay(360.0, 180.0);
        assert!(slots.slots().iter().any(|s| s.life < 0.0));
    }

    #[test]
    fn test_insert_replaces_minimum_life_slot() {
        let mut slots = ActiveSlots::new(3);
        slots.slots[0] = ActiveSlot {
            name: "A".to_string(),
            life: 0.8,
        };
        slots.slots[1] = ActiveSlot {
            name: "B".to_string(),
            life: 0.1,
        };
        slots.slots[2] = ActiveSlot {
            name: "C".to_string(),
            life: 0.5,
        };

        slots.insert("Winner");

        assert_eq!(slots.slots()[1].name, "Winner");
        assert_eq!(slots.slots()[1].life, 1.0);
        assert_eq!(slots.slots()[0].name, "A");
        assert_eq!(slots.slots()[2].name, "C");
    }

    #[test]
    fn test_insert_prefers_empty_slots() {
        let mut slots = ActiveSlots::new(2);
        slots.insert("First");
        slots.insert("Second");
        let names = slots.names();
        assert!(names.contains(&"First".to_string()));
        assert!(names.contains(&"Second".to_string()));
    }

    #[test]
    fn test_remove_by_name_case_insensitive() {
        let mut slots = ActiveSlots::new(2);
        slots.insert("Moon Gravity");
        slots.remove_by_name("moon gravity");
        assert!(slots.names().is_empty());
        assert_eq!(slots.slots().iter().map(|s| s.life).sum::<f64>(), 0.0);

        // Unknown name is a no-op
        slots.insert("Drunk Controls");
        slots.remove_by_name("nope");
        assert_eq!(slots.names(), vec!["Drunk Controls"]);
    }

    #[test]
    fn test_reset_all() {
        let mut slots = ActiveSlots::new(3);
        slots.insert("A");
        slots.insert("B");
        slots.reset_all();
        assert!(slots.names().is_empty());
        assert!(slots.slots().iter().all(|s| s.life == 0.0));
    }

    #[test]
    fn test_resize_preserves_existing() {
        let mut slots = ActiveSlots::new(2);
        slots.insert("A");
        slots.resize(4);
        assert_eq!(slots.len(), 4);
        assert!(slots.names().contains(&"A".to_string()));
        slots.resize(1);
        assert_eq!(slots.len(), 1);
    }
}
