//! Per-cycle vote counters with voter deduplication.

use crate::types::VoterId;
use rand::Rng;
use std::collections::HashSet;

/// Vote counts aligned by index to the candidate pool, plus the set of
/// voters already counted this cycle.
#[derive(Debug, Clone, Default)]
pub struct VoteTally {
    counts: Vec<u32>,
    voters: HashSet<VoterId>,
}

impl VoteTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reallocate to `size` zeroed counters and clear the voter set.
    pub fn reset(&mut self, size: usize) {
        self.counts.clear();
        self.counts.resize(size, 0);
        self.voters.clear();
    }

    /// Count one vote. Double votes and out-of-range indices are silently
    /// ignored; returns whether the vote was counted.
    pub fn record(&mut self, index: usize, voter: &str) -> bool {
        if index >= self.counts.len() || voter.is_empty() {
            return false;
        }
        if self.voters.contains(voter) {
            return false;
        }
        self.voters.insert(voter.to_string());
        self.counts[index] += 1;
        true
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Zero a single counter; used when a candidate pool entry is replaced
    /// mid-cycle so the replacement does not inherit its predecessor's votes.
    pub fn clear_index(&mut self, index: usize) {
        if let Some(count) = self.counts.get_mut(index) {
            *count = 0;
        }
    }

    /// Index with the highest count; ties broken uniformly at random.
    pub fn winner_by_majority<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        let max = *self.counts.iter().max()?;
        let tied: Vec<usize> = self
            .counts
            .iter()
            .enumerate()
            .filter(|(_, &c)| c == max)
            .map(|(i, _)| i)
            .collect();
        Some(tied[rng.random_range(0..tied.len())])
    }

    /// Index drawn with probability proportional to counts.
    ///
    /// When no votes were cast at all, every counter gets an implicit floor
    /// of 1 so the draw is still valid and uniformly likely.
    pub fn winner_by_proportion<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        if self.counts.is_empty() {
            return None;
        }
        let floor = if self.total() == 0 { 1u32 } else { 0 };
        let effective: Vec<u32> = self.counts.iter().map(|&c| c.max(floor)).collect();
        let total: u32 = effective.iter().sum();

        let roll = rng.random_range(0..total);
        let mut cumulative = 0u32;
        for (i, &count) in effective.iter().enumerate() {
            cumulative += count;
            if roll < cumulative {
                return Some(i);
            }
        }
        // Unreachable while total > 0; keep the last index as a safe answer
        Some(effective.len() - 1)
    }
}
