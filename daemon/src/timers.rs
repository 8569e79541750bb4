//! Named one-shot deadlines.
//!
//! Each owner keeps one table keyed by its own timer enum. Scheduling a name
//! that is already pending replaces its deadline; dropping the table drops
//! every pending action with it.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Instant;

#[derive(Debug)]
pub struct Timers<K> {
    deadlines: HashMap<K, Instant>,
}

impl<K: Copy + Eq + Hash> Timers<K> {
    pub fn new() -> Self {
        Self {
            deadlines: HashMap::new(),
        }
    }

    pub fn schedule(&mut self, kind: K, at: Instant) {
        self.deadlines.insert(kind, at);
    }

    /// Schedule unless already pending, keeping the earlier deadline.
    pub fn schedule_once(&mut self, kind: K, at: Instant) {
        self.deadlines.entry(kind).or_insert(at);
    }

    pub fn cancel(&mut self, kind: K) {
        self.deadlines.remove(&kind);
    }

    pub fn is_scheduled(&self, kind: K) -> bool {
        self.deadlines.contains_key(&kind)
    }

    /// Remove and return every timer due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<K> {
        let mut due: Vec<(Instant, K)> = self
            .deadlines
            .iter()
            .filter(|&(_, &at)| at <= now)
            .map(|(&kind, &at)| (at, kind))
            .collect();
        due.sort_by_key(|&(at, _)| at);
        for (_, kind) in &due {
            self.deadlines.remove(kind);
        }
        due.into_iter().map(|(_, kind)| kind).collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}

impl<K: Copy + Eq + Hash> Default for Timers<K> {
    fn default() -> Self {
        Self::new()
    }
}
