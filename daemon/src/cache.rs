//! Small time-bounded caches for values that are expensive to query
//! (subprocess output, X property lookups).

use std::time::{Duration, Instant};

/// A single cached value with the instant it was stored and a time-to-live.
#[derive(Debug, Clone)]
pub struct TtlCache<T> {
    value: Option<T>,
    timestamp: Option<Instant>,
    ttl: Duration,
}

impl<T> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            value: None,
            timestamp: None,
            ttl,
        }
    }

    /// The cached value, if it is still within its TTL at `now`.
    pub fn fresh(&self, now: Instant) -> Option<&T> {
        match (self.value.as_ref(), self.timestamp) {
            (Some(value), Some(at)) if now.saturating_duration_since(at) < self.ttl => Some(value),
            _ => None,
        }
    }

    /// The cached value regardless of age (last known good).
    pub fn stale(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn store(&mut self, value: T, now: Instant) {
        self.value = Some(value);
        self.timestamp = Some(now);
    }

    /// Force the next lookup to miss while keeping the last known value.
    pub fn invalidate(&mut self) {
        self.timestamp = None;
    }
}
