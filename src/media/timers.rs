//! Retry timer queue
//!
//! Engines never sleep. A failed attempt records a deadline here, keyed by
//! track, and the player's event loop wakes up for the earliest one. Keying
//! by track keeps at most one pending retry per track and lets a removal
//! cancel it.

use super::TrackKind;
use std::collections::HashMap;
use tokio::time::{Duration, Instant};

/// Identifies the pending retry of one track in one engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerKey {
    pub kind: TrackKind,
    pub track_id: String,
}

impl TimerKey {
    pub fn new(kind: TrackKind, track_id: impl Into<String>) -> Self {
        Self {
            kind,
            track_id: track_id.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct RetryTimers {
    deadlines: HashMap<TimerKey, Instant>,
}

impl RetryTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a deadline; returns true if it replaced a pending one
    pub fn schedule(&mut self, key: TimerKey, deadline: Instant) -> bool {
        self.deadlines.insert(key, deadline).is_some()
    }

    pub fn schedule_in(&mut self, key: TimerKey, now: Instant, delay: Duration) -> bool {
        self.schedule(key, now + delay)
    }

    pub fn cancel(&mut self, key: &TimerKey) -> bool {
        self.deadlines.remove(key).is_some()
    }

    pub fn deadline(&self, key: &TimerKey) -> Option<Instant> {
        self.deadlines.get(key).copied()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return every expired key, earliest first
    pub fn take_due(&mut self, now: Instant) -> Vec<TimerKey> {
        let mut due: Vec<(Instant, TimerKey)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, deadline)| (*deadline, key.clone()))
            .collect();
        due.sort();

        for (_, key) in &due {
            self.deadlines.remove(key);
        }
        due.into_iter().map(|(_, key)| key).collect()
    }

    /// Drop every pending timer; returns how many were pending
    pub fn clear(&mut self) -> usize {
        let count = self.deadlines.len();
        self.deadlines.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_timer_per_track_and_engine() {
        let now = Instant::now();
        let mut timers = RetryTimers::new();
        let key = TimerKey::new(TrackKind::Audio, "TR_a1");

        assert!(!timers.schedule_in(key.clone(), now, Duration::from_millis(500)));
        assert!(timers.schedule_in(key.clone(), now, Duration::from_millis(1000)));
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.deadline(&key), Some(now + Duration::from_millis(1000)));
    }

    #[test]
    fn take_due_returns_earliest_first() {
        let now = Instant::now();
        let mut timers = RetryTimers::new();
        timers.schedule_in(TimerKey::new(TrackKind::Video, "v"), now, Duration::from_millis(300));
        timers.schedule_in(TimerKey::new(TrackKind::Audio, "a"), now, Duration::from_millis(100));
        timers.schedule_in(TimerKey::new(TrackKind::Audio, "late"), now, Duration::from_secs(5));

        assert_eq!(timers.next_deadline(), Some(now + Duration::from_millis(100)));

        let due = timers.take_due(now + Duration::from_millis(300));
        assert_eq!(
            due,
            vec![TimerKey::new(TrackKind::Audio, "a"), TimerKey::new(TrackKind::Video, "v")]
        );
        assert_eq!(timers.len(), 1);
    }
}
