use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Longest backoff the schedule will honour
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Next eligible attempt per item, held in process memory only.
///
/// Absence means "eligible now". A restart forgets every backoff, so
/// resolution is at-least-once.
pub struct RetrySchedule {
    next_attempt: Mutex<HashMap<Uuid, Instant>>,
    default_backoff: Duration,
}

impl RetrySchedule {
    pub fn new(default_backoff: Duration) -> Self {
        Self {
            next_attempt: Mutex::new(HashMap::new()),
            default_backoff,
        }
    }

    pub fn should_attempt(&self, id: Uuid, now: Instant) -> bool {
        match self.next_attempt.lock().get(&id) {
            Some(next) => now >= *next,
            None => true,
        }
    }

    /// Zero or missing backoff falls back to the default; anything above
    /// `MAX_BACKOFF` is clamped.
    pub fn schedule_next(&self, id: Uuid, after: Option<Duration>) -> Instant {
        let after = match after {
            Some(after) if !after.is_zero() => after,
            _ => self.default_backoff,
        }
        .min(MAX_BACKOFF);
        let now = Instant::now();
        let next = now
            .checked_add(after)
            .or_else(|| now.checked_add(self.default_backoff))
            .unwrap_or(now);
        self.next_attempt.lock().insert(id, next);
        next
    }

    pub fn clear(&self, id: Uuid) {
        self.next_attempt.lock().remove(&id);
    }

    /// Drop entries for items the store no longer reports as pending
    pub fn retain_pending(&self, pending: &HashSet<Uuid>) -> usize {
        let mut next_attempt = self.next_attempt.lock();
        let before = next_attempt.len();
        next_attempt.retain(|id, _| pending.contains(id));
        let evicted = before - next_attempt.len();
        if evicted > 0 {
            debug!(evicted, "evicted stale retry schedule entries");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.next_attempt.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
