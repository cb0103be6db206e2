use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::engine::{PendingItem, Resolution, Resolver};
use crate::error::AppResult;

pub const TIMEOUT_MESSAGE: &str = "timeout waiting for confirmation";

const FALLBACK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Fails items that stay unconfirmed for longer than `timeout`.
///
/// There is no external channel behind it; the clock starts the first time an
/// item is seen, so a restart grants every item a fresh timeout. Once expired,
/// an item keeps failing until it leaves the pending set.
pub struct TimeoutResolver {
    timeout: Duration,
    first_seen: Mutex<HashMap<Uuid, Instant>>,
}

impl TimeoutResolver {
    pub fn new(timeout: Duration) -> Self {
        let timeout = if timeout.is_zero() {
            FALLBACK_TIMEOUT
        } else {
            timeout
        };
        Self {
            timeout,
            first_seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Items currently carrying a first-seen timestamp
    pub fn tracked(&self) -> usize {
        self.first_seen.lock().len()
    }

    fn poll_interval(&self) -> Duration {
        self.timeout / 4
    }
}

#[async_trait]
impl<T: PendingItem> Resolver<T> for TimeoutResolver {
    async fn resolve(&self, item: &T) -> AppResult<Resolution> {
        let id = item.pending_id();
        let now = Instant::now();
        let mut first_seen = self.first_seen.lock();

        let seen_at = *first_seen.entry(id).or_insert(now);
        if now.duration_since(seen_at) >= self.timeout {
            debug!(item_id = %id, "confirmation timeout elapsed");
            return Ok(Resolution::failed(TIMEOUT_MESSAGE));
        }

        Ok(Resolution::pending_after(self.poll_interval()))
    }

    fn retain_pending(&self, pending: &HashSet<Uuid>) {
        let mut first_seen = self.first_seen.lock();
        let before = first_seen.len();
        first_seen.retain(|id, _| pending.contains(id));
        let evicted = before - first_seen.len();
        if evicted > 0 {
            debug!(evicted, "dropped timeout clocks for settled items");
        }
    }
}
