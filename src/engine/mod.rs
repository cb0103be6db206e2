// Settlement engine - reconciles locally recorded pending work against an
// external source of truth.
//
// Flow per tick:
// 1. Ask the owning domain for its pending items
// 2. Skip items still inside their backoff window
// 3. Ask the resolver whether each eligible item reached a terminal outcome
// 4. Hand terminal outcomes back to the domain, which records them
pub mod poller;
pub mod schedule;

pub use poller::{EngineConfig, SettlementEngine, TickSummary};
pub use schedule::RetrySchedule;

use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

use crate::error::AppResult;

/// Anything the engine can track in its retry schedule
pub trait PendingItem: Send + Sync {
    fn pending_id(&self) -> Uuid;
}

/// Terminal outcome reported by a resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Resolved payload
    Succeeded(String),
    /// Failure reason
    Failed(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded(_))
    }
}

/// Answer to "is this item externally resolved?"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Not terminal yet. `None` lets the engine pick its default backoff.
    Pending { retry_after: Option<Duration> },
    Settled(Outcome),
}

impl Resolution {
    pub fn pending_after(retry_after: Duration) -> Self {
        Resolution::Pending {
            retry_after: Some(retry_after),
        }
    }

    pub fn succeeded(result: impl Into<String>) -> Self {
        Resolution::Settled(Outcome::Succeeded(result.into()))
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Resolution::Settled(Outcome::Failed(reason.into()))
    }
}

/// Strategy deciding whether a pending item has settled.
///
/// `Err` means the attempt itself failed (network, decoding) and must never be
/// read as a terminal outcome.
#[async_trait]
pub trait Resolver<T: PendingItem>: Send + Sync {
    async fn resolve(&self, item: &T) -> AppResult<Resolution>;

    /// Called once per tick with every identity still pending, so a resolver
    /// holding per-item state can drop entries for items settled elsewhere.
    fn retain_pending(&self, _pending: &HashSet<Uuid>) {}
}

/// Domain side of the engine: supplies pending work and records outcomes.
///
/// `settle` may be delivered more than once for the same item (a previous
/// store write failed, or another process got there first) and must reject
/// or ignore a second transition.
#[async_trait]
pub trait SettlementDomain: Send + Sync + 'static {
    type Item: PendingItem + 'static;

    fn name(&self) -> &'static str;

    async fn list_pending(&self) -> AppResult<Vec<Self::Item>>;

    async fn settle(&self, item: &Self::Item, outcome: Outcome) -> AppResult<()>;
}

/// Lifecycle-managed background component
#[async_trait]
pub trait BackgroundService: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> AppResult<()>;

    /// Waits for the worker to exit, at most `grace`.
    async fn stop(&self, grace: Duration) -> AppResult<()>;
}
