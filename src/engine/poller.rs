use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{BackgroundService, PendingItem, Resolution, Resolver, RetrySchedule, SettlementDomain};
use crate::error::{AppError, AppResult};

/// Settlement engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Tick interval, also the default backoff
    pub interval: Duration,
}

impl EngineConfig {
    pub fn every(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::every(Duration::from_secs(15))
    }
}

/// What a single reconciliation pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Items returned by the pending query
    pub pending: usize,
    /// Items handed to the resolver
    pub attempted: usize,
    /// Items skipped because their backoff has not elapsed
    pub deferred: usize,
    /// Items the resolver reported as not yet terminal
    pub unresolved: usize,
    /// Items whose terminal outcome was recorded
    pub settled: usize,
    /// Resolver or settlement failures
    pub errors: usize,
}

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct EngineCore<D: SettlementDomain> {
    domain: Arc<D>,
    resolver: Option<Arc<dyn Resolver<D::Item>>>,
    interval: Duration,
    schedule: RetrySchedule,
}

/// Generic pending-work poller.
///
/// One worker per engine, items resolved strictly one after another, so a
/// given item never has two resolutions in flight from the same instance.
pub struct SettlementEngine<D: SettlementDomain> {
    core: Arc<EngineCore<D>>,
    worker: Mutex<Option<Worker>>,
}

impl<D: SettlementDomain> SettlementEngine<D> {
    pub fn new(
        domain: Arc<D>,
        resolver: Option<Arc<dyn Resolver<D::Item>>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            core: Arc::new(EngineCore {
                domain,
                resolver,
                interval: config.interval,
                schedule: RetrySchedule::new(config.interval),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Run one reconciliation pass on the caller's task
    pub async fn tick(&self) -> TickSummary {
        self.core.run_tick(None).await
    }

    pub async fn is_running(&self) -> bool {
        self.worker.lock().await.is_some()
    }

    /// Number of items currently holding a backoff entry
    pub fn tracked(&self) -> usize {
        self.core.schedule.len()
    }

    pub fn interval(&self) -> Duration {
        self.core.interval
    }
}

impl<D: SettlementDomain> EngineCore<D> {
    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let summary = self.run_tick(Some(&shutdown)).await;
                    if summary.attempted > 0 || summary.errors > 0 {
                        debug!(engine = self.domain.name(), ?summary, "settlement tick finished");
                    }
                }
            }
        }

        debug!(engine = self.domain.name(), "settlement worker exited");
    }

    async fn run_tick(&self, shutdown: Option<&watch::Receiver<bool>>) -> TickSummary {
        let mut summary = TickSummary::default();
        let engine = self.domain.name();

        let Some(resolver) = self.resolver.as_ref() else {
            return summary;
        };

        let items = match self.domain.list_pending().await {
            Ok(items) => items,
            Err(err) => {
                warn!(engine, error = %err, "list pending items failed");
                summary.errors += 1;
                return summary;
            }
        };
        summary.pending = items.len();

        let pending: HashSet<Uuid> = items.iter().map(PendingItem::pending_id).collect();
        self.schedule.retain_pending(&pending);
        resolver.retain_pending(&pending);

        let now = Instant::now();
        for item in &items {
            if shutdown.map_or(false, |rx| *rx.borrow()) {
                debug!(engine, "cancellation observed mid-tick");
                break;
            }

            let id = item.pending_id();
            if !self.schedule.should_attempt(id, now) {
                summary.deferred += 1;
                continue;
            }
            summary.attempted += 1;

            let outcome = match resolver.resolve(item).await {
                Ok(Resolution::Settled(outcome)) => outcome,
                Ok(Resolution::Pending { retry_after }) => {
                    self.schedule.schedule_next(id, retry_after);
                    summary.unresolved += 1;
                    continue;
                }
                Err(err) => {
                    warn!(engine, item_id = %id, error = %err, "resolver error");
                    self.schedule.schedule_next(id, None);
                    summary.errors += 1;
                    continue;
                }
            };

            let success = outcome.is_success();
            match self.domain.settle(item, outcome).await {
                Ok(()) => {
                    info!(engine, item_id = %id, success, "pending item settled");
                    self.schedule.clear(id);
                    summary.settled += 1;
                }
                Err(err) if err.is_settlement_conflict() => {
                    info!(engine, item_id = %id, "item already settled elsewhere");
                    self.schedule.clear(id);
                }
                Err(err) => {
                    warn!(engine, item_id = %id, error = %err, "settlement callback failed");
                    self.schedule.schedule_next(id, None);
                    summary.errors += 1;
                }
            }
        }

        summary
    }
}

#[async_trait]
impl<D: SettlementDomain> BackgroundService for SettlementEngine<D> {
    fn name(&self) -> &str {
        self.core.domain.name()
    }

    async fn start(&self) -> AppResult<()> {
        let engine = self.core.domain.name();
        if self.core.resolver.is_none() {
            warn!(engine, "resolver not configured; settlement engine disabled");
            return Ok(());
        }

        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return Ok(());
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let core = self.core.clone();
        let handle = tokio::spawn(core.run(shutdown_rx));
        *worker = Some(Worker { shutdown, handle });

        info!(
            engine,
            interval_secs = self.core.interval.as_secs_f64(),
            "settlement engine started"
        );
        Ok(())
    }

    async fn stop(&self, grace: Duration) -> AppResult<()> {
        let engine = self.core.domain.name();
        let Some(worker) = self.worker.lock().await.take() else {
            return Ok(());
        };

        // Receiver may already be gone if the worker panicked
        let _ = worker.shutdown.send(true);

        match tokio::time::timeout(grace, worker.handle).await {
            Ok(Ok(())) => {
                info!(engine, "settlement engine stopped");
                Ok(())
            }
            Ok(Err(join_err)) => {
                error!(engine, error = %join_err, "settlement worker terminated abnormally");
                Ok(())
            }
            Err(_) => {
                warn!(engine, ?grace, "settlement worker still draining after grace period");
                Err(AppError::ShutdownTimeout {
                    service: engine.to_string(),
                    grace,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Outcome;
    use crate::error::LedgerError;
    use crate::gasbank::models::TransactionStatus;
    use crate::resolver::timeout::{TimeoutResolver, TIMEOUT_MESSAGE};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const INTERVAL: Duration = Duration::from_secs(10);

    #[derive(Debug, Clone)]
    struct Job {
        id: Uuid,
    }

    impl PendingItem for Job {
        fn pending_id(&self) -> Uuid {
            self.id
        }
    }

    #[derive(Default)]
    struct FakeDomain {
        pending: parking_lot::Mutex<Vec<Job>>,
        settled: parking_lot::Mutex<Vec<(Uuid, Outcome)>>,
        settle_failures: AtomicUsize,
        conflict: std::sync::atomic::AtomicBool,
    }

    impl FakeDomain {
        fn with_jobs(count: usize) -> Arc<Self> {
            let domain = Self::default();
            *domain.pending.lock() = (0..count).map(|_| Job { id: Uuid::new_v4() }).collect();
            Arc::new(domain)
        }

        fn first_id(&self) -> Uuid {
            self.pending.lock()[0].id
        }
    }

    #[async_trait]
    impl SettlementDomain for FakeDomain {
        type Item = Job;

        fn name(&self) -> &'static str {
            "fake-settlement"
        }

        async fn list_pending(&self) -> AppResult<Vec<Job>> {
            Ok(self.pending.lock().clone())
        }

        async fn settle(&self, item: &Job, outcome: Outcome) -> AppResult<()> {
            if self.conflict.load(Ordering::SeqCst) {
                return Err(LedgerError::AlreadySettled {
                    transaction_id: item.id,
                    status: TransactionStatus::Completed,
                }
                .into());
            }
            if self.settle_failures.load(Ordering::SeqCst) > 0 {
                self.settle_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(AppError::Internal("store unavailable".to_string()));
            }
            self.pending.lock().retain(|job| job.id != item.id);
            self.settled.lock().push((item.id, outcome));
            Ok(())
        }
    }

    /// Replays scripted answers, then repeats the fallback
    struct ScriptedResolver {
        script: parking_lot::Mutex<VecDeque<AppResult<Resolution>>>,
        fallback: Resolution,
        calls: AtomicUsize,
    }

    impl ScriptedResolver {
        fn new(script: Vec<AppResult<Resolution>>, fallback: Resolution) -> Arc<Self> {
            Arc::new(Self {
                script: parking_lot::Mutex::new(script.into()),
                fallback,
                calls: AtomicUsize::new(0),
            })
        }

        fn always(resolution: Resolution) -> Arc<Self> {
            Self::new(Vec::new(), resolution)
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Resolver<Job> for ScriptedResolver {
        async fn resolve(&self, _item: &Job) -> AppResult<Resolution> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().pop_front() {
                Some(answer) => answer,
                None => Ok(self.fallback.clone()),
            }
        }
    }

    /// Blocks inside resolve until the test is over
    struct StuckResolver {
        entered: Arc<Notify>,
    }

    #[async_trait]
    impl Resolver<Job> for StuckResolver {
        async fn resolve(&self, _item: &Job) -> AppResult<Resolution> {
            self.entered.notify_one();
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Resolution::succeeded("late"))
        }
    }

    /// Takes a while on every item, counting calls
    struct SlowResolver {
        entered: Arc<Notify>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Resolver<Job> for SlowResolver {
        async fn resolve(&self, _item: &Job) -> AppResult<Resolution> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Resolution::succeeded("done"))
        }
    }

    fn engine(
        domain: Arc<FakeDomain>,
        resolver: Arc<dyn Resolver<Job>>,
    ) -> SettlementEngine<FakeDomain> {
        SettlementEngine::new(domain, Some(resolver), EngineConfig::every(INTERVAL))
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_respected() {
        let domain = FakeDomain::with_jobs(1);
        let resolver = ScriptedResolver::always(Resolution::pending_after(Duration::from_secs(30)));
        let engine = engine(domain.clone(), resolver.clone());

        let summary = engine.tick().await;
        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.unresolved, 1);
        assert_eq!(resolver.calls(), 1);

        tokio::time::advance(Duration::from_secs(29)).await;
        let summary = engine.tick().await;
        assert_eq!(summary.deferred, 1);
        assert_eq!(summary.attempted, 0);
        assert_eq!(resolver.calls(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        let summary = engine.tick().await;
        assert_eq!(summary.attempted, 1);
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_settles_and_clears_schedule() {
        let domain = FakeDomain::with_jobs(2);
        let resolver = ScriptedResolver::always(Resolution::succeeded("0xabc"));
        let engine = engine(domain.clone(), resolver.clone());

        let summary = engine.tick().await;
        assert_eq!(summary.settled, 2);
        assert_eq!(engine.tracked(), 0);
        assert!(domain
            .settled
            .lock()
            .iter()
            .all(|(_, outcome)| *outcome == Outcome::Succeeded("0xabc".to_string())));

        // Terminal items are gone from the pending query, nothing more to do
        let summary = engine.tick().await;
        assert_eq!(summary, TickSummary::default());
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_outcome_is_forwarded() {
        let domain = FakeDomain::with_jobs(1);
        let id = domain.first_id();
        let resolver = ScriptedResolver::always(Resolution::failed("reverted"));
        let engine = engine(domain.clone(), resolver);

        engine.tick().await;
        assert_eq!(
            domain.settled.lock().as_slice(),
            &[(id, Outcome::Failed("reverted".to_string()))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_uses_default_backoff() {
        let domain = FakeDomain::with_jobs(1);
        let resolver = ScriptedResolver::new(
            vec![Err(AppError::ExternalError("connection reset".to_string()))],
            Resolution::succeeded("ok"),
        );
        let engine = engine(domain.clone(), resolver.clone());

        let summary = engine.tick().await;
        assert_eq!(summary.errors, 1);
        assert_eq!(engine.tracked(), 1);
        assert!(domain.settled.lock().is_empty());

        tokio::time::advance(INTERVAL - Duration::from_secs(1)).await;
        assert_eq!(engine.tick().await.deferred, 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(engine.tick().await.settled, 1);
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_failure_keeps_item_pending() {
        let domain = FakeDomain::with_jobs(1);
        domain.settle_failures.store(1, Ordering::SeqCst);
        let resolver = ScriptedResolver::always(Resolution::succeeded("ok"));
        let engine = engine(domain.clone(), resolver.clone());

        let summary = engine.tick().await;
        assert_eq!(summary.errors, 1);
        assert_eq!(domain.pending.lock().len(), 1);

        tokio::time::advance(INTERVAL).await;
        let summary = engine.tick().await;
        assert_eq!(summary.settled, 1);
        assert_eq!(resolver.calls(), 2);
        assert!(domain.pending.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_clears_schedule_without_error() {
        let domain = FakeDomain::with_jobs(1);
        domain.conflict.store(true, Ordering::SeqCst);
        let resolver = ScriptedResolver::always(Resolution::succeeded("ok"));
        let engine = engine(domain.clone(), resolver);

        let summary = engine.tick().await;
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.settled, 0);
        assert_eq!(engine.tracked(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_stuck_item_does_not_starve_others() {
        let domain = FakeDomain::with_jobs(3);
        let resolver = ScriptedResolver::new(
            vec![Err(AppError::ExternalError("timeout".to_string()))],
            Resolution::succeeded("ok"),
        );
        let engine = engine(domain.clone(), resolver);

        let summary = engine.tick().await;
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.settled, 2);
        assert_eq!(domain.pending.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_outcome_redelivered_after_callback_failure() {
        let domain = FakeDomain::with_jobs(1);
        let id = domain.first_id();
        domain.settle_failures.store(1, Ordering::SeqCst);
        let engine = engine(
            domain.clone(),
            Arc::new(TimeoutResolver::new(Duration::from_secs(40))),
        );

        for _ in 0..4 {
            assert_eq!(engine.tick().await.unresolved, 1);
            tokio::time::advance(INTERVAL).await;
        }

        let summary = engine.tick().await;
        assert_eq!(summary.errors, 1);
        assert!(domain.settled.lock().is_empty());

        tokio::time::advance(INTERVAL).await;
        let summary = engine.tick().await;
        assert_eq!(summary.settled, 1);
        assert_eq!(
            domain.settled.lock().as_slice(),
            &[(id, Outcome::Failed(TIMEOUT_MESSAGE.to_string()))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_prunes_resolver_state() {
        let domain = FakeDomain::with_jobs(3);
        let resolver = Arc::new(TimeoutResolver::new(Duration::from_secs(60)));
        let engine = engine(domain.clone(), resolver.clone());

        engine.tick().await;
        assert_eq!(resolver.tracked(), 3);
        assert_eq!(engine.tracked(), 3);

        // Two items settled out of band
        domain.pending.lock().truncate(1);
        let summary = engine.tick().await;
        assert_eq!(summary.deferred, 1);
        assert_eq!(resolver.tracked(), 1);
        assert_eq!(engine.tracked(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_finishes_current_item_then_exits() {
        let domain = FakeDomain::with_jobs(3);
        let entered = Arc::new(Notify::new());
        let resolver = Arc::new(SlowResolver {
            entered: entered.clone(),
            calls: AtomicUsize::new(0),
        });
        let engine = engine(domain.clone(), resolver.clone());

        engine.start().await.unwrap();
        entered.notified().await;

        engine.stop(Duration::from_secs(60)).await.unwrap();
        assert!(!engine.is_running().await);

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(domain.settled.lock().len(), 1);
        assert_eq!(domain.pending.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_start_without_resolver_is_disabled() {
        let domain = FakeDomain::with_jobs(1);
        let engine = SettlementEngine::new(domain, None, EngineConfig::every(INTERVAL));

        engine.start().await.unwrap();
        assert!(!engine.is_running().await);
        assert_eq!(engine.tick().await, TickSummary::default());
        engine.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_lifecycle() {
        let domain = FakeDomain::with_jobs(1);
        let resolver = ScriptedResolver::always(Resolution::succeeded("ok"));
        let engine = engine(domain.clone(), resolver.clone());

        engine.start().await.unwrap();
        engine.start().await.unwrap();
        assert!(engine.is_running().await);

        // No tick before the first interval elapses
        tokio::time::sleep(INTERVAL / 2).await;
        assert_eq!(resolver.calls(), 0);

        tokio::time::sleep(INTERVAL).await;
        assert_eq!(resolver.calls(), 1);
        assert!(domain.pending.lock().is_empty());

        engine.stop(Duration::from_secs(1)).await.unwrap();
        assert!(!engine.is_running().await);
        engine.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_reports_deadline_exceeded() {
        let domain = FakeDomain::with_jobs(1);
        let entered = Arc::new(Notify::new());
        let resolver = Arc::new(StuckResolver {
            entered: entered.clone(),
        });
        let engine = engine(domain, resolver);

        engine.start().await.unwrap();
        entered.notified().await;

        let err = engine.stop(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, AppError::ShutdownTimeout { .. }));
        assert!(!engine.is_running().await);
    }
}
